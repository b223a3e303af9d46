pub mod data_source;
pub mod delivery;
pub mod model_store;
pub mod recommendation;
pub mod routing;
pub mod training;
