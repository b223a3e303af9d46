pub mod algorithms;
pub mod config;
pub mod error;
pub mod models;
pub mod services;
pub mod utils;

pub use config::Config;
pub use error::{RecError, RecResult};
pub use models::*;

use anyhow::Result;
use services::model_store::{FileModelStore, ModelStore};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub recommendation_service: Arc<services::recommendation::RecommendationService>,
    pub training_service: Arc<services::training::TrainingService>,
}

impl AppState {
    pub async fn new(config: Config) -> Result<Self> {
        let config = Arc::new(config);

        let source = services::data_source::from_config(&config.data_source)?;
        let sink = services::delivery::from_config(&config.delivery)?;
        let store: Arc<dyn ModelStore> = Arc::new(FileModelStore::from_config(&config.storage));

        let recommendation_service = Arc::new(services::recommendation::RecommendationService::new(
            source.clone(),
            sink,
            Some(store.clone()),
            config.clone(),
        ));

        let training_service = Arc::new(services::training::TrainingService::new(
            source,
            store,
            config.clone(),
        ));

        Ok(Self {
            config,
            recommendation_service,
            training_service,
        })
    }
}

pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
}
