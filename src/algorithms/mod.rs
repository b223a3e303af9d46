pub mod encoder;
pub mod features;
pub mod initializer;
pub mod labeler;
pub mod optimizer;
pub mod retriever;
pub mod scorer;
pub mod similarity;

pub use encoder::{encode, encode_with_layout, reconcile, AttributeVector, EncodedAttributes, FeatureLayout, Vocabulary};
pub use labeler::{label, label_matrix, LabelBuckets};
pub use retriever::{recommend, AggregationPolicy, InteractionRetriever};
pub use scorer::{train, AffinityScore, AffinityScorer, LabeledPairs};
pub use similarity::{build_similarity_index, SimilarityMatrix};
