use crate::algorithms::initializer::InitializationMethod;
use crate::algorithms::optimizer::OptimizerKind;
use crate::algorithms::retriever::AggregationPolicy;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub data_source: DataSourceConfig,
    pub routing: RoutingConfig,
    pub training: TrainingConfig,
    pub index: IndexConfig,
    pub retrieval: RetrievalConfig,
    pub delivery: DeliveryConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub workers: usize,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(format!("{}:{}", self.host, self.port).parse()?)
    }

    /// Multi-threaded runtime sized by `workers`.
    pub fn build_runtime(&self) -> std::io::Result<tokio::runtime::Runtime> {
        tokio::runtime::Builder::new_multi_thread()
            .worker_threads(self.workers)
            .enable_all()
            .build()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Http,
    Snapshot,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataSourceConfig {
    pub kind: SourceKind,
    pub base_url: String,
    pub auth_header: Option<String>,
    pub products_path: String,
    pub users_path: String,
    pub interactions_path: String,
    pub snapshot_dir: PathBuf,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingConfig {
    /// Users with at most this many orders go to the preference cohort.
    pub order_count_threshold: u64,
    pub min_rating_count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingConfig {
    pub hidden_layers: Vec<usize>,
    pub learning_rate: f64,
    pub epochs: usize,
    pub batch_size: usize,
    pub validation_fraction: f64,
    pub num_classes: usize,
    pub seed: u64,
    pub optimizer: OptimizerKind,
    pub initialization: InitializationMethod,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    pub include_numeric_tokens: bool,
    pub large_catalog_warning: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    pub top_n: usize,
    pub aggregation: AggregationPolicy,
    pub exclude_seen: bool,
    /// Responses kept per index generation; 0 disables caching.
    pub cache_capacity: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SinkKind {
    Http,
    Log,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryConfig {
    pub kind: SinkKind,
    pub endpoint: String,
    pub auth_header: Option<String>,
    pub model_tag: String,
    pub concurrency: usize,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub model_dir: PathBuf,
    pub model_name: String,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            hidden_layers: vec![128, 64, 32],
            learning_rate: 0.001,
            epochs: 7,
            batch_size: 32,
            validation_fraction: 0.5,
            num_classes: 4,
            seed: 42,
            optimizer: OptimizerKind::Adam,
            initialization: InitializationMethod::XavierUniform,
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_n: 20,
            aggregation: AggregationPolicy::Sum,
            exclude_seen: false,
            cache_capacity: 10_000,
        }
    }
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            include_numeric_tokens: false,
            large_catalog_warning: 5_000,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8080,
                workers: num_cpus::get(),
            },
            data_source: DataSourceConfig {
                kind: SourceKind::Snapshot,
                base_url: "http://localhost:8000".to_string(),
                auth_header: None,
                products_path: "/product".to_string(),
                users_path: "/pref".to_string(),
                interactions_path: "/order".to_string(),
                snapshot_dir: PathBuf::from("data"),
                timeout_secs: 30,
            },
            routing: RoutingConfig {
                order_count_threshold: 5,
                min_rating_count: 0,
            },
            training: TrainingConfig::default(),
            index: IndexConfig::default(),
            retrieval: RetrievalConfig::default(),
            delivery: DeliveryConfig {
                kind: SinkKind::Log,
                endpoint: "http://localhost:8000/result/model2".to_string(),
                auth_header: None,
                model_tag: "model2".to_string(),
                concurrency: 4,
                timeout_secs: 30,
            },
            storage: StorageConfig {
                model_dir: PathBuf::from("models"),
                model_name: "affinity_scorer".to_string(),
            },
        }
    }
}

impl Config {
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let defaults = config::Config::try_from(&Config::default())?;
        let settings = config::Config::builder()
            .add_source(defaults)
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix("RENTREC").separator("__"))
            .build()?;

        let config: Config = settings.try_deserialize()?;
        crate::utils::validation::validate_config(&config)?;
        Ok(config)
    }
}
