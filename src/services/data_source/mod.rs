use crate::config::{DataSourceConfig, SourceKind};
use crate::models::{Dataset, Interaction, Product, User};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

pub const PRODUCTS_FILE: &str = "products.json";
pub const USERS_FILE: &str = "users.json";
pub const INTERACTIONS_FILE: &str = "interactions.json";

#[async_trait]
pub trait DataSource: Send + Sync {
    async fn fetch_products(&self) -> Result<Vec<Product>>;
    async fn fetch_users(&self) -> Result<Vec<User>>;
    async fn fetch_interactions(&self) -> Result<Vec<Interaction>>;

    async fn fetch_dataset(&self) -> Result<Dataset> {
        let (products, users, interactions) = futures::try_join!(
            self.fetch_products(),
            self.fetch_users(),
            self.fetch_interactions()
        )?;
        info!(
            "Fetched {} products, {} users, {} interactions",
            products.len(),
            users.len(),
            interactions.len()
        );
        Ok(Dataset {
            products,
            users,
            interactions,
        })
    }
}

pub fn from_config(config: &DataSourceConfig) -> Result<Arc<dyn DataSource>> {
    Ok(match config.kind {
        SourceKind::Http => Arc::new(HttpDataSource::new(config)?),
        SourceKind::Snapshot => Arc::new(SnapshotSource::new(&config.snapshot_dir)),
    })
}

/// Reads the upstream rental API: one JSON array per endpoint.
pub struct HttpDataSource {
    client: reqwest::Client,
    base_url: String,
    auth_header: Option<String>,
    products_path: String,
    users_path: String,
    interactions_path: String,
}

impl HttpDataSource {
    pub fn new(config: &DataSourceConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            auth_header: config.auth_header.clone(),
            products_path: config.products_path.clone(),
            users_path: config.users_path.clone(),
            interactions_path: config.interactions_path.clone(),
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<Vec<T>> {
        let url = format!("{}{}", self.base_url, path);
        let mut request = self.client.get(&url);
        if let Some(auth) = &self.auth_header {
            request = request.header("Authorization", auth);
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("GET {url}"))?;
        if !response.status().is_success() {
            return Err(anyhow!("GET {} returned {}", url, response.status()));
        }
        let rows: Vec<T> = response
            .json()
            .await
            .with_context(|| format!("decoding {url}"))?;
        Ok(rows)
    }
}

#[async_trait]
impl DataSource for HttpDataSource {
    async fn fetch_products(&self) -> Result<Vec<Product>> {
        self.get_json(&self.products_path).await
    }

    async fn fetch_users(&self) -> Result<Vec<User>> {
        self.get_json(&self.users_path).await
    }

    async fn fetch_interactions(&self) -> Result<Vec<Interaction>> {
        self.get_json(&self.interactions_path).await
    }
}

/// A directory of JSON snapshots, one file per table.
#[derive(Debug, Clone)]
pub struct SnapshotSource {
    dir: PathBuf,
}

impl SnapshotSource {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    async fn read<T: DeserializeOwned>(&self, file: &str) -> Result<Vec<T>> {
        let path = self.dir.join(file);
        let bytes = tokio::fs::read(&path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        serde_json::from_slice(&bytes).with_context(|| format!("parsing {}", path.display()))
    }

    async fn write<T: Serialize>(dir: &Path, file: &str, rows: &[T]) -> Result<()> {
        let path = dir.join(file);
        let body = serde_json::to_vec_pretty(rows)?;
        tokio::fs::write(&path, body)
            .await
            .with_context(|| format!("writing {}", path.display()))
    }

    pub async fn write_dataset(&self, dataset: &Dataset) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        Self::write(&self.dir, PRODUCTS_FILE, &dataset.products).await?;
        Self::write(&self.dir, USERS_FILE, &dataset.users).await?;
        Self::write(&self.dir, INTERACTIONS_FILE, &dataset.interactions).await?;
        info!("Wrote snapshot to {}", self.dir.display());
        Ok(())
    }

    /// Writes the full dataset at the root and each cohort in its own
    /// subdirectory (`preference/`, `behavioral/`).
    pub async fn write_cohort_snapshots(
        &self,
        full: &Dataset,
        preference: &Dataset,
        behavioral: &Dataset,
    ) -> Result<()> {
        self.write_dataset(full).await?;
        SnapshotSource::new(self.dir.join("preference"))
            .write_dataset(preference)
            .await?;
        SnapshotSource::new(self.dir.join("behavioral"))
            .write_dataset(behavioral)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl DataSource for SnapshotSource {
    async fn fetch_products(&self) -> Result<Vec<Product>> {
        self.read(PRODUCTS_FILE).await
    }

    async fn fetch_users(&self) -> Result<Vec<User>> {
        self.read(USERS_FILE).await
    }

    async fn fetch_interactions(&self) -> Result<Vec<Interaction>> {
        self.read(INTERACTIONS_FILE).await
    }
}
