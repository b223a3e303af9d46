use crate::algorithms::scorer::AffinityScorer;
use crate::config::StorageConfig;
use crate::error::RecError;
use crate::models::{ScorerArtifact, ARTIFACT_FORMAT_VERSION};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;
use uuid::Uuid;

/// Where a saved artifact lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactHandle {
    pub id: Uuid,
    pub location: String,
}

#[async_trait]
pub trait ModelStore: Send + Sync {
    async fn save(&self, artifact: &ScorerArtifact) -> Result<ArtifactHandle>;
    async fn load(&self, handle: &ArtifactHandle) -> Result<ScorerArtifact>;
    async fn load_latest(&self) -> Result<ScorerArtifact>;
}

/// JSON documents on disk. Each save writes `<name>-<id>.json` and refreshes
/// `<name>.json` as the latest copy.
#[derive(Debug, Clone)]
pub struct FileModelStore {
    dir: PathBuf,
    name: String,
}

impl FileModelStore {
    pub fn new(dir: impl AsRef<Path>, name: impl Into<String>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            name: name.into(),
        }
    }

    pub fn from_config(config: &StorageConfig) -> Self {
        Self::new(&config.model_dir, config.model_name.clone())
    }

    pub fn latest_path(&self) -> PathBuf {
        self.dir.join(format!("{}.json", self.name))
    }

    fn versioned_path(&self, id: Uuid) -> PathBuf {
        self.dir.join(format!("{}-{}.json", self.name, id))
    }

    async fn read(path: &Path) -> Result<ScorerArtifact> {
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("reading model artifact {}", path.display()))?;
        let artifact: ScorerArtifact = serde_json::from_slice(&bytes).map_err(RecError::from)?;
        if artifact.format_version != ARTIFACT_FORMAT_VERSION {
            return Err(RecError::InvalidArtifact(format!(
                "unsupported format version {} (expected {})",
                artifact.format_version, ARTIFACT_FORMAT_VERSION
            ))
            .into());
        }
        // parameter shapes must agree with the stored layout
        AffinityScorer::from_artifact(&artifact)?;
        Ok(artifact)
    }
}

#[async_trait]
impl ModelStore for FileModelStore {
    async fn save(&self, artifact: &ScorerArtifact) -> Result<ArtifactHandle> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let body = serde_json::to_vec_pretty(artifact)?;

        let path = self.versioned_path(artifact.id);
        tokio::fs::write(&path, &body)
            .await
            .with_context(|| format!("writing {}", path.display()))?;
        tokio::fs::write(self.latest_path(), &body).await?;

        info!("Saved model artifact {} to {}", artifact.id, path.display());
        Ok(ArtifactHandle {
            id: artifact.id,
            location: path.display().to_string(),
        })
    }

    async fn load(&self, handle: &ArtifactHandle) -> Result<ScorerArtifact> {
        let artifact = Self::read(Path::new(&handle.location)).await?;
        if artifact.id != handle.id {
            return Err(RecError::InvalidArtifact(format!(
                "artifact id {} does not match handle {}",
                artifact.id, handle.id
            ))
            .into());
        }
        Ok(artifact)
    }

    async fn load_latest(&self) -> Result<ScorerArtifact> {
        Self::read(&self.latest_path()).await
    }
}
