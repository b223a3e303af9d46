use crate::algorithms::encoder::{encode, reconcile};
use crate::algorithms::labeler::{label_distribution, label_matrix};
use crate::algorithms::scorer::{train, AffinityScorer, LabeledPairs};
use crate::config::{Config, TrainingConfig};
use crate::models::{AttributeField, Product, ProductId, User, UserId};
use crate::services::data_source::DataSource;
use crate::services::model_store::{ArtifactHandle, ModelStore};
use crate::services::routing::CohortRouter;
use crate::utils::metrics::EpochMetrics;
use anyhow::{anyhow, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

/// Summary of one offline training run.
#[derive(Debug, Clone, Serialize)]
pub struct TrainingReport {
    pub artifact: ArtifactHandle,
    pub users: usize,
    pub products: usize,
    pub pairs: usize,
    pub vocabulary_sizes: BTreeMap<String, usize>,
    pub label_distribution: BTreeMap<u32, usize>,
    pub final_epoch: Option<EpochMetrics>,
    pub elapsed_ms: u128,
}

pub struct TrainingService {
    source: Arc<dyn DataSource>,
    store: Arc<dyn ModelStore>,
    config: Arc<Config>,
}

impl TrainingService {
    pub fn new(source: Arc<dyn DataSource>, store: Arc<dyn ModelStore>, config: Arc<Config>) -> Self {
        Self {
            source,
            store,
            config,
        }
    }

    /// Fetch, route, encode, label, train and persist the affinity scorer.
    pub async fn run(&self) -> Result<TrainingReport> {
        let started = Instant::now();
        let (products, users) =
            futures::try_join!(self.source.fetch_products(), self.source.fetch_users())?;
        info!("Fetched {} products and {} users for training", products.len(), users.len());

        let router = CohortRouter::new(&self.config.routing);
        let cohort = router.split(&users).preference;
        if cohort.is_empty() || products.is_empty() {
            return Err(anyhow!(
                "nothing to train on ({} preference users, {} products)",
                cohort.len(),
                products.len()
            ));
        }

        let training_config = self.config.training.clone();
        let (pairs, scorer) =
            tokio::task::spawn_blocking(move || build_and_train(&cohort, &products, &training_config))
                .await??;

        let vocabulary_sizes = scorer
            .layout()
            .groups()
            .iter()
            .map(|g| (g.field.as_str().to_string(), g.vocabulary.len()))
            .collect();
        let final_epoch = scorer.history().last().cloned();

        let artifact = scorer.to_artifact();
        let handle = self.store.save(&artifact).await?;

        let report = TrainingReport {
            artifact: handle,
            users: pairs.users,
            products: pairs.products,
            pairs: pairs.rows,
            vocabulary_sizes,
            label_distribution: pairs.distribution,
            final_epoch,
            elapsed_ms: started.elapsed().as_millis(),
        };
        info!(
            "Training finished in {} ms: artifact {} over {} pairs",
            report.elapsed_ms, report.artifact.id, report.pairs
        );
        Ok(report)
    }
}

struct PairSummary {
    users: usize,
    products: usize,
    rows: usize,
    distribution: BTreeMap<u32, usize>,
}

fn build_and_train(
    users: &[User],
    products: &[Product],
    config: &TrainingConfig,
) -> Result<(PairSummary, AffinityScorer)> {
    let encoded_users = encode(users, &AttributeField::ALL);
    let encoded_products = encode(products, &AttributeField::ALL);
    let (layout, encoded_users, encoded_products) = reconcile(&encoded_users, &encoded_products)?;
    info!("Reconciled attribute layout: {} columns", layout.width());

    let user_ids: Vec<UserId> = users.iter().map(|u| u.id.clone()).collect();
    let product_ids: Vec<ProductId> = products.iter().map(|p| p.id.clone()).collect();
    let pairs = LabeledPairs::cross_join(&user_ids, &encoded_users, &product_ids, &encoded_products)?;

    let mut distribution: BTreeMap<u32, usize> = BTreeMap::new();
    for &label in pairs.labels() {
        *distribution.entry(label).or_default() += 1;
    }
    info!("Label distribution: {:?}", distribution);

    let scorer = train(&pairs, config)?;
    let summary = PairSummary {
        users: users.len(),
        products: products.len(),
        rows: pairs.len(),
        distribution,
    };
    Ok((summary, scorer))
}

/// Raw label counts over the reconciled user/product cross product.
pub fn preview_labels(users: &[User], products: &[Product]) -> Result<BTreeMap<u32, usize>> {
    let (_, u, p) = reconcile(
        &encode(users, &AttributeField::ALL),
        &encode(products, &AttributeField::ALL),
    )?;
    Ok(label_distribution(&label_matrix(&u, &p)?))
}
