use crate::algorithms::encoder::{encode_with_layout, EncodedAttributes};
use crate::algorithms::retriever::InteractionRetriever;
use crate::algorithms::scorer::AffinityScorer;
use crate::algorithms::similarity::build_similarity_index;
use crate::config::Config;
use crate::error::RecError;
use crate::models::*;
use crate::services::data_source::DataSource;
use crate::services::delivery::{deliver_all, DeliveryReport, DeliverySink};
use crate::services::model_store::ModelStore;
use crate::services::routing::CohortRouter;
use crate::utils::top_k_indices;
use crate::utils::validation::validate_recommendation_request;
use anyhow::Result;
use chrono::Utc;
use dashmap::DashMap;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Scorer loaded from the model store with the catalog encoded against its
/// layout.
struct PreferenceModel {
    scorer: AffinityScorer,
    product_ids: Vec<ProductId>,
    products: EncodedAttributes,
}

/// Everything needed to answer requests for one index generation.
struct ServingState {
    generation: u64,
    users: HashMap<UserId, User>,
    retriever: InteractionRetriever,
    preference: Option<PreferenceModel>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RefreshSummary {
    pub generation: u64,
    pub products: usize,
    pub users: usize,
    pub interactions: usize,
    pub scorer_loaded: bool,
}

#[derive(Debug, Clone)]
pub struct BatchReport {
    pub generation: u64,
    pub users: usize,
    pub delivery: DeliveryReport,
}

pub struct RecommendationService {
    source: Arc<dyn DataSource>,
    sink: Arc<dyn DeliverySink>,
    store: Option<Arc<dyn ModelStore>>,
    config: Arc<Config>,
    state: RwLock<Option<Arc<ServingState>>>,
    generation: AtomicU64,
    cache: DashMap<(UserId, usize), RecommendationResponse>,
}

impl RecommendationService {
    pub fn new(
        source: Arc<dyn DataSource>,
        sink: Arc<dyn DeliverySink>,
        store: Option<Arc<dyn ModelStore>>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            source,
            sink,
            store,
            config,
            state: RwLock::new(None),
            generation: AtomicU64::new(0),
            cache: DashMap::new(),
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Re-fetches the dataset and rebuilds the similarity index.
    pub async fn refresh(&self) -> Result<RefreshSummary> {
        let dataset = self.source.fetch_dataset().await?;
        self.install(dataset).await
    }

    /// Builds a new serving generation from `dataset` and swaps it in.
    pub async fn install(&self, dataset: Dataset) -> Result<RefreshSummary> {
        let index_config = self.config.index.clone();
        let products = dataset.products.clone();
        let matrix =
            tokio::task::spawn_blocking(move || build_similarity_index(&products, &index_config))
                .await??;

        let retriever = InteractionRetriever::new(Arc::new(matrix), &dataset.interactions)
            .with_policy(self.config.retrieval.aggregation)
            .with_exclude_seen(self.config.retrieval.exclude_seen);

        let preference = self.load_preference_model(&dataset.products).await;
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

        let summary = RefreshSummary {
            generation,
            products: dataset.products.len(),
            users: dataset.users.len(),
            interactions: dataset.interactions.len(),
            scorer_loaded: preference.is_some(),
        };

        let state = ServingState {
            generation,
            users: dataset.users.into_iter().map(|u| (u.id.clone(), u)).collect(),
            retriever,
            preference,
        };
        *self.state.write().await = Some(Arc::new(state));
        self.cache.clear();

        info!(
            "Serving generation {}: {} products, {} users, {} interactions",
            summary.generation, summary.products, summary.users, summary.interactions
        );
        Ok(summary)
    }

    async fn load_preference_model(&self, products: &[Product]) -> Option<PreferenceModel> {
        let store = self.store.as_ref()?;
        let artifact = match store.load_latest().await {
            Ok(artifact) => artifact,
            Err(e) => {
                warn!("No affinity scorer available: {}", e);
                return None;
            }
        };
        match AffinityScorer::from_artifact(&artifact) {
            Ok(scorer) => {
                let encoded = encode_with_layout(products, scorer.layout());
                Some(PreferenceModel {
                    scorer,
                    product_ids: products.iter().map(|p| p.id.clone()).collect(),
                    products: encoded,
                })
            }
            Err(e) => {
                warn!("Discarding affinity scorer artifact {}: {}", artifact.id, e);
                None
            }
        }
    }

    async fn current(&self) -> Result<Arc<ServingState>> {
        let state = self.state.read().await.clone();
        Ok(state.ok_or_else(|| {
            RecError::DegenerateIndex("recommendation index has not been built yet".to_string())
        })?)
    }

    pub async fn get_recommendations(&self, request: &RecommendationRequest) -> Result<RecommendationResponse> {
        validate_recommendation_request(request)?;
        let state = self.current().await?;

        let key = (request.user_id.clone(), request.num_recommendations);
        if let Some(cached) = self.cache.get(&key) {
            if cached.index_generation == state.generation {
                return Ok(cached.clone());
            }
        }

        let recommendations = self.rank(&state, &request.user_id, request.num_recommendations)?;
        let response = RecommendationResponse {
            user_id: request.user_id.clone(),
            recommendations,
            index_generation: state.generation,
            generated_at: Utc::now(),
        };
        self.remember(&state, key, &response);
        Ok(response)
    }

    /// Number of responses currently cached.
    pub fn cached_responses(&self) -> usize {
        self.cache.len()
    }

    /// Caches only users the current generation knows about, up to the
    /// configured capacity.
    fn remember(&self, state: &ServingState, key: (UserId, usize), response: &RecommendationResponse) {
        let known = state.users.contains_key(&key.0) || state.retriever.history_len(&key.0) > 0;
        if !known {
            return;
        }
        let capacity = self.config.retrieval.cache_capacity;
        if self.cache.len() >= capacity && !self.cache.contains_key(&key) {
            debug!("Recommendation cache full ({} entries), not caching {}", capacity, key.0);
            return;
        }
        self.cache.insert(key, response.clone());
    }

    pub async fn similar_products(&self, product_id: &str, n: usize) -> Result<Vec<(ProductId, f32)>> {
        let state = self.current().await?;
        Ok(state.retriever.matrix().similar_products(product_id, n)?)
    }

    /// Interaction history wins; preference-cohort users without history fall
    /// back to the affinity scorer when one is loaded.
    fn rank(&self, state: &ServingState, user_id: &str, n: usize) -> Result<Vec<ProductId>> {
        if state.retriever.history_len(user_id) > 0 {
            return Ok(state.retriever.recommend(user_id, n));
        }

        let router = CohortRouter::new(&self.config.routing);
        match (state.users.get(user_id), &state.preference) {
            (Some(user), Some(model)) if router.is_preference_user(user) => {
                rank_by_affinity(model, user, n)
            }
            _ => {
                debug!("No history or preference model for user {}", user_id);
                Ok(Vec::new())
            }
        }
    }

    /// Recommends for every behavioral-cohort user with history and delivers
    /// the lists through the configured sink.
    pub async fn run_batch(&self) -> Result<BatchReport> {
        let state = self.current().await?;
        let router = CohortRouter::new(&self.config.routing);
        let users: Vec<User> = state.users.values().cloned().collect();
        let mut user_ids: Vec<UserId> = router
            .split(&users)
            .behavioral
            .into_iter()
            .map(|u| u.id)
            .filter(|id| state.retriever.history_len(id) > 0)
            .collect();
        user_ids.sort();

        let top_n = self.config.retrieval.top_n;
        let worker_state = state.clone();
        let batch =
            tokio::task::spawn_blocking(move || worker_state.retriever.recommend_all(&user_ids, top_n))
                .await?;
        let users = batch.len();
        info!("Computed recommendations for {} behavioral users", users);

        let delivery = deliver_all(
            self.sink.clone(),
            batch,
            &self.config.delivery.model_tag,
            self.config.delivery.concurrency,
        )
        .await;

        Ok(BatchReport {
            generation: state.generation,
            users,
            delivery,
        })
    }
}

fn rank_by_affinity(model: &PreferenceModel, user: &User, n: usize) -> Result<Vec<ProductId>> {
    let encoded_user = encode_with_layout(std::slice::from_ref(user), model.scorer.layout());
    let scores = model.scorer.score_products(&encoded_user.row(0), &model.products)?;
    let expected: Vec<f32> = scores.iter().map(|s| s.expected_label).collect();
    Ok(top_k_indices(&expected, n)
        .into_iter()
        .filter_map(|i| model.product_ids.get(i).cloned())
        .collect())
}
