use crate::algorithms::similarity::SimilarityMatrix;
use crate::error::{RecError, RecResult};
use crate::models::{Interaction, Product, ProductId, UserId};
use crate::utils::top_k_indices;
use ndarray::Array1;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, warn};

/// How similarity rows of a user's interacted products are combined.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregationPolicy {
    /// Users with longer histories accumulate larger scores.
    #[default]
    Sum,
    Mean,
}

/// Ranks catalog products for users from their interaction history over a
/// shared read-only similarity matrix.
#[derive(Debug, Clone)]
pub struct InteractionRetriever {
    matrix: Arc<SimilarityMatrix>,
    history: HashMap<UserId, Vec<ProductId>>,
    policy: AggregationPolicy,
    exclude_seen: bool,
}

impl InteractionRetriever {
    pub fn new(matrix: Arc<SimilarityMatrix>, interactions: &[Interaction]) -> Self {
        let mut history: HashMap<UserId, Vec<ProductId>> = HashMap::new();
        for interaction in interactions {
            history
                .entry(interaction.user_id.clone())
                .or_default()
                .push(interaction.product_id.clone());
        }
        Self {
            matrix,
            history,
            policy: AggregationPolicy::Sum,
            exclude_seen: false,
        }
    }

    pub fn with_policy(mut self, policy: AggregationPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_exclude_seen(mut self, exclude_seen: bool) -> Self {
        self.exclude_seen = exclude_seen;
        self
    }

    pub fn matrix(&self) -> &Arc<SimilarityMatrix> {
        &self.matrix
    }

    pub fn known_users(&self) -> Vec<UserId> {
        let mut users: Vec<UserId> = self.history.keys().cloned().collect();
        users.sort();
        users
    }

    pub fn history_len(&self, user_id: &str) -> usize {
        self.history.get(user_id).map_or(0, |h| h.len())
    }

    /// Aggregated score per catalog position, or `None` when none of the
    /// user's interactions refer to an indexed product.
    pub fn scores(&self, user_id: &str) -> Option<Array1<f32>> {
        let history = self.history.get(user_id)?;
        let mut aggregate = Array1::<f32>::zeros(self.matrix.len());
        let mut contributing = 0usize;

        // repeated interactions count once per occurrence
        for product_id in history {
            match self.matrix.position(product_id) {
                Some(position) => {
                    aggregate += &self.matrix.row(position);
                    contributing += 1;
                }
                None => warn!(
                    "User {} interacted with unknown product {}; skipping",
                    user_id, product_id
                ),
            }
        }

        if contributing == 0 {
            return None;
        }
        if self.policy == AggregationPolicy::Mean {
            aggregate /= contributing as f32;
        }
        Some(aggregate)
    }

    /// Top `n` product ids for the user, highest aggregate first. Ties keep
    /// catalog order. Users without history get an empty list.
    pub fn recommend(&self, user_id: &str, n: usize) -> Vec<ProductId> {
        if n == 0 {
            return Vec::new();
        }
        let Some(mut scores) = self.scores(user_id) else {
            debug!("No usable interaction history for user {}", user_id);
            return Vec::new();
        };

        if self.exclude_seen {
            let seen: HashSet<usize> = self
                .history
                .get(user_id)
                .into_iter()
                .flatten()
                .filter_map(|p| self.matrix.position(p))
                .collect();
            for position in &seen {
                scores[*position] = f32::NEG_INFINITY;
            }
            let available = self.matrix.len() - seen.len();
            return self.take_top(&scores, n.min(available));
        }

        self.take_top(&scores, n)
    }

    fn take_top(&self, scores: &Array1<f32>, n: usize) -> Vec<ProductId> {
        let ids = self.matrix.product_ids();
        let values = scores.to_vec();
        top_k_indices(&values, n)
            .into_iter()
            .map(|i| ids[i].clone())
            .collect()
    }

    /// Recommendations for many users in parallel; output order follows
    /// `user_ids`.
    pub fn recommend_all(&self, user_ids: &[UserId], n: usize) -> Vec<(UserId, Vec<ProductId>)> {
        user_ids
            .par_iter()
            .map(|user_id| (user_id.clone(), self.recommend(user_id, n)))
            .collect()
    }
}

/// One-shot retrieval with the default sum aggregation. `products` must be
/// the catalog the matrix was built from.
pub fn recommend(
    user_id: &str,
    interactions: &[Interaction],
    products: &[Product],
    matrix: &Arc<SimilarityMatrix>,
    n: usize,
) -> RecResult<Vec<ProductId>> {
    let aligned = products.len() == matrix.len()
        && products
            .iter()
            .zip(matrix.product_ids())
            .all(|(p, id)| &p.id == id);
    if !aligned {
        return Err(RecError::DegenerateIndex(
            "similarity matrix was built from a different catalog".to_string(),
        ));
    }

    let own: Vec<Interaction> = interactions
        .iter()
        .filter(|i| i.user_id == user_id)
        .cloned()
        .collect();
    Ok(InteractionRetriever::new(matrix.clone(), &own).recommend(user_id, n))
}
