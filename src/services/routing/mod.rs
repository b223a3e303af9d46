use crate::config::RoutingConfig;
use crate::models::{Dataset, Interaction, User};
use std::collections::HashSet;
use tracing::info;

/// Users split by how much behavioral history they have.
#[derive(Debug, Clone, Default)]
pub struct Cohorts {
    /// Few orders: served from stated preferences.
    pub preference: Vec<User>,
    /// Enough orders: served from interaction history.
    pub behavioral: Vec<User>,
}

#[derive(Debug, Clone)]
pub struct CohortRouter {
    order_count_threshold: u64,
    min_rating_count: u64,
}

impl CohortRouter {
    pub fn new(config: &RoutingConfig) -> Self {
        Self {
            order_count_threshold: config.order_count_threshold,
            min_rating_count: config.min_rating_count,
        }
    }

    pub fn is_preference_user(&self, user: &User) -> bool {
        user.order_count <= self.order_count_threshold
    }

    pub fn split(&self, users: &[User]) -> Cohorts {
        let mut cohorts = Cohorts::default();
        let mut dropped = 0usize;

        for user in users {
            if user.rating_count < self.min_rating_count {
                dropped += 1;
                continue;
            }
            if self.is_preference_user(user) {
                cohorts.preference.push(user.clone());
            } else {
                cohorts.behavioral.push(user.clone());
            }
        }

        info!(
            "Routed {} users: {} preference, {} behavioral, {} below rating minimum",
            users.len(),
            cohorts.preference.len(),
            cohorts.behavioral.len(),
            dropped
        );
        cohorts
    }

    /// Per-cohort datasets sharing the full catalog; interactions are kept
    /// only for users in the cohort.
    pub fn split_dataset(&self, dataset: &Dataset) -> (Dataset, Dataset) {
        let cohorts = self.split(&dataset.users);
        let subset = |users: Vec<User>| {
            let ids: HashSet<&str> = users.iter().map(|u| u.id.as_str()).collect();
            let interactions: Vec<Interaction> = dataset
                .interactions
                .iter()
                .filter(|i| ids.contains(i.user_id.as_str()))
                .cloned()
                .collect();
            Dataset {
                products: dataset.products.clone(),
                users,
                interactions,
            }
        };
        (subset(cohorts.preference), subset(cohorts.behavioral))
    }
}
