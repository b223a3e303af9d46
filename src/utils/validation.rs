use crate::config::{Config, SinkKind, SourceKind, TrainingConfig};
use crate::error::{RecError, RecResult};
use crate::models::RecommendationRequest;

pub const MAX_RECOMMENDATIONS: usize = 1000;

fn invalid(message: impl Into<String>) -> RecError {
    RecError::InvalidConfig(message.into())
}

pub fn validate_training_config(config: &TrainingConfig) -> RecResult<()> {
    if config.hidden_layers.len() < 2 {
        return Err(invalid("at least two hidden layers are required"));
    }

    if config.hidden_layers.iter().any(|&width| width == 0) {
        return Err(invalid("hidden layer widths must be greater than 0"));
    }

    if config.num_classes < 2 {
        return Err(invalid("num_classes must be at least 2"));
    }

    if config.epochs == 0 {
        return Err(invalid("epochs must be greater than 0"));
    }

    if config.batch_size == 0 {
        return Err(invalid("batch_size must be greater than 0"));
    }

    if !(config.learning_rate > 0.0 && config.learning_rate <= 1.0) {
        return Err(invalid("learning_rate must be in (0, 1]"));
    }

    // held-out fraction is for monitoring; keep both sides non-trivial
    if !(0.2..=0.9).contains(&config.validation_fraction) {
        return Err(invalid("validation_fraction must be between 0.2 and 0.9"));
    }

    Ok(())
}

pub fn validate_config(config: &Config) -> RecResult<()> {
    validate_training_config(&config.training)?;

    if config.data_source.kind == SourceKind::Http && config.data_source.base_url.is_empty() {
        return Err(invalid("data_source.base_url is required for the http source"));
    }

    if config.data_source.timeout_secs == 0 || config.delivery.timeout_secs == 0 {
        return Err(invalid("timeouts must be greater than 0"));
    }

    if config.delivery.kind == SinkKind::Http && config.delivery.endpoint.is_empty() {
        return Err(invalid("delivery.endpoint is required for the http sink"));
    }

    if config.delivery.concurrency == 0 {
        return Err(invalid("delivery.concurrency must be greater than 0"));
    }

    if config.retrieval.top_n > MAX_RECOMMENDATIONS {
        return Err(invalid(format!(
            "retrieval.top_n too large (max {MAX_RECOMMENDATIONS})"
        )));
    }

    if config.storage.model_name.is_empty() {
        return Err(invalid("storage.model_name cannot be empty"));
    }

    if config.server.workers == 0 {
        return Err(invalid("server.workers must be greater than 0"));
    }

    Ok(())
}

/// Zero recommendations is allowed and yields an empty list.
pub fn validate_recommendation_request(request: &RecommendationRequest) -> RecResult<()> {
    if request.user_id.trim().is_empty() {
        return Err(invalid("user_id cannot be empty"));
    }

    if request.num_recommendations > MAX_RECOMMENDATIONS {
        return Err(invalid(format!(
            "number of recommendations too large (max {MAX_RECOMMENDATIONS})"
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_training_config() {
        assert!(validate_training_config(&TrainingConfig::default()).is_ok());

        let single_stage = TrainingConfig {
            hidden_layers: vec![64],
            ..TrainingConfig::default()
        };
        assert!(validate_training_config(&single_stage).is_err());

        let too_small_holdout = TrainingConfig {
            validation_fraction: 0.1,
            ..TrainingConfig::default()
        };
        assert!(validate_training_config(&too_small_holdout).is_err());

        let no_epochs = TrainingConfig {
            epochs: 0,
            ..TrainingConfig::default()
        };
        assert!(matches!(
            validate_training_config(&no_epochs),
            Err(RecError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_validate_config_http_sink_needs_endpoint() {
        let mut config = Config::default();
        config.delivery.kind = SinkKind::Http;
        config.delivery.endpoint.clear();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_recommendation_request() {
        let valid = RecommendationRequest {
            user_id: "u1".to_string(),
            num_recommendations: 0,
        };
        assert!(validate_recommendation_request(&valid).is_ok());

        let blank = RecommendationRequest {
            user_id: "  ".to_string(),
            num_recommendations: 5,
        };
        assert!(validate_recommendation_request(&blank).is_err());

        let too_many = RecommendationRequest {
            user_id: "u1".to_string(),
            num_recommendations: MAX_RECOMMENDATIONS + 1,
        };
        assert!(validate_recommendation_request(&too_many).is_err());
    }
}
