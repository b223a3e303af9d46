use crate::config::{DeliveryConfig, SinkKind};
use crate::models::{DeliveryPayload, ProductId, UserId};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

#[async_trait]
pub trait DeliverySink: Send + Sync {
    /// Returns the receiver's acknowledgement body.
    async fn deliver(&self, user_id: &str, ranked: &[ProductId], tag: &str) -> Result<serde_json::Value>;
}

pub fn from_config(config: &DeliveryConfig) -> Result<Arc<dyn DeliverySink>> {
    Ok(match config.kind {
        SinkKind::Http => Arc::new(HttpSink::new(config)?),
        SinkKind::Log => Arc::new(LogSink),
    })
}

pub struct HttpSink {
    client: reqwest::Client,
    endpoint: String,
    auth_header: Option<String>,
}

impl HttpSink {
    pub fn new(config: &DeliveryConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            auth_header: config.auth_header.clone(),
        })
    }
}

#[async_trait]
impl DeliverySink for HttpSink {
    async fn deliver(&self, user_id: &str, ranked: &[ProductId], tag: &str) -> Result<serde_json::Value> {
        let payload = DeliveryPayload {
            user_id: user_id.to_string(),
            recommendation: ranked.to_vec(),
            model_type: tag.to_string(),
        };

        let mut request = self.client.post(&self.endpoint).json(&payload);
        if let Some(auth) = &self.auth_header {
            request = request.header("Authorization", auth);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!("delivery for user {} returned {}", user_id, status));
        }
        let body = response.bytes().await?;
        parse_acknowledgement(&body)
            .with_context(|| format!("malformed acknowledgement for user {}", user_id))
    }
}

/// An empty body acknowledges with `null`; anything else must be JSON.
fn parse_acknowledgement(body: &[u8]) -> Result<serde_json::Value> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(serde_json::Value::Null);
    }
    Ok(serde_json::from_slice(body)?)
}

/// Logs payloads instead of sending them.
pub struct LogSink;

#[async_trait]
impl DeliverySink for LogSink {
    async fn deliver(&self, user_id: &str, ranked: &[ProductId], tag: &str) -> Result<serde_json::Value> {
        let payload = DeliveryPayload {
            user_id: user_id.to_string(),
            recommendation: ranked.to_vec(),
            model_type: tag.to_string(),
        };
        let body = serde_json::to_value(&payload)?;
        info!("Recommendation payload: {}", body);
        Ok(body)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeliveryReport {
    pub delivered: usize,
    pub failed: Vec<(UserId, String)>,
}

/// Sends every batch entry with at most `concurrency` requests in flight.
/// Failures are collected, not propagated.
pub async fn deliver_all(
    sink: Arc<dyn DeliverySink>,
    batch: Vec<(UserId, Vec<ProductId>)>,
    tag: &str,
    concurrency: usize,
) -> DeliveryReport {
    let results: Vec<(UserId, Result<serde_json::Value>)> = stream::iter(batch)
        .map(|(user_id, ranked)| {
            let sink = sink.clone();
            async move {
                let outcome = sink.deliver(&user_id, &ranked, tag).await;
                (user_id, outcome)
            }
        })
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await;

    let mut report = DeliveryReport::default();
    for (user_id, outcome) in results {
        match outcome {
            Ok(_) => report.delivered += 1,
            Err(e) => {
                error!("Delivery failed for user {}: {}", user_id, e);
                report.failed.push((user_id, e.to_string()));
            }
        }
    }
    report.failed.sort();
    info!(
        "Delivered {} recommendation lists, {} failed",
        report.delivered,
        report.failed.len()
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FlakySink {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl DeliverySink for FlakySink {
        async fn deliver(&self, user_id: &str, _ranked: &[ProductId], _tag: &str) -> Result<serde_json::Value> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if user_id == "bad" {
                Err(anyhow!("rejected"))
            } else {
                Ok(serde_json::Value::Null)
            }
        }
    }

    #[test]
    fn test_parse_acknowledgement() {
        assert_eq!(parse_acknowledgement(b"").unwrap(), serde_json::Value::Null);
        assert_eq!(parse_acknowledgement(b"{\"ok\":true}").unwrap()["ok"], true);
        assert!(parse_acknowledgement(b"<html>accepted</html>").is_err());
    }

    async fn spawn_receiver() -> String {
        use axum::{routing::post, Json, Router};

        let app = Router::new()
            .route("/json", post(|| async { Json(serde_json::json!({"status": "ok"})) }))
            .route("/garbled", post(|| async { "accepted, thanks" }))
            .route("/empty", post(|| async {}));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn http_sink(endpoint: String) -> HttpSink {
        HttpSink::new(&DeliveryConfig {
            kind: SinkKind::Http,
            endpoint,
            auth_header: Some("Bearer token".to_string()),
            model_tag: "model2".to_string(),
            concurrency: 1,
            timeout_secs: 5,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_http_sink_surfaces_malformed_acknowledgement() {
        let base = spawn_receiver().await;
        let ranked = vec!["p1".to_string()];

        let ack = http_sink(format!("{base}/json"))
            .deliver("u1", &ranked, "model2")
            .await
            .unwrap();
        assert_eq!(ack["status"], "ok");

        let empty = http_sink(format!("{base}/empty"))
            .deliver("u1", &ranked, "model2")
            .await
            .unwrap();
        assert!(empty.is_null());

        let err = http_sink(format!("{base}/garbled"))
            .deliver("u1", &ranked, "model2")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("malformed acknowledgement"));
    }

    #[tokio::test]
    async fn test_log_sink_echoes_payload() {
        let body = LogSink
            .deliver("u1", &["p1".to_string(), "p2".to_string()], "model2")
            .await
            .unwrap();
        assert_eq!(body["user_id"], "u1");
        assert_eq!(body["recommendation"][1], "p2");
        assert_eq!(body["model_type"], "model2");
    }

    #[tokio::test]
    async fn test_deliver_all_reports_failures_without_aborting() {
        let sink = Arc::new(FlakySink {
            calls: AtomicUsize::new(0),
        });
        let batch = vec![
            ("a".to_string(), vec!["p1".to_string()]),
            ("bad".to_string(), vec![]),
            ("c".to_string(), vec!["p2".to_string()]),
        ];
        let report = deliver_all(sink.clone(), batch, "model2", 2).await;
        assert_eq!(report.delivered, 2);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "bad");
        assert_eq!(sink.calls.load(Ordering::SeqCst), 3);
    }
}
