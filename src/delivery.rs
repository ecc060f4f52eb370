//! Hands normalized records to the local consumer.
//!
//! Records are POSTed as JSON to `http://localhost:<port>/message`.
//! Delivery is best-effort: one attempt with a short timeout, failures are
//! logged and dropped.

use crate::normalizer::Record;
use anyhow::{Context, Result};
use std::time::Duration;

#[derive(Clone)]
pub struct Delivery {
    client: reqwest::Client,
    endpoint: String,
}

impl Delivery {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!("Failed to build delivery client ({e}); using defaults");
                reqwest::Client::new()
            });
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }

    /// Delivery to the local consumer on `port`.
    pub fn local(port: u16, timeout: Duration) -> Self {
        Self::new(format!("http://localhost:{port}/message"), timeout)
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// POST the record once and report the outcome.
    pub async fn post(&self, record: &Record) -> Result<()> {
        self.client
            .post(&self.endpoint)
            .json(record.fields())
            .send()
            .await
            .context("Failed to send HTTP POST request")?;
        Ok(())
    }

    /// Fire-and-forget [`Delivery::post`].
    pub fn dispatch(&self, record: Record) {
        let delivery = self.clone();
        tokio::spawn(async move {
            if let Err(e) = delivery.post(&record).await {
                tracing::error!(
                    message_id = record.get("message_id").unwrap_or_default(),
                    "{e:#}"
                );
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn record() -> Record {
        let mut record = Record::new();
        record.set("type", "text_message");
        record.set("message_id", "ABC");
        record
    }

    #[tokio::test]
    async fn posts_record_as_json() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/message"))
            .and(body_partial_json(serde_json::json!({
                "type": "text_message",
                "message_id": "ABC"
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let delivery = Delivery::new(format!("{}/message", server.uri()), Duration::from_secs(1));
        delivery.post(&record()).await.unwrap();
    }

    #[tokio::test]
    async fn slow_consumer_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
            .mount(&server)
            .await;

        let delivery = Delivery::new(format!("{}/message", server.uri()), Duration::from_millis(50));
        assert!(delivery.post(&record()).await.is_err());
    }

    #[test]
    fn local_endpoint_uses_port() {
        let delivery = Delivery::local(7774, Duration::from_secs(1));
        assert_eq!(delivery.endpoint(), "http://localhost:7774/message");
    }
}
