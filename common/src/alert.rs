//! Central alert sink: non-fatal errors are logged and, outside
//! development, forwarded to a Discord webhook.

use crate::configuration::EnvironmentMode;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, error};

const WEBHOOK_TIMEOUT: u64 = 5;

#[derive(Clone)]
pub struct Alerter {
    client: reqwest::Client,
    webhook_url: String,
    prefix: String,
    enabled: bool,
}

impl Alerter {
    pub fn new(mode: EnvironmentMode, webhook_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            webhook_url: webhook_url.to_string(),
            prefix: mode.to_string(),
            enabled: mode.is_production() || mode.is_test(),
        }
    }

    /// Log an error and post it to the webhook when enabled. Webhook
    /// failures are logged and swallowed.
    pub async fn alert(&self, message: &str) {
        error!("{message}");

        if !self.enabled {
            debug!("alert webhook disabled in {} mode", self.prefix);
            return;
        }

        let body = json!({ "content": format!("{}: {}", self.prefix, message) });
        let result = self
            .client
            .post(&self.webhook_url)
            .timeout(Duration::from_secs(WEBHOOK_TIMEOUT))
            .json(&body)
            .send()
            .await;

        match result {
            Ok(response) if !response.status().is_success() => {
                error!("alert webhook returned {}", response.status());
            }
            Err(e) => error!("alert webhook failed: {e}"),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn posts_with_mode_prefix() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .and(body_partial_json(
                serde_json::json!({ "content": "test: checkpoint header missing" }),
            ))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let alerter = Alerter::new(EnvironmentMode::Test, &format!("{}/hook", server.uri()));
        alerter.alert("checkpoint header missing").await;
    }

    #[tokio::test]
    async fn development_mode_does_not_post() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(204))
            .expect(0)
            .mount(&server)
            .await;

        let alerter =
            Alerter::new(EnvironmentMode::Development, &format!("{}/hook", server.uri()));
        alerter.alert("should stay local").await;
    }
}
