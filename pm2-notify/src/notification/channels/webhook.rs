//! Generic webhook notification channel.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{
    Client,
    header::{HeaderMap, HeaderName, HeaderValue},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, warn};

use super::NotificationChannel;
use crate::notification::events::OutboundMessage;
use crate::{Error, Result};

/// Webhook channel configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    /// Webhook URL.
    pub url: String,
    /// HTTP method, `POST` or `PUT`.
    pub method: String,
    /// Custom headers.
    pub headers: Vec<(String, String)>,
    /// Authentication type.
    pub auth: Option<WebhookAuth>,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
}

/// Webhook authentication configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum WebhookAuth {
    /// Bearer token authentication.
    Bearer { token: String },
    /// Basic authentication.
    Basic { username: String, password: String },
    /// Custom header authentication.
    Header { name: String, value: String },
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            method: "POST".to_string(),
            headers: Vec::new(),
            auth: None,
            timeout_secs: 30,
        }
    }
}

/// Posts merged notifications as JSON.
pub struct WebhookChannel {
    config: WebhookConfig,
    client: Client,
}

impl WebhookChannel {
    pub fn new(config: WebhookConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .unwrap_or_default();

        Self { config, client }
    }

    fn build_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();

        for (name, value) in &self.config.headers {
            insert_header(&mut headers, name, value);
        }

        match &self.config.auth {
            Some(WebhookAuth::Bearer { token }) => {
                if let Ok(value) = format!("Bearer {token}").parse() {
                    headers.insert(reqwest::header::AUTHORIZATION, value);
                }
            }
            Some(WebhookAuth::Header { name, value }) => insert_header(&mut headers, name, value),
            // Applied on the request builder.
            Some(WebhookAuth::Basic { .. }) | None => {}
        }

        headers
    }

    fn build_payload(&self, message: &OutboundMessage) -> serde_json::Value {
        json!({
            "from": message.from,
            "to": message.to,
            "subject": message.subject,
            "body": message.body,
            "attachments": message.attachments,
            "sent_at": chrono::Utc::now().to_rfc3339(),
        })
    }
}

fn insert_header(headers: &mut HeaderMap, name: &str, value: &str) {
    match (name.parse::<HeaderName>(), value.parse::<HeaderValue>()) {
        (Ok(name), Ok(value)) => {
            headers.insert(name, value);
        }
        _ => warn!(header = %name, "Ignoring invalid webhook header"),
    }
}

#[async_trait]
impl NotificationChannel for WebhookChannel {
    fn channel_type(&self) -> &'static str {
        "webhook"
    }

    async fn send(&self, message: &OutboundMessage) -> Result<()> {
        let payload = self.build_payload(message);

        let request = match self.config.method.to_uppercase().as_str() {
            "PUT" => self.client.put(&self.config.url),
            _ => self.client.post(&self.config.url),
        };
        let mut request = request.headers(self.build_headers()).json(&payload);

        if let Some(WebhookAuth::Basic { username, password }) = &self.config.auth {
            request = request.basic_auth(username, Some(password));
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::delivery(format!("Webhook request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::delivery(format!("Webhook failed: {status} - {body}")));
        }

        debug!(status = %status, "Webhook notification sent: {}", message.subject);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notification::events::Attachment;

    fn message() -> OutboundMessage {
        OutboundMessage {
            from: "pm2@example.com".to_string(),
            to: "ops@example.com".to_string(),
            subject: "[web-1] api restart".to_string(),
            body: "api restart\nworker exit".to_string(),
            attachments: vec![Attachment::from_path("/logs/api-out.log")],
        }
    }

    #[test]
    fn test_webhook_config_default() {
        let config = WebhookConfig::default();
        assert!(config.url.is_empty());
        assert_eq!(config.method, "POST");
        assert_eq!(config.timeout_secs, 30);
    }

    #[test]
    fn test_build_payload() {
        let channel = WebhookChannel::new(WebhookConfig::default());
        let payload = channel.build_payload(&message());

        assert_eq!(payload["subject"], "[web-1] api restart");
        assert_eq!(payload["to"], "ops@example.com");
        assert_eq!(payload["attachments"][0]["filename"], "api-out.log");
        assert_eq!(payload["attachments"][0]["path"], "/logs/api-out.log");
    }

    #[test]
    fn test_build_headers_with_bearer() {
        let config = WebhookConfig {
            url: "https://example.com/webhook".to_string(),
            headers: vec![("X-Source".to_string(), "pm2".to_string())],
            auth: Some(WebhookAuth::Bearer {
                token: "test-token".to_string(),
            }),
            ..Default::default()
        };
        let headers = WebhookChannel::new(config).build_headers();

        assert_eq!(headers[reqwest::header::AUTHORIZATION], "Bearer test-token");
        assert_eq!(headers["x-source"], "pm2");
    }

    #[test]
    fn test_invalid_header_is_skipped() {
        let config = WebhookConfig {
            headers: vec![("bad header".to_string(), "x".to_string())],
            ..Default::default()
        };
        assert!(WebhookChannel::new(config).build_headers().is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_a_delivery_error() {
        let config = WebhookConfig {
            url: "http://127.0.0.1:9/hook".to_string(),
            timeout_secs: 2,
            ..Default::default()
        };
        let err = WebhookChannel::new(config).send(&message()).await.unwrap_err();
        assert!(matches!(err, Error::Delivery(_)));
    }
}
