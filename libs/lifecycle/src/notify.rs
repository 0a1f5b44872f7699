//! Lifecycle notifications.
//!
//! Fire-and-forget by contract: `emit` returns whether the message was
//! delivered, and any failure (missing webhook, transport error) is
//! logged and swallowed. Notification failure never changes a
//! lifecycle outcome.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::{debug, warn};

/// Event severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Success,
    Failure,
}

/// One lifecycle notification.
#[derive(Debug, Clone)]
pub struct NotificationEvent {
    pub severity: Severity,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl NotificationEvent {
    fn new(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            severity,
            message: message.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self::new(Severity::Info, message)
    }

    pub fn success(message: impl Into<String>) -> Self {
        Self::new(Severity::Success, message)
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self::new(Severity::Failure, message)
    }
}

/// Best-effort notification sink.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver the event. Returns false (never an error) on failure.
    async fn emit(&self, event: &NotificationEvent) -> bool;
}

/// Discord webhook notifier.
pub struct DiscordNotifier {
    client: reqwest::Client,
    webhook_url: Option<String>,
}

impl DiscordNotifier {
    pub fn new(webhook_url: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .expect("Failed to build HTTP client");

        Self {
            client,
            webhook_url,
        }
    }
}

#[async_trait]
impl Notifier for DiscordNotifier {
    async fn emit(&self, event: &NotificationEvent) -> bool {
        let Some(webhook) = self.webhook_url.as_deref() else {
            warn!("No Discord webhook configured, skipping notification");
            return false;
        };

        let result = self
            .client
            .post(webhook)
            .json(&json!({ "content": event.message }))
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => {
                debug!(severity = ?event.severity, "Notification delivered");
                true
            }
            Ok(response) => {
                warn!(status = %response.status(), "Discord notification rejected");
                false
            }
            Err(e) => {
                warn!(error = %e, "Discord notification failed");
                false
            }
        }
    }
}

/// Notifier that drops everything; used when notifications are off.
pub struct NullNotifier;

#[async_trait]
impl Notifier for NullNotifier {
    async fn emit(&self, _event: &NotificationEvent) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_missing_webhook_returns_false() {
        let notifier = DiscordNotifier::new(None);
        let delivered = notifier.emit(&NotificationEvent::info("hello")).await;
        assert!(!delivered);
    }

    #[tokio::test]
    async fn test_delivery_posts_content() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .and(body_partial_json(json!({"content": "b1 is ALIVE"})))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let notifier = DiscordNotifier::new(Some(format!("{}/hook", server.uri())));
        let delivered = notifier.emit(&NotificationEvent::success("b1 is ALIVE")).await;
        assert!(delivered);
    }

    #[tokio::test]
    async fn test_rejection_returns_false_not_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let notifier = DiscordNotifier::new(Some(format!("{}/hook", server.uri())));
        assert!(!notifier.emit(&NotificationEvent::failure("boom")).await);
    }
}
