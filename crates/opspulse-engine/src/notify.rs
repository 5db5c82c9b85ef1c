//! Outbound notification sink.
//!
//! The engine decides *what* to send and *who* won the right to send it;
//! this module is the thin transport boundary. Delivery failure is logged
//! and swallowed — a won reservation is never rolled back, favoring
//! at-most-once over at-least-once.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A notification the engine has reserved the right to send.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    /// Title/summary line.
    pub title: String,
    /// Body content.
    pub body: String,
    /// Campaign metadata, e.g. `overdue#2026-08-06` bucket 0.
    pub campaign: String,
    /// Resolved external recipient identifiers.
    pub recipients: Vec<String>,
    /// Priority: low, normal, high, urgent.
    pub priority: NotifyPriority,
    /// Timestamp.
    pub timestamp: DateTime<Utc>,
}

/// Notification priority.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum NotifyPriority {
    Low,
    Normal,
    High,
    Urgent,
}

/// Transport for notifications. Implementations must be safe to call
/// from concurrent sweeps.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver one notification. `Err` is a transport failure the caller
    /// logs and drops.
    async fn deliver(&self, notification: &Notification) -> Result<(), String>;
}

/// POSTs notifications to a configured webhook as JSON.
pub struct WebhookNotifier {
    url: String,
    headers: Vec<(String, String)>,
    client: reqwest::Client,
}

impl WebhookNotifier {
    pub fn new(url: &str, headers: Vec<(String, String)>) -> Self {
        Self {
            url: url.to_string(),
            headers,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn deliver(&self, notification: &Notification) -> Result<(), String> {
        let mut req = self
            .client
            .post(&self.url)
            .json(&serde_json::json!({
                "title": notification.title,
                "body": notification.body,
                "campaign": notification.campaign,
                "recipients": notification.recipients,
                "priority": format!("{:?}", notification.priority),
                "timestamp": notification.timestamp.to_rfc3339(),
            }))
            .timeout(std::time::Duration::from_secs(10));

        for (key, value) in &self.headers {
            req = req.header(key.as_str(), value.as_str());
        }

        let resp = req
            .send()
            .await
            .map_err(|e| format!("Webhook send failed: {e}"))?;

        if resp.status().is_success() {
            tracing::info!("✅ Webhook notification sent: {}", notification.title);
            Ok(())
        } else {
            let status = resp.status();
            Err(format!("Webhook error {status}"))
        }
    }
}

/// Log-only sink, used when no webhook is configured.
pub struct NullNotifier;

#[async_trait]
impl Notifier for NullNotifier {
    async fn deliver(&self, notification: &Notification) -> Result<(), String> {
        tracing::info!(
            "📢 [{}] {} → {:?}",
            notification.campaign,
            notification.title,
            notification.recipients
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_null_notifier_always_ok() {
        let n = Notification {
            title: "t".into(),
            body: "b".into(),
            campaign: "overdue#2026-08-06".into(),
            recipients: vec!["u1".into()],
            priority: NotifyPriority::High,
            timestamp: Utc::now(),
        };
        assert!(NullNotifier.deliver(&n).await.is_ok());
    }
}
