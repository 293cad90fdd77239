//! Operator notification channel.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::CONTENT_TYPE;
use serde::{Deserialize, Serialize};

use crate::config::NotifySettings;
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    BranchFailed,
    RunFailed,
    Terminated,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub kind: NotificationKind,
    pub message: String,
    pub at: DateTime<Utc>,
}

impl Notification {
    pub fn new(kind: NotificationKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            at: Utc::now(),
        }
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: &Notification) -> Result<()>;
}

/// Emits notifications as tracing events only.
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, n: &Notification) -> Result<()> {
        match n.kind {
            NotificationKind::Terminated => {
                tracing::warn!(kind = ?n.kind, at = %n.at, "{}", n.message)
            }
            _ => tracing::error!(kind = ?n.kind, at = %n.at, "{}", n.message),
        }
        Ok(())
    }
}

/// POSTs each notification as JSON to a fixed URL.
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl WebhookNotifier {
    #[tracing::instrument(level = "debug")]
    pub fn new(url: &str, timeout: Duration) -> Result<Self> {
        reqwest::Url::parse(url)
            .map_err(|e| Error::InvalidInput(format!("invalid webhook url: {e}")))?;
        let client = reqwest::Client::builder()
            .user_agent(concat!("pagesync/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::backend("build webhook http client", e))?;
        Ok(Self {
            client,
            url: url.to_string(),
            timeout,
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    #[tracing::instrument(level = "debug", skip_all, fields(kind = ?n.kind))]
    async fn notify(&self, n: &Notification) -> Result<()> {
        let body = serde_json::to_vec(n).map_err(|e| Error::backend("encode notification", e))?;
        let resp = self
            .client
            .post(&self.url)
            .timeout(self.timeout)
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(Error::HttpStatus {
                status: resp.status().as_u16(),
                url: self.url.clone(),
            });
        }
        Ok(())
    }
}

/// Webhook delivery when a URL is configured, logging otherwise.
pub fn from_settings(settings: &NotifySettings) -> Result<Arc<dyn Notifier>> {
    match settings.webhook_url.as_deref() {
        Some(url) => Ok(Arc::new(WebhookNotifier::new(url, settings.webhook_timeout)?)),
        None => Ok(Arc::new(LogNotifier)),
    }
}

/// Delivers `notification`, logging instead of failing when delivery fails.
pub async fn notify_best_effort(notifier: &dyn Notifier, notification: Notification) {
    if let Err(err) = notifier.notify(&notification).await {
        tracing::warn!(error = %err, kind = ?notification.kind, "notification delivery failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{RecordingNotifier, one_shot_http};
    use serde_json::Value;

    #[test]
    fn notification_json_shape() {
        let n = Notification::new(NotificationKind::BranchFailed, "page_insights P1: boom");
        let v = serde_json::to_value(&n).unwrap();
        assert_eq!(v["kind"], "branch_failed");
        assert_eq!(v["message"], "page_insights P1: boom");
        assert!(v["at"].is_string());
    }

    #[test]
    fn settings_pick_the_channel() {
        let log_only = NotifySettings {
            webhook_url: None,
            webhook_timeout: Duration::from_secs(1),
        };
        assert!(from_settings(&log_only).is_ok());

        let bad = NotifySettings {
            webhook_url: Some("not a url".into()),
            webhook_timeout: Duration::from_secs(1),
        };
        assert!(matches!(from_settings(&bad), Err(Error::InvalidInput(_))));
    }

    #[tokio::test]
    async fn best_effort_swallows_delivery_errors() {
        let notifier = RecordingNotifier::failing();
        notify_best_effort(&notifier, Notification::new(NotificationKind::Terminated, "bye")).await;
        assert_eq!(notifier.kinds().await, vec![NotificationKind::Terminated]);
    }

    #[tokio::test]
    async fn webhook_posts_the_notification_as_json() {
        let (url, server) = one_shot_http(204).await;
        let notifier = WebhookNotifier::new(&url, Duration::from_secs(5)).unwrap();

        let sent = Notification::new(NotificationKind::RunFailed, "store unreachable");
        notifier.notify(&sent).await.unwrap();

        let request = server.await.unwrap();
        assert!(request.head.starts_with("POST /hook "), "{}", request.head);
        assert_eq!(request.header("content-type"), Some("application/json"));
        let body: Value = serde_json::from_slice(&request.body).unwrap();
        assert_eq!(body["kind"], "run_failed");
        assert_eq!(body["message"], "store unreachable");
        let received: Notification = serde_json::from_value(body).unwrap();
        assert_eq!(received, sent);
    }

    #[tokio::test]
    async fn webhook_rejection_is_an_http_status_error() {
        let (url, server) = one_shot_http(500).await;
        let notifier = WebhookNotifier::new(&url, Duration::from_secs(5)).unwrap();

        let err = notifier
            .notify(&Notification::new(NotificationKind::Terminated, "bye"))
            .await
            .unwrap_err();
        assert!(
            matches!(&err, Error::HttpStatus { status: 500, url: u } if *u == url),
            "{err:?}"
        );
        server.await.unwrap();
    }
}
