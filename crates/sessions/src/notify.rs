//! Connected-session notification.
//!
//! When a session reaches `connected`, the manager fires a detached
//! notification to the external backend. The call is best-effort: a failure
//! is logged with session context and never rolls back the transition.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use cw_domain::config::NotifyConfig;
use cw_domain::error::{Error, Result};

use crate::registry::SessionSnapshot;

/// Informs an external system that a session reached `connected`.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify_connected(
        &self,
        session_id: &str,
        phone_identifier: &str,
        session: &SessionSnapshot,
    ) -> Result<()>;
}

/// Sink that drops every notification. Used when no webhook is configured.
pub struct NullNotifier;

#[async_trait]
impl NotificationSink for NullNotifier {
    async fn notify_connected(
        &self,
        _session_id: &str,
        _phone_identifier: &str,
        _session: &SessionSnapshot,
    ) -> Result<()> {
        Ok(())
    }
}

/// Default [`NotificationSink`] POSTing a JSON payload to the configured
/// webhook, with bounded retries on 5xx responses.
pub struct WebhookNotifier {
    url: String,
    client: reqwest::Client,
    max_retries: u32,
}

impl WebhookNotifier {
    pub fn new(url: String, timeout_ms: u64, max_retries: u32) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .unwrap_or_default();
        Self {
            url,
            client,
            max_retries: max_retries.max(1),
        }
    }

    /// Build from config. `None` when no webhook URL is configured.
    pub fn from_config(config: &NotifyConfig) -> Option<Self> {
        config
            .webhook_url
            .as_ref()
            .map(|url| Self::new(url.clone(), config.timeout_ms, config.max_retries))
    }
}

#[async_trait]
impl NotificationSink for WebhookNotifier {
    async fn notify_connected(
        &self,
        session_id: &str,
        phone_identifier: &str,
        session: &SessionSnapshot,
    ) -> Result<()> {
        let payload = serde_json::json!({
            "event_id": uuid::Uuid::new_v4(),
            "event": "session_connected",
            "session_id": session_id,
            "phone_identifier": phone_identifier,
            "session": session,
            "occurred_at": Utc::now(),
        });

        for attempt in 1..=self.max_retries {
            match self
                .client
                .post(&self.url)
                .header("Content-Type", "application/json")
                .json(&payload)
                .send()
                .await
            {
                Ok(resp) if resp.status().is_success() => {
                    tracing::info!(
                        session_id = %session_id,
                        status = %resp.status(),
                        attempt,
                        "connected webhook delivered"
                    );
                    return Ok(());
                }
                Ok(resp) if resp.status().is_server_error() && attempt < self.max_retries => {
                    tracing::warn!(
                        session_id = %session_id,
                        status = %resp.status(),
                        attempt,
                        "connected webhook 5xx, will retry"
                    );
                }
                Ok(resp) => {
                    return Err(Error::Notify(format!(
                        "webhook returned {} after {attempt} attempt(s)",
                        resp.status()
                    )));
                }
                Err(e) if attempt < self.max_retries => {
                    tracing::warn!(
                        session_id = %session_id,
                        error = %e,
                        attempt,
                        "connected webhook send failed, will retry"
                    );
                }
                Err(e) => return Err(Error::Notify(e.to_string())),
            }
        }
        Err(Error::Notify("retries exhausted".into()))
    }
}
