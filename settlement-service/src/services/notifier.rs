//! Outbound notification capability.
//!
//! Settlement hands one [`NotificationIntent`] per paid invoice to a
//! [`Notifier`] after its transaction commits. Delivery is fire-and-forget:
//! failures are logged and counted, never returned to the settling caller.

use crate::models::NotificationIntent;
use crate::services::metrics::record_notification;
use async_trait::async_trait;
use backoff::future::retry;
use backoff::ExponentialBackoff;
use service_core::observability::inject_trace_context;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn, Instrument};

#[derive(Debug, Error)]
pub enum NotifierError {
    #[error("notification transport failed: {0}")]
    Transport(String),

    #[error("notification rejected with status {0}")]
    Rejected(u16),
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, intent: &NotificationIntent) -> Result<(), NotifierError>;
}

/// Deliver intents on a background task. Returns immediately.
pub fn dispatch(notifier: Arc<dyn Notifier>, intents: Vec<NotificationIntent>) {
    if intents.is_empty() {
        return;
    }
    let span = tracing::info_span!("dispatch_notifications", count = intents.len());
    tokio::spawn(
        async move {
            for intent in intents {
                match notifier.notify(&intent).await {
                    Ok(()) => record_notification("delivered"),
                    Err(e) => {
                        record_notification("failed");
                        warn!(
                            error = %e,
                            recipient_id = %intent.recipient_id,
                            invoice_id = ?intent.invoice_id,
                            "Failed to deliver notification"
                        );
                    }
                }
            }
        }
        .instrument(span),
    );
}

/// Posts intents as JSON to the notification service.
#[derive(Clone)]
pub struct HttpNotifier {
    client: reqwest::Client,
    endpoint: String,
    max_elapsed: Duration,
}

impl HttpNotifier {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, NotifierError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| NotifierError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: format!("{}/notifications", base_url.trim_end_matches('/')),
            max_elapsed: Duration::from_secs(30),
        })
    }

    async fn send_once(&self, intent: &NotificationIntent) -> Result<(), NotifierError> {
        let mut headers = reqwest::header::HeaderMap::new();
        inject_trace_context(&mut headers);

        let response = self
            .client
            .post(&self.endpoint)
            .headers(headers)
            .json(intent)
            .send()
            .await
            .map_err(|e| NotifierError::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(NotifierError::Rejected(status.as_u16()))
        }
    }
}

#[async_trait]
impl Notifier for HttpNotifier {
    async fn notify(&self, intent: &NotificationIntent) -> Result<(), NotifierError> {
        let backoff = ExponentialBackoff {
            max_elapsed_time: Some(self.max_elapsed),
            ..Default::default()
        };

        retry(backoff, || async {
            self.send_once(intent).await.map_err(|e| match e {
                // Client errors will not succeed on retry.
                NotifierError::Rejected(status) if (400..500).contains(&status) => {
                    backoff::Error::permanent(e)
                }
                other => backoff::Error::transient(other),
            })
        })
        .await
    }
}

/// Used when no notification endpoint is configured.
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, intent: &NotificationIntent) -> Result<(), NotifierError> {
        info!(
            recipient_id = %intent.recipient_id,
            kind = %intent.kind,
            invoice_id = ?intent.invoice_id,
            title = %intent.title,
            "Notification (no delivery endpoint configured)"
        );
        Ok(())
    }
}

#[cfg(any(test, feature = "test-utils"))]
pub mod testing {
    //! Notifiers that record or fail, for tests.

    use super::*;
    use tokio::sync::Mutex;

    #[derive(Default)]
    pub struct RecordingNotifier {
        sent: Mutex<Vec<NotificationIntent>>,
    }

    impl RecordingNotifier {
        pub fn new() -> Self {
            Self::default()
        }

        pub async fn sent(&self) -> Vec<NotificationIntent> {
            self.sent.lock().await.clone()
        }

        /// Poll until at least `count` intents arrived or `timeout` passes.
        pub async fn wait_for(&self, count: usize, timeout: Duration) -> Vec<NotificationIntent> {
            let deadline = tokio::time::Instant::now() + timeout;
            loop {
                let sent = self.sent().await;
                if sent.len() >= count || tokio::time::Instant::now() >= deadline {
                    return sent;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        }
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn notify(&self, intent: &NotificationIntent) -> Result<(), NotifierError> {
            self.sent.lock().await.push(intent.clone());
            Ok(())
        }
    }

    #[derive(Debug, Default)]
    pub struct FailingNotifier {
        attempts: std::sync::atomic::AtomicUsize,
    }

    impl FailingNotifier {
        pub fn attempts(&self) -> usize {
            self.attempts.load(std::sync::atomic::Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Notifier for FailingNotifier {
        async fn notify(&self, _intent: &NotificationIntent) -> Result<(), NotifierError> {
            self.attempts
                .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Err(NotifierError::Transport("connection refused".to_string()))
        }
    }
}
