pub mod webhook;

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tracing::info;

/// Outbound notification channel (e-mail relay or similar).
///
/// Delivery is best-effort: `send` reports whether the message went out and
/// callers only log a `false`.
#[async_trait]
pub trait Notifier: Send + Sync + 'static {
    async fn send(&self, to: &str, subject: &str, body: &str) -> bool;
}

/// Notifier that only writes messages to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, to: &str, subject: &str, body: &str) -> bool {
        info!(to, subject, body_len = body.len(), "Notification");
        true
    }
}

/// A message captured by [`RecordingNotifier`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub to: String,
    pub subject: String,
    pub body: String,
}

/// Notifier that keeps every message in memory, for tests and dry runs.
#[derive(Clone, Default)]
pub struct RecordingNotifier {
    sent: Arc<Mutex<Vec<SentMessage>>>,
    fail: bool,
}

impl RecordingNotifier {
    /// A notifier that records messages but reports every send as failed.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, to: &str, subject: &str, body: &str) -> bool {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(SentMessage {
                to: to.to_string(),
                subject: subject.to_string(),
                body: body.to_string(),
            });
        !self.fail
    }
}
