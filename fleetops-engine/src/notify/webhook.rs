use async_trait::async_trait;
use serde::Serialize;
use tracing::warn;

use super::Notifier;

#[derive(Serialize)]
struct OutgoingMessage<'a> {
    from: &'a str,
    to: &'a str,
    subject: &'a str,
    body: &'a str,
}

/// Delivers notifications by POSTing JSON to a mail relay.
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    http: reqwest::Client,
    url: String,
    from: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>, from: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            url: url.into(),
            from: from.into(),
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn send(&self, to: &str, subject: &str, body: &str) -> bool {
        let message = OutgoingMessage {
            from: &self.from,
            to,
            subject,
            body,
        };

        match self.http.post(&self.url).json(&message).send().await {
            Ok(resp) if resp.status().is_success() => true,
            Ok(resp) => {
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                warn!(%status, body, to, "Mail relay rejected notification");
                false
            }
            Err(e) => {
                warn!(error = %e, to, "Could not reach mail relay");
                false
            }
        }
    }
}
