//! Best-effort announcements of newly published packages.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::inspector::PackageDetails;

const NOTIFY_TIMEOUT: Duration = Duration::from_secs(20);

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    #[error("Request timed out")]
    Timeout,
    #[error("Failed to encode notification: {0}")]
    Encode(#[from] serde_json::Error),
}

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Announces `message` about the artifact published at `location`.
    async fn notify(&self, location: &Url, message: &str) -> Result<(), NotifyError>;
}

/// Posts `{"text": message}` to a webhook endpoint.
pub struct WebhookNotifier {
    client: reqwest::Client,
    endpoint: Url,
    token: Option<SecretString>,
}

impl WebhookNotifier {
    pub fn new(client: reqwest::Client, endpoint: Url, token: Option<SecretString>) -> Self {
        Self {
            client,
            endpoint,
            token,
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, location: &Url, message: &str) -> Result<(), NotifyError> {
        let body = serde_json::to_vec(&serde_json::json!({ "text": message }))?;
        let mut request = self
            .client
            .post(self.endpoint.clone())
            .header("Content-Type", "application/json")
            .body(body);

        if let Some(token) = &self.token {
            request = request.header("Authorization", format!("Bearer {}", token.expose_secret()));
        }

        let response = tokio::time::timeout(NOTIFY_TIMEOUT, request.send())
            .await
            .map_err(|_| NotifyError::Timeout)??;

        let status = response.status();
        if !status.is_success() {
            return Err(NotifyError::HttpStatus(status.as_u16()));
        }

        tracing::debug!(location = %location, "Announcement posted");
        Ok(())
    }
}

/// Builds `"[name-version-arch] summary link"`, shortening the summary so the
/// whole message fits in `max_len` characters.
pub fn compose_announcement(details: &PackageDetails, link: &Url, max_len: usize) -> String {
    let name = &details.name;
    let tag = format!("[{}-{}-{}]", name.name, name.version, name.architecture);
    let summary = details
        .summary
        .as_deref()
        .or(details.title.as_deref())
        .unwrap_or_default()
        .trim();

    // Tag, link and the two separating spaces are never shortened.
    let fixed = tag.chars().count() + link.as_str().chars().count() + 2;
    let room = max_len.saturating_sub(fixed);
    let summary = truncate_chars(summary, room);

    if summary.is_empty() {
        format!("{tag} {link}")
    } else {
        format!("{tag} {summary} {link}")
    }
}

fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    if max == 0 {
        return String::new();
    }
    let mut out: String = text.chars().take(max - 1).collect();
    out.push('…');
    out
}
