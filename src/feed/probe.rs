use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::time::Duration;
use url::Url;

use crate::catalog::{dedup_urls, CatalogEntry, Link};

/// Reports whether a URL is currently reachable.
#[async_trait]
pub trait LivenessProbe: Send + Sync {
    async fn is_live(&self, url: &Url) -> bool;
}

/// Header-only HTTP reachability check.
///
/// Any HTTP response counts as live, including 4xx/5xx: the question is
/// whether the link resolves to a server, not whether the content is valid.
/// Transport failures, timeouts and non-HTTP schemes count as dead.
#[derive(Debug, Clone)]
pub struct HttpProbe {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpProbe {
    pub fn new(client: reqwest::Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }
}

#[async_trait]
impl LivenessProbe for HttpProbe {
    async fn is_live(&self, url: &Url) -> bool {
        if !matches!(url.scheme(), "http" | "https") {
            return false;
        }

        match tokio::time::timeout(self.timeout, self.client.head(url.clone()).send()).await {
            Ok(Ok(response)) => {
                let status = response.status();
                // Release the connection before reporting.
                drop(response);
                tracing::debug!(url = %url, status = %status, "Probe succeeded");
                true
            }
            Ok(Err(e)) => {
                tracing::debug!(url = %url, error = %e, "Probe failed");
                false
            }
            Err(_) => {
                tracing::debug!(url = %url, timeout_secs = self.timeout.as_secs(), "Probe timed out");
                false
            }
        }
    }
}

/// Keeps the live URLs, preserving input order.
pub async fn filter_live(probe: &dyn LivenessProbe, urls: Vec<Url>, concurrency: usize) -> Vec<Url> {
    stream::iter(urls)
        .map(|url| async move {
            let live = probe.is_live(&url).await;
            (url, live)
        })
        .buffered(concurrency.max(1))
        .filter_map(|(url, live)| async move {
            if !live {
                tracing::warn!(url = %url, "Dropping unreachable URL");
            }
            live.then_some(url)
        })
        .collect()
        .await
}

/// Keeps the links whose target is live, preserving input order.
pub async fn filter_live_links(
    probe: &dyn LivenessProbe,
    links: Vec<Link>,
    concurrency: usize,
) -> Vec<Link> {
    stream::iter(links)
        .map(|link| async move {
            let live = probe.is_live(&link.href).await;
            (link, live)
        })
        .buffered(concurrency.max(1))
        .filter_map(|(link, live)| async move {
            if !live {
                tracing::warn!(url = %link.href, rel = %link.rel, "Dropping unreachable link");
            }
            live.then_some(link)
        })
        .collect()
        .await
}

/// Deduplicates an entry's feeds and locations and drops every URL that fails the probe.
pub async fn prune_entry(
    probe: &dyn LivenessProbe,
    mut entry: CatalogEntry,
    concurrency: usize,
) -> CatalogEntry {
    entry.feeds = filter_live(probe, dedup_urls(entry.feeds), concurrency).await;
    entry.locations = filter_live(probe, dedup_urls(entry.locations), concurrency).await;
    entry.links = filter_live_links(probe, entry.links, concurrency).await;
    entry
}
