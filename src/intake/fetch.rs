use futures::StreamExt;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use url::Url;

/// Errors that can occur while downloading a package by URL.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// HTTP response with non-2xx status code
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    #[error("Request timed out")]
    Timeout,
    /// Body exceeded the configured package size limit
    #[error("Package exceeds {0} bytes")]
    TooLarge(u64),
    /// Fewer bytes arrived than Content-Length announced
    #[error("Incomplete download: expected {expected} bytes, received {received}")]
    Incomplete { expected: u64, received: u64 },
    #[error("Failed to write download: {0}")]
    Io(#[from] std::io::Error),
}

/// Streams `url` into `dest`, refusing bodies larger than `limit` bytes.
///
/// The whole transfer, not just the first byte, must finish within `timeout`.
/// Returns the number of bytes written.
pub async fn download_to(
    client: &reqwest::Client,
    url: &Url,
    dest: &Path,
    limit: u64,
    timeout: Duration,
) -> Result<u64, FetchError> {
    let received = tokio::time::timeout(timeout, stream_to_file(client, url, dest, limit))
        .await
        .map_err(|_| FetchError::Timeout)??;

    tracing::info!(
        source = %url,
        dest = %dest.display(),
        bytes = received,
        "Downloaded package"
    );
    Ok(received)
}

async fn stream_to_file(
    client: &reqwest::Client,
    url: &Url,
    dest: &Path,
    limit: u64,
) -> Result<u64, FetchError> {
    let response = client.get(url.clone()).send().await?;
    if !response.status().is_success() {
        return Err(FetchError::HttpStatus(response.status().as_u16()));
    }

    // Fast path: check Content-Length header
    let expected_length = response.content_length();
    if let Some(len) = expected_length {
        if len > limit {
            return Err(FetchError::TooLarge(limit));
        }
    }

    let mut file = tokio::fs::File::create(dest).await?;
    let mut received: u64 = 0;
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        received = received.saturating_add(chunk.len() as u64);
        if received > limit {
            return Err(FetchError::TooLarge(limit));
        }
        file.write_all(&chunk).await?;
    }
    file.flush().await?;

    if let Some(expected) = expected_length {
        if received < expected {
            return Err(FetchError::Incomplete { expected, received });
        }
    }

    Ok(received)
}
