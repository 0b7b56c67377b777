use std::sync::Arc;
use thiserror::Error;

use super::blob::{BlobError, BlobStore};
use crate::catalog::{parse_document, write_document, CodecError, FeedDocument, FeedMeta};
use crate::feed::FeedHandlerConfig;
use crate::util::atomic_write;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Failed to encode feed: {0}")]
    Codec(#[from] CodecError),

    #[error("Failed to write local working copy: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage task failed: {0}")]
    Task(String),
}

/// Outcome of loading a feed's working copy.
///
/// `Empty` means there was nothing to load; `Failed` means something went
/// wrong and the caller is about to work from an empty document anyway.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedLoad {
    Loaded(FeedDocument),
    Empty,
    Failed(String),
}

/// Discriminant of [`FeedLoad`] without the payload, for reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadKind {
    Loaded,
    Empty,
    Failed,
}

impl FeedLoad {
    pub fn kind(&self) -> LoadKind {
        match self {
            FeedLoad::Loaded(_) => LoadKind::Loaded,
            FeedLoad::Empty => LoadKind::Empty,
            FeedLoad::Failed(_) => LoadKind::Failed,
        }
    }

    pub fn into_document(self) -> FeedDocument {
        match self {
            FeedLoad::Loaded(doc) => doc,
            FeedLoad::Empty | FeedLoad::Failed(_) => FeedDocument::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SaveReport {
    pub entries: usize,
    /// `None` in local-only mode; otherwise whether both remote copies were written.
    pub remote_synced: Option<bool>,
}

/// Loads and persists feed documents: a local working copy, mirrored to the
/// blob store in plain and gzip encodings when one is configured.
#[derive(Clone, Default)]
pub struct FeedStore {
    blobs: Option<Arc<dyn BlobStore>>,
}

impl FeedStore {
    /// A store with a remote mirror.
    pub fn remote(blobs: Arc<dyn BlobStore>) -> Self {
        Self { blobs: Some(blobs) }
    }

    /// A store that only keeps the local working copy.
    pub fn local_only() -> Self {
        Self { blobs: None }
    }

    /// Refreshes the working copy from the blob store and parses it.
    ///
    /// Never fails: every problem is folded into [`FeedLoad::Failed`].
    pub async fn load(&self, feed: &FeedHandlerConfig) -> FeedLoad {
        if let Some(blobs) = &self.blobs {
            let blob_name = feed.blob_name();
            match blobs
                .read_blob(&feed.container, &blob_name, &feed.local_path)
                .await
            {
                Ok(()) => {
                    tracing::debug!(feed = %feed.name, blob = %blob_name, "Fetched feed from blob store");
                }
                Err(BlobError::NotFound { .. }) => {
                    tracing::debug!(feed = %feed.name, blob = %blob_name, "No feed in blob store yet");
                    return FeedLoad::Empty;
                }
                Err(e) => {
                    tracing::warn!(feed = %feed.name, error = %e, "Failed to fetch feed from blob store");
                    return FeedLoad::Failed(e.to_string());
                }
            }
        }

        let content = match tokio::fs::read_to_string(&feed.local_path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return FeedLoad::Empty,
            Err(e) => {
                tracing::warn!(
                    feed = %feed.name,
                    path = %feed.local_path.display(),
                    error = %e,
                    "Failed to read feed working copy"
                );
                return FeedLoad::Failed(e.to_string());
            }
        };

        match parse_document(&content) {
            Ok(doc) => FeedLoad::Loaded(doc),
            Err(e) => {
                tracing::warn!(feed = %feed.name, error = %e, "Feed working copy is unparseable");
                FeedLoad::Failed(e.to_string())
            }
        }
    }

    /// Writes the local working copy, then mirrors it to the blob store.
    ///
    /// Only the local write can fail this call. Remote upload failures are
    /// logged and surface as `remote_synced: Some(false)`.
    pub async fn save(
        &self,
        feed: &FeedHandlerConfig,
        document: &FeedDocument,
    ) -> Result<SaveReport, StoreError> {
        let xml = write_document(
            document,
            &FeedMeta {
                title: &feed.name,
                id: &feed.feed_url,
                updated: chrono::Utc::now(),
            },
        )?;

        let path = feed.local_path.clone();
        tokio::task::spawn_blocking(move || atomic_write(&path, xml.as_bytes()))
            .await
            .map_err(|e| StoreError::Task(e.to_string()))??;

        let remote_synced = match &self.blobs {
            Some(blobs) => Some(self.mirror(blobs.as_ref(), feed).await),
            None => None,
        };

        tracing::info!(
            feed = %feed.name,
            entries = document.len(),
            remote_synced = ?remote_synced,
            "Saved feed"
        );

        Ok(SaveReport {
            entries: document.len(),
            remote_synced,
        })
    }

    async fn mirror(&self, blobs: &dyn BlobStore, feed: &FeedHandlerConfig) -> bool {
        let plain = feed.blob_name();
        let compressed = format!("{plain}.gz");
        let mut synced = true;

        for (name, gzip) in [(plain, false), (compressed, true)] {
            if let Err(e) = blobs
                .write_blob(&feed.container, &name, &feed.local_path, gzip)
                .await
            {
                tracing::warn!(
                    feed = %feed.name,
                    blob = %name,
                    error = %e,
                    "Failed to upload feed to blob store; local copy is ahead"
                );
                synced = false;
            }
        }
        synced
    }
}
