//! Persistence: blob transport, feed working copies and artifact placement.

mod artifacts;
mod blob;
mod feed_store;

pub use artifacts::{ArtifactStore, ArtifactTarget};
pub use blob::{BlobError, BlobStore, DirectoryBlobStore};
pub use feed_store::{FeedLoad, FeedStore, LoadKind, SaveReport, StoreError};
