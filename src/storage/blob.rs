use async_trait::async_trait;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::util::atomic_copy;

#[derive(Debug, Error)]
pub enum BlobError {
    #[error("Blob not found: {container}/{name}")]
    NotFound { container: String, name: String },

    #[error("Invalid blob name: {0}")]
    InvalidName(String),

    #[error("Blob I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Blob task failed: {0}")]
    Task(String),
}

/// Transport for remote blob storage.
///
/// Blobs are addressed by a container name plus a flat blob name.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Downloads a blob into `dest`, replacing any existing file.
    async fn read_blob(&self, container: &str, name: &str, dest: &Path) -> Result<(), BlobError>;

    /// Uploads `src` as a blob. With `compressed` set the stored bytes are gzip.
    async fn write_blob(
        &self,
        container: &str,
        name: &str,
        src: &Path,
        compressed: bool,
    ) -> Result<(), BlobError>;
}

/// Blob store backed by a directory tree: `{root}/{container}/{name}`.
///
/// Used for deployments that mount object storage as a filesystem, and as the
/// remote side in tests.
#[derive(Debug, Clone)]
pub struct DirectoryBlobStore {
    root: PathBuf,
}

impl DirectoryBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolves the on-disk path of a blob, rejecting names that would escape the container.
    pub fn blob_path(&self, container: &str, name: &str) -> Result<PathBuf, BlobError> {
        for part in [container, name] {
            if part.is_empty() || part.contains(['/', '\\']) || part == "." || part == ".." {
                return Err(BlobError::InvalidName(part.to_string()));
            }
        }
        Ok(self.root.join(container).join(name))
    }
}

#[async_trait]
impl BlobStore for DirectoryBlobStore {
    async fn read_blob(&self, container: &str, name: &str, dest: &Path) -> Result<(), BlobError> {
        let src = self.blob_path(container, name)?;
        if !tokio::fs::try_exists(&src).await? {
            return Err(BlobError::NotFound {
                container: container.to_string(),
                name: name.to_string(),
            });
        }

        let dest = dest.to_path_buf();
        tokio::task::spawn_blocking(move || atomic_copy(&src, &dest))
            .await
            .map_err(|e| BlobError::Task(e.to_string()))??;
        Ok(())
    }

    async fn write_blob(
        &self,
        container: &str,
        name: &str,
        src: &Path,
        compressed: bool,
    ) -> Result<(), BlobError> {
        let dest = self.blob_path(container, name)?;
        let src = src.to_path_buf();

        tokio::task::spawn_blocking(move || -> Result<(), BlobError> {
            if !compressed {
                return Ok(atomic_copy(&src, &dest)?);
            }

            let parent = dest.parent().unwrap_or_else(|| Path::new("."));
            std::fs::create_dir_all(parent)?;
            let temp = tempfile::NamedTempFile::new_in(parent)?;
            {
                let mut input = BufReader::new(std::fs::File::open(&src)?);
                let mut encoder =
                    GzEncoder::new(BufWriter::new(temp.as_file()), Compression::default());
                std::io::copy(&mut input, &mut encoder)?;
                encoder.finish()?.flush()?;
            }
            temp.as_file().sync_all()?;
            temp.persist(&dest).map_err(|e| e.error)?;
            Ok(())
        })
        .await
        .map_err(|e| BlobError::Task(e.to_string()))?
    }
}
