use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::blob::{BlobError, BlobStore};
use crate::catalog::CanonicalName;
use crate::util::atomic_copy;

/// Where package artifacts end up.
#[derive(Clone)]
pub enum ArtifactTarget {
    /// Uploaded to the blob store under `container`.
    Blob {
        store: Arc<dyn BlobStore>,
        container: String,
    },
    /// Copied into a local folder, replacing any existing file.
    Folder(PathBuf),
}

/// Places validated package files at their permanent destination.
#[derive(Clone)]
pub struct ArtifactStore {
    target: ArtifactTarget,
    /// Lower-cased package name → additional artifact name.
    aliases: HashMap<String, String>,
}

impl ArtifactStore {
    pub fn new(target: ArtifactTarget) -> Self {
        Self {
            target,
            aliases: HashMap::new(),
        }
    }

    /// Packages whose name matches a key are also published under the mapped name.
    pub fn with_aliases(mut self, aliases: &HashMap<String, String>) -> Self {
        self.aliases = aliases
            .iter()
            .map(|(package, alias)| (package.to_lowercase(), alias.clone()))
            .collect();
        self
    }

    /// Stores `src` as `file_name`, plus any alias configured for the package.
    ///
    /// Returns every name the artifact was written under.
    pub async fn store(
        &self,
        src: &Path,
        file_name: &str,
        package: &CanonicalName,
    ) -> Result<Vec<String>, BlobError> {
        let mut names = vec![file_name.to_string()];
        if let Some(alias) = self.aliases.get(&package.name.to_lowercase()) {
            names.push(alias.clone());
        }

        for name in &names {
            self.put(src, name).await?;
            tracing::info!(package = %package, artifact = %name, "Stored package artifact");
        }
        Ok(names)
    }

    async fn put(&self, src: &Path, name: &str) -> Result<(), BlobError> {
        match &self.target {
            ArtifactTarget::Blob { store, container } => {
                store.write_blob(container, name, src, false).await
            }
            ArtifactTarget::Folder(folder) => {
                if name.contains(['/', '\\']) || name == ".." {
                    return Err(BlobError::InvalidName(name.to_string()));
                }
                let src = src.to_path_buf();
                let dst = folder.join(name);
                tokio::task::spawn_blocking(move || atomic_copy(&src, &dst))
                    .await
                    .map_err(|e| BlobError::Task(e.to_string()))??;
                Ok(())
            }
        }
    }
}
