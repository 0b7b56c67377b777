use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::Mutex;
use std::time::Duration;

use super::{InspectError, PackageDetails, PackageInspector};
use crate::catalog::{CanonicalName, CatalogEntry};

/// Inspects packages by running an external tool.
///
/// The tool is invoked as `{program} {args...} {path}` and must:
/// - exit 0 and print a JSON manifest when the file is a package;
/// - exit non-zero when it is not.
///
/// The manifest carries `name`, `flavor`, `version`, `architecture` and
/// optionally `title`, `summary` and `links`. Manifests are cached by
/// canonical name so later detail and catalog lookups need no second run.
/// A cached manifest is released once its catalog entry has been handed out.
pub struct CommandInspector {
    program: String,
    args: Vec<String>,
    timeout: Duration,
    known: Mutex<HashMap<CanonicalName, PackageDetails>>,
}

impl CommandInspector {
    pub fn new(program: impl Into<String>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args,
            timeout,
            known: Mutex::new(HashMap::new()),
        }
    }

    fn remember(&self, details: PackageDetails) {
        // A poisoned cache only loses memoized manifests.
        if let Ok(mut known) = self.known.lock() {
            known.insert(details.name.clone(), details);
        }
    }

    fn recall(&self, name: &CanonicalName) -> Option<PackageDetails> {
        self.known.lock().ok().and_then(|known| known.get(name).cloned())
    }

    fn release(&self, name: &CanonicalName) -> Option<PackageDetails> {
        self.known.lock().ok().and_then(|mut known| known.remove(name))
    }

    #[cfg(test)]
    fn cached(&self) -> usize {
        self.known.lock().map(|known| known.len()).unwrap_or(0)
    }
}

#[async_trait]
impl PackageInspector for CommandInspector {
    async fn query(&self, path: &Path) -> Result<Option<CanonicalName>, InspectError> {
        let mut command = tokio::process::Command::new(&self.program);
        command
            .args(&self.args)
            .arg(path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = match tokio::time::timeout(self.timeout, command.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(InspectError::Fault(format!(
                    "failed to run '{}': {e}",
                    self.program
                )))
            }
            Err(_) => {
                tracing::warn!(
                    program = %self.program,
                    timeout_secs = self.timeout.as_secs(),
                    "Package inspection timed out"
                );
                return Err(InspectError::Cancelled);
            }
        };

        if !output.status.success() {
            tracing::debug!(
                path = %path.display(),
                status = %output.status,
                stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                "Inspector did not recognize file as a package"
            );
            return Ok(None);
        }

        if output.stdout.iter().all(u8::is_ascii_whitespace) {
            return Ok(None);
        }

        let details: PackageDetails = serde_json::from_slice(&output.stdout)
            .map_err(|e| InspectError::Fault(format!("invalid inspector output: {e}")))?;
        let name = details.name.clone();
        self.remember(details);
        Ok(Some(name))
    }

    async fn details(&self, name: &CanonicalName) -> Result<PackageDetails, InspectError> {
        self.recall(name)
            .ok_or_else(|| InspectError::Fault(format!("no details known for {name}")))
    }

    async fn catalog_entry(
        &self,
        name: &CanonicalName,
    ) -> Result<Option<CatalogEntry>, InspectError> {
        Ok(self.release(name).map(|details| details.to_catalog_entry()))
    }
}
