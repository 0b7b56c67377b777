use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempPath;
use thiserror::Error;
use url::Url;

use super::fetch::{download_to, FetchError};
use crate::catalog::CanonicalName;
use crate::config::Config;
use crate::feed::{
    FeedRegistry, Incoming, LivenessProbe, ReconcileError, ReconcileReport, RegistryError,
    ValidateReport,
};
use crate::inspector::{InspectError, PackageDetails, PackageInspector};
use crate::notify::{compose_announcement, Notifier};
use crate::storage::{ArtifactStore, BlobError};
use crate::util::{try_hard_to_delete, validate_source_url, UrlValidationError};

#[derive(Debug, Error)]
pub enum IntakeError {
    #[error("Upload is empty")]
    EmptyPayload,

    #[error("File is not a recognized package")]
    NotAPackage,

    #[error("Package validation failed: {0}")]
    Validation(InspectError),

    #[error("Failed to read package details: {0}")]
    Details(InspectError),

    #[error("Invalid source URL: {0}")]
    InvalidSource(#[from] UrlValidationError),

    #[error("Source is unreachable: {0}")]
    Unreachable(Url),

    #[error("Download failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("Invalid artifact location: {0}")]
    Location(#[from] url::ParseError),

    #[error("Failed to store artifact: {0}")]
    Artifact(#[from] BlobError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Reconcile(#[from] ReconcileError),

    #[error("Temp file error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Intake task failed: {0}")]
    Task(String),
}

impl IntakeError {
    pub fn status(&self) -> IntakeStatus {
        match self {
            IntakeError::EmptyPayload | IntakeError::NotAPackage | IntakeError::Validation(_) => {
                IntakeStatus::ClientError
            }
            _ => IntakeStatus::Failed,
        }
    }
}

/// Outcome class reported at the HTTP boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntakeStatus {
    Success,
    ClientError,
    Failed,
}

impl IntakeStatus {
    pub fn of<T>(result: &Result<T, IntakeError>) -> Self {
        match result {
            Ok(_) => IntakeStatus::Success,
            Err(e) => e.status(),
        }
    }

    pub fn status_code(self) -> u16 {
        match self {
            IntakeStatus::Success => 200,
            IntakeStatus::ClientError => 400,
            IntakeStatus::Failed => 500,
        }
    }
}

/// What an accepted upload turned into.
#[derive(Debug, Clone)]
pub struct Receipt {
    pub package: CanonicalName,
    pub location: Url,
    /// Every name the artifact was stored under.
    pub artifacts: Vec<String>,
    pub reconcile: ReconcileReport,
}

#[derive(Debug, Clone)]
pub struct IntakeSettings {
    pub artifact_extension: String,
    /// Where uploads wait while they are validated.
    pub temp_dir: PathBuf,
    pub max_package_bytes: u64,
    pub fetch_timeout: Duration,
    pub allow_private_sources: bool,
    pub announce_max_len: usize,
}

impl IntakeSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            artifact_extension: config.artifact_extension.clone(),
            temp_dir: config.work_dir.join("incoming"),
            max_package_bytes: config.max_package_bytes,
            fetch_timeout: Duration::from_secs(config.fetch_timeout_secs),
            allow_private_sources: config.allow_private_sources,
            announce_max_len: config.notify.max_len,
        }
    }
}

/// Accepts package files, validates and stores them, and folds them into a feed.
#[derive(Clone)]
pub struct IntakePipeline {
    registry: Arc<FeedRegistry>,
    inspector: Arc<dyn PackageInspector>,
    artifacts: ArtifactStore,
    probe: Arc<dyn LivenessProbe>,
    notifier: Option<Arc<dyn Notifier>>,
    client: reqwest::Client,
    settings: IntakeSettings,
}

impl IntakePipeline {
    pub fn new(
        registry: Arc<FeedRegistry>,
        inspector: Arc<dyn PackageInspector>,
        artifacts: ArtifactStore,
        probe: Arc<dyn LivenessProbe>,
        client: reqwest::Client,
        settings: IntakeSettings,
    ) -> Self {
        Self {
            registry,
            inspector,
            artifacts,
            probe,
            notifier: None,
            client,
            settings,
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Direct upload of a package body.
    pub async fn upload(&self, feed: &str, bytes: &[u8]) -> Result<Receipt, IntakeError> {
        let result = self.try_upload(feed, bytes).await;
        log_outcome(feed, &result);
        result
    }

    /// Downloads a package from `source` and adds it to `feed`.
    pub async fn add_from_url(&self, feed: &str, source: &str) -> Result<Receipt, IntakeError> {
        let result = self.try_add_from_url(feed, source).await;
        log_outcome(feed, &result);
        result
    }

    /// Prunes dead URLs from one feed.
    pub async fn validate(&self, feed: &str) -> Result<ValidateReport, IntakeError> {
        let report = self.registry.validate(feed).await?;
        tracing::info!(
            feed = %report.feed,
            kept = report.kept,
            dropped = report.dropped.len(),
            "Feed validated"
        );
        Ok(report)
    }

    async fn try_upload(&self, feed: &str, bytes: &[u8]) -> Result<Receipt, IntakeError> {
        if bytes.is_empty() {
            return Err(IntakeError::EmptyPayload);
        }
        self.registry.handler(feed)?;

        let temp = self.temp_path().await?;
        if let Err(e) = tokio::fs::write(&temp, bytes).await {
            discard(temp).await;
            return Err(e.into());
        }
        self.process(feed, temp).await
    }

    async fn try_add_from_url(&self, feed: &str, source: &str) -> Result<Receipt, IntakeError> {
        let url = validate_source_url(source, self.settings.allow_private_sources)?;
        self.registry.handler(feed)?;

        if !self.probe.is_live(&url).await {
            return Err(IntakeError::Unreachable(url));
        }

        let temp = self.temp_path().await?;
        if let Err(e) = download_to(
            &self.client,
            &url,
            &temp,
            self.settings.max_package_bytes,
            self.settings.fetch_timeout,
        )
        .await
        {
            discard(temp).await;
            return Err(e.into());
        }
        self.process(feed, temp).await
    }

    async fn temp_path(&self) -> Result<TempPath, IntakeError> {
        tokio::fs::create_dir_all(&self.settings.temp_dir).await?;
        let file = tempfile::Builder::new()
            .prefix("upload-")
            .suffix(".tmp")
            .tempfile_in(&self.settings.temp_dir)?;
        Ok(file.into_temp_path())
    }

    /// Runs the rest of intake as its own task and waits for it.
    async fn process(&self, feed: &str, temp: TempPath) -> Result<Receipt, IntakeError> {
        let this = self.clone();
        let feed = feed.to_string();
        let handle = tokio::spawn(async move { this.handle_file(&feed, temp).await });

        match handle.await {
            Ok(result) => result,
            Err(e) => Err(IntakeError::Task(e.to_string())),
        }
    }

    async fn handle_file(&self, feed: &str, temp: TempPath) -> Result<Receipt, IntakeError> {
        let staged = self.stage(feed, &temp).await;
        discard(temp).await;
        let (details, location, artifacts) = staged?;

        let package = details.name.clone();
        let reconcile = self
            .registry
            .reconcile(
                feed,
                Incoming {
                    name: package.clone(),
                    location: location.clone(),
                    entry: None,
                },
            )
            .await?;

        if !reconcile.accepted {
            tracing::warn!(
                feed = %feed,
                package = %package,
                location = %location,
                "Package stored but not published: no live location"
            );
        }

        self.announce(&details, &location);

        Ok(Receipt {
            package,
            location,
            artifacts,
            reconcile,
        })
    }

    /// Validates the file and moves it to permanent storage.
    async fn stage(
        &self,
        feed: &str,
        file: &Path,
    ) -> Result<(PackageDetails, Url, Vec<String>), IntakeError> {
        let name = self
            .inspector
            .query(file)
            .await
            .map_err(IntakeError::Validation)?
            .ok_or(IntakeError::NotAPackage)?;

        let details = self
            .inspector
            .details(&name)
            .await
            .map_err(IntakeError::Details)?;

        let handler = self.registry.handler(feed)?;
        let file_name = name.artifact_file_name(&self.settings.artifact_extension);
        let location = artifact_location(&handler.config().package_prefix, &file_name)?;

        let artifacts = self.artifacts.store(file, &file_name, &name).await?;
        Ok((details, location, artifacts))
    }

    fn announce(&self, details: &PackageDetails, location: &Url) {
        let Some(notifier) = self.notifier.clone() else {
            return;
        };
        let message = compose_announcement(details, location, self.settings.announce_max_len);
        let location = location.clone();

        tokio::spawn(async move {
            if let Err(e) = notifier.notify(&location, &message).await {
                tracing::warn!(location = %location, error = %e, "Failed to send announcement");
            }
        });
    }
}

async fn discard(temp: TempPath) {
    try_hard_to_delete(&temp).await;
    // Dropping retries the delete once more and ignores failures.
    drop(temp);
}

fn log_outcome(feed: &str, result: &Result<Receipt, IntakeError>) {
    match result {
        Ok(receipt) => tracing::info!(
            feed = %feed,
            package = %receipt.package,
            location = %receipt.location,
            entries = receipt.reconcile.entries,
            migrated = receipt.reconcile.migrated.len(),
            "Package accepted"
        ),
        Err(e) if e.status() == IntakeStatus::ClientError => {
            tracing::warn!(feed = %feed, error = %e, "Package rejected")
        }
        Err(e) => tracing::error!(feed = %feed, error = %e, "Package intake failed"),
    }
}

/// Appends `file_name` to `prefix` as a single percent-encoded path segment.
fn artifact_location(prefix: &Url, file_name: &str) -> Result<Url, IntakeError> {
    let mut location = prefix.clone();
    location
        .path_segments_mut()
        .map_err(|()| IntakeError::Location(url::ParseError::RelativeUrlWithCannotBeABaseBase))?
        .pop_if_empty()
        .push(file_name);
    Ok(location)
}
