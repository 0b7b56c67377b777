use futures::future::{BoxFuture, FutureExt};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use url::Url;

use super::probe::{prune_entry, LivenessProbe};
use super::registry::{FeedRegistry, RegistryError, ARCHIVE_FEED, CURRENT_FEED};
use crate::catalog::{prepend_if_absent, CanonicalName, CatalogEntry, FeedDocument};
use crate::config::{Config, ConfigError};
use crate::inspector::{InspectError, PackageInspector};
use crate::storage::{FeedLoad, FeedStore, LoadKind, StoreError};

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// A handler tried to take a sibling lock that does not rank after its own.
    #[error("Lock order violation: '{held}' may not acquire '{requested}'")]
    LockOrder { held: String, requested: String },

    #[error("Catalog lookup failed: {0}")]
    Lookup(#[from] InspectError),

    #[error("Failed to persist feed: {0}")]
    Store(#[from] StoreError),

    #[error("Feed could not be loaded: {0}")]
    LoadFailed(String),
}

/// The part a feed plays in version migration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedRole {
    Current,
    Archive,
    Other,
}

impl FeedRole {
    pub fn from_name(name: &str) -> Self {
        if name.eq_ignore_ascii_case(CURRENT_FEED) {
            FeedRole::Current
        } else if name.eq_ignore_ascii_case(ARCHIVE_FEED) {
            FeedRole::Archive
        } else {
            FeedRole::Other
        }
    }

    /// Locks are only ever taken in increasing rank order.
    pub fn lock_rank(self) -> u8 {
        match self {
            FeedRole::Current => 0,
            FeedRole::Archive => 1,
            FeedRole::Other => 2,
        }
    }
}

/// Immutable per-feed settings, fixed at startup.
#[derive(Debug, Clone)]
pub struct FeedHandlerConfig {
    /// Lower-cased logical feed name.
    pub name: String,
    pub role: FeedRole,
    /// Canonical public URL of this feed.
    pub feed_url: Url,
    /// Public URL prefix that artifact file names are joined onto.
    pub package_prefix: Url,
    /// Local working copy.
    pub local_path: PathBuf,
    /// Blob container holding the remote copies.
    pub container: String,
}

impl FeedHandlerConfig {
    pub fn from_config(name: &str, config: &Config) -> Result<Self, ConfigError> {
        let name = name.trim().to_lowercase();
        if name.is_empty() || name.contains(['/', '\\']) {
            return Err(ConfigError::Invalid(format!("invalid feed name '{name}'")));
        }

        let feed_url = config
            .feed_prefix()?
            .join(&name)
            .map_err(|e| ConfigError::Invalid(format!("feed url for '{name}': {e}")))?;

        Ok(Self {
            role: FeedRole::from_name(&name),
            feed_url,
            package_prefix: config.package_prefix()?,
            local_path: config.work_dir.join(format!("{name}.feed.xml")),
            container: config.storage.container.clone(),
            name,
        })
    }

    /// Remote blob name: the working copy's file name, lower-cased.
    pub fn blob_name(&self) -> String {
        self.local_path
            .file_name()
            .map(|n| n.to_string_lossy().to_lowercase())
            .unwrap_or_else(|| format!("{}.feed.xml", self.name))
    }
}

/// Collaborators shared by every handler.
pub struct FeedServices {
    pub store: FeedStore,
    pub probe: Arc<dyn LivenessProbe>,
    pub catalog: Arc<dyn PackageInspector>,
    pub probe_concurrency: usize,
}

/// A new fact to merge into a feed.
#[derive(Debug, Clone)]
pub struct Incoming {
    pub name: CanonicalName,
    pub location: Url,
    /// When `None`, the entry is looked up in the catalog by `name`.
    pub entry: Option<CatalogEntry>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReconcileReport {
    pub feed: String,
    pub load: LoadKind,
    pub entries: usize,
    /// Older versions moved to the archive feed.
    pub migrated: Vec<CanonicalName>,
    /// Whether the incoming entry made it into the document.
    pub accepted: bool,
    pub remote_synced: Option<bool>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValidateReport {
    pub feed: String,
    pub kept: usize,
    pub dropped: Vec<CanonicalName>,
    pub remote_synced: Option<bool>,
}

/// Owns one feed document and serializes every load-merge-save on it.
pub struct FeedHandler {
    config: FeedHandlerConfig,
    services: Arc<FeedServices>,
    lock: Mutex<()>,
}

impl FeedHandler {
    pub fn new(config: FeedHandlerConfig, services: Arc<FeedServices>) -> Self {
        Self {
            config,
            services,
            lock: Mutex::new(()),
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn role(&self) -> FeedRole {
        self.config.role
    }

    pub fn config(&self) -> &FeedHandlerConfig {
        &self.config
    }

    /// Resolves a sibling handler that may be locked while this one is held.
    ///
    /// Only siblings of strictly higher rank are handed out, which keeps
    /// every nested acquisition in the same global order.
    pub fn acquire_sibling(
        &self,
        registry: &FeedRegistry,
        name: &str,
    ) -> Result<Arc<FeedHandler>, ReconcileError> {
        let sibling = registry.handler(name)?;
        if sibling.role().lock_rank() <= self.role().lock_rank() {
            return Err(ReconcileError::LockOrder {
                held: self.config.name.clone(),
                requested: sibling.config.name.clone(),
            });
        }
        Ok(sibling)
    }

    /// Merges `incoming` into this feed and persists the rebuilt document.
    ///
    /// On the current feed, older versions of the incoming package are
    /// reconciled into the archive feed first and left out of the output.
    pub fn reconcile<'a>(
        &'a self,
        registry: &'a FeedRegistry,
        incoming: Incoming,
    ) -> BoxFuture<'a, Result<ReconcileReport, ReconcileError>> {
        async move {
            let _guard = self.lock.lock().await;

            let incoming_entry = match incoming.entry {
                Some(entry) => Some(entry),
                None => self.services.catalog.catalog_entry(&incoming.name).await?,
            };

            let load = self.services.store.load(&self.config).await;
            let load_kind = load.kind();
            if let FeedLoad::Failed(reason) = &load {
                tracing::warn!(
                    feed = %self.config.name,
                    reason = %reason,
                    "Feed failed to load, rebuilding from empty"
                );
            }

            let mut next = FeedDocument::new();
            let mut migrated = Vec::new();
            let mut replaced = Vec::new();

            for entry in load.into_document().entries {
                if self.supersedes(&incoming.name, &entry.name) {
                    let name = entry.name.clone();
                    if self.migrate(registry, entry).await? {
                        migrated.push(name);
                    }
                    continue;
                }
                if incoming_entry.is_some() && entry.name.same_identity(&incoming.name) {
                    replaced.push(entry);
                    continue;
                }
                next.push(entry);
            }

            let mut accepted = false;
            if let Some(mut entry) = incoming_entry {
                for old in replaced {
                    absorb(&mut entry, old);
                }
                prepend_if_absent(&mut entry.feeds, &self.config.feed_url);
                prepend_if_absent(&mut entry.locations, &incoming.location);

                let entry = prune_entry(
                    self.services.probe.as_ref(),
                    entry,
                    self.services.probe_concurrency,
                )
                .await;

                if entry.is_feed_worthy() {
                    next.push(entry);
                    accepted = true;
                } else {
                    tracing::warn!(
                        feed = %self.config.name,
                        package = %entry.name,
                        "No live download location, entry dropped"
                    );
                }
            }

            let saved = self.services.store.save(&self.config, &next).await?;

            Ok(ReconcileReport {
                feed: self.config.name.clone(),
                load: load_kind,
                entries: saved.entries,
                migrated,
                accepted,
                remote_synced: saved.remote_synced,
            })
        }
        .boxed()
    }

    /// Prunes dead URLs from every entry and drops entries left without a location.
    ///
    /// A feed that fails to load is left untouched rather than overwritten.
    pub async fn validate(&self) -> Result<ValidateReport, ReconcileError> {
        let _guard = self.lock.lock().await;

        let document = match self.services.store.load(&self.config).await {
            FeedLoad::Loaded(document) => document,
            FeedLoad::Empty => FeedDocument::new(),
            FeedLoad::Failed(reason) => return Err(ReconcileError::LoadFailed(reason)),
        };

        let mut next = FeedDocument::new();
        let mut dropped = Vec::new();
        for entry in document.entries {
            let entry = prune_entry(
                self.services.probe.as_ref(),
                entry,
                self.services.probe_concurrency,
            )
            .await;
            if entry.is_feed_worthy() {
                next.push(entry);
            } else {
                tracing::warn!(
                    feed = %self.config.name,
                    package = %entry.name,
                    "No live download location left, entry dropped"
                );
                dropped.push(entry.name);
            }
        }

        let saved = self.services.store.save(&self.config, &next).await?;
        Ok(ValidateReport {
            feed: self.config.name.clone(),
            kept: saved.entries,
            dropped,
            remote_synced: saved.remote_synced,
        })
    }

    fn supersedes(&self, incoming: &CanonicalName, existing: &CanonicalName) -> bool {
        self.config.role == FeedRole::Current
            && existing.differs_only_by_version(incoming)
            && existing.version < incoming.version
    }

    /// Moves a superseded entry into the archive feed. Returns false if the
    /// entry had no location to carry over and was dropped instead.
    async fn migrate(
        &self,
        registry: &FeedRegistry,
        entry: CatalogEntry,
    ) -> Result<bool, ReconcileError> {
        let Some(location) = entry.locations.first().cloned() else {
            tracing::warn!(
                feed = %self.config.name,
                package = %entry.name,
                "Superseded entry has no location, dropping instead of archiving"
            );
            return Ok(false);
        };

        let archive = self.acquire_sibling(registry, ARCHIVE_FEED)?;
        let name = entry.name.clone();
        let report = archive
            .reconcile(
                registry,
                Incoming {
                    name: name.clone(),
                    location,
                    entry: Some(entry),
                },
            )
            .await?;

        tracing::info!(
            from = %self.config.name,
            to = %report.feed,
            package = %name,
            "Migrated superseded version"
        );
        Ok(true)
    }
}

/// Appends the URLs of an older record of the same build behind the new ones.
fn absorb(entry: &mut CatalogEntry, old: CatalogEntry) {
    entry.feeds.extend(old.feeds);
    entry.locations.extend(old.locations);
    for link in old.links {
        if !entry.links.contains(&link) {
            entry.links.push(link);
        }
    }
    if entry.summary.is_none() {
        entry.summary = old.summary;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> Config {
        Config {
            feed_prefix_url: "https://repo.example.com/feeds".into(),
            package_prefix_url: "https://repo.example.com/packages".into(),
            work_dir: PathBuf::from("/var/lib/repofeed"),
            ..Config::default()
        }
    }

    #[test]
    fn test_role_from_name() {
        assert_eq!(FeedRole::from_name("current"), FeedRole::Current);
        assert_eq!(FeedRole::from_name("Archive"), FeedRole::Archive);
        assert_eq!(FeedRole::from_name("beta"), FeedRole::Other);
        assert!(FeedRole::Current.lock_rank() < FeedRole::Archive.lock_rank());
    }

    #[test]
    fn test_handler_config_from_config() {
        let feed = FeedHandlerConfig::from_config("Current", &config()).unwrap();
        assert_eq!(feed.name, "current");
        assert_eq!(feed.role, FeedRole::Current);
        assert_eq!(feed.feed_url.as_str(), "https://repo.example.com/feeds/current");
        assert_eq!(feed.package_prefix.as_str(), "https://repo.example.com/packages/");
        assert_eq!(feed.local_path, PathBuf::from("/var/lib/repofeed/current.feed.xml"));
        assert_eq!(feed.blob_name(), "current.feed.xml");
        assert_eq!(feed.container, "repository");
    }

    #[test]
    fn test_handler_config_rejects_path_like_names() {
        assert!(FeedHandlerConfig::from_config("../etc", &config()).is_err());
        assert!(FeedHandlerConfig::from_config("  ", &config()).is_err());
    }

    #[test]
    fn test_absorb_keeps_new_urls_first() {
        let name = CanonicalName::new("zlib", "", "1.0".parse().unwrap(), "x86");
        let mut new = CatalogEntry::new(name.clone());
        new.locations.push(Url::parse("https://new.example.com/z.msi").unwrap());
        let mut old = CatalogEntry::new(name);
        old.locations.push(Url::parse("https://old.example.com/z.msi").unwrap());
        old.summary = Some("compression".into());

        absorb(&mut new, old);
        assert_eq!(new.locations[0].host_str(), Some("new.example.com"));
        assert_eq!(new.locations.len(), 2);
        assert_eq!(new.summary.as_deref(), Some("compression"));
    }
}
