//! Shared fakes and fixtures for the integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use url::Url;

use repofeed::catalog::{CanonicalName, CatalogEntry, FeedDocument};
use repofeed::config::Config;
use repofeed::feed::{FeedRegistry, FeedServices, LivenessProbe};
use repofeed::inspector::{InspectError, PackageDetails, PackageInspector};
use repofeed::storage::{BlobError, BlobStore, DirectoryBlobStore, FeedStore};

pub const FEED_PREFIX: &str = "https://repo.example.com/feeds/";
pub const PACKAGE_PREFIX: &str = "https://repo.example.com/packages/";

pub fn url(s: &str) -> Url {
    Url::parse(s).unwrap()
}

pub fn name(package: &str, version: &str) -> CanonicalName {
    CanonicalName::new(package, "", version.parse().unwrap(), "x86")
}

pub fn entry(package: &str, version: &str, location: &str) -> CatalogEntry {
    let mut entry = CatalogEntry::new(name(package, version));
    entry.title = Some(package.to_string());
    entry.locations.push(url(location));
    entry
}

pub fn manifest(package: &str, version: &str) -> Vec<u8> {
    serde_json::json!({
        "name": package,
        "version": version,
        "architecture": "x86",
        "summary": format!("The {package} package"),
    })
    .to_string()
    .into_bytes()
}

/// Every URL is live unless it has been killed.
#[derive(Default)]
pub struct ScriptedProbe {
    dead: Mutex<HashSet<String>>,
    calls: AtomicUsize,
}

impl ScriptedProbe {
    pub fn kill(&self, url: &str) {
        self.dead.lock().unwrap().insert(url.to_string());
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LivenessProbe for ScriptedProbe {
    async fn is_live(&self, url: &Url) -> bool {
        self.calls.fetch_add(1, Ordering::SeqCst);
        !self.dead.lock().unwrap().contains(url.as_str())
    }
}

/// Recognizes files whose content is a JSON manifest.
///
/// The content `PANIC` panics, `FAULT` reports a validation fault and
/// `CANCEL` reports a cancelled validation.
#[derive(Default)]
pub struct FakeCatalog {
    known: Mutex<HashMap<CanonicalName, PackageDetails>>,
    queries: AtomicUsize,
}

impl FakeCatalog {
    pub fn register(&self, details: PackageDetails) {
        self.known
            .lock()
            .unwrap()
            .insert(details.name.clone(), details);
    }

    pub fn queries(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PackageInspector for FakeCatalog {
    async fn query(&self, path: &Path) -> Result<Option<CanonicalName>, InspectError> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        let content = tokio::fs::read_to_string(path).await.unwrap_or_default();
        match content.as_str() {
            "PANIC" => panic!("inspector crashed"),
            "FAULT" => return Err(InspectError::Fault("corrupt package".into())),
            "CANCEL" => return Err(InspectError::Cancelled),
            _ => {}
        }
        match serde_json::from_str::<PackageDetails>(&content) {
            Ok(details) => {
                let name = details.name.clone();
                self.register(details);
                Ok(Some(name))
            }
            Err(_) => Ok(None),
        }
    }

    async fn details(&self, name: &CanonicalName) -> Result<PackageDetails, InspectError> {
        self.known
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| InspectError::Fault(format!("unknown package {name}")))
    }

    async fn catalog_entry(
        &self,
        name: &CanonicalName,
    ) -> Result<Option<CatalogEntry>, InspectError> {
        Ok(self
            .known
            .lock()
            .unwrap()
            .get(name)
            .map(PackageDetails::to_catalog_entry))
    }
}

/// Wraps a directory store and tracks how many load-merge-save sequences are
/// open per feed: a feed blob read opens one, the gzip write closes it.
pub struct CountingBlobStore {
    inner: DirectoryBlobStore,
    open: Mutex<HashMap<String, usize>>,
    max_open: AtomicUsize,
}

impl CountingBlobStore {
    pub fn new(root: PathBuf) -> Self {
        Self {
            inner: DirectoryBlobStore::new(root),
            open: Mutex::new(HashMap::new()),
            max_open: AtomicUsize::new(0),
        }
    }

    pub fn max_open(&self) -> usize {
        self.max_open.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BlobStore for CountingBlobStore {
    async fn read_blob(&self, container: &str, name: &str, dest: &Path) -> Result<(), BlobError> {
        {
            let mut open = self.open.lock().unwrap();
            let count = open.entry(name.to_string()).or_default();
            *count += 1;
            self.max_open.fetch_max(*count, Ordering::SeqCst);
        }
        // Widen the window a concurrent writer would have to interleave in.
        tokio::time::sleep(Duration::from_millis(20)).await;
        self.inner.read_blob(container, name, dest).await
    }

    async fn write_blob(
        &self,
        container: &str,
        name: &str,
        src: &Path,
        compressed: bool,
    ) -> Result<(), BlobError> {
        let result = self.inner.write_blob(container, name, src, compressed).await;
        if compressed {
            let key = name.trim_end_matches(".gz");
            let mut open = self.open.lock().unwrap();
            if let Some(count) = open.get_mut(key) {
                *count = count.saturating_sub(1);
            }
        }
        result
    }
}

pub struct Fixture {
    pub dir: TempDir,
    pub config: Config,
    pub store: FeedStore,
    pub probe: Arc<ScriptedProbe>,
    pub catalog: Arc<FakeCatalog>,
    pub registry: Arc<FeedRegistry>,
}

impl Fixture {
    pub fn local() -> Self {
        Self::build(|_| None)
    }

    pub fn with_blobs(make: impl FnOnce(&Path) -> Arc<dyn BlobStore>) -> Self {
        Self::build(|root| Some(make(root)))
    }

    fn build(make: impl FnOnce(&Path) -> Option<Arc<dyn BlobStore>>) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            feed_prefix_url: FEED_PREFIX.into(),
            package_prefix_url: PACKAGE_PREFIX.into(),
            work_dir: dir.path().join("work"),
            feeds: vec!["current".into(), "archive".into(), "beta".into()],
            allow_private_sources: true,
            ..Config::default()
        };

        let store = match make(&dir.path().join("blobs")) {
            Some(blobs) => FeedStore::remote(blobs),
            None => FeedStore::local_only(),
        };
        let probe = Arc::new(ScriptedProbe::default());
        let catalog = Arc::new(FakeCatalog::default());
        let services = Arc::new(FeedServices {
            store: store.clone(),
            probe: probe.clone(),
            catalog: catalog.clone(),
            probe_concurrency: 4,
        });
        let registry = Arc::new(FeedRegistry::from_config(&config, services).unwrap());

        Self {
            dir,
            config,
            store,
            probe,
            catalog,
            registry,
        }
    }

    /// Loads a feed's persisted document.
    pub async fn document(&self, feed: &str) -> FeedDocument {
        let handler = self.registry.handler(feed).unwrap();
        self.store.load(handler.config()).await.into_document()
    }

    pub fn feed_url(&self, feed: &str) -> Url {
        url(FEED_PREFIX).join(feed).unwrap()
    }

    pub fn working_copy(&self, feed: &str) -> PathBuf {
        self.registry.handler(feed).unwrap().config().local_path.clone()
    }
}
