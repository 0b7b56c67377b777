//! Process composition: turns a [`Config`] into a ready [`Service`].
//!
//! Everything is built eagerly here and passed down explicitly; nothing is
//! looked up from global state later.

use reqwest::redirect::Policy;
use secrecy::SecretString;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::config::{Config, ConfigError};
use crate::feed::{FeedRegistry, FeedServices, HttpProbe, LivenessProbe, RegistryError};
use crate::inspector::{CommandInspector, PackageInspector};
use crate::intake::{IntakePipeline, IntakeSettings};
use crate::notify::WebhookNotifier;
use crate::storage::{ArtifactStore, ArtifactTarget, BlobStore, DirectoryBlobStore, FeedStore};
use crate::util::validate_source_url;

#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("Failed to build HTTP client: {0}")]
    Http(#[from] reqwest::Error),
}

/// The assembled service.
pub struct Service {
    pub registry: Arc<FeedRegistry>,
    pub pipeline: IntakePipeline,
}

impl Service {
    pub fn from_config(config: &Config) -> Result<Self, StartupError> {
        config.validate()?;

        let client = reqwest::Client::builder()
            .redirect(create_redirect_policy(config.allow_private_sources))
            .pool_max_idle_per_host(4)
            .pool_idle_timeout(Duration::from_secs(30))
            .tcp_keepalive(Duration::from_secs(60))
            .build()?;

        let blobs: Option<Arc<dyn BlobStore>> = config
            .storage
            .blob_root
            .as_ref()
            .map(|root| Arc::new(DirectoryBlobStore::new(root)) as Arc<dyn BlobStore>);

        let probe: Arc<dyn LivenessProbe> = Arc::new(HttpProbe::new(
            client.clone(),
            Duration::from_secs(config.probe_timeout_secs),
        ));
        let inspector: Arc<dyn PackageInspector> = Arc::new(CommandInspector::new(
            config.inspector.program.clone(),
            config.inspector.args.clone(),
            Duration::from_secs(config.inspector.timeout_secs),
        ));

        let store = match &blobs {
            Some(blobs) => FeedStore::remote(Arc::clone(blobs)),
            None => FeedStore::local_only(),
        };
        let services = Arc::new(FeedServices {
            store,
            probe: Arc::clone(&probe),
            catalog: Arc::clone(&inspector),
            probe_concurrency: config.probe_concurrency,
        });
        let registry = Arc::new(FeedRegistry::from_config(config, services)?);

        let target = match blobs {
            Some(store) => ArtifactTarget::Blob {
                store,
                container: config.storage.container.clone(),
            },
            None => ArtifactTarget::Folder(config.package_folder()),
        };
        let artifacts = ArtifactStore::new(target).with_aliases(&config.aliases);

        let mut pipeline = IntakePipeline::new(
            Arc::clone(&registry),
            inspector,
            artifacts,
            probe,
            client.clone(),
            IntakeSettings::from_config(config),
        );

        if let Some(endpoint) = &config.notify.webhook_url {
            let endpoint = Url::parse(endpoint)
                .map_err(|e| ConfigError::Invalid(format!("notify.webhook_url: {e}")))?;
            let token = config.notify.token.clone().map(SecretString::from);
            pipeline = pipeline.with_notifier(Arc::new(WebhookNotifier::new(client, endpoint, token)));
        }

        tracing::info!(
            feeds = ?registry.names(),
            remote = config.storage.blob_root.is_some(),
            notify = config.notify.webhook_url.is_some(),
            "Service ready"
        );

        Ok(Self { registry, pipeline })
    }
}

/// Bounded redirect following for probes, downloads and webhooks.
///
/// Every hop goes through the same source validation as the first URL, so a
/// public address cannot bounce a request onto a private host.
fn create_redirect_policy(allow_private: bool) -> Policy {
    Policy::custom(move |attempt| {
        if attempt.previous().len() >= 5 {
            return attempt.error("Too many redirects (max 5)");
        }

        let url = attempt.url().clone();
        for prev in attempt.previous() {
            if prev.as_str() == url.as_str() {
                return attempt.error("Redirect loop detected");
            }
        }

        if let Err(e) = validate_source_url(url.as_str(), allow_private) {
            tracing::warn!(to = %url, error = %e, "Refusing redirect");
            return attempt.error(format!("Redirect to {url} refused: {e}"));
        }

        tracing::debug!(
            from = %attempt.previous().last().map(|u| u.as_str()).unwrap_or("initial"),
            to = %url,
            hop = attempt.previous().len() + 1,
            "Following redirect"
        );

        attempt.follow()
    })
}
