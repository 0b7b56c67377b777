use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

use super::handler::{
    FeedHandler, FeedHandlerConfig, FeedServices, Incoming, ReconcileError, ReconcileReport,
    ValidateReport,
};
use crate::config::{Config, ConfigError};

pub const CURRENT_FEED: &str = "current";
pub const ARCHIVE_FEED: &str = "archive";

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("No handler registered for feed '{0}'")]
    Unregistered(String),

    #[error("Feed '{0}' is configured more than once")]
    Duplicate(String),

    #[error("Feed 'current' requires an 'archive' feed to migrate old versions into")]
    MissingArchive,

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Every configured feed handler, keyed by lower-cased feed name.
///
/// Built once at startup and shared by reference; handlers reach their
/// siblings through it during cross-feed migration.
pub struct FeedRegistry {
    handlers: HashMap<String, Arc<FeedHandler>>,
}

impl FeedRegistry {
    pub fn new(handlers: impl IntoIterator<Item = FeedHandler>) -> Result<Self, RegistryError> {
        let mut map = HashMap::new();
        for handler in handlers {
            let name = handler.name().to_string();
            if map.insert(name.clone(), Arc::new(handler)).is_some() {
                return Err(RegistryError::Duplicate(name));
            }
        }

        if map.contains_key(CURRENT_FEED) && !map.contains_key(ARCHIVE_FEED) {
            return Err(RegistryError::MissingArchive);
        }

        Ok(Self { handlers: map })
    }

    /// Builds a handler for every feed named in the configuration.
    pub fn from_config(config: &Config, services: Arc<FeedServices>) -> Result<Self, RegistryError> {
        let handlers = config
            .feeds
            .iter()
            .map(|name| {
                FeedHandlerConfig::from_config(name, config)
                    .map(|feed| FeedHandler::new(feed, Arc::clone(&services)))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let registry = Self::new(handlers)?;
        tracing::info!(feeds = ?registry.names(), "Feed handlers ready");
        Ok(registry)
    }

    pub fn handler(&self, name: &str) -> Result<Arc<FeedHandler>, RegistryError> {
        self.handlers
            .get(&name.to_lowercase())
            .cloned()
            .ok_or_else(|| RegistryError::Unregistered(name.to_string()))
    }

    /// Registered feed names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub async fn reconcile(
        &self,
        feed: &str,
        incoming: Incoming,
    ) -> Result<ReconcileReport, ReconcileError> {
        let handler = self.handler(feed)?;
        handler.reconcile(self, incoming).await
    }

    pub async fn validate(&self, feed: &str) -> Result<ValidateReport, ReconcileError> {
        let handler = self.handler(feed)?;
        handler.validate().await
    }
}
