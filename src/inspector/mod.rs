//! Package validation and metadata lookup.
//!
//! Package formats are not interpreted here. A [`PackageInspector`] answers
//! three questions: is this file a package (and which one), what are its
//! details, and what catalog entry describes it.

mod command;

pub use command::CommandInspector;

use async_trait::async_trait;
use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

use crate::catalog::{CanonicalName, CatalogEntry, Link};

#[derive(Debug, Error)]
pub enum InspectError {
    #[error("Package inspection failed: {0}")]
    Fault(String),

    #[error("Package inspection was cancelled")]
    Cancelled,
}

/// Metadata reported for a recognized package.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PackageDetails {
    #[serde(flatten)]
    pub name: CanonicalName,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub links: Vec<Link>,
}

impl PackageDetails {
    /// The catalog entry for this package, before feed and location are attached.
    pub fn to_catalog_entry(&self) -> CatalogEntry {
        let mut entry = CatalogEntry::new(self.name.clone());
        entry.title = Some(self.title.clone().unwrap_or_else(|| self.name.name.clone()));
        entry.summary = self.summary.clone();
        entry.links = self.links.clone();
        entry
    }
}

#[async_trait]
pub trait PackageInspector: Send + Sync {
    /// Identifies the package in `path`. `Ok(None)` means the file is not a package.
    async fn query(&self, path: &Path) -> Result<Option<CanonicalName>, InspectError>;

    /// Full details for a package previously identified.
    async fn details(&self, name: &CanonicalName) -> Result<PackageDetails, InspectError>;

    /// The catalog entry describing `name`, if one is known.
    async fn catalog_entry(&self, name: &CanonicalName)
        -> Result<Option<CatalogEntry>, InspectError>;
}
