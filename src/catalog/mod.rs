//! Catalog data model and its Atom wire format.
//!
//! - [`types`] - canonical package identity, catalog entries and feed documents
//! - [`version`] - four-part numeric package versions
//! - [`atom`] - reading and writing feed documents as Atom XML

pub mod atom;
mod types;
mod version;

pub use atom::{parse_document, write_document, CodecError, FeedMeta};
pub use types::{
    dedup_urls, prepend_if_absent, CanonicalName, CatalogEntry, FeedDocument, Link,
};
pub use version::{FourPartVersion, VersionError};
