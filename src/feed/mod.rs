//! Feed handlers: liveness probing, reconciliation and the handler registry.
//!
//! - [`probe`] - header-only URL reachability checks
//! - [`handler`] - per-feed load-merge-save under an exclusive lock
//! - [`registry`] - name → handler table used for cross-feed migration
//!
//! # Example
//!
//! ```ignore
//! let registry = FeedRegistry::from_config(&config, services)?;
//! let report = registry.reconcile("current", Incoming { name, location, entry: None }).await?;
//! ```

mod handler;
pub mod probe;
mod registry;

pub use handler::{
    FeedHandler, FeedHandlerConfig, FeedRole, FeedServices, Incoming, ReconcileError,
    ReconcileReport, ValidateReport,
};
pub use probe::{filter_live, prune_entry, HttpProbe, LivenessProbe};
pub use registry::{FeedRegistry, RegistryError, ARCHIVE_FEED, CURRENT_FEED};
