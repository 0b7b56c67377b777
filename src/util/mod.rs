//! Utility functions shared across the crate.
//!
//! - **URL validation**: keeps remote package fetches off internal hosts
//! - **Filesystem**: atomic replace-on-write and retrying deletes

mod fs;
mod url_validator;

pub use fs::{atomic_copy, atomic_write, try_hard_to_delete};
pub use url_validator::{validate_source_url, UrlValidationError};
