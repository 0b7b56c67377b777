//! Upload intake: direct uploads and fetch-by-URL, through validation and
//! storage into feed reconciliation.

mod fetch;
mod pipeline;

pub use fetch::{download_to, FetchError};
pub use pipeline::{IntakeError, IntakePipeline, IntakeSettings, IntakeStatus, Receipt};
