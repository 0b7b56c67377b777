//! Package feed maintenance: intake of uploaded packages and reconciliation
//! of the feeds that publish them.

pub mod app;
pub mod catalog;
pub mod config;
pub mod feed;
pub mod inspector;
pub mod intake;
pub mod notify;
pub mod storage;
pub mod util;
