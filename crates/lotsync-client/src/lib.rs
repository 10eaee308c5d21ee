//! lotsync Client - HTTP client for the upstream inventory API
//!
//! - [`inventory`] - paged item fetches and the connectivity probe
//! - [`rate_limit`] - requests-per-second limiting shared by all calls
//!
//! The client implements [`lotsync_core::traits::InventorySource`] and
//! reports every failure as a categorized `FetchError`; retry policy lives
//! in the ingestion pipeline.

pub mod inventory;
pub mod rate_limit;

pub use inventory::{status_error, InventoryClient};
pub use rate_limit::RateLimiter;
