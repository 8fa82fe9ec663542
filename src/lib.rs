//! Document list sync engine.
//!
//! Keeps a paginated, filtered and sorted document list current by merging
//! a live change feed into cached pages, falling back to targeted page
//! refreshes where a local merge cannot be exact.

pub mod api;
pub mod cache;
pub mod coalescer;
pub mod config;
pub mod errors;
pub mod merge;
pub mod models;
pub mod overlay;
pub mod predicate;
pub mod refresh;
pub mod session;
pub mod source;
pub mod store;
pub mod stream;

pub use api::{create_router, AppState};

#[cfg(test)]
mod tests;
