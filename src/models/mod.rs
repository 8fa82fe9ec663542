//! Data models for the document list sync engine.
//!
//! Wire shapes follow the document service's snake_case JSON.

mod change;
mod document;
mod filter;
mod inflight;
mod page;

pub use change::*;
pub use document::*;
pub use filter::*;
pub use inflight::*;
pub use page::*;

#[cfg(test)]
pub(crate) use document::fixtures;
