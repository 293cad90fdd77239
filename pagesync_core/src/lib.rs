//! Page ingestion core: Graph client, metric registry, entity models, store
//! reconciliation and the fan-out ingestion engine.

pub mod config;
pub mod error;
pub mod graph;
pub mod ingest;
pub mod metrics;
pub mod models;
pub mod notify;
pub mod o11y;
pub mod store;

#[cfg(test)]
mod test_support;

pub use error::{Error, Result};
