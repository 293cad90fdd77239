//! Fan-out ingestion over the account/page/post tree.

mod engine;
mod report;

pub use engine::IngestEngine;
pub use report::{Branch, BranchFailure, RunReport};
