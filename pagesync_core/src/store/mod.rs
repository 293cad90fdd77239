//! Reconciliation store adapter.
//!
//! `RecordStore` is the narrow, object-safe backend contract (JSON rows keyed
//! by table and key string). `Store<R>` is the typed facade the ingestion
//! engine reconciles through: one instance per entity kind.

pub mod memory;
pub mod sqlite;
pub mod table;
pub mod traits;

pub use memory::MemoryRecordStore;
pub use sqlite::SqliteRecordStore;
pub use table::{Reconciled, Store, Stored};
pub use traits::{Record, RecordStore, StoredRow, Timestamps};
