use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// An entity kind that can be reconciled: a field-set with a declared key.
pub trait Record: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    type Key: Serialize + fmt::Debug + Send + Sync;

    fn key(&self) -> Self::Key;

    /// Store-layer checks run before every write.
    fn validate(&self) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timestamps {
    pub ingested_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Timestamps {
    pub fn now() -> Self {
        let now = Utc::now();
        Self {
            ingested_at: now,
            updated_at: now,
        }
    }
}

/// A persisted row as the backend sees it.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRow {
    pub key: String,
    pub fields: Value,
    pub timestamps: Timestamps,
}

/// Backend contract used by [`crate::store::Store`].
///
/// Calls for different keys may run concurrently. Calls for the same key are
/// not serialized; `create` on an existing key overwrites it.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Create the given tables if they do not exist.
    async fn migrate(&self, tables: &[&str]) -> Result<()>;

    async fn get(&self, table: &str, key: &str) -> Result<Option<StoredRow>>;

    async fn create(&self, table: &str, key: &str, fields: Value) -> Result<StoredRow>;

    /// Full overwrite of `row`'s fields.
    async fn update(&self, table: &str, row: &StoredRow, fields: Value) -> Result<()>;
}
