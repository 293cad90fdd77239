use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tokio::sync::Mutex;

use super::traits::{RecordStore, StoredRow, Timestamps};
use crate::{Error, Result};

type Tables = HashMap<String, HashMap<String, StoredRow>>;

/// In-memory RecordStore for local development and unit tests.
#[derive(Clone, Default)]
pub struct MemoryRecordStore {
    tables: Arc<Mutex<Tables>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of a table's rows, ordered by key.
    pub async fn rows(&self, table: &str) -> Vec<StoredRow> {
        let tables = self.tables.lock().await;
        let mut rows: Vec<StoredRow> = tables
            .get(table)
            .map(|t| t.values().cloned().collect())
            .unwrap_or_default();
        rows.sort_by(|a, b| a.key.cmp(&b.key));
        rows
    }

    pub async fn count(&self, table: &str) -> usize {
        self.tables
            .lock()
            .await
            .get(table)
            .map_or(0, HashMap::len)
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn migrate(&self, tables: &[&str]) -> Result<()> {
        let mut all = self.tables.lock().await;
        for t in tables {
            all.entry((*t).to_string()).or_default();
        }
        Ok(())
    }

    async fn get(&self, table: &str, key: &str) -> Result<Option<StoredRow>> {
        let tables = self.tables.lock().await;
        Ok(tables.get(table).and_then(|t| t.get(key)).cloned())
    }

    async fn create(&self, table: &str, key: &str, fields: Value) -> Result<StoredRow> {
        let mut tables = self.tables.lock().await;
        let rows = tables.entry(table.to_string()).or_default();
        let timestamps = match rows.get(key) {
            Some(existing) => Timestamps {
                ingested_at: existing.timestamps.ingested_at,
                updated_at: Utc::now(),
            },
            None => Timestamps::now(),
        };
        let row = StoredRow {
            key: key.to_string(),
            fields,
            timestamps,
        };
        rows.insert(key.to_string(), row.clone());
        Ok(row)
    }

    async fn update(&self, table: &str, row: &StoredRow, fields: Value) -> Result<()> {
        let mut tables = self.tables.lock().await;
        let existing = tables
            .get_mut(table)
            .and_then(|t| t.get_mut(&row.key))
            .ok_or_else(|| {
                Error::BackendMessage(format!("{table} row {} vanished before update", row.key))
            })?;
        existing.fields = fields;
        existing.timestamps.updated_at = Utc::now();
        Ok(())
    }
}
