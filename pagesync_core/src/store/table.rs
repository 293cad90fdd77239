use super::traits::{Record, RecordStore, StoredRow, Timestamps};
use crate::{Error, Result};
use serde_json::Value;
use std::marker::PhantomData;
use std::sync::Arc;

/// Outcome of one reconcile call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciled {
    Created,
    Updated,
}

/// A typed row: the entity field-set plus its bookkeeping.
#[derive(Debug, Clone, PartialEq)]
pub struct Stored<R> {
    pub key: String,
    pub record: R,
    pub timestamps: Timestamps,
}

/// Typed get/create/update for one entity kind, bound to its table.
pub struct Store<R> {
    backend: Arc<dyn RecordStore>,
    table: &'static str,
    _record: PhantomData<fn() -> R>,
}

impl<R> Clone for Store<R> {
    fn clone(&self) -> Self {
        Self {
            backend: self.backend.clone(),
            table: self.table,
            _record: PhantomData,
        }
    }
}

impl<R: Record> Store<R> {
    pub fn new(backend: Arc<dyn RecordStore>, table: &'static str) -> Self {
        Self {
            backend,
            table,
            _record: PhantomData,
        }
    }

    pub fn table(&self) -> &'static str {
        self.table
    }

    /// Plain string keys are stored as-is; composite keys as compact JSON.
    pub fn key_string(key: &R::Key) -> Result<String> {
        match serde_json::to_value(key).map_err(|e| Error::backend("serialize record key", e))? {
            Value::String(s) => Ok(s),
            other => Ok(other.to_string()),
        }
    }

    #[tracing::instrument(level = "debug", skip(self), fields(table = self.table))]
    pub async fn get(&self, key: &R::Key) -> Result<Option<Stored<R>>> {
        let key = Self::key_string(key)?;
        match self.backend.get(self.table, &key).await? {
            Some(row) => Ok(Some(self.decode(row)?)),
            None => Ok(None),
        }
    }

    #[tracing::instrument(level = "debug", skip_all, fields(table = self.table))]
    pub async fn create(&self, fields: R) -> Result<Stored<R>> {
        fields.validate()?;
        let key = Self::key_string(&fields.key())?;
        let row = self
            .backend
            .create(self.table, &key, encode(&fields)?)
            .await?;
        Ok(Stored {
            key: row.key,
            record: fields,
            timestamps: row.timestamps,
        })
    }

    #[tracing::instrument(level = "debug", skip_all, fields(table = self.table, key = %record.key))]
    pub async fn update(&self, record: &Stored<R>, fields: R) -> Result<()> {
        fields.validate()?;
        let row = StoredRow {
            key: record.key.clone(),
            fields: encode(&record.record)?,
            timestamps: record.timestamps,
        };
        self.backend
            .update(self.table, &row, encode(&fields)?)
            .await
    }

    /// Look up by the record's key; create when absent, otherwise overwrite.
    pub async fn reconcile(&self, fields: R) -> Result<Reconciled> {
        match self.get(&fields.key()).await? {
            Some(existing) => {
                self.update(&existing, fields).await?;
                Ok(Reconciled::Updated)
            }
            None => {
                self.create(fields).await?;
                Ok(Reconciled::Created)
            }
        }
    }

    fn decode(&self, row: StoredRow) -> Result<Stored<R>> {
        let record = serde_json::from_value(row.fields).map_err(|e| {
            Error::backend(format!("decode {} row {}", self.table, row.key), e)
        })?;
        Ok(Stored {
            key: row.key,
            record,
            timestamps: row.timestamps,
        })
    }
}

fn encode<R: Record>(fields: &R) -> Result<Value> {
    serde_json::to_value(fields).map_err(|e| Error::backend("serialize record fields", e))
}
