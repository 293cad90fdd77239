//! SQLite-backed RecordStore.
//!
//! One table per entity kind, each `(key, fields, ingested_at, updated_at)`
//! with `fields` holding the JSON field-set. Timestamps are RFC 3339 text.
//!
//! Usage:
//! ```ignore
//! let store = SqliteRecordStore::connect("sqlite://pages.db", 5).await?;
//! store.migrate(&SqliteRecordStore::default_tables()).await?;
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;

use super::traits::{RecordStore, StoredRow, Timestamps};
use crate::metrics;
use crate::models::{Page, PagePost, PagePostAttachment};
use crate::{Error, Result};

#[derive(Clone)]
pub struct SqliteRecordStore {
    pool: SqlitePool,
}

impl SqliteRecordStore {
    /// Open (creating if missing) the database at `url`.
    #[tracing::instrument(level = "debug")]
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        let opts = SqliteConnectOptions::from_str(url)
            .map_err(|e| Error::backend("sqlite_record_store", e))?
            .journal_mode(SqliteJournalMode::Wal)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(opts)
            .await
            .map_err(|e| Error::backend("sqlite_record_store", e))?;

        Ok(Self { pool })
    }

    /// Every table the ingestion engine writes to.
    pub fn default_tables() -> Vec<&'static str> {
        let mut tables = vec![Page::TABLE, PagePost::TABLE, PagePostAttachment::TABLE];
        tables.extend(metrics::all_tables());
        tables
    }
}

fn db_err(e: sqlx::Error) -> Error {
    Error::backend("sqlite_record_store", e)
}

/// Table names are interpolated into SQL, so only `[a-z0-9_]` is accepted.
fn table_ident(table: &str) -> Result<&str> {
    let ok = !table.is_empty()
        && table
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
    if ok {
        Ok(table)
    } else {
        Err(Error::InvalidInput(format!("invalid table name '{table}'")))
    }
}

fn parse_dt(s: &str) -> Result<DateTime<Utc>> {
    s.parse::<DateTime<Utc>>()
        .map_err(|e| Error::backend(format!("bad stored timestamp '{s}'"), e))
}

fn decode_row(row: &SqliteRow) -> Result<StoredRow> {
    let key: String = row.try_get("key").map_err(db_err)?;
    let fields: String = row.try_get("fields").map_err(db_err)?;
    let ingested_at: String = row.try_get("ingested_at").map_err(db_err)?;
    let updated_at: String = row.try_get("updated_at").map_err(db_err)?;
    Ok(StoredRow {
        key,
        fields: serde_json::from_str(&fields)
            .map_err(|e| Error::backend("sqlite_record_store_decode", e))?,
        timestamps: Timestamps {
            ingested_at: parse_dt(&ingested_at)?,
            updated_at: parse_dt(&updated_at)?,
        },
    })
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    #[tracing::instrument(level = "info", skip(self))]
    async fn migrate(&self, tables: &[&str]) -> Result<()> {
        for table in tables {
            let table = table_ident(table)?;
            let ddl = format!(
                "CREATE TABLE IF NOT EXISTS {table} (
                    key TEXT PRIMARY KEY,
                    fields TEXT NOT NULL,
                    ingested_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                )"
            );
            sqlx::query(&ddl)
                .execute(&self.pool)
                .await
                .map_err(|e| Error::backend("sqlite_record_store_migration", e))?;
        }
        Ok(())
    }

    async fn get(&self, table: &str, key: &str) -> Result<Option<StoredRow>> {
        let sql = format!(
            "SELECT key, fields, ingested_at, updated_at FROM {} WHERE key = ?1",
            table_ident(table)?
        );
        let row = sqlx::query(&sql)
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.as_ref().map(decode_row).transpose()
    }

    async fn create(&self, table: &str, key: &str, fields: Value) -> Result<StoredRow> {
        let sql = format!(
            "INSERT INTO {} (key, fields, ingested_at, updated_at) VALUES (?1, ?2, ?3, ?3)
             ON CONFLICT(key) DO UPDATE SET
               fields = excluded.fields,
               updated_at = excluded.updated_at
             RETURNING key, fields, ingested_at, updated_at",
            table_ident(table)?
        );
        let row = sqlx::query(&sql)
            .bind(key)
            .bind(fields.to_string())
            .bind(Utc::now().to_rfc3339())
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;
        decode_row(&row)
    }

    async fn update(&self, table: &str, row: &StoredRow, fields: Value) -> Result<()> {
        let sql = format!(
            "UPDATE {} SET fields = ?1, updated_at = ?2 WHERE key = ?3",
            table_ident(table)?
        );
        let done = sqlx::query(&sql)
            .bind(fields.to_string())
            .bind(Utc::now().to_rfc3339())
            .bind(&row.key)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        if done.rows_affected() == 0 {
            return Err(Error::BackendMessage(format!(
                "{table} row {} vanished before update",
                row.key
            )));
        }
        Ok(())
    }
}
