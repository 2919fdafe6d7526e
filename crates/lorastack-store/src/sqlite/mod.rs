//! Byte store on `SQLite`.
//!
//! Records live in named collections of one database, one row per field
//! path. Every operation runs in a transaction; transactions that hit a
//! busy or locked database are retried a bounded number of times before
//! failing with `tx_failed`.

mod db;

use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::{QueryBuilder, Row, Sqlite, Transaction};
use tracing::{debug, warn};

use lorastack_core::Result;

pub use db::{Database, DatabaseError};

use crate::codec::ByteFields;
use crate::errors::{ERR_DATABASE, ERR_NOT_FOUND, ERR_TX_FAILED};
use crate::flatten::Diff;
use crate::key::Key;
use crate::store::{ByteStore, page_size};

/// Default number of attempts of a conflicting transaction.
pub const DEFAULT_MAX_ATTEMPTS: usize = 10;

const SQLITE_BUSY: i32 = 5;
const SQLITE_LOCKED: i32 = 6;

/// Whether `err` is a busy / locked conflict worth retrying.
fn is_conflict(err: &sqlx::Error) -> bool {
    let sqlx::Error::Database(db_err) = err else {
        return false;
    };
    db_err
        .code()
        .and_then(|c| c.parse::<i32>().ok())
        .is_some_and(|c| matches!(c & 0xff, SQLITE_BUSY | SQLITE_LOCKED))
}

fn database_error(err: &sqlx::Error) -> lorastack_core::Error {
    ERR_DATABASE.with_attribute("message", err.to_string())
}

type Rows = Vec<(String, String, Vec<u8>)>;

/// A collection of records in a [`Database`].
#[derive(Debug, Clone)]
pub struct SqliteStore {
    db: Database,
    collection: String,
    max_attempts: usize,
}

impl SqliteStore {
    pub fn new(db: Database, collection: impl Into<String>) -> Self {
        Self {
            db,
            collection: collection.into(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    #[must_use]
    pub const fn with_max_attempts(mut self, attempts: usize) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Run `op` until it succeeds, fails with a non-conflict error or runs
    /// out of attempts.
    async fn retry<T, F, Fut>(&self, action: &'static str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = std::result::Result<T, sqlx::Error>> + Send,
        T: Send,
    {
        for attempt in 1..=self.max_attempts {
            match op().await {
                Ok(v) => return Ok(v),
                Err(e) if is_conflict(&e) => {
                    debug!(
                        collection = %self.collection,
                        action,
                        attempt,
                        "Transaction conflict, retrying"
                    );
                    let backoff = 5 * u64::try_from(attempt).unwrap_or(u64::MAX);
                    tokio::time::sleep(Duration::from_millis(backoff)).await;
                }
                Err(e) => return Err(database_error(&e)),
            }
        }
        warn!(collection = %self.collection, action, attempts = self.max_attempts, "Transaction failed");
        Err(ERR_TX_FAILED.with_attribute("attempts", self.max_attempts))
    }

    async fn begin(&self) -> std::result::Result<Transaction<'static, Sqlite>, sqlx::Error> {
        self.db.pool().begin().await
    }

    async fn key_exists(
        &self,
        tx: &mut Transaction<'static, Sqlite>,
        key: &str,
    ) -> std::result::Result<bool, sqlx::Error> {
        let row = sqlx::query("SELECT 1 FROM store_keys WHERE collection = ? AND record_key = ?")
            .bind(&self.collection)
            .bind(key)
            .fetch_optional(&mut **tx)
            .await?;
        Ok(row.is_some())
    }

    async fn try_create(&self, key: &str, fields: &ByteFields) -> std::result::Result<(), sqlx::Error> {
        let mut tx = self.begin().await?;
        sqlx::query("INSERT INTO store_keys (collection, record_key) VALUES (?, ?)")
            .bind(&self.collection)
            .bind(key)
            .execute(&mut *tx)
            .await?;
        for (path, value) in fields {
            sqlx::query(
                "INSERT INTO store_records (collection, record_key, path, value) VALUES (?, ?, ?, ?)",
            )
            .bind(&self.collection)
            .bind(key)
            .bind(path)
            .bind(value)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await
    }

    async fn try_find(&self, key: &str) -> std::result::Result<Option<ByteFields>, sqlx::Error> {
        let mut tx = self.begin().await?;
        if !self.key_exists(&mut tx, key).await? {
            return Ok(None);
        }
        let rows = sqlx::query(
            "SELECT path, value FROM store_records WHERE collection = ? AND record_key = ?",
        )
        .bind(&self.collection)
        .bind(key)
        .fetch_all(&mut *tx)
        .await?;
        tx.commit().await?;

        let mut fields = ByteFields::new();
        for row in rows {
            fields.insert(row.try_get("path")?, row.try_get("value")?);
        }
        Ok(Some(fields))
    }

    /// Keys matching `filter` and the rows of their records.
    async fn try_select(
        &self,
        filter: &ByteFields,
        after: Option<&str>,
        limit: Option<usize>,
    ) -> std::result::Result<(Vec<String>, Rows), sqlx::Error> {
        let mut tx = self.begin().await?;

        let mut query: QueryBuilder<'_, Sqlite> =
            QueryBuilder::new("SELECT k.record_key FROM store_keys k WHERE k.collection = ");
        query.push_bind(&self.collection);
        for (path, value) in filter {
            query.push(
                " AND EXISTS (SELECT 1 FROM store_records r \
                 WHERE r.collection = k.collection AND r.record_key = k.record_key AND r.path = ",
            );
            query.push_bind(path);
            query.push(" AND r.value = ");
            query.push_bind(value);
            query.push(")");
        }
        if let Some(after) = after {
            query.push(" AND k.record_key > ");
            query.push_bind(after);
        }
        query.push(" ORDER BY k.record_key");
        if let Some(limit) = limit {
            query.push(" LIMIT ");
            query.push_bind(i64::try_from(limit).unwrap_or(i64::MAX));
        }
        let keys: Vec<String> = query
            .build()
            .fetch_all(&mut *tx)
            .await?
            .iter()
            .map(|row| row.try_get("record_key"))
            .collect::<std::result::Result<_, _>>()?;

        let mut rows = Rows::new();
        if !keys.is_empty() {
            let mut query: QueryBuilder<'_, Sqlite> = QueryBuilder::new(
                "SELECT record_key, path, value FROM store_records WHERE collection = ",
            );
            query.push_bind(&self.collection);
            query.push(" AND record_key IN (");
            let mut separated = query.separated(", ");
            for key in &keys {
                separated.push_bind(key);
            }
            separated.push_unseparated(")");
            for row in query.build().fetch_all(&mut *tx).await? {
                rows.push((
                    row.try_get("record_key")?,
                    row.try_get("path")?,
                    row.try_get("value")?,
                ));
            }
        }
        tx.commit().await?;
        Ok((keys, rows))
    }

    async fn try_update(&self, key: &str, diff: &Diff<Vec<u8>>) -> std::result::Result<bool, sqlx::Error> {
        let mut tx = self.begin().await?;
        // Touch the key row first so the transaction takes the write lock
        // before reading anything.
        let touched = sqlx::query(
            "UPDATE store_keys SET record_key = record_key WHERE collection = ? AND record_key = ?",
        )
        .bind(&self.collection)
        .bind(key)
        .execute(&mut *tx)
        .await?;
        if touched.rows_affected() == 0 {
            return Ok(false);
        }
        for path in diff.keys() {
            let prefix = format!("{path}.");
            sqlx::query(
                "DELETE FROM store_records WHERE collection = ? AND record_key = ? \
                 AND (path = ? OR substr(path, 1, ?) = ?)",
            )
            .bind(&self.collection)
            .bind(key)
            .bind(path)
            .bind(i64::try_from(prefix.chars().count()).unwrap_or(i64::MAX))
            .bind(&prefix)
            .execute(&mut *tx)
            .await?;
        }
        for (path, value) in diff {
            if let Some(value) = value {
                sqlx::query(
                    "INSERT OR REPLACE INTO store_records (collection, record_key, path, value) \
                     VALUES (?, ?, ?, ?)",
                )
                .bind(&self.collection)
                .bind(key)
                .bind(path)
                .bind(value)
                .execute(&mut *tx)
                .await?;
            }
        }
        tx.commit().await?;
        Ok(true)
    }

    async fn try_delete(&self, key: &str) -> std::result::Result<(), sqlx::Error> {
        let mut tx = self.begin().await?;
        sqlx::query("DELETE FROM store_records WHERE collection = ? AND record_key = ?")
            .bind(&self.collection)
            .bind(key)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM store_keys WHERE collection = ? AND record_key = ?")
            .bind(&self.collection)
            .bind(key)
            .execute(&mut *tx)
            .await?;
        tx.commit().await
    }

    async fn select(
        &self,
        filter: &ByteFields,
        after: Option<&Key>,
        limit: Option<usize>,
    ) -> Result<Vec<(Key, ByteFields)>> {
        let after = after.map(ToString::to_string);
        let (keys, rows) = self
            .retry("select", || self.try_select(filter, after.as_deref(), limit))
            .await?;
        let mut records: BTreeMap<String, ByteFields> =
            keys.into_iter().map(|k| (k, ByteFields::new())).collect();
        for (key, path, value) in rows {
            if let Some(fields) = records.get_mut(&key) {
                fields.insert(path, value);
            }
        }
        records
            .into_iter()
            .map(|(k, fields)| Ok((k.parse::<Key>()?, fields)))
            .collect()
    }
}

#[async_trait]
impl ByteStore for SqliteStore {
    async fn create(&self, fields: ByteFields) -> Result<Key> {
        let key = Key::generate();
        let encoded = key.to_string();
        self.retry("create", || self.try_create(&encoded, &fields))
            .await?;
        Ok(key)
    }

    async fn find(&self, key: &Key) -> Result<ByteFields> {
        key.check()?;
        let encoded = key.to_string();
        self.retry("find", || self.try_find(&encoded))
            .await?
            .ok_or_else(|| ERR_NOT_FOUND.with_attribute("key", encoded.clone()))
    }

    async fn find_by(&self, filter: &ByteFields) -> Result<BTreeMap<Key, ByteFields>> {
        Ok(self.select(filter, None, None).await?.into_iter().collect())
    }

    async fn range(
        &self,
        filter: &ByteFields,
        after: Option<&Key>,
        limit: usize,
    ) -> Result<Vec<(Key, ByteFields)>> {
        self.select(filter, after, Some(page_size(limit))).await
    }

    async fn update(&self, key: &Key, diff: Diff<Vec<u8>>) -> Result<()> {
        key.check()?;
        let encoded = key.to_string();
        if self
            .retry("update", || self.try_update(&encoded, &diff))
            .await?
        {
            Ok(())
        } else {
            Err(ERR_NOT_FOUND.with_attribute("key", encoded))
        }
    }

    async fn delete(&self, key: &Key) -> Result<()> {
        key.check()?;
        let encoded = key.to_string();
        self.retry("delete", || self.try_delete(&encoded)).await
    }
}
