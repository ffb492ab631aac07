//! Durable storage for the last counter sample of each rate metric.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use thiserror::Error;

use crate::rate::{CounterSample, SampleKey};

pub const DATABASE_FILE: &str = "samples.sqlite3";

/// How long an invocation waits for another one holding the same store.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("state directory: {0}")]
    Io(#[from] std::io::Error),
    #[error("corrupt sample for {key}: {detail}")]
    Corrupt { key: SampleKey, detail: String },
}

/// What a store held for a key before it was overwritten.
#[derive(Debug)]
pub enum Prior {
    Found(CounterSample),
    Missing,
    Unreadable(StoreError),
}

pub trait SampleStore {
    fn load(&mut self, key: &SampleKey) -> Result<Option<CounterSample>, StoreError>;

    fn save(&mut self, key: &SampleKey, sample: &CounterSample) -> Result<(), StoreError>;

    /// Record `sample` for `key` and hand back what was there before.
    ///
    /// Only a failed write is an error; a failed read is reported as
    /// [`Prior::Unreadable`] and the write still happens.
    fn replace(&mut self, key: &SampleKey, sample: &CounterSample) -> Result<Prior, StoreError> {
        let prior = match self.load(key) {
            Ok(Some(s)) => Prior::Found(s),
            Ok(None) => Prior::Missing,
            Err(e) => Prior::Unreadable(e),
        };
        self.save(key, sample)?;
        Ok(prior)
    }
}

impl<S: SampleStore + ?Sized> SampleStore for Box<S> {
    fn load(&mut self, key: &SampleKey) -> Result<Option<CounterSample>, StoreError> {
        (**self).load(key)
    }

    fn save(&mut self, key: &SampleKey, sample: &CounterSample) -> Result<(), StoreError> {
        (**self).save(key, sample)
    }

    fn replace(&mut self, key: &SampleKey, sample: &CounterSample) -> Result<Prior, StoreError> {
        (**self).replace(key, sample)
    }
}

/// Process-local store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    samples: HashMap<SampleKey, CounterSample>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SampleStore for MemoryStore {
    fn load(&mut self, key: &SampleKey) -> Result<Option<CounterSample>, StoreError> {
        Ok(self.samples.get(key).copied())
    }

    fn save(&mut self, key: &SampleKey, sample: &CounterSample) -> Result<(), StoreError> {
        self.samples.insert(key.clone(), *sample);
        Ok(())
    }
}

/// SQLite-backed store shared by every probe invocation on the host.
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open (creating if needed) the store inside `dir`.
    pub fn open_dir(dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;
        Self::open(dir.join(DATABASE_FILE))
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open(path.as_ref())?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS samples (
                target      TEXT NOT NULL,
                metric      TEXT NOT NULL,
                scope       TEXT NOT NULL,
                observed_at TEXT NOT NULL,
                raw_value   REAL,
                PRIMARY KEY (target, metric, scope)
            );",
        )?;
        tracing::debug!(path = %path.as_ref().display(), "opened sample store");
        Ok(Self { conn })
    }

    fn select(conn: &Connection, key: &SampleKey) -> Result<Option<CounterSample>, StoreError> {
        let row = conn
            .query_row(
                "SELECT observed_at, raw_value FROM samples
                 WHERE target = ?1 AND metric = ?2 AND scope = ?3",
                params![key.target, key.metric, key.scope.column_value()],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, Option<f64>>(1)?)),
            )
            .optional()?;

        let Some((observed_at, raw_value)) = row else {
            return Ok(None);
        };
        let corrupt = |detail: String| StoreError::Corrupt {
            key: key.clone(),
            detail,
        };
        let observed_at = DateTime::parse_from_rfc3339(&observed_at)
            .map_err(|e| corrupt(format!("timestamp {observed_at:?}: {e}")))?
            .with_timezone(&Utc);
        let raw_value = raw_value
            .filter(|v| v.is_finite())
            .ok_or_else(|| corrupt("missing raw value".to_owned()))?;

        Ok(Some(CounterSample {
            observed_at,
            raw_value,
        }))
    }

    fn upsert(conn: &Connection, key: &SampleKey, sample: &CounterSample) -> Result<(), StoreError> {
        conn.execute(
            "INSERT INTO samples (target, metric, scope, observed_at, raw_value)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT (target, metric, scope) DO UPDATE SET
                observed_at = excluded.observed_at,
                raw_value = excluded.raw_value",
            params![
                key.target,
                key.metric,
                key.scope.column_value(),
                sample
                    .observed_at
                    .to_rfc3339_opts(SecondsFormat::Micros, true),
                sample.raw_value,
            ],
        )?;
        Ok(())
    }
}

impl SampleStore for SqliteStore {
    fn load(&mut self, key: &SampleKey) -> Result<Option<CounterSample>, StoreError> {
        Self::select(&self.conn, key)
    }

    fn save(&mut self, key: &SampleKey, sample: &CounterSample) -> Result<(), StoreError> {
        Self::upsert(&self.conn, key, sample)
    }

    /// Read and write inside one immediate transaction, so concurrent
    /// invocations for the same key take turns.
    fn replace(&mut self, key: &SampleKey, sample: &CounterSample) -> Result<Prior, StoreError> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let prior = match Self::select(&tx, key) {
            Ok(Some(s)) => Prior::Found(s),
            Ok(None) => Prior::Missing,
            Err(e) => Prior::Unreadable(e),
        };
        Self::upsert(&tx, key, sample)?;
        tx.commit()?;
        Ok(prior)
    }
}
