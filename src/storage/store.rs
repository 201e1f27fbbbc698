//! SQLite Signal Store
//!
//! - One transaction per batch: either every row of the batch lands or none does
//! - Rows are keyed by `(run_id, external_id)`, so re-running a batch updates in place
//! - A `runs` ledger keeps the verdict of every run, published or not

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

const SCHEMA_SQL: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
PRAGMA cache_size = -16000;  -- 16MB cache
PRAGMA temp_store = MEMORY;

CREATE TABLE IF NOT EXISTS signals (
    run_id TEXT NOT NULL CHECK (length(run_id) > 0),
    external_id TEXT NOT NULL CHECK (length(external_id) > 0),
    origin TEXT NOT NULL,
    quality_score REAL,
    payload_json TEXT NOT NULL,
    generated_at TEXT NOT NULL,
    updated_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now')),
    PRIMARY KEY (run_id, external_id)
) WITHOUT ROWID;

CREATE INDEX IF NOT EXISTS idx_signals_generated
    ON signals(generated_at DESC);

CREATE TABLE IF NOT EXISTS runs (
    run_id TEXT PRIMARY KEY,
    trace_id TEXT NOT NULL,
    status TEXT NOT NULL,
    error_cause TEXT,
    mode TEXT,
    allow_publishing INTEGER,
    pass_rate REAL,
    critical_failure INTEGER,
    signals_persisted INTEGER NOT NULL DEFAULT 0,
    report_json TEXT NOT NULL,
    started_at TEXT NOT NULL,
    completed_at TEXT NOT NULL
) WITHOUT ROWID;

CREATE INDEX IF NOT EXISTS idx_runs_completed
    ON runs(completed_at DESC);
"#;

/// One generated signal as persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredSignal {
    pub external_id: String,
    /// `primary` or `secondary`
    pub origin: String,
    pub quality_score: Option<f64>,
    pub payload: Value,
    pub generated_at: DateTime<Utc>,
}

/// Verdict of one run, kept whether or not anything was published.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunLedgerEntry {
    pub run_id: String,
    pub trace_id: String,
    pub status: String,
    pub error_cause: Option<String>,
    pub mode: Option<String>,
    pub allow_publishing: Option<bool>,
    pub pass_rate: Option<f64>,
    pub critical_failure: Option<bool>,
    pub signals_persisted: usize,
    pub report: Value,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

#[async_trait::async_trait]
pub trait SignalStore: Send + Sync {
    /// Upsert every row in one transaction. On error nothing from this call is visible.
    async fn upsert_batch(&self, run_id: &str, rows: &[StoredSignal]) -> Result<usize>;

    async fn record_run(&self, _entry: &RunLedgerEntry) -> Result<()> {
        Ok(())
    }
}

pub struct SqliteSignalStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteSignalStore {
    pub fn new(db_path: &str) -> Result<Self> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX; // locking is ours

        let conn = Connection::open_with_flags(db_path, flags)
            .with_context(|| format!("Failed to open database at {}", db_path))?;

        conn.execute_batch(SCHEMA_SQL)
            .context("Failed to initialize database schema")?;

        let journal_mode: String = conn
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .unwrap_or_default();
        if db_path != ":memory:" && journal_mode.to_lowercase() != "wal" {
            warn!("WAL mode not active, journal_mode = {}", journal_mode);
        }

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM signals", [], |row| row.get(0))
            .unwrap_or(0);
        info!("📊 signal store ready at {} ({} stored signals)", db_path, count);

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn in_memory() -> Result<Self> {
        Self::new(":memory:")
    }

    fn upsert_blocking(&self, run_id: &str, rows: &[(&StoredSignal, String, String)]) -> Result<usize> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction().context("Failed to begin transaction")?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO signals
                 (run_id, external_id, origin, quality_score, payload_json, generated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(run_id, external_id) DO UPDATE SET
                    origin = excluded.origin,
                    quality_score = excluded.quality_score,
                    payload_json = excluded.payload_json,
                    generated_at = excluded.generated_at,
                    updated_at = strftime('%s', 'now')",
            )?;
            for (row, payload_json, generated_at) in rows {
                stmt.execute(params![
                    run_id,
                    &row.external_id,
                    &row.origin,
                    row.quality_score,
                    payload_json,
                    generated_at,
                ])
                .with_context(|| format!("Failed to upsert signal {}", row.external_id))?;
            }
        }
        tx.commit().context("Failed to commit signal batch")?;
        Ok(rows.len())
    }

    pub fn count_for_run(&self, run_id: &str) -> Result<usize> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM signals WHERE run_id = ?1",
            params![run_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    pub fn get_signal(&self, run_id: &str, external_id: &str) -> Result<Option<StoredSignal>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT external_id, origin, quality_score, payload_json, generated_at
             FROM signals WHERE run_id = ?1 AND external_id = ?2",
        )?;
        let row = stmt
            .query_row(params![run_id, external_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<f64>>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                ))
            })
            .optional()?;

        row.map(|(external_id, origin, quality_score, payload_json, generated_at)| -> Result<StoredSignal> {
            Ok(StoredSignal {
                external_id,
                origin,
                quality_score,
                payload: serde_json::from_str(&payload_json).context("Corrupt signal payload")?,
                generated_at: DateTime::parse_from_rfc3339(&generated_at)
                    .context("Corrupt signal timestamp")?
                    .with_timezone(&Utc),
            })
        })
        .transpose()
    }

    pub fn get_run(&self, run_id: &str) -> Result<Option<RunLedgerEntry>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached("SELECT report_json FROM runs WHERE run_id = ?1")?;
        let json: Option<String> = stmt.query_row(params![run_id], |row| row.get(0)).optional()?;
        json.map(|j| serde_json::from_str(&j).context("Corrupt run ledger entry"))
            .transpose()
    }

    pub fn run_count(&self) -> Result<usize> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM runs", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    pub fn len(&self) -> usize {
        let conn = self.conn.lock();
        conn.query_row("SELECT COUNT(*) FROM signals", [], |row| row.get::<_, i64>(0))
            .unwrap_or(0) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait::async_trait]
impl SignalStore for SqliteSignalStore {
    async fn upsert_batch(&self, run_id: &str, rows: &[StoredSignal]) -> Result<usize> {
        if rows.is_empty() {
            return Ok(0);
        }

        // Serialize outside the lock
        let serialized = rows
            .iter()
            .map(|row| -> Result<_> {
                let payload = serde_json::to_string(&row.payload)?;
                Ok((row, payload, row.generated_at.to_rfc3339()))
            })
            .collect::<Result<Vec<_>>>()?;

        let written = self.upsert_blocking(run_id, &serialized)?;
        debug!(run_id, written, "📦 signal batch committed");
        Ok(written)
    }

    async fn record_run(&self, entry: &RunLedgerEntry) -> Result<()> {
        let report_json = serde_json::to_string(entry)?;
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO runs
             (run_id, trace_id, status, error_cause, mode, allow_publishing, pass_rate,
              critical_failure, signals_persisted, report_json, started_at, completed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
             ON CONFLICT(run_id) DO UPDATE SET
                status = excluded.status,
                error_cause = excluded.error_cause,
                mode = excluded.mode,
                allow_publishing = excluded.allow_publishing,
                pass_rate = excluded.pass_rate,
                critical_failure = excluded.critical_failure,
                signals_persisted = excluded.signals_persisted,
                report_json = excluded.report_json,
                completed_at = excluded.completed_at",
            params![
                &entry.run_id,
                &entry.trace_id,
                &entry.status,
                &entry.error_cause,
                &entry.mode,
                entry.allow_publishing,
                entry.pass_rate,
                entry.critical_failure,
                entry.signals_persisted as i64,
                &report_json,
                entry.started_at.to_rfc3339(),
                entry.completed_at.to_rfc3339(),
            ],
        )
        .with_context(|| format!("Failed to record run {}", entry.run_id))?;
        Ok(())
    }
}
