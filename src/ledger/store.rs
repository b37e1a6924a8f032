//! Ledger storage backends.
//!
//! [`SqliteStore`] is the production backend: one SQLite file per ledger
//! destination, append-only tables keyed by a per-process run id.
//! [`MemoryStore`] collects records in memory for tests.

use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result, anyhow};
use rusqlite::{Connection, params};
use uuid::Uuid;

use super::{LedgerRecord, LedgerStore};

pub struct SqliteStore {
    conn: Connection,
    run_id: Uuid,
}

impl SqliteStore {
    /// Open (or create) a SQLite ledger at the given path, run migrations,
    /// and register a fresh run id.
    pub fn new(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).context("Failed to open SQLite ledger")?;
        Self::with_connection(conn)
    }

    /// In-memory ledger (for testing).
    pub fn in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().context("Failed to open in-memory SQLite ledger")?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        let store = Self {
            conn,
            run_id: Uuid::new_v4(),
        };
        store.init()?;
        Ok(store)
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    fn init(&self) -> Result<()> {
        self.conn
            .execute_batch("PRAGMA foreign_keys = ON;")
            .context("Failed to enable foreign keys")?;
        self.run_migrations().context("Failed to run migrations")?;
        self.conn
            .execute(
                "INSERT INTO runs (id) VALUES (?1)",
                params![self.run_id.to_string()],
            )
            .context("Failed to register run")?;
        Ok(())
    }

    fn run_migrations(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS runs (
                    id TEXT PRIMARY KEY,
                    started_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS configurations (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    run_id TEXT NOT NULL REFERENCES runs(id),
                    key TEXT NOT NULL,
                    value TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS agents (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    run_id TEXT NOT NULL REFERENCES runs(id),
                    name TEXT NOT NULL,
                    role TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS code_versions (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    run_id TEXT NOT NULL REFERENCES runs(id),
                    iteration INTEGER NOT NULL,
                    artifact TEXT NOT NULL,
                    quality_score REAL NOT NULL,
                    complexity_score REAL NOT NULL,
                    volume_metric REAL NOT NULL,
                    performance_score REAL,
                    documentation_score REAL,
                    recorded_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS issue_reports (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    run_id TEXT NOT NULL REFERENCES runs(id),
                    iteration INTEGER NOT NULL,
                    round INTEGER NOT NULL,
                    agent TEXT NOT NULL,
                    severity TEXT NOT NULL,
                    report TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS stage_outcomes (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    run_id TEXT NOT NULL REFERENCES runs(id),
                    iteration INTEGER NOT NULL,
                    stage TEXT NOT NULL,
                    agent TEXT NOT NULL,
                    succeeded INTEGER NOT NULL,
                    payload TEXT NOT NULL,
                    severity TEXT
                );

                CREATE TABLE IF NOT EXISTS logs (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    run_id TEXT NOT NULL REFERENCES runs(id),
                    level TEXT NOT NULL,
                    message TEXT NOT NULL,
                    timestamp TEXT NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_code_versions_iteration
                    ON code_versions(run_id, iteration);
                CREATE INDEX IF NOT EXISTS idx_issue_reports_iteration
                    ON issue_reports(run_id, iteration);
                CREATE INDEX IF NOT EXISTS idx_stage_outcomes_iteration
                    ON stage_outcomes(run_id, iteration);
                ",
            )
            .context("Failed to create ledger tables")?;
        Ok(())
    }
}

impl LedgerStore for SqliteStore {
    fn append(&mut self, record: &LedgerRecord) -> Result<()> {
        let run_id = self.run_id.to_string();
        match record {
            LedgerRecord::Config { key, value } => {
                self.conn
                    .execute(
                        "INSERT INTO configurations (run_id, key, value) VALUES (?1, ?2, ?3)",
                        params![run_id, key, value],
                    )
                    .context("Failed to insert configuration")?;
            }
            LedgerRecord::Agent { name, role } => {
                self.conn
                    .execute(
                        "INSERT INTO agents (run_id, name, role) VALUES (?1, ?2, ?3)",
                        params![run_id, name, role],
                    )
                    .context("Failed to insert agent")?;
            }
            LedgerRecord::Version {
                iteration,
                artifact,
                scores,
            } => {
                self.conn
                    .execute(
                        "INSERT INTO code_versions
                         (run_id, iteration, artifact, quality_score, complexity_score,
                          volume_metric, performance_score, documentation_score)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                        params![
                            run_id,
                            iteration,
                            artifact,
                            scores.quality,
                            scores.complexity,
                            scores.volume,
                            scores.performance,
                            scores.documentation,
                        ],
                    )
                    .context("Failed to insert code version")?;
            }
            LedgerRecord::Issues {
                iteration,
                round,
                agent,
                severity,
                report,
            } => {
                self.conn
                    .execute(
                        "INSERT INTO issue_reports
                         (run_id, iteration, round, agent, severity, report)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                        params![run_id, iteration, round, agent, severity.as_str(), report],
                    )
                    .context("Failed to insert issue report")?;
            }
            LedgerRecord::Outcome { iteration, outcome } => {
                let payload = serde_json::to_string(&outcome.payload)
                    .context("Failed to serialize stage payload")?;
                self.conn
                    .execute(
                        "INSERT INTO stage_outcomes
                         (run_id, iteration, stage, agent, succeeded, payload, severity)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                        params![
                            run_id,
                            iteration,
                            outcome.stage.as_str(),
                            outcome.agent,
                            outcome.succeeded,
                            payload,
                            outcome.severity.map(|s| s.as_str()),
                        ],
                    )
                    .context("Failed to insert stage outcome")?;
            }
            LedgerRecord::Log {
                level,
                message,
                timestamp,
            } => {
                self.conn
                    .execute(
                        "INSERT INTO logs (run_id, level, message, timestamp)
                         VALUES (?1, ?2, ?3, ?4)",
                        params![run_id, level, message, timestamp.to_rfc3339()],
                    )
                    .context("Failed to insert log line")?;
            }
        }
        Ok(())
    }
}

/// In-memory store for tests: appends into a shared `Vec` the test can
/// inspect after shutdown.
#[derive(Default)]
pub struct MemoryStore {
    records: Arc<Mutex<Vec<LedgerRecord>>>,
}

impl MemoryStore {
    /// Shared handle to the collected records; clone it before moving the
    /// store into the ledger writer.
    pub fn records(&self) -> Arc<Mutex<Vec<LedgerRecord>>> {
        Arc::clone(&self.records)
    }
}

impl LedgerStore for MemoryStore {
    fn append(&mut self, record: &LedgerRecord) -> Result<()> {
        self.records
            .lock()
            .map_err(|_| anyhow!("memory store lock poisoned"))?
            .push(record.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::Artifact;
    use crate::config::ScoringConfig;
    use crate::report::Severity;
    use crate::sandbox::SandboxVerdict;
    use crate::scoring::ScoreSet;
    use crate::stage::StageOutcome;

    fn count(store: &SqliteStore, table: &str) -> i64 {
        store
            .conn
            .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
                row.get(0)
            })
            .unwrap()
    }

    #[test]
    fn migrations_are_idempotent() {
        let store = SqliteStore::in_memory().unwrap();
        store.run_migrations().unwrap();
        assert_eq!(count(&store, "runs"), 1);
    }

    #[test]
    fn append_covers_every_record_kind() {
        let mut store = SqliteStore::in_memory().unwrap();
        let artifact = Artifact::new("x = 1");
        let scores = ScoreSet::measure(&artifact, &ScoringConfig::default());

        store
            .append(&LedgerRecord::Config {
                key: "run.iteration_limit".into(),
                value: "3".into(),
            })
            .unwrap();
        store
            .append(&LedgerRecord::Agent {
                name: "style-auditor".into(),
                role: "detection".into(),
            })
            .unwrap();
        store
            .append(&LedgerRecord::Version {
                iteration: 1,
                artifact: artifact.as_str().to_string(),
                scores: scores.clone(),
            })
            .unwrap();
        store
            .append(&LedgerRecord::Issues {
                iteration: 1,
                round: 1,
                agent: "style-auditor".into(),
                severity: Severity::Major,
                report: "Line 1: broken. Severity: Major".into(),
            })
            .unwrap();
        store
            .append(&LedgerRecord::Outcome {
                iteration: 1,
                outcome: StageOutcome::sandbox("docker", SandboxVerdict::passed("")),
            })
            .unwrap();
        store
            .append(&LedgerRecord::Log {
                level: "INFO".into(),
                message: "hello".into(),
                timestamp: chrono::Utc::now(),
            })
            .unwrap();

        assert_eq!(count(&store, "configurations"), 1);
        assert_eq!(count(&store, "agents"), 1);
        assert_eq!(count(&store, "code_versions"), 1);
        assert_eq!(count(&store, "issue_reports"), 1);
        assert_eq!(count(&store, "stage_outcomes"), 1);
        assert_eq!(count(&store, "logs"), 1);
    }

    #[test]
    fn version_rows_keep_optional_scores_null_until_amended() {
        let mut store = SqliteStore::in_memory().unwrap();
        let artifact = Artifact::new("x = 1");
        let base = ScoreSet::measure(&artifact, &ScoringConfig::default());

        store
            .append(&LedgerRecord::Version {
                iteration: 1,
                artifact: artifact.as_str().to_string(),
                scores: base.clone(),
            })
            .unwrap();
        store
            .append(&LedgerRecord::Version {
                iteration: 1,
                artifact: artifact.as_str().to_string(),
                scores: base.with_performance(50.0),
            })
            .unwrap();

        let perf: Vec<Option<f64>> = store
            .conn
            .prepare("SELECT performance_score FROM code_versions ORDER BY id")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<rusqlite::Result<_>>()
            .unwrap();
        assert_eq!(perf, vec![None, Some(50.0)]);
    }

    #[test]
    fn persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.db");

        {
            let mut store = SqliteStore::new(&path).unwrap();
            store
                .append(&LedgerRecord::Log {
                    level: "INFO".into(),
                    message: "first run".into(),
                    timestamp: chrono::Utc::now(),
                })
                .unwrap();
        }

        let store = SqliteStore::new(&path).unwrap();
        assert_eq!(count(&store, "logs"), 1);
        assert_eq!(count(&store, "runs"), 2);
    }

    #[test]
    fn memory_store_collects_clones() {
        let store = MemoryStore::default();
        let records = store.records();
        let mut store = store;
        store
            .append(&LedgerRecord::Config {
                key: "k".into(),
                value: "v".into(),
            })
            .unwrap();
        assert_eq!(records.lock().unwrap().len(), 1);
    }
}
