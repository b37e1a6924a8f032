//! Append-only run ledger.
//!
//! Every record that must survive a run (configuration snapshot, agent
//! registry, version records, issue reports, stage outcomes, log lines)
//! goes through one bounded channel into a dedicated writer thread. The
//! control loop never blocks on storage (a send only waits if the writer
//! falls a full buffer behind), and [`LedgerWriter::shutdown`] drains the queue
//! on every exit path, so the final iteration's records are never lost.
//!
//! The orchestrator only ever appends; reads are for offline reporting.
//! Delivery is at-least-once: records are keyed by (iteration, insertion
//! order) and stores are append-only, so a retried write is harmless.

pub mod store;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, warn};

use crate::report::Severity;
use crate::scoring::ScoreSet;
use crate::stage::StageOutcome;

pub use store::{MemoryStore, SqliteStore};

/// Queue capacity between the control loop and the writer. Generous
/// enough that the loop only waits if the store falls far behind.
const CHANNEL_CAPACITY: usize = 256;

/// One append-only ledger record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "record")]
pub enum LedgerRecord {
    /// One configuration key at run start.
    Config { key: String, value: String },
    /// One agent registration at run start.
    Agent { name: String, role: String },
    /// Artifact snapshot with its scores. Multiple records may exist for
    /// one iteration as stage scores accumulate; the last one per
    /// iteration is authoritative for reporting.
    Version {
        iteration: u32,
        artifact: String,
        scores: ScoreSet,
    },
    /// Non-empty detection report for one sub-round.
    Issues {
        iteration: u32,
        round: u32,
        agent: String,
        severity: Severity,
        report: String,
    },
    /// Outcome of one stage execution.
    Outcome { iteration: u32, outcome: StageOutcome },
    /// Mirrored log line.
    Log {
        level: String,
        message: String,
        timestamp: DateTime<Utc>,
    },
}

/// Storage backend for ledger records. Implementations are synchronous;
/// the writer thread owns the only instance.
pub trait LedgerStore: Send {
    fn append(&mut self, record: &LedgerRecord) -> anyhow::Result<()>;
}

/// Sending side of the ledger. Deliberately not `Clone`: the drain step
/// relies on dropping the one sender, so callers share it by reference.
pub struct Ledger {
    tx: mpsc::Sender<LedgerRecord>,
}

/// Handle used to drain and join the writer at shutdown.
pub struct LedgerWriter {
    handle: JoinHandle<()>,
}

impl Ledger {
    /// Spawn the writer thread over the given store and return the
    /// sending handle plus the shutdown handle.
    pub fn spawn(mut store: Box<dyn LedgerStore>) -> (Self, LedgerWriter) {
        let (tx, mut rx) = mpsc::channel::<LedgerRecord>(CHANNEL_CAPACITY);
        let handle = tokio::task::spawn_blocking(move || {
            while let Some(record) = rx.blocking_recv() {
                if let Err(error) = store.append(&record) {
                    // A lost record degrades reporting but must not take
                    // down the run.
                    error!(%error, "ledger append failed");
                }
            }
        });
        (Self { tx }, LedgerWriter { handle })
    }

    /// Enqueue a record. Errors only if the writer is gone, which is
    /// logged and otherwise ignored; ledger trouble never stops the run.
    pub async fn record(&self, record: LedgerRecord) {
        if self.tx.send(record).await.is_err() {
            warn!("ledger writer is gone; record dropped");
        }
    }

    pub async fn config_snapshot(&self, pairs: Vec<(String, String)>) {
        for (key, value) in pairs {
            self.record(LedgerRecord::Config { key, value }).await;
        }
    }

    pub async fn register_agents(&self, entries: Vec<(String, &'static str)>) {
        for (name, role) in entries {
            self.record(LedgerRecord::Agent {
                name,
                role: role.to_string(),
            })
            .await;
        }
    }

    pub async fn version(&self, iteration: u32, artifact: &crate::artifact::Artifact, scores: ScoreSet) {
        self.record(LedgerRecord::Version {
            iteration,
            artifact: artifact.as_str().to_string(),
            scores,
        })
        .await;
    }

    pub async fn issues(
        &self,
        iteration: u32,
        round: u32,
        agent: &str,
        severity: Severity,
        report: String,
    ) {
        self.record(LedgerRecord::Issues {
            iteration,
            round,
            agent: agent.to_string(),
            severity,
            report,
        })
        .await;
    }

    pub async fn outcome(&self, iteration: u32, outcome: StageOutcome) {
        self.record(LedgerRecord::Outcome { iteration, outcome }).await;
    }

    pub async fn log(&self, level: &str, message: impl Into<String>) {
        self.record(LedgerRecord::Log {
            level: level.to_string(),
            message: message.into(),
            timestamp: Utc::now(),
        })
        .await;
    }
}

impl LedgerWriter {
    /// Drain every queued record and join the writer. Call this with the
    /// last [`Ledger`] clone already dropped (or pass it here) on every
    /// exit path (success, fatal error, or signal).
    pub async fn shutdown(self, ledger: Ledger) {
        drop(ledger);
        if let Err(error) = self.handle.await {
            error!(%error, "ledger writer task panicked");
        }
    }
}
