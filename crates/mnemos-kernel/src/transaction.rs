//! [`TransactionCoordinator`] – compensation log for cross-index writes.
//!
//! A logical write (e.g. "create episode") touches several stores in turn.
//! After each successful step the caller records an [`Operation`] carrying a
//! compensation that undoes it.  [`TransactionCoordinator::commit`] discards
//! the log; [`TransactionCoordinator::rollback`] replays it in **reverse**
//! insertion order.
//!
//! Compensation failures (errors or panics) are logged and collected in the
//! returned [`RollbackReport`]; they never stop the remaining compensations.
//!
//! The log is in-memory only.  It is not a write-ahead log and does not
//! survive a process crash.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use mnemos_kernel::transaction::{Operation, OperationKind, TransactionCoordinator};
//!
//! let coordinator = TransactionCoordinator::default();
//! let undone = Arc::new(AtomicUsize::new(0));
//!
//! let tx = coordinator.start_transaction();
//! let counter = undone.clone();
//! coordinator
//!     .add_operation(&tx, Operation::new(OperationKind::VectorInsert, "ep-1", move || {
//!         counter.fetch_add(1, Ordering::SeqCst);
//!         Ok(())
//!     }))
//!     .unwrap();
//!
//! let report = coordinator.rollback(&tx);
//! assert!(report.is_clean());
//! assert_eq!(undone.load(Ordering::SeqCst), 1);
//! ```

use std::collections::HashMap;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use mnemos_graph::GraphStore;
use mnemos_index::{LruCache, SharedVectorIndex, TimeIndex};
use mnemos_types::{MnemosError, Timestamp, new_id};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Pending transactions older than this are force-rolled-back by the sweep.
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(300);

/// Finished transaction IDs remembered for [`TransactionCoordinator::status`].
const FINISHED_HISTORY: usize = 1024;

// ─────────────────────────────────────────────────────────────────────────────
// Error type
// ─────────────────────────────────────────────────────────────────────────────

/// Errors that can arise from transaction bookkeeping.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TxError {
    #[error("Unknown transaction: {0}")]
    Unknown(String),
    #[error("Transaction {id} is {status}, not pending")]
    NotPending { id: String, status: TxStatus },
}

impl From<TxError> for MnemosError {
    fn from(e: TxError) -> Self {
        MnemosError::Transaction(e.to_string())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Public types
// ─────────────────────────────────────────────────────────────────────────────

/// Lifecycle state of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TxStatus {
    Pending,
    Committed,
    RolledBack,
}

impl fmt::Display for TxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TxStatus::Pending => "pending",
            TxStatus::Committed => "committed",
            TxStatus::RolledBack => "rolled_back",
        })
    }
}

/// What a recorded step did (and therefore what its compensation undoes).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    VectorInsert,
    TimeIndexInsert,
    RecordInsert,
    RecordUpdate,
    NodeCreate,
    EdgeCreate,
    Custom(String),
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationKind::VectorInsert => f.write_str("vector_insert"),
            OperationKind::TimeIndexInsert => f.write_str("time_index_insert"),
            OperationKind::RecordInsert => f.write_str("record_insert"),
            OperationKind::RecordUpdate => f.write_str("record_update"),
            OperationKind::NodeCreate => f.write_str("node_create"),
            OperationKind::EdgeCreate => f.write_str("edge_create"),
            OperationKind::Custom(name) => f.write_str(name),
        }
    }
}

/// Undo action for one step.
pub type Compensation = Box<dyn FnOnce() -> Result<(), String> + Send>;

/// One recorded step of a transaction.
pub struct Operation {
    pub kind: OperationKind,
    /// ID of the entity the step wrote.
    pub target_id: String,
    rollback: Compensation,
}

impl Operation {
    pub fn new(
        kind: OperationKind,
        target_id: impl Into<String>,
        rollback: impl FnOnce() -> Result<(), String> + Send + 'static,
    ) -> Self {
        Self {
            kind,
            target_id: target_id.into(),
            rollback: Box::new(rollback),
        }
    }

    /// Undo a vector insert by deleting `id` from `index`.
    pub fn vector_delete(index: SharedVectorIndex, id: impl Into<String>) -> Self {
        let id = id.into();
        let target = id.clone();
        Self::new(OperationKind::VectorInsert, target, move || {
            index.write().delete(&id);
            Ok(())
        })
    }

    /// Undo a time-index insert.
    pub fn time_index_remove(index: Arc<RwLock<TimeIndex>>, timestamp: Timestamp, id: impl Into<String>) -> Self {
        let id = id.into();
        let target = id.clone();
        Self::new(OperationKind::TimeIndexInsert, target, move || {
            index.write().remove(timestamp, &id);
            Ok(())
        })
    }

    /// Undo a node create.  Incident edges go with the node.
    pub fn node_delete(graph: Arc<GraphStore>, id: impl Into<String>) -> Self {
        let id = id.into();
        let target = id.clone();
        Self::new(OperationKind::NodeCreate, target, move || {
            graph.delete_node(&id).map(|_| ()).map_err(|e| e.to_string())
        })
    }

    /// Undo an edge create.
    pub fn edge_delete(graph: Arc<GraphStore>, id: impl Into<String>) -> Self {
        let id = id.into();
        let target = id.clone();
        Self::new(OperationKind::EdgeCreate, target, move || {
            graph.delete_edge(&id).map(|_| ()).map_err(|e| e.to_string())
        })
    }
}

impl fmt::Debug for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Operation")
            .field("kind", &self.kind)
            .field("target_id", &self.target_id)
            .finish_non_exhaustive()
    }
}

/// A compensation that did not complete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompensationFailure {
    pub kind: OperationKind,
    pub target_id: String,
    pub error: String,
}

/// Outcome of [`TransactionCoordinator::rollback`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RollbackReport {
    pub transaction_id: String,
    /// `false` when the ID was unknown or the transaction was not pending;
    /// nothing was replayed.
    pub found: bool,
    pub attempted: usize,
    pub failures: Vec<CompensationFailure>,
}

impl RollbackReport {
    /// True when every compensation succeeded.
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Internal entry
// ─────────────────────────────────────────────────────────────────────────────

struct Transaction {
    operations: Vec<Operation>,
    created_at: DateTime<Utc>,
    started: Instant,
}

struct Registry {
    pending: HashMap<String, Transaction>,
    finished: LruCache<String, (TxStatus, DateTime<Utc>)>,
}

// ─────────────────────────────────────────────────────────────────────────────
// TransactionCoordinator
// ─────────────────────────────────────────────────────────────────────────────

/// Owns the compensation logs of in-flight transactions.
///
/// Each episode store constructs its own coordinator; there is no
/// process-wide registry.
pub struct TransactionCoordinator {
    registry: Mutex<Registry>,
    max_age: Duration,
}

impl Default for TransactionCoordinator {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_AGE)
    }
}

impl TransactionCoordinator {
    /// Create a coordinator whose sweep reclaims transactions pending for
    /// at least `max_age`.
    pub fn new(max_age: Duration) -> Self {
        Self {
            registry: Mutex::new(Registry {
                pending: HashMap::new(),
                finished: LruCache::new(FINISHED_HISTORY),
            }),
            max_age,
        }
    }

    pub fn max_age(&self) -> Duration {
        self.max_age
    }

    /// Open a new pending transaction and return its ID.
    pub fn start_transaction(&self) -> String {
        let id = new_id();
        self.registry.lock().pending.insert(
            id.clone(),
            Transaction {
                operations: Vec::new(),
                created_at: Utc::now(),
                started: Instant::now(),
            },
        );
        debug!(tx_id = %id, "transaction started");
        id
    }

    /// Append a compensation to `tx_id`'s log.
    ///
    /// # Errors
    ///
    /// [`TxError::NotPending`] once the transaction has committed or rolled
    /// back; [`TxError::Unknown`] for an ID never issued (or long forgotten).
    pub fn add_operation(&self, tx_id: &str, op: Operation) -> Result<(), TxError> {
        let mut reg = self.registry.lock();
        if let Some(tx) = reg.pending.get_mut(tx_id) {
            tx.operations.push(op);
            return Ok(());
        }
        match reg.finished.peek(tx_id) {
            Some(&(status, _)) => Err(TxError::NotPending {
                id: tx_id.to_string(),
                status,
            }),
            None => Err(TxError::Unknown(tx_id.to_string())),
        }
    }

    /// Mark `tx_id` committed and discard its compensations.
    pub fn commit(&self, tx_id: &str) -> Result<(), TxError> {
        let mut reg = self.registry.lock();
        let Some(tx) = reg.pending.remove(tx_id) else {
            return match reg.finished.peek(tx_id) {
                Some(&(status, _)) => Err(TxError::NotPending {
                    id: tx_id.to_string(),
                    status,
                }),
                None => Err(TxError::Unknown(tx_id.to_string())),
            };
        };
        reg.finished
            .set(tx_id.to_string(), (TxStatus::Committed, Utc::now()));
        debug!(tx_id, operations = tx.operations.len(), "transaction committed");
        Ok(())
    }

    /// Replay `tx_id`'s compensations in reverse order.
    ///
    /// Unknown or already finished IDs are a silent no-op (`found == false`).
    pub fn rollback(&self, tx_id: &str) -> RollbackReport {
        let tx = {
            let mut reg = self.registry.lock();
            let tx = reg.pending.remove(tx_id);
            if tx.is_some() {
                reg.finished
                    .set(tx_id.to_string(), (TxStatus::RolledBack, Utc::now()));
            }
            tx
        };
        let Some(tx) = tx else {
            return RollbackReport {
                transaction_id: tx_id.to_string(),
                ..RollbackReport::default()
            };
        };

        // Compensations run outside the registry lock: they may take store
        // locks of their own.
        let mut report = RollbackReport {
            transaction_id: tx_id.to_string(),
            found: true,
            attempted: tx.operations.len(),
            failures: Vec::new(),
        };
        for op in tx.operations.into_iter().rev() {
            let Operation {
                kind,
                target_id,
                rollback,
            } = op;
            let outcome = match catch_unwind(AssertUnwindSafe(rollback)) {
                Ok(result) => result,
                Err(panic) => Err(panic_message(panic.as_ref())),
            };
            if let Err(error) = outcome {
                error!(tx_id, %kind, target_id = %target_id, %error, "compensation failed");
                report.failures.push(CompensationFailure {
                    kind,
                    target_id,
                    error,
                });
            }
        }
        if report.is_clean() {
            info!(tx_id, operations = report.attempted, "transaction rolled back");
        } else {
            warn!(
                tx_id,
                operations = report.attempted,
                failed = report.failures.len(),
                "transaction partially rolled back"
            );
        }
        report
    }

    /// Current state of `tx_id`, if it is pending or recently finished.
    pub fn status(&self, tx_id: &str) -> Option<TxStatus> {
        let reg = self.registry.lock();
        if reg.pending.contains_key(tx_id) {
            return Some(TxStatus::Pending);
        }
        reg.finished.peek(tx_id).map(|&(status, _)| status)
    }

    /// Creation time of a pending transaction.
    pub fn created_at(&self, tx_id: &str) -> Option<DateTime<Utc>> {
        self.registry.lock().pending.get(tx_id).map(|t| t.created_at)
    }

    /// Completion time of a recently finished transaction.
    pub fn completed_at(&self, tx_id: &str) -> Option<DateTime<Utc>> {
        self.registry.lock().finished.peek(tx_id).map(|&(_, at)| at)
    }

    pub fn pending_count(&self) -> usize {
        self.registry.lock().pending.len()
    }

    /// Force-roll-back every pending transaction older than the max age.
    /// Returns the swept IDs.
    pub fn sweep_abandoned(&self) -> Vec<String> {
        let stale: Vec<String> = {
            let reg = self.registry.lock();
            reg.pending
                .iter()
                .filter(|(_, tx)| tx.started.elapsed() >= self.max_age)
                .map(|(id, _)| id.clone())
                .collect()
        };
        for id in &stale {
            warn!(tx_id = %id, max_age_secs = self.max_age.as_secs(), "rolling back abandoned transaction");
            self.rollback(id);
        }
        stale
    }

    /// Run [`sweep_abandoned`](Self::sweep_abandoned) every `period` on the
    /// current tokio runtime.  The task ends once the coordinator is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>, period: Duration) -> JoinHandle<()> {
        let weak: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(coordinator) = weak.upgrade() else {
                    debug!("transaction sweeper stopped");
                    break;
                };
                let swept = coordinator.sweep_abandoned();
                if !swept.is_empty() {
                    info!(count = swept.len(), "abandoned transactions swept");
                }
            }
        })
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("compensation panicked: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("compensation panicked: {s}")
    } else {
        "compensation panicked".to_string()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use mnemos_graph::{NewEdge, NewNode};
    use mnemos_index::vector::{FlatIndex, Metric, shared};

    fn recording(log: &Arc<Mutex<Vec<String>>>, name: &str) -> Operation {
        let log = log.clone();
        let name = name.to_string();
        Operation::new(OperationKind::Custom(name.clone()), name.clone(), move || {
            log.lock().push(name);
            Ok(())
        })
    }

    #[test]
    fn rollback_runs_in_reverse_order() {
        let c = TransactionCoordinator::default();
        let log = Arc::new(Mutex::new(Vec::new()));
        let tx = c.start_transaction();
        for name in ["first", "second", "third"] {
            c.add_operation(&tx, recording(&log, name)).unwrap();
        }
        let report = c.rollback(&tx);
        assert!(report.found);
        assert_eq!(report.attempted, 3);
        assert!(report.is_clean());
        assert_eq!(*log.lock(), vec!["third", "second", "first"]);
        assert_eq!(c.status(&tx), Some(TxStatus::RolledBack));
        assert!(c.completed_at(&tx).is_some());
    }

    #[test]
    fn failing_compensation_does_not_block_the_rest() {
        let c = TransactionCoordinator::default();
        let log = Arc::new(Mutex::new(Vec::new()));
        let tx = c.start_transaction();
        c.add_operation(&tx, recording(&log, "first")).unwrap();
        c.add_operation(
            &tx,
            Operation::new(OperationKind::NodeCreate, "n1", || Err("disk gone".into())),
        )
        .unwrap();
        c.add_operation(&tx, recording(&log, "third")).unwrap();

        let report = c.rollback(&tx);
        assert_eq!(*log.lock(), vec!["third", "first"]);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].kind, OperationKind::NodeCreate);
        assert_eq!(report.failures[0].error, "disk gone");
    }

    #[test]
    fn panicking_compensation_is_reported() {
        let c = TransactionCoordinator::default();
        let log = Arc::new(Mutex::new(Vec::new()));
        let tx = c.start_transaction();
        c.add_operation(&tx, recording(&log, "first")).unwrap();
        c.add_operation(
            &tx,
            Operation::new(OperationKind::EdgeCreate, "e1", || panic!("boom")),
        )
        .unwrap();
        let report = c.rollback(&tx);
        assert_eq!(*log.lock(), vec!["first"]);
        assert!(report.failures[0].error.contains("boom"));
    }

    #[test]
    fn each_compensation_runs_exactly_once() {
        let c = TransactionCoordinator::default();
        let log = Arc::new(Mutex::new(Vec::new()));
        let tx = c.start_transaction();
        c.add_operation(&tx, recording(&log, "only")).unwrap();
        c.rollback(&tx);
        let again = c.rollback(&tx);
        assert!(!again.found);
        assert_eq!(log.lock().len(), 1);
    }

    #[test]
    fn unknown_rollback_is_a_no_op() {
        let c = TransactionCoordinator::default();
        let report = c.rollback("never-issued");
        assert!(!report.found);
        assert_eq!(report.attempted, 0);
        assert!(report.is_clean());
    }

    #[test]
    fn commit_discards_log_and_closes_transaction() {
        let c = TransactionCoordinator::default();
        let log = Arc::new(Mutex::new(Vec::new()));
        let tx = c.start_transaction();
        c.add_operation(&tx, recording(&log, "x")).unwrap();
        c.commit(&tx).unwrap();
        assert_eq!(c.status(&tx), Some(TxStatus::Committed));
        assert_eq!(c.pending_count(), 0);

        assert!(!c.rollback(&tx).found);
        assert!(log.lock().is_empty());

        let err = c.add_operation(&tx, recording(&log, "late")).unwrap_err();
        assert_eq!(
            err,
            TxError::NotPending {
                id: tx.clone(),
                status: TxStatus::Committed
            }
        );
        assert!(matches!(c.commit(&tx), Err(TxError::NotPending { .. })));
        assert!(matches!(
            c.add_operation("nope", recording(&log, "y")),
            Err(TxError::Unknown(_))
        ));
    }

    #[test]
    fn sweep_rolls_back_only_stale_transactions() {
        let fresh = TransactionCoordinator::default();
        let tx = fresh.start_transaction();
        assert!(fresh.sweep_abandoned().is_empty());
        assert_eq!(fresh.status(&tx), Some(TxStatus::Pending));
        assert!(fresh.created_at(&tx).is_some());

        let eager = TransactionCoordinator::new(Duration::ZERO);
        let log = Arc::new(Mutex::new(Vec::new()));
        let tx = eager.start_transaction();
        eager.add_operation(&tx, recording(&log, "undo")).unwrap();
        assert_eq!(eager.sweep_abandoned(), vec![tx.clone()]);
        assert_eq!(*log.lock(), vec!["undo"]);
        assert_eq!(eager.status(&tx), Some(TxStatus::RolledBack));
    }

    #[tokio::test]
    async fn background_sweeper_reclaims_abandoned() {
        let c = Arc::new(TransactionCoordinator::new(Duration::ZERO));
        let handle = c.spawn_sweeper(Duration::from_millis(10));
        let tx = c.start_transaction();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(c.pending_count(), 0);
        assert_eq!(c.status(&tx), Some(TxStatus::RolledBack));

        drop(c);
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("sweeper should stop once the coordinator is dropped")
            .unwrap();
    }

    #[test]
    fn factories_undo_real_writes() {
        let index = shared(Box::new(FlatIndex::new(2, Metric::Cosine)));
        let graph = Arc::new(GraphStore::open_in_memory().unwrap());
        let times = Arc::new(RwLock::new(TimeIndex::new(4)));
        let c = TransactionCoordinator::default();
        let tx = c.start_transaction();

        index.write().insert("ep", &[1.0, 0.0]).unwrap();
        c.add_operation(&tx, Operation::vector_delete(index.clone(), "ep")).unwrap();
        times.write().insert(1000, "ep");
        c.add_operation(&tx, Operation::time_index_remove(times.clone(), 1000, "ep"))
            .unwrap();
        graph.create_node(NewNode::new("episode").with_id("ep")).unwrap();
        c.add_operation(&tx, Operation::node_delete(graph.clone(), "ep")).unwrap();
        graph.create_node(NewNode::new("episode").with_id("other")).unwrap();
        let edge = graph.create_edge(NewEdge::new("ep", "other", "rel")).unwrap();
        c.add_operation(&tx, Operation::edge_delete(graph.clone(), edge.clone()))
            .unwrap();

        let report = c.rollback(&tx);
        assert!(report.is_clean(), "{:?}", report.failures);
        assert_eq!(index.read().count(), 0);
        assert!(times.read().get(1000).is_empty());
        assert!(graph.get_node("ep").unwrap().is_none());
        assert!(graph.get_edge(&edge).unwrap().is_none());
        assert!(graph.get_node("other").unwrap().is_some());
    }
}
