//! `mnemos-kernel` – write coordination.
//!
//! Index writes are not locked against each other; atomicity across the
//! vector index, time index, episode table and graph comes from remembering
//! how to undo each step.
//!
//! # Modules
//!
//! - [`transaction`] – [`TransactionCoordinator`][transaction::TransactionCoordinator]:
//!   an in-memory compensation log per logical write.  On failure the
//!   recorded compensations are replayed in reverse order; a background
//!   sweep force-rolls-back transactions abandoned past a fixed age.

pub mod transaction;

pub use transaction::{
    CompensationFailure, Operation, OperationKind, RollbackReport, TransactionCoordinator,
    TxError, TxStatus,
};
