//! # Shared Store - Durable Rows for the HashSentry Core
//!
//! The single owner of every durable row: business tables, `outbox`,
//! `inbox`, `dlq`, `commands`, telemetry live/history, collector keys,
//! the audit log and the derived read-models.
//!
//! ## Transaction Model
//!
//! [`Store::transact`] runs a closure against a snapshot of all tables and
//! swaps the snapshot in atomically when the closure returns `Ok`:
//!
//! ```text
//! lock ─► clone tables ─► closure(&mut Txn) ─┬─ Ok  ─► swap in, unlock
//!                                            └─ Err ─► discard, unlock
//! ```
//!
//! Consequences:
//!
//! - A business mutation and its outbox append commit or vanish together;
//!   there is no window where one exists without the other.
//! - Writers are serialized by the store lock. The closure must not block
//!   on I/O; handlers do their network work outside the transaction.
//! - Unique-key violations surface as [`StoreError::DuplicateKey`] and roll
//!   the whole transaction back unless the caller handles them.
//!
//! ## Invariants
//!
//! | ID | Invariant |
//! |----|-----------|
//! | 1 | Outbox rows are never mutated after insert except `published_at` |
//! | 2 | At most one inbox row per `(consumer, event)` |
//! | 3 | Command status transitions are forward-only; terminal is frozen |
//! | 4 | Telemetry live is never observed ahead of history |
//! | 5 | Audit rows only append; ids are assigned in insertion order |

// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod error;
pub mod outbox;
pub mod retention;
pub mod rows;
pub mod store;
pub mod tables;
pub mod txn;

pub use error::StoreError;
pub use outbox::append_event;
pub use rows::{
    AuditRow, CollectorKeyRow, CommandResultRow, CommandRow, Compression, CrmActivityRow,
    DlqRow, EdgeDeviceRow, InboxRow, MinerRow, OutboxRow, PortfolioRow, TelemetryHistoryRow,
    TelemetryLiveRow, UploadLogRow, UploadOutcome,
};
pub use store::Store;
pub use tables::Tables;
pub use txn::Txn;
