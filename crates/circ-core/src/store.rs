//! The `RecordStore` trait and the snapshot/delta types that cross it.
//!
//! The trait is implemented by whatever persists raw records for the
//! deployment (the reference CSV store, an in-memory store for tests).
//! The engine depends on this abstraction, never on a concrete backend,
//! and persistence is kept off the hot path: deltas are drained by a
//! background task after each transition has already committed.

use std::future::Future;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
  loan::{CopyId, CopyStatus, Loan},
  title::TitleRecord,
  waitlist::WaitingEntry,
};

// ─── Snapshot ────────────────────────────────────────────────────────────────

/// One copy row as persisted: identity plus current status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CopyRow {
  pub copy:   CopyId,
  pub status: CopyStatus,
}

/// The full persisted state, loaded once at startup.
///
/// `titles` is ordered by catalog insertion; `waiting` is ordered FIFO
/// within each title. The engine validates the lifecycle invariants on
/// load and rejects a snapshot that breaks them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Snapshot {
  pub titles:  Vec<TitleRecord>,
  pub copies:  Vec<CopyRow>,
  /// Complete loan history, active loans included.
  pub loans:   Vec<Loan>,
  pub waiting: Vec<WaitingEntry>,
}

// ─── Delta ───────────────────────────────────────────────────────────────────

/// One committed state transition, emitted after the owning critical
/// section has released. Replaying deltas over the previous snapshot
/// reproduces the current state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Delta {
  TitleAdded(TitleRecord),
  CopiesAdded { title_id: Uuid, copy_nos: Vec<u32> },
  CopyRemoved(CopyId),
  LoanRecorded(Loan),
  ReturnRecorded(Loan),
  ReservationOpened {
    copy:       CopyId,
    user:       String,
    expires_at: DateTime<Utc>,
  },
  /// The hold ended — claimed by the offered user, lapsed, or released
  /// by an explicit withdrawal.
  ReservationClosed { copy: CopyId },
  WaiterEnqueued(WaitingEntry),
  WaiterRemoved { title_id: Uuid, user: String },
}

// ─── Trait ───────────────────────────────────────────────────────────────────

/// Abstraction over the external record store.
///
/// All methods return `Send` futures so the trait can be driven from a
/// multi-threaded async runtime. `persist` failures are logged by the
/// drain task and never surface to the caller that committed the
/// transition.
pub trait RecordStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  /// Load the full persisted state at startup.
  fn load(
    &self,
  ) -> impl Future<Output = Result<Snapshot, Self::Error>> + Send + '_;

  /// Persist one committed transition, in commit order.
  fn persist(
    &self,
    delta: Delta,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;
}
