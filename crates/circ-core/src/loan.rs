//! Copy and loan records.
//!
//! A copy's status and its ledger rows are mutated only inside the owning
//! title's critical section, in the same atomic step, so the two can
//! never drift apart.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identity of one physical copy: the owning title plus a per-title
/// sequence number. Copy numbers are never reused after removal.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
pub struct CopyId {
  pub title_id: Uuid,
  pub copy_no:  u32,
}

impl fmt::Display for CopyId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}#{}", self.title_id, self.copy_no)
  }
}

/// Lending status of a copy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CopyStatus {
  Available,
  OnLoan,
  /// Time-boxed hold offered to the head of the waiting list. If the
  /// offered user neither borrows nor withdraws before `expires_at`,
  /// the sweep lapses the hold and the next waiter is offered the copy.
  Reserved {
    user:       String,
    expires_at: DateTime<Utc>,
  },
}

impl CopyStatus {
  pub fn is_available(&self) -> bool { matches!(self, Self::Available) }
}

/// A lending record. Append-only: the sole mutation ever applied is
/// setting `returned_at`, and no record is ever deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Loan {
  pub loan_id:     Uuid,
  pub copy:        CopyId,
  pub borrower:    String,
  /// Server-assigned timestamp; never changes after creation.
  pub borrowed_at: DateTime<Utc>,
  pub due_at:      DateTime<Utc>,
  pub returned_at: Option<DateTime<Utc>>,
}

impl Loan {
  /// An active loan is one whose copy has not come back yet. At most one
  /// exists per copy at any instant.
  pub fn is_active(&self) -> bool { self.returned_at.is_none() }
}
