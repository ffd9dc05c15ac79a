//! Error types for `circ-core`.
//!
//! Every failure the engine reports to a caller is a variant here. All of
//! them are recoverable; none aborts the process or rolls back more state
//! than the operation that raised it.

use thiserror::Error;
use uuid::Uuid;

use crate::loan::CopyId;

#[derive(Debug, Error)]
pub enum Error {
  #[error("title not found: {0}")]
  UnknownTitle(Uuid),

  #[error("copy not found: {0}")]
  UnknownCopy(CopyId),

  #[error("copy {0} already has an active loan")]
  CopyNotAvailable(CopyId),

  #[error("no active loan for copy {0}")]
  NoActiveLoan(CopyId),

  #[error("no copy of title {0} is available")]
  NoCopyAvailable(Uuid),

  #[error("user {user} is already waiting for title {title_id}")]
  AlreadyWaiting { title_id: Uuid, user: String },

  #[error("copy {0} is on loan or held for a waiter")]
  CopyInUse(CopyId),

  #[error("snapshot violates engine invariants: {0}")]
  InvalidSnapshot(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
