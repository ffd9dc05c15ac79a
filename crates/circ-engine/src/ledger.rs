//! Per-title loan ledger — active loans and append-only history.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use circ_core::{
  Error, Result,
  loan::{CopyId, Loan},
};
use uuid::Uuid;

/// Loan bookkeeping for a single title. History is append-only; the only
/// mutation ever applied to a row is setting its return time.
#[derive(Debug)]
pub struct LoanLedger {
  title_id: Uuid,
  /// copy_no → index into `history` of the unreturned loan.
  active:   HashMap<u32, usize>,
  history:  Vec<Loan>,
  /// Lifetime borrow count for the title, survives copy removal.
  total_borrows: u64,
}

impl LoanLedger {
  pub fn new(title_id: Uuid) -> Self {
    Self {
      title_id,
      active: HashMap::new(),
      history: Vec::new(),
      total_borrows: 0,
    }
  }

  /// Rebuild a ledger from persisted history. Rejects a history carrying
  /// two active loans for the same copy.
  pub fn from_history(title_id: Uuid, history: Vec<Loan>) -> Result<Self> {
    let mut active = HashMap::new();
    for (idx, loan) in history.iter().enumerate() {
      if loan.is_active()
        && active.insert(loan.copy.copy_no, idx).is_some()
      {
        return Err(Error::InvalidSnapshot(format!(
          "copy {} has more than one active loan",
          loan.copy
        )));
      }
    }
    let total_borrows = history.len() as u64;
    Ok(Self { title_id, active, history, total_borrows })
  }

  fn copy_id(&self, copy_no: u32) -> CopyId {
    CopyId { title_id: self.title_id, copy_no }
  }

  /// Record a new loan. Fails with [`Error::CopyNotAvailable`] if an
  /// unreturned loan already exists for the copy.
  pub fn record_loan(
    &mut self,
    copy_no: u32,
    borrower: &str,
    now: DateTime<Utc>,
    due_at: DateTime<Utc>,
  ) -> Result<Loan> {
    if self.active.contains_key(&copy_no) {
      return Err(Error::CopyNotAvailable(self.copy_id(copy_no)));
    }
    let loan = Loan {
      loan_id: Uuid::new_v4(),
      copy: self.copy_id(copy_no),
      borrower: borrower.to_owned(),
      borrowed_at: now,
      due_at,
      returned_at: None,
    };
    self.active.insert(copy_no, self.history.len());
    self.history.push(loan.clone());
    self.total_borrows += 1;
    Ok(loan)
  }

  /// Record a return. Fails with [`Error::NoActiveLoan`] if the copy has
  /// no unreturned loan.
  pub fn record_return(
    &mut self,
    copy_no: u32,
    now: DateTime<Utc>,
  ) -> Result<Loan> {
    let idx = self
      .active
      .remove(&copy_no)
      .ok_or(Error::NoActiveLoan(self.copy_id(copy_no)))?;
    self.history[idx].returned_at = Some(now);
    Ok(self.history[idx].clone())
  }

  pub fn active_loan(&self, copy_no: u32) -> Option<&Loan> {
    self.active.get(&copy_no).map(|&idx| &self.history[idx])
  }

  pub fn active_loans(&self) -> impl Iterator<Item = &Loan> {
    self.active.values().map(|&idx| &self.history[idx])
  }

  pub fn history(&self) -> &[Loan] { &self.history }

  pub fn total_borrows(&self) -> u64 { self.total_borrows }
}
