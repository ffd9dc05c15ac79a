//! Per-title copy pool — the mutable half of the catalog.
//!
//! A pool lives inside its title's critical section and is never locked
//! on its own; the service mutates it and the ledger in the same step.

use chrono::{DateTime, Utc};
use circ_core::{
  Error, Result,
  loan::{CopyId, CopyStatus},
};
use uuid::Uuid;

/// One physical copy and its lending status.
#[derive(Debug, Clone)]
pub struct CopySlot {
  pub copy_no: u32,
  pub status:  CopyStatus,
}

/// The copy pool of a single title.
#[derive(Debug)]
pub struct CopyPool {
  title_id:     Uuid,
  /// Copy numbers are assigned sequentially and never reused, so a
  /// removed copy's identity stays unambiguous in the loan history.
  next_copy_no: u32,
  slots:        Vec<CopySlot>,
}

impl CopyPool {
  pub fn new(title_id: Uuid) -> Self {
    Self { title_id, next_copy_no: 1, slots: Vec::new() }
  }

  /// Rebuild a pool from persisted copy rows.
  pub fn from_slots(title_id: Uuid, slots: Vec<CopySlot>) -> Self {
    let next_copy_no =
      slots.iter().map(|s| s.copy_no + 1).max().unwrap_or(1);
    Self { title_id, next_copy_no, slots }
  }

  pub fn copy_id(&self, copy_no: u32) -> CopyId {
    CopyId { title_id: self.title_id, copy_no }
  }

  /// Grow the pool by `n` copies; returns the assigned copy numbers.
  pub fn add_copies(&mut self, n: u32) -> Vec<u32> {
    let mut assigned = Vec::with_capacity(n as usize);
    for _ in 0..n {
      let copy_no = self.next_copy_no;
      self.next_copy_no += 1;
      self.slots.push(CopySlot { copy_no, status: CopyStatus::Available });
      assigned.push(copy_no);
    }
    assigned
  }

  /// Remove a copy from the pool. Fails with [`Error::CopyInUse`] while
  /// the copy is on loan or held for a waiter.
  pub fn remove_copy(&mut self, copy_no: u32) -> Result<()> {
    let idx = self
      .slots
      .iter()
      .position(|s| s.copy_no == copy_no)
      .ok_or(Error::UnknownCopy(self.copy_id(copy_no)))?;
    if !self.slots[idx].status.is_available() {
      return Err(Error::CopyInUse(self.copy_id(copy_no)));
    }
    self.slots.remove(idx);
    Ok(())
  }

  pub fn total(&self) -> usize { self.slots.len() }

  pub fn available(&self) -> usize {
    self.slots.iter().filter(|s| s.status.is_available()).count()
  }

  pub fn slots(&self) -> &[CopySlot] { &self.slots }

  pub fn set_status(&mut self, copy_no: u32, status: CopyStatus) -> Result<()> {
    let slot = self
      .slots
      .iter_mut()
      .find(|s| s.copy_no == copy_no)
      .ok_or(Error::UnknownCopy(CopyId { title_id: self.title_id, copy_no }))?;
    slot.status = status;
    Ok(())
  }

  /// Any available copy; selection order does not affect correctness.
  pub fn first_available(&self) -> Option<u32> {
    self
      .slots
      .iter()
      .find(|s| s.status.is_available())
      .map(|s| s.copy_no)
  }

  /// The copy currently held for `user`, if any.
  pub fn reservation_for(&self, user: &str) -> Option<u32> {
    self.slots.iter().find_map(|s| match &s.status {
      CopyStatus::Reserved { user: holder, .. } if holder == user => {
        Some(s.copy_no)
      }
      _ => None,
    })
  }

  /// Copies whose hold has expired as of `now`.
  pub fn expired_reservations(&self, now: DateTime<Utc>) -> Vec<u32> {
    self
      .slots
      .iter()
      .filter_map(|s| match &s.status {
        CopyStatus::Reserved { expires_at, .. } if *expires_at <= now => {
          Some(s.copy_no)
        }
        _ => None,
      })
      .collect()
  }
}
