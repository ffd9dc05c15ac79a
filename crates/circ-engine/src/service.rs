//! The loan service — orchestrator over per-title critical sections.
//!
//! Every mutation of a title's copy pool, ledger rows, and waiting list
//! goes through that title's mutex, so concurrent callers racing on one
//! title serialize while other titles proceed independently. Deltas and
//! notifications are emitted only after the section has released; by
//! then the transition is committed and fan-out is best-effort.

use std::{
  collections::{HashMap, HashSet},
  sync::Arc,
};

use chrono::{DateTime, Duration, Utc};
use circ_core::{
  Error, Result,
  loan::{CopyId, CopyStatus, Loan},
  store::{CopyRow, Delta, Snapshot},
  title::{NewTitle, TitleRecord},
};
use parking_lot::{Mutex, RwLock};
use uuid::Uuid;

use crate::{
  catalog::{CopyPool, CopySlot},
  config::EngineConfig,
  ledger::LoanLedger,
  notify::{Event, NotificationCenter},
  persist::DeltaSink,
  search::Matcher,
  waitlist::WaitingList,
};

// ─── Per-title state ─────────────────────────────────────────────────────────

/// Everything serialized by one title's critical section.
struct TitleSection {
  pool:     CopyPool,
  ledger:   LoanLedger,
  waitlist: WaitingList,
  /// Loan ids a return reminder has already been published for.
  reminded: HashSet<Uuid>,
}

impl TitleSection {
  fn new(title_id: Uuid) -> Self {
    Self {
      pool:     CopyPool::new(title_id),
      ledger:   LoanLedger::new(title_id),
      waitlist: WaitingList::new(title_id),
      reminded: HashSet::new(),
    }
  }
}

struct TitleEntry {
  record:  TitleRecord,
  section: Arc<Mutex<TitleSection>>,
}

#[derive(Default)]
struct TitleRegistry {
  /// Insertion order — the search tie-break.
  order:  Vec<Uuid>,
  titles: HashMap<Uuid, TitleEntry>,
}

// ─── Engine ──────────────────────────────────────────────────────────────────

/// The circulation engine. Construct once and share via [`Arc`]; all
/// operations take `&self`.
pub struct Engine {
  config:        EngineConfig,
  registry:      RwLock<TitleRegistry>,
  notifications: Arc<NotificationCenter>,
  deltas:        DeltaSink,
}

impl Engine {
  pub fn new(
    config: EngineConfig,
    notifications: Arc<NotificationCenter>,
    deltas: DeltaSink,
  ) -> Self {
    Self {
      config,
      registry: RwLock::new(TitleRegistry::default()),
      notifications,
      deltas,
    }
  }

  /// Rebuild an engine from a persisted snapshot, validating the
  /// lifecycle invariants. A snapshot that breaks them is rejected with
  /// [`Error::InvalidSnapshot`].
  pub fn from_snapshot(
    config: EngineConfig,
    snapshot: Snapshot,
    notifications: Arc<NotificationCenter>,
    deltas: DeltaSink,
  ) -> Result<Self> {
    let engine = Self::new(config, notifications, deltas);
    {
      let mut registry = engine.registry.write();

      let mut copies: HashMap<Uuid, Vec<CopySlot>> = HashMap::new();
      for row in snapshot.copies {
        copies
          .entry(row.copy.title_id)
          .or_default()
          .push(CopySlot { copy_no: row.copy.copy_no, status: row.status });
      }
      let mut loans: HashMap<Uuid, Vec<Loan>> = HashMap::new();
      for loan in snapshot.loans {
        loans.entry(loan.copy.title_id).or_default().push(loan);
      }
      let mut waiting: HashMap<Uuid, Vec<_>> = HashMap::new();
      for entry in snapshot.waiting {
        waiting.entry(entry.title_id).or_default().push(entry);
      }

      for record in snapshot.titles {
        let title_id = record.title_id;
        let slots = copies.remove(&title_id).unwrap_or_default();
        let mut seen = HashSet::new();
        for slot in &slots {
          if !seen.insert(slot.copy_no) {
            return Err(Error::InvalidSnapshot(format!(
              "duplicate copy number {} for title {title_id}",
              slot.copy_no
            )));
          }
        }

        let pool = CopyPool::from_slots(title_id, slots);
        let ledger = LoanLedger::from_history(
          title_id,
          loans.remove(&title_id).unwrap_or_default(),
        )?;
        let waitlist = WaitingList::from_entries(
          title_id,
          waiting.remove(&title_id).unwrap_or_default(),
        )?;

        // A copy marked on loan must have exactly one active loan, and
        // every active loan must point at a copy marked on loan.
        for slot in pool.slots() {
          let has_loan = ledger.active_loan(slot.copy_no).is_some();
          let on_loan = matches!(slot.status, CopyStatus::OnLoan);
          if on_loan != has_loan {
            return Err(Error::InvalidSnapshot(format!(
              "copy {} status drifted from its ledger row",
              pool.copy_id(slot.copy_no)
            )));
          }
        }
        for loan in ledger.active_loans() {
          if !pool.slots().iter().any(|s| s.copy_no == loan.copy.copy_no) {
            return Err(Error::InvalidSnapshot(format!(
              "active loan references removed copy {}",
              loan.copy
            )));
          }
        }

        registry.order.push(title_id);
        registry.titles.insert(title_id, TitleEntry {
          record,
          section: Arc::new(Mutex::new(TitleSection {
            pool,
            ledger,
            waitlist,
            reminded: HashSet::new(),
          })),
        });
      }

      if let Some(title_id) = copies.keys().next() {
        return Err(Error::InvalidSnapshot(format!(
          "copies reference unknown title {title_id}"
        )));
      }
      if let Some(title_id) = loans.keys().next() {
        return Err(Error::InvalidSnapshot(format!(
          "loans reference unknown title {title_id}"
        )));
      }
      if let Some(title_id) = waiting.keys().next() {
        return Err(Error::InvalidSnapshot(format!(
          "waiting entries reference unknown title {title_id}"
        )));
      }
    }
    Ok(engine)
  }

  pub fn config(&self) -> &EngineConfig { &self.config }

  fn section(&self, title_id: Uuid) -> Result<Arc<Mutex<TitleSection>>> {
    let registry = self.registry.read();
    registry
      .titles
      .get(&title_id)
      .map(|entry| Arc::clone(&entry.section))
      .ok_or(Error::UnknownTitle(title_id))
  }

  fn commit(&self, deltas: Vec<Delta>, events: Vec<Event>) {
    for delta in deltas {
      self.deltas.send(delta);
    }
    for event in &events {
      self.notifications.publish(event);
    }
  }

  // ── Catalog ───────────────────────────────────────────────────────────────

  /// Add a title with `copies` initial copies. Re-inserting an identical
  /// identity tuple grows the existing pool instead of duplicating the
  /// record.
  pub fn add_title(&self, input: NewTitle, copies: u32) -> Uuid {
    // Identity check and insert stay under one write guard so two racing
    // inserts of the same tuple cannot both create a record.
    let mut registry = self.registry.write();

    let existing = registry
      .order
      .iter()
      .filter_map(|id| registry.titles.get(id))
      .find(|entry| entry.record.same_identity(&input))
      .map(|entry| (entry.record.title_id, Arc::clone(&entry.section)));

    if let Some((title_id, section)) = existing {
      let copy_nos = section.lock().pool.add_copies(copies);
      drop(registry);
      if !copy_nos.is_empty() {
        self.deltas.send(Delta::CopiesAdded { title_id, copy_nos });
      }
      return title_id;
    }

    let record = TitleRecord {
      title_id: Uuid::new_v4(),
      title: input.title,
      author: input.author,
      genre: input.genre,
      year: input.year,
      flags: input.flags,
      added_at: Utc::now(),
    };
    let title_id = record.title_id;

    let mut section = TitleSection::new(title_id);
    let copy_nos = section.pool.add_copies(copies);

    registry.order.push(title_id);
    registry.titles.insert(title_id, TitleEntry {
      record: record.clone(),
      section: Arc::new(Mutex::new(section)),
    });
    drop(registry);

    tracing::info!(%title_id, title = %record.title, "title added");
    self.deltas.send(Delta::TitleAdded(record));
    if !copy_nos.is_empty() {
      self.deltas.send(Delta::CopiesAdded { title_id, copy_nos });
    }
    title_id
  }

  /// Grow a title's pool; returns the assigned copy numbers.
  pub fn add_copies(&self, title_id: Uuid, n: u32) -> Result<Vec<u32>> {
    let section = self.section(title_id)?;
    let copy_nos = section.lock().pool.add_copies(n);
    self
      .deltas
      .send(Delta::CopiesAdded { title_id, copy_nos: copy_nos.clone() });
    Ok(copy_nos)
  }

  /// Remove a copy. Fails with [`Error::CopyInUse`] while it is on loan
  /// or held for a waiter. The title record survives the last copy.
  pub fn remove_copy(&self, copy: CopyId) -> Result<()> {
    let section = self.section(copy.title_id)?;
    section.lock().pool.remove_copy(copy.copy_no)?;
    self.deltas.send(Delta::CopyRemoved(copy));
    Ok(())
  }

  pub fn available_count(&self, title_id: Uuid) -> Result<usize> {
    Ok(self.section(title_id)?.lock().pool.available())
  }

  pub fn total_count(&self, title_id: Uuid) -> Result<usize> {
    Ok(self.section(title_id)?.lock().pool.total())
  }

  /// Lifetime borrow count for the title.
  pub fn total_borrows(&self, title_id: Uuid) -> Result<u64> {
    Ok(self.section(title_id)?.lock().ledger.total_borrows())
  }

  pub fn title(&self, title_id: Uuid) -> Result<TitleRecord> {
    let registry = self.registry.read();
    registry
      .titles
      .get(&title_id)
      .map(|entry| entry.record.clone())
      .ok_or(Error::UnknownTitle(title_id))
  }

  /// All titles, in catalog insertion order.
  pub fn titles(&self) -> Vec<TitleRecord> {
    let registry = self.registry.read();
    registry
      .order
      .iter()
      .filter_map(|id| registry.titles.get(id))
      .map(|entry| entry.record.clone())
      .collect()
  }

  // ── Search ────────────────────────────────────────────────────────────────

  /// Match titles against a strategy, lazily, in catalog insertion
  /// order. No side effects.
  pub fn search<M: Matcher>(
    &self,
    matcher: M,
  ) -> impl Iterator<Item = TitleRecord> {
    self.titles().into_iter().filter(move |t| matcher.matches(t))
  }

  // ── Lending ───────────────────────────────────────────────────────────────

  /// Borrow a copy of `title_id` for `user`.
  ///
  /// A user holding a reservation for the title claims the reserved copy
  /// (the confirmation path); otherwise any available copy is selected.
  /// With no copy available the call fails with
  /// [`Error::NoCopyAvailable`] and the caller must explicitly
  /// [`join_waitlist`](Self::join_waitlist).
  pub fn borrow(
    &self,
    title_id: Uuid,
    user: &str,
    duration_days: i64,
  ) -> Result<Loan> {
    let section = self.section(title_id)?;
    let now = Utc::now();
    let due_at = now + Duration::days(duration_days);

    let (loan, deltas) = {
      let mut s = section.lock();

      // A reservation stays claimable by its holder until the sweep
      // lapses it, even slightly past the deadline.
      let (copy_no, claimed) = match s.pool.reservation_for(user) {
        Some(copy_no) => (copy_no, true),
        None => match s.pool.first_available() {
          Some(copy_no) => (copy_no, false),
          None => return Err(Error::NoCopyAvailable(title_id)),
        },
      };

      let loan = s.ledger.record_loan(copy_no, user, now, due_at)?;
      s.pool.set_status(copy_no, CopyStatus::OnLoan)?;

      let mut deltas = Vec::new();
      if claimed {
        deltas.push(Delta::ReservationClosed { copy: loan.copy });
      }
      deltas.push(Delta::LoanRecorded(loan.clone()));
      (loan, deltas)
    };

    tracing::info!(%title_id, user, copy = %loan.copy, "copy borrowed");
    let events = vec![Event::LoanConfirmed { loan: loan.clone() }];
    self.commit(deltas, events);
    Ok(loan)
  }

  /// Return a copy. If anyone is waiting, the freed copy is reserved for
  /// the longest waiter and the offer is published; otherwise it becomes
  /// available again.
  pub fn return_copy(&self, copy: CopyId) -> Result<Loan> {
    let section = self.section(copy.title_id)?;
    let now = Utc::now();

    let mut deltas = Vec::new();
    let mut events = Vec::new();
    let loan = {
      let mut s = section.lock();
      let loan = s.ledger.record_return(copy.copy_no, now)?;
      s.reminded.remove(&loan.loan_id);
      deltas.push(Delta::ReturnRecorded(loan.clone()));
      self.offer_or_release(&mut s, copy.copy_no, now, &mut deltas, &mut events)?;
      loan
    };

    tracing::info!(copy = %copy, user = %loan.borrower, "copy returned");
    self.commit(deltas, events);
    Ok(loan)
  }

  /// Hand a freed copy to the next waiter (opening a reservation and
  /// publishing the offer plus the rank shifts), or mark it available if
  /// nobody waits. Runs inside the title's critical section.
  fn offer_or_release(
    &self,
    s: &mut TitleSection,
    copy_no: u32,
    now: DateTime<Utc>,
    deltas: &mut Vec<Delta>,
    events: &mut Vec<Event>,
  ) -> Result<()> {
    let copy = s.pool.copy_id(copy_no);
    match s.waitlist.dequeue_next() {
      Some(entry) => {
        let expires_at = now + self.config.reservation_timeout();
        s.pool.set_status(copy_no, CopyStatus::Reserved {
          user: entry.user.clone(),
          expires_at,
        })?;
        deltas.push(Delta::WaiterRemoved {
          title_id: entry.title_id,
          user:     entry.user.clone(),
        });
        deltas.push(Delta::ReservationOpened {
          copy,
          user: entry.user.clone(),
          expires_at,
        });
        events.push(Event::CopyAvailable {
          title_id: entry.title_id,
          copy,
          offered: entry.user,
        });
        // Everyone left in the queue moved up one rank.
        for (idx, user) in s.waitlist.users().enumerate() {
          events.push(Event::WaitingPositionChanged {
            title_id:     copy.title_id,
            user:         user.to_owned(),
            new_position: idx + 1,
          });
        }
      }
      None => {
        s.pool.set_status(copy_no, CopyStatus::Available)?;
      }
    }
    Ok(())
  }

  // ── Waiting list ──────────────────────────────────────────────────────────

  /// Join the FIFO waiting list for a title; returns the 1-based
  /// position. Fails with [`Error::AlreadyWaiting`] if the user already
  /// holds a position — or a materialized one, i.e. an open reservation.
  pub fn join_waitlist(&self, title_id: Uuid, user: &str) -> Result<usize> {
    let section = self.section(title_id)?;
    let now = Utc::now();

    let (entry, position) = {
      let mut s = section.lock();
      if s.pool.reservation_for(user).is_some() {
        return Err(Error::AlreadyWaiting {
          title_id,
          user: user.to_owned(),
        });
      }
      let entry = s.waitlist.enqueue(user, now)?;
      (entry, s.waitlist.len())
    };

    self.commit(vec![Delta::WaiterEnqueued(entry)], vec![
      Event::WaitingPositionChanged {
        title_id,
        user: user.to_owned(),
        new_position: position,
      },
    ]);
    Ok(position)
  }

  /// Leave the waiting list. Idempotent — absent entries are a no-op. A
  /// user withdrawing while they hold a reservation releases it, and the
  /// copy is re-offered to the next waiter immediately.
  pub fn leave_waitlist(&self, title_id: Uuid, user: &str) -> Result<()> {
    let section = self.section(title_id)?;
    let now = Utc::now();

    let mut deltas = Vec::new();
    let mut events = Vec::new();
    {
      let mut s = section.lock();
      if let Some(removed_idx) = s.waitlist.withdraw(user) {
        deltas.push(Delta::WaiterRemoved {
          title_id,
          user: user.to_owned(),
        });
        let shifted = s.waitlist.users().enumerate().skip(removed_idx);
        for (idx, waiter) in shifted {
          events.push(Event::WaitingPositionChanged {
            title_id,
            user: waiter.to_owned(),
            new_position: idx + 1,
          });
        }
      }
      if let Some(copy_no) = s.pool.reservation_for(user) {
        deltas.push(Delta::ReservationClosed { copy: s.pool.copy_id(copy_no) });
        self.offer_or_release(&mut s, copy_no, now, &mut deltas, &mut events)?;
      }
    }

    self.commit(deltas, events);
    Ok(())
  }

  /// 1-based waiting-list rank, or `None` if the user is not waiting.
  pub fn position(&self, title_id: Uuid, user: &str) -> Result<Option<usize>> {
    Ok(self.section(title_id)?.lock().waitlist.position(user))
  }

  // ── Background maintenance ────────────────────────────────────────────────

  /// Lapse every reservation whose deadline has passed and re-offer each
  /// affected copy to the next waiter. Returns the lapsed copies. Driven
  /// by the sweep; callable directly with a pinned `now` in tests.
  pub fn expire_reservations(&self, now: DateTime<Utc>) -> Vec<CopyId> {
    let sections: Vec<_> = {
      let registry = self.registry.read();
      registry
        .order
        .iter()
        .filter_map(|id| registry.titles.get(id))
        .map(|entry| Arc::clone(&entry.section))
        .collect()
    };

    let mut lapsed = Vec::new();
    for section in sections {
      let mut deltas = Vec::new();
      let mut events = Vec::new();
      {
        let mut s = section.lock();
        for copy_no in s.pool.expired_reservations(now) {
          let copy = s.pool.copy_id(copy_no);
          deltas.push(Delta::ReservationClosed { copy });
          // The lapsing holder is gone; the next waiter (if any) gets a
          // fresh hold with a fresh deadline.
          if let Err(error) =
            self.offer_or_release(&mut s, copy_no, now, &mut deltas, &mut events)
          {
            tracing::warn!(copy = %copy, %error, "re-offer after lapse failed");
            continue;
          }
          tracing::info!(copy = %copy, "reservation lapsed");
          lapsed.push(copy);
        }
      }
      self.commit(deltas, events);
    }
    lapsed
  }

  /// Publish a [`Event::ReturnReminder`] once per active loan entering
  /// the configured lead window before its due time. Returns the number
  /// published.
  pub fn publish_due_reminders(&self, now: DateTime<Utc>) -> usize {
    let sections: Vec<_> = {
      let registry = self.registry.read();
      registry
        .order
        .iter()
        .filter_map(|id| registry.titles.get(id))
        .map(|entry| Arc::clone(&entry.section))
        .collect()
    };

    let lead = self.config.reminder_lead();
    let mut published = 0;
    for section in sections {
      let due_soon: Vec<Loan> = {
        let mut s = section.lock();
        let loans: Vec<Loan> = s
          .ledger
          .active_loans()
          .filter(|l| l.due_at <= now + lead)
          .filter(|l| !s.reminded.contains(&l.loan_id))
          .cloned()
          .collect();
        for loan in &loans {
          s.reminded.insert(loan.loan_id);
        }
        loans
      };
      for loan in due_soon {
        self.notifications.publish(&Event::ReturnReminder { loan });
        published += 1;
      }
    }
    published
  }

  // ── Ledger reads ──────────────────────────────────────────────────────────

  /// The unreturned loan for a copy, if any.
  pub fn active_loan(&self, copy: CopyId) -> Result<Option<Loan>> {
    let section = self.section(copy.title_id)?;
    let s = section.lock();
    Ok(s.ledger.active_loan(copy.copy_no).cloned())
  }

  /// Currently borrowed copies across all titles for one user.
  pub fn loans_for_user(&self, user: &str) -> Vec<Loan> {
    self.collect_loans(|loan| loan.is_active() && loan.borrower == user)
  }

  /// Full lending history for one user, across titles.
  pub fn history_for_user(&self, user: &str) -> Vec<Loan> {
    self.collect_loans(|loan| loan.borrower == user)
  }

  /// Full lending history of a title, oldest first.
  pub fn history_for_title(&self, title_id: Uuid) -> Result<Vec<Loan>> {
    let section = self.section(title_id)?;
    let s = section.lock();
    Ok(s.ledger.history().to_vec())
  }

  fn collect_loans(&self, keep: impl Fn(&Loan) -> bool) -> Vec<Loan> {
    let sections: Vec<_> = {
      let registry = self.registry.read();
      registry
        .order
        .iter()
        .filter_map(|id| registry.titles.get(id))
        .map(|entry| Arc::clone(&entry.section))
        .collect()
    };

    let mut loans = Vec::new();
    for section in sections {
      let s = section.lock();
      loans.extend(s.ledger.history().iter().filter(|l| keep(l)).cloned());
    }
    loans
  }

  // ── Snapshot ──────────────────────────────────────────────────────────────

  /// A consistent point-in-time copy of the full engine state, suitable
  /// for seeding a fresh record store.
  pub fn snapshot(&self) -> Snapshot {
    let registry = self.registry.read();
    let mut snapshot = Snapshot::default();
    for id in &registry.order {
      let Some(entry) = registry.titles.get(id) else { continue };
      snapshot.titles.push(entry.record.clone());
      let s = entry.section.lock();
      for slot in s.pool.slots() {
        snapshot.copies.push(CopyRow {
          copy:   s.pool.copy_id(slot.copy_no),
          status: slot.status.clone(),
        });
      }
      snapshot.loans.extend(s.ledger.history().iter().cloned());
      snapshot.waiting.extend(s.waitlist.entries().cloned());
    }
    snapshot
  }
}
