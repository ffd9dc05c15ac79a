//! Title records — the immutable identity of a lendable work.
//!
//! A title owns a pool of physical copies; the pool is mutable, the
//! identity fields are not. Everything the old decorator layer expressed
//! at runtime is a fixed set of optional attributes here.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Optional feature attributes of a title. The set is closed; the engine
/// never augments titles dynamically.
#[derive(
  Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize,
)]
pub struct TitleFlags {
  pub digital:      bool,
  pub audio:        bool,
  pub award_winner: bool,
  /// Recommended minimum reader age, if the title carries one.
  pub min_age:      Option<u8>,
}

/// Input to catalog insertion.
#[derive(Debug, Clone)]
pub struct NewTitle {
  pub title:  String,
  pub author: String,
  pub genre:  String,
  pub year:   i32,
  pub flags:  TitleFlags,
}

impl NewTitle {
  /// Convenience constructor with no feature flags set.
  pub fn new(
    title: impl Into<String>,
    author: impl Into<String>,
    genre: impl Into<String>,
    year: i32,
  ) -> Self {
    Self {
      title: title.into(),
      author: author.into(),
      genre: genre.into(),
      year,
      flags: TitleFlags::default(),
    }
  }
}

/// A catalogued work. Identity fields never change after insertion;
/// removing the last copy does not delete the record (loan history must
/// stay queryable).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TitleRecord {
  pub title_id: Uuid,
  pub title:    String,
  pub author:   String,
  pub genre:    String,
  pub year:     i32,
  pub flags:    TitleFlags,
  /// Server-assigned timestamp; insertion order is the search tie-break.
  pub added_at: DateTime<Utc>,
}

impl TitleRecord {
  /// Identity comparison used to merge a re-inserted title into the
  /// existing record instead of duplicating it. Text fields compare
  /// case-insensitively, the year exactly.
  pub fn same_identity(&self, other: &NewTitle) -> bool {
    self.title.eq_ignore_ascii_case(&other.title)
      && self.author.eq_ignore_ascii_case(&other.author)
      && self.genre.eq_ignore_ascii_case(&other.genre)
      && self.year == other.year
  }
}
