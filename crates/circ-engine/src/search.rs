//! Pluggable matching strategies over the catalog.
//!
//! Each strategy is a value implementing [`Matcher`]; new strategies
//! plug in without touching existing ones. Matching has no side effects,
//! and [`crate::service::Engine::search`] yields results lazily in
//! catalog insertion order.

use circ_core::title::TitleRecord;

/// The matching capability a search strategy provides.
pub trait Matcher {
  fn matches(&self, title: &TitleRecord) -> bool;
}

fn contains_ignore_case(haystack: &str, needle: &str) -> bool {
  haystack.to_lowercase().contains(&needle.to_lowercase())
}

/// Case-insensitive substring match on the title string.
pub struct TitleContains(pub String);

impl Matcher for TitleContains {
  fn matches(&self, title: &TitleRecord) -> bool {
    contains_ignore_case(&title.title, &self.0)
  }
}

/// Case-insensitive substring match on the author.
pub struct AuthorContains(pub String);

impl Matcher for AuthorContains {
  fn matches(&self, title: &TitleRecord) -> bool {
    contains_ignore_case(&title.author, &self.0)
  }
}

/// Exact genre match, ignoring case.
pub struct GenreIs(pub String);

impl Matcher for GenreIs {
  fn matches(&self, title: &TitleRecord) -> bool {
    title.genre.eq_ignore_ascii_case(&self.0)
  }
}

/// Exact publication-year match.
pub struct YearIs(pub i32);

impl Matcher for YearIs {
  fn matches(&self, title: &TitleRecord) -> bool { title.year == self.0 }
}

/// Inclusive publication-year range.
pub struct YearBetween(pub i32, pub i32);

impl Matcher for YearBetween {
  fn matches(&self, title: &TitleRecord) -> bool {
    (self.0..=self.1).contains(&title.year)
  }
}

#[cfg(test)]
mod tests {
  use chrono::Utc;
  use circ_core::title::{NewTitle, TitleFlags};
  use uuid::Uuid;

  use super::*;

  fn record(title: &str, author: &str, genre: &str, year: i32) -> TitleRecord {
    let input = NewTitle::new(title, author, genre, year);
    TitleRecord {
      title_id: Uuid::new_v4(),
      title: input.title,
      author: input.author,
      genre: input.genre,
      year: input.year,
      flags: TitleFlags::default(),
      added_at: Utc::now(),
    }
  }

  #[test]
  fn title_match_is_substring_and_case_insensitive() {
    let dune = record("Dune Messiah", "Frank Herbert", "Sci-Fi", 1969);
    assert!(TitleContains("dune".into()).matches(&dune));
    assert!(TitleContains("MESSIAH".into()).matches(&dune));
    assert!(!TitleContains("Foundation".into()).matches(&dune));
  }

  #[test]
  fn author_match_is_substring() {
    let dune = record("Dune", "Frank Herbert", "Sci-Fi", 1965);
    assert!(AuthorContains("herbert".into()).matches(&dune));
    assert!(!AuthorContains("Asimov".into()).matches(&dune));
  }

  #[test]
  fn genre_match_is_exact() {
    let dune = record("Dune", "Frank Herbert", "Sci-Fi", 1965);
    assert!(GenreIs("sci-fi".into()).matches(&dune));
    assert!(!GenreIs("sci".into()).matches(&dune));
  }

  #[test]
  fn year_matchers() {
    let dune = record("Dune", "Frank Herbert", "Sci-Fi", 1965);
    assert!(YearIs(1965).matches(&dune));
    assert!(!YearIs(1966).matches(&dune));
    assert!(YearBetween(1960, 1970).matches(&dune));
    assert!(!YearBetween(1970, 1980).matches(&dune));
  }
}
