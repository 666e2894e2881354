//! Flashcard rows produced by the CSV reader and the header spellings they
//! are resolved from.

use std::collections::HashMap;

use csv::StringRecord;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Accepted "front" header spellings, highest priority first.
pub const FRONT_HEADERS: &[&str] = &["Przód", "Przod", "front", "Front"];

/// Accepted "back" header spellings, highest priority first.
pub const BACK_HEADERS: &[&str] = &["Tył", "Tyl", "back", "Back"];

/// Header of the optional "known" column.
pub const KNOWN_HEADER: &str = "known";

/// A flashcard parsed from the file and waiting to be persisted.
///
/// Field names match the backend's `flashcards` table columns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportRow {
    /// Assigned at parse time, before any network call.
    pub id: Uuid,
    /// Account the card belongs to.
    pub user_id: String,
    pub front: String,
    pub back: String,
    pub known: bool,
    /// Destination folder.
    pub folder_id: String,
}

/// Values fixed for every row of one import.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowTemplate {
    pub user_id: String,
    pub folder_id: String,
}

impl RowTemplate {
    pub fn new(user_id: impl Into<String>, folder_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            folder_id: folder_id.into(),
        }
    }

    /// Stamps a fresh id and the import-wide fields onto a card.
    pub fn build(&self, front: String, back: String, known: bool) -> ImportRow {
        ImportRow {
            id: Uuid::new_v4(),
            user_id: self.user_id.clone(),
            front,
            back,
            known,
            folder_id: self.folder_id.clone(),
        }
    }
}

/// Outcome of resolving one data record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowOutcome {
    /// Both faces are present.
    Card {
        front: String,
        back: String,
        known: bool,
    },
    /// Front or back missing or blank.
    Skipped,
    /// Every field blank; treated as an empty line.
    Blank,
}

/// Column lookup built once from the header row of a parse attempt.
#[derive(Debug, Clone)]
pub struct ColumnMap {
    /// Normalized header name to column index. Later duplicates win.
    index: HashMap<String, usize>,
}

impl ColumnMap {
    pub fn from_headers(headers: &StringRecord) -> Self {
        let mut index = HashMap::with_capacity(headers.len());
        for (i, name) in headers.iter().enumerate() {
            index.insert(normalize_header(name).to_string(), i);
        }
        Self { index }
    }

    /// True if the headers contain any accepted front and back spelling.
    pub fn has_card_columns(&self) -> bool {
        let present = |names: &[&str]| names.iter().any(|n| self.index.contains_key(*n));
        present(FRONT_HEADERS) && present(BACK_HEADERS)
    }

    /// Resolves the front, back and known values of a data record.
    pub fn resolve(&self, record: &StringRecord) -> RowOutcome {
        if record.iter().all(|field| field.trim().is_empty()) {
            return RowOutcome::Blank;
        }

        let front = self.first_present(record, FRONT_HEADERS).unwrap_or("").trim();
        let back = self.first_present(record, BACK_HEADERS).unwrap_or("").trim();

        if front.is_empty() || back.is_empty() {
            return RowOutcome::Skipped;
        }

        let known = self
            .value(record, KNOWN_HEADER)
            .is_some_and(|v| v.eq_ignore_ascii_case("true"));

        RowOutcome::Card {
            front: front.to_string(),
            back: back.to_string(),
            known,
        }
    }

    /// Value of the first spelling whose column exists in this record,
    /// even if that value is empty.
    fn first_present<'r>(&self, record: &'r StringRecord, names: &[&str]) -> Option<&'r str> {
        names.iter().find_map(|name| self.value(record, name))
    }

    fn value<'r>(&self, record: &'r StringRecord, name: &str) -> Option<&'r str> {
        self.index.get(name).and_then(|&i| record.get(i))
    }
}

/// Trims surrounding whitespace and a leading byte-order mark.
fn normalize_header(name: &str) -> &str {
    name.trim_matches(|c: char| c.is_whitespace() || c == '\u{feff}')
}
