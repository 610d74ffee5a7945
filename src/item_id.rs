//! Item identifier allocation and parsing.
//!
//! Identifiers look like `AG-26-000123`: prefix, two-digit year of
//! allocation, six-digit sequence unique within that year. The same text is
//! printed on tags, encoded as the bare QR payload and used as the remote
//! primary key.

use chrono::{Datelike, Local, NaiveDate};
use std::fmt;
use thiserror::Error;

/// Default identifier prefix.
pub const DEFAULT_PREFIX: &str = "AG";

const SEQ_WIDTH: usize = 6;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ItemIdError {
    #[error("Item ID is empty")]
    Empty,
    #[error("Item ID must look like PREFIX-YY-NNNNNN, got {0:?}")]
    Malformed(String),
}

/// A parsed `PREFIX-YY-NNNNNN` identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemId {
    pub prefix: String,
    pub year2: String,
    pub seq: u64,
}

impl ItemId {
    pub fn parse(raw: &str) -> Result<ItemId, ItemIdError> {
        let text = raw.trim();
        if text.is_empty() {
            return Err(ItemIdError::Empty);
        }
        let malformed = || ItemIdError::Malformed(text.to_string());

        let mut parts = text.rsplitn(3, '-');
        let seq_text = parts.next().ok_or_else(malformed)?;
        let year2 = parts.next().ok_or_else(malformed)?;
        let prefix = parts.next().ok_or_else(malformed)?;

        if prefix.is_empty() || !prefix.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(malformed());
        }
        if year2.len() != 2 || !year2.chars().all(|c| c.is_ascii_digit()) {
            return Err(malformed());
        }
        if seq_text.len() < SEQ_WIDTH || !seq_text.chars().all(|c| c.is_ascii_digit()) {
            return Err(malformed());
        }
        let seq = seq_text.parse::<u64>().map_err(|_| malformed())?;

        Ok(ItemId {
            prefix: prefix.to_ascii_uppercase(),
            year2: year2.to_string(),
            seq,
        })
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{}-{:0width$}",
            self.prefix,
            self.year2,
            self.seq,
            width = SEQ_WIDTH
        )
    }
}

/// Two-digit year for a date.
pub fn year2_of(date: NaiveDate) -> String {
    format!("{:02}", date.year().rem_euclid(100))
}

/// Two-digit year from the local clock.
pub fn current_year2() -> String {
    year2_of(Local::now().date_naive())
}

/// Next identifier for `year2`, given every currently known id.
///
/// Takes the highest sequence among ids starting with `PREFIX-YY-` and adds
/// one, so deleting items never causes an id to be issued twice. Ids whose
/// trailing part is not an integer are skipped.
pub fn next_item_id<'a, I>(prefix: &str, year2: &str, known_ids: I) -> String
where
    I: IntoIterator<Item = &'a str>,
{
    let scope = format!("{prefix}-{year2}-");
    let max_seq = known_ids
        .into_iter()
        .filter_map(|id| id.strip_prefix(scope.as_str()))
        .filter_map(|tail| tail.trim().parse::<u64>().ok())
        .max()
        .unwrap_or(0);

    ItemId {
        prefix: prefix.to_string(),
        year2: year2.to_string(),
        seq: max_seq + 1,
    }
    .to_string()
}

/// Extract an item id from scanned QR text.
///
/// The payload is normally the bare id. Labels printed by other tools may
/// wrap it in a URL, either as the last path segment or an `itemId` query
/// parameter.
pub fn scanned_item_id(decoded: &str) -> Result<String, ItemIdError> {
    let text = decoded.trim();
    if text.is_empty() {
        return Err(ItemIdError::Empty);
    }
    if let Ok(id) = ItemId::parse(text) {
        return Ok(id.to_string());
    }

    if let Ok(url) = reqwest::Url::parse(text) {
        let from_query = url
            .query_pairs()
            .find(|(k, _)| k == "itemId" || k == "item_id" || k == "id")
            .map(|(_, v)| v.into_owned());
        let from_path = url
            .path_segments()
            .and_then(|mut segs| segs.rfind(|s| !s.is_empty()).map(str::to_string));
        for candidate in from_query.into_iter().chain(from_path) {
            if let Ok(id) = ItemId::parse(&candidate) {
                return Ok(id.to_string());
            }
        }
    }

    Err(ItemIdError::Malformed(text.to_string()))
}
