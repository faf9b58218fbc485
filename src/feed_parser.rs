//! Call log feed parsing.
//!
//! The feed is CSV with a header row followed by
//! `timestamp, direction, to_number, from_number, transcript, summary`.
//! Quoted fields may contain commas, escaped quotes and newlines.

use csv::{ReaderBuilder, StringRecord, Trim};
use std::fmt;

/// Minimum digits a caller number must have to be worth a lead.
pub const MIN_PHONE_DIGITS: usize = 10;

/// One accepted call row. `from_number` is already digits-only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallRow {
    /// 1-based line in the feed where the record starts.
    pub line: u64,
    pub timestamp: String,
    pub direction: String,
    pub to_number: String,
    pub from_number: String,
    pub transcript: String,
    pub summary: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    /// Caller number missing or shorter than [`MIN_PHONE_DIGITS`] digits.
    InvalidPhone(String),
    /// The tokenizer could not read the record.
    Malformed(String),
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::InvalidPhone(raw) if raw.is_empty() => f.write_str("missing phone"),
            RejectReason::InvalidPhone(raw) => write!(f, "invalid phone '{}'", raw),
            RejectReason::Malformed(msg) => write!(f, "malformed record: {}", msg),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedRow {
    pub line: u64,
    pub reason: RejectReason,
}

/// Result of parsing a whole feed at once.
#[derive(Debug, Clone, Default)]
pub struct ParsedFeed {
    pub rows: Vec<CallRow>,
    pub rejected: Vec<RejectedRow>,
}

/// Strip everything but ASCII digits.
pub fn normalize_phone(raw: &str) -> String {
    raw.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// Lazily walk the feed, yielding accepted rows and rejections in input order.
///
/// Calling it again on the same text starts over from the first record.
pub fn records(text: &str) -> impl Iterator<Item = Result<CallRow, RejectedRow>> + '_ {
    ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(Trim::All)
        .from_reader(text.as_bytes())
        .into_records()
        .map(|result| match result {
            Ok(record) => to_row(&record),
            Err(e) => Err(RejectedRow {
                line: e.position().map(|p| p.line()).unwrap_or(0),
                reason: RejectReason::Malformed(e.to_string()),
            }),
        })
}

/// Parse the full feed. Never fails; bad records end up in `rejected`.
pub fn parse_feed(text: &str) -> ParsedFeed {
    let mut parsed = ParsedFeed::default();

    for item in records(text) {
        match item {
            Ok(row) => parsed.rows.push(row),
            Err(rejected) => {
                tracing::debug!("Skipping feed line {}: {}", rejected.line, rejected.reason);
                parsed.rejected.push(rejected);
            }
        }
    }

    parsed
}

fn to_row(record: &StringRecord) -> Result<CallRow, RejectedRow> {
    let line = record.position().map(|p| p.line()).unwrap_or(0);
    let field = |idx: usize| record.get(idx).unwrap_or("").to_string();

    let raw_phone = field(3);
    let phone = normalize_phone(&raw_phone);
    if phone.len() < MIN_PHONE_DIGITS {
        return Err(RejectedRow {
            line,
            reason: RejectReason::InvalidPhone(raw_phone),
        });
    }

    Ok(CallRow {
        line,
        timestamp: field(0),
        direction: field(1),
        to_number: field(2),
        from_number: phone,
        transcript: field(4),
        summary: field(5),
    })
}
