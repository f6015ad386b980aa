//! Line format of the pairing store and the in-memory pairing index.
//!
//! A store is a sequence of lines `participant_a,participant_b`. The second
//! field is empty for the single pending slot, which is written without a line
//! terminator so that completing it is a plain append of `participant_b\n`.

use crate::error::{Result, StoreError};
use std::collections::HashMap;

/// Field delimiter of a store line.
pub const DELIMITER: char = ',';

#[derive(Debug, Clone, PartialEq, Eq)]
/// One pairing record. `participant_b` is empty while the slot is pending.
pub struct Record {
    /// Participant that opened the slot.
    pub participant_a: String,
    /// Participant that completed the slot, or empty when pending.
    pub participant_b: String,
}

impl Record {
    /// A pending slot opened by `participant`.
    #[must_use]
    pub fn pending(participant: impl Into<String>) -> Self {
        Self {
            participant_a: participant.into(),
            participant_b: String::new(),
        }
    }

    /// A complete pairing.
    #[must_use]
    pub fn paired(a: impl Into<String>, b: impl Into<String>) -> Self {
        Self {
            participant_a: a.into(),
            participant_b: b.into(),
        }
    }

    /// Whether the slot still awaits a second participant.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.participant_b.is_empty()
    }
}

/// How the raw store content ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Tail {
    /// Empty, or the last line has a terminator of this many bytes.
    Terminated(usize),
    /// The last line is a pending slot without a terminator.
    OpenPending,
}

#[derive(Debug)]
pub(crate) struct ParsedStore {
    pub(crate) records: Vec<Record>,
    pub(crate) tail: Tail,
}

/// Parse the full content of a store file.
///
/// # Errors
/// Returns [`StoreError::Parse`] on the first malformed line.
pub fn parse_records(raw: &str) -> Result<Vec<Record>> {
    parse_store(raw).map(|parsed| parsed.records)
}

pub(crate) fn parse_store(raw: &str) -> Result<ParsedStore> {
    let mut records = Vec::new();
    let mut tail = Tail::Terminated(0);

    for (idx, segment) in raw.split_inclusive('\n').enumerate() {
        let line_no = idx + 1;
        let (line, terminator) = split_terminator(segment);
        let record = parse_line(line, line_no)?;

        if terminator == 0 {
            if !record.is_pending() {
                return Err(StoreError::Parse {
                    line: line_no,
                    reason: "unterminated record (torn write)".to_string(),
                });
            }
            tail = Tail::OpenPending;
        } else {
            tail = Tail::Terminated(terminator);
        }
        records.push(record);
    }

    Ok(ParsedStore { records, tail })
}

fn split_terminator(segment: &str) -> (&str, usize) {
    if let Some(line) = segment.strip_suffix("\r\n") {
        (line, 2)
    } else if let Some(line) = segment.strip_suffix('\n') {
        (line, 1)
    } else {
        (segment, 0)
    }
}

fn parse_line(line: &str, line_no: usize) -> Result<Record> {
    let malformed = |reason: String| StoreError::Parse {
        line: line_no,
        reason,
    };

    if line.is_empty() {
        return Err(malformed("blank line".to_string()));
    }
    let fields = line.split(DELIMITER).count();
    let Some((a, b)) = line.split_once(DELIMITER) else {
        return Err(malformed(format!("expected 2 fields, found {fields}")));
    };
    if fields != 2 {
        return Err(malformed(format!("expected 2 fields, found {fields}")));
    }
    if a.is_empty() {
        return Err(malformed("first field is empty".to_string()));
    }
    Ok(Record::paired(a, b))
}

/// What the index knows about a participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup<'a> {
    /// Paired with this partner.
    Partner(&'a str),
    /// Holds a pending slot.
    Pending,
    /// Not in the store.
    Unknown,
}

/// Bidirectional participant → partner map built from a store snapshot.
#[derive(Debug, Default)]
pub struct PairingIndex {
    partners: HashMap<String, String>,
    pending: Vec<String>,
}

impl PairingIndex {
    /// Build the index, checking that no participant occurs twice and nobody is
    /// paired with themself.
    ///
    /// # Errors
    /// Returns [`StoreError::InvariantViolation`] if the records overlap.
    pub fn build(records: &[Record]) -> Result<Self> {
        let mut index = Self::default();
        for record in records {
            index.claim(&record.participant_a)?;
            if record.is_pending() {
                index.pending.push(record.participant_a.clone());
                continue;
            }
            if record.participant_a == record.participant_b {
                return Err(StoreError::InvariantViolation(format!(
                    "{} is paired with themself",
                    record.participant_a
                )));
            }
            index.claim(&record.participant_b)?;
            index.partners.insert(
                record.participant_a.clone(),
                record.participant_b.clone(),
            );
            index.partners.insert(
                record.participant_b.clone(),
                record.participant_a.clone(),
            );
        }
        Ok(index)
    }

    fn claim(&self, participant: &str) -> Result<()> {
        if self.partners.contains_key(participant) || self.pending.iter().any(|p| p == participant)
        {
            return Err(StoreError::InvariantViolation(format!(
                "{participant} appears in more than one record"
            )));
        }
        Ok(())
    }

    /// Look up a participant.
    #[must_use]
    pub fn lookup(&self, participant: &str) -> Lookup<'_> {
        if let Some(partner) = self.partners.get(participant) {
            Lookup::Partner(partner)
        } else if self.pending.iter().any(|p| p == participant) {
            Lookup::Pending
        } else {
            Lookup::Unknown
        }
    }

    /// Participants currently holding a pending slot, oldest first.
    #[must_use]
    pub fn pending(&self) -> &[String] {
        &self.pending
    }

    /// Number of complete pairs.
    #[must_use]
    pub fn pair_count(&self) -> usize {
        self.partners.len() / 2
    }
}
