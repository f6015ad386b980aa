//! The pairing store file.
//!
//! The file is opened for read and append on every invocation. Reads rewind to
//! the start; writes are either an append at the end or the completion of the
//! trailing pending line. Callers hold a [`LockGuard`] from [`RecordStore::lock`]
//! across every read and write.

use crate::error::{Result, StoreError};
use crate::lock::{self, LockGuard, LockMode};
use crate::record::{self, ParsedStore, Record, Tail, DELIMITER};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// An open handle on the store file.
#[derive(Debug)]
pub struct RecordStore {
    path: PathBuf,
    file: File,
}

impl RecordStore {
    /// Open (creating if missing) the store at `path`.
    ///
    /// # Errors
    /// Returns [`StoreError::Io`] if the file cannot be opened.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)
            .map_err(|e| StoreError::io(format!("open store {}", path.display()), e))?;
        Ok(Self { path, file })
    }

    /// Path of the store file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Block until the advisory lock is held in `mode`.
    ///
    /// # Errors
    /// Returns [`StoreError::Lock`] if locking is unsupported or fails.
    pub fn lock(&self, mode: LockMode) -> Result<LockGuard<'_>> {
        lock::acquire(&self.file, &self.path, mode)
    }

    /// Read and parse every record.
    ///
    /// # Errors
    /// Returns [`StoreError::Parse`] if any line is malformed.
    pub fn load(&self, _guard: &LockGuard<'_>) -> Result<Vec<Record>> {
        self.read_parsed().map(|parsed| parsed.records)
    }

    /// Append a pending slot for `participant`.
    ///
    /// # Errors
    /// Returns [`StoreError::InvariantViolation`] if a pending slot already
    /// exists, the guard is not exclusive, or `participant` cannot be stored.
    pub fn append_pending_slot(&self, guard: &LockGuard<'_>, participant: &str) -> Result<()> {
        require_exclusive(guard)?;
        require_storable(participant)?;
        let parsed = self.read_parsed()?;
        let pending = parsed.records.iter().filter(|r| r.is_pending()).count();
        if pending > 0 {
            return Err(StoreError::InvariantViolation(format!(
                "cannot open a slot for {participant}: {pending} pending slot(s) already present"
            )));
        }
        self.write_tail(format!("{participant}{DELIMITER}").as_bytes())
    }

    /// Fill the unique pending slot with `participant` and return the now
    /// complete record.
    ///
    /// # Errors
    /// Returns [`StoreError::InvariantViolation`] unless exactly one pending
    /// slot exists and it is the last record, or if the guard is not exclusive
    /// or `participant` cannot be stored.
    pub fn complete_pending_slot(&self, guard: &LockGuard<'_>, participant: &str) -> Result<Record> {
        require_exclusive(guard)?;
        require_storable(participant)?;
        let parsed = self.read_parsed()?;
        let pending = parsed.records.iter().filter(|r| r.is_pending()).count();
        if pending != 1 {
            return Err(StoreError::InvariantViolation(format!(
                "expected exactly one pending slot, found {pending}"
            )));
        }
        let Some(last) = parsed.records.last().filter(|r| r.is_pending()) else {
            return Err(StoreError::InvariantViolation(
                "pending slot is not the last record".to_string(),
            ));
        };
        if last.participant_a == participant {
            return Err(StoreError::InvariantViolation(format!(
                "{participant} cannot complete their own slot"
            )));
        }

        if let Tail::Terminated(terminator) = parsed.tail {
            // Pending line was written as `a,\n`; drop the terminator so the
            // fill lands on the same line.
            let len = self
                .file
                .metadata()
                .map_err(|e| StoreError::io("stat store", e))?
                .len();
            let terminator = u64::try_from(terminator).unwrap_or(u64::MAX);
            let new_len = len.checked_sub(terminator).ok_or_else(|| {
                StoreError::InvariantViolation("store shrank while locked".to_string())
            })?;
            self.file
                .set_len(new_len)
                .map_err(|e| StoreError::io("truncate pending line terminator", e))?;
        }
        self.write_tail(format!("{participant}\n").as_bytes())?;

        Ok(Record::paired(last.participant_a.clone(), participant))
    }

    fn read_parsed(&self) -> Result<ParsedStore> {
        let mut file = &self.file;
        file.seek(SeekFrom::Start(0))
            .map_err(|e| StoreError::io("rewind store", e))?;
        let mut raw = String::new();
        file.read_to_string(&mut raw)
            .map_err(|e| StoreError::io(format!("read store {}", self.path.display()), e))?;
        record::parse_store(&raw)
    }

    fn write_tail(&self, bytes: &[u8]) -> Result<()> {
        let mut file = &self.file;
        file.write_all(bytes)
            .map_err(|e| StoreError::io(format!("append to store {}", self.path.display()), e))?;
        file.sync_data()
            .map_err(|e| StoreError::io("sync store", e))
    }
}

fn require_exclusive(guard: &LockGuard<'_>) -> Result<()> {
    if guard.mode() == LockMode::Exclusive {
        Ok(())
    } else {
        Err(StoreError::InvariantViolation(
            "store mutation attempted without the exclusive lock".to_string(),
        ))
    }
}

/// Refuse identifiers that would write a line the parser rejects.
fn require_storable(participant: &str) -> Result<()> {
    if participant.is_empty() || participant.contains([DELIMITER, '\r', '\n']) {
        return Err(StoreError::InvariantViolation(format!(
            "participant {participant:?} cannot be stored"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{bail, ensure};
    use std::fs;

    fn store_with(raw: &str) -> anyhow::Result<(tempfile::TempDir, RecordStore)> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("friends.csv");
        fs::write(&path, raw)?;
        let store = RecordStore::open(path)?;
        Ok((dir, store))
    }

    #[test]
    fn open_creates_missing_file() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("friends.csv");
        let store = RecordStore::open(&path)?;
        let guard = store.lock(LockMode::Shared)?;
        ensure!(store.load(&guard)?.is_empty());
        ensure!(path.exists());
        Ok(())
    }

    #[test]
    fn append_then_complete_keeps_original_layout() -> anyhow::Result<()> {
        let (_dir, store) = store_with("")?;
        let guard = store.lock(LockMode::Exclusive)?;

        store.append_pending_slot(&guard, "alice@x")?;
        ensure!(fs::read_to_string(store.path())? == "alice@x,");

        let record = store.complete_pending_slot(&guard, "bob@x")?;
        ensure!(record == Record::paired("alice@x", "bob@x"));
        ensure!(fs::read_to_string(store.path())? == "alice@x,bob@x\n");
        Ok(())
    }

    #[test]
    fn complete_fills_newline_terminated_pending_line() -> anyhow::Result<()> {
        let (_dir, store) = store_with("a@x,b@x\nc@x,\n")?;
        let guard = store.lock(LockMode::Exclusive)?;
        store.complete_pending_slot(&guard, "d@x")?;
        ensure!(fs::read_to_string(store.path())? == "a@x,b@x\nc@x,d@x\n");
        Ok(())
    }

    #[test]
    fn append_refuses_second_pending_slot() -> anyhow::Result<()> {
        let (_dir, store) = store_with("a@x,")?;
        let guard = store.lock(LockMode::Exclusive)?;
        match store.append_pending_slot(&guard, "b@x") {
            Err(StoreError::InvariantViolation(_)) => {}
            other => bail!("expected invariant violation, got {other:?}"),
        }
        ensure!(fs::read_to_string(store.path())? == "a@x,");
        Ok(())
    }

    #[test]
    fn complete_requires_exactly_one_trailing_pending_slot() -> anyhow::Result<()> {
        for raw in ["", "a@x,b@x\n", "a@x,\nb@x,", "a@x,\nb@x,c@x\n"] {
            let (_dir, store) = store_with(raw)?;
            let guard = store.lock(LockMode::Exclusive)?;
            match store.complete_pending_slot(&guard, "z@x") {
                Err(StoreError::InvariantViolation(_)) => {}
                other => bail!("{raw:?}: expected invariant violation, got {other:?}"),
            }
            ensure!(fs::read_to_string(store.path())? == raw);
        }
        Ok(())
    }

    #[test]
    fn unstorable_participants_are_refused() -> anyhow::Result<()> {
        for participant in ["", "a,b@x", "a\nb@x", "a\rb@x"] {
            let (_dir, store) = store_with("")?;
            let guard = store.lock(LockMode::Exclusive)?;
            ensure!(
                matches!(
                    store.append_pending_slot(&guard, participant),
                    Err(StoreError::InvariantViolation(_))
                ),
                "{participant:?}"
            );
            ensure!(fs::read_to_string(store.path())?.is_empty());

            fs::write(store.path(), "a@x,")?;
            ensure!(
                matches!(
                    store.complete_pending_slot(&guard, participant),
                    Err(StoreError::InvariantViolation(_))
                ),
                "{participant:?}"
            );
            ensure!(fs::read_to_string(store.path())? == "a@x,");
        }
        Ok(())
    }

    #[test]
    fn mutation_under_shared_lock_is_rejected() -> anyhow::Result<()> {
        let (_dir, store) = store_with("")?;
        let guard = store.lock(LockMode::Shared)?;
        ensure!(matches!(
            store.append_pending_slot(&guard, "a@x"),
            Err(StoreError::InvariantViolation(_))
        ));
        ensure!(fs::read_to_string(store.path())?.is_empty());
        Ok(())
    }

    #[test]
    fn load_rejects_malformed_store_without_writing() -> anyhow::Result<()> {
        let (_dir, store) = store_with("onlyonefield\n")?;
        let guard = store.lock(LockMode::Exclusive)?;
        ensure!(matches!(
            store.load(&guard),
            Err(StoreError::Parse { line: 1, .. })
        ));
        ensure!(matches!(
            store.append_pending_slot(&guard, "a@x"),
            Err(StoreError::Parse { .. })
        ));
        ensure!(fs::read_to_string(store.path())? == "onlyonefield\n");
        Ok(())
    }
}
