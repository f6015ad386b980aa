//! Partner resolution on top of the locked record store.
//!
//! One resolve is one transaction: lock, load, decide, mutate, release. The
//! lock guard lives on the stack, so every exit path (including `?`) releases
//! it.

use crate::error::Result;
use crate::lock::LockMode;
use crate::record::{Lookup, PairingIndex};
use crate::store::RecordStore;
use serde::Serialize;
use std::path::Path;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "partner", rename_all = "SCREAMING_SNAKE_CASE")]
/// Outcome of [`resolve`].
pub enum Resolution {
    /// The participant was already paired with this partner.
    ExistingPartner(String),
    /// The participant just completed the pending slot of this partner.
    NewPairFormed(String),
    /// The participant opened a new pending slot.
    PendingCreated,
    /// The participant already holds the pending slot and has no partner yet.
    UnmatchedUser,
}

impl Resolution {
    /// Partner address, if the participant has one.
    #[must_use]
    pub fn partner(&self) -> Option<&str> {
        match self {
            Self::ExistingPartner(p) | Self::NewPairFormed(p) => Some(p),
            Self::PendingCreated | Self::UnmatchedUser => None,
        }
    }
}

fn known(lookup: Lookup<'_>) -> Option<Resolution> {
    match lookup {
        Lookup::Partner(partner) => Some(Resolution::ExistingPartner(partner.to_string())),
        Lookup::Pending => Some(Resolution::UnmatchedUser),
        Lookup::Unknown => None,
    }
}

/// Resolve `participant` against the store at `path`.
///
/// # Errors
/// Fails if the store cannot be opened or locked, is malformed, or breaks a
/// pairing invariant. Nothing is written in any of those cases.
pub fn resolve(path: &Path, participant: &str) -> Result<Resolution> {
    let store = RecordStore::open(path)?;
    resolve_in(&store, participant)
}

/// Resolve `participant` against an already opened store.
///
/// # Errors
/// See [`resolve`].
pub fn resolve_in(store: &RecordStore, participant: &str) -> Result<Resolution> {
    let mut guard = store.lock(LockMode::Shared)?;
    let index = PairingIndex::build(&store.load(&guard)?)?;
    if let Some(resolution) = known(index.lookup(participant)) {
        debug!(participant, ?resolution, "resolved under shared lock");
        return Ok(resolution);
    }

    guard.upgrade()?;
    // The upgrade may have let another writer in; decide on fresh state.
    let index = PairingIndex::build(&store.load(&guard)?)?;
    if let Some(resolution) = known(index.lookup(participant)) {
        debug!(participant, ?resolution, "resolved after lock upgrade");
        return Ok(resolution);
    }

    let resolution = if index.pending().is_empty() {
        store.append_pending_slot(&guard, participant)?;
        info!(participant, "opened pending slot");
        Resolution::PendingCreated
    } else {
        let record = store.complete_pending_slot(&guard, participant)?;
        info!(
            participant,
            partner = %record.participant_a,
            "completed pending slot"
        );
        Resolution::NewPairFormed(record.participant_a)
    };

    guard.release()?;
    Ok(resolution)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use anyhow::{bail, ensure};
    use std::fs;

    #[test]
    fn scenario_walkthrough() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("friends.csv");

        ensure!(resolve(&path, "alice@x")? == Resolution::PendingCreated);
        ensure!(fs::read_to_string(&path)? == "alice@x,");
        ensure!(resolve(&path, "alice@x")? == Resolution::UnmatchedUser);

        ensure!(resolve(&path, "bob@x")? == Resolution::NewPairFormed("alice@x".to_string()));
        ensure!(fs::read_to_string(&path)? == "alice@x,bob@x\n");

        ensure!(resolve(&path, "alice@x")? == Resolution::ExistingPartner("bob@x".to_string()));
        ensure!(resolve(&path, "bob@x")? == Resolution::ExistingPartner("alice@x".to_string()));
        Ok(())
    }

    #[test]
    fn empty_participant_leaves_store_usable() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("friends.csv");

        match resolve(&path, "") {
            Err(StoreError::InvariantViolation(_)) => {}
            other => bail!("expected invariant violation, got {other:?}"),
        }
        ensure!(fs::read_to_string(&path)?.is_empty());
        ensure!(resolve(&path, "alice@x")? == Resolution::PendingCreated);
        Ok(())
    }

    #[test]
    fn malformed_store_aborts_without_mutation() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("friends.csv");
        fs::write(&path, "onlyonefield\n")?;

        match resolve(&path, "carol@x") {
            Err(StoreError::Parse { line: 1, .. }) => {}
            other => bail!("expected parse error, got {other:?}"),
        }
        ensure!(fs::read_to_string(&path)? == "onlyonefield\n");
        Ok(())
    }

    #[test]
    fn lock_is_released_after_error() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("friends.csv");
        fs::write(&path, "a@x,a@x\n")?;

        ensure!(matches!(
            resolve(&path, "b@x"),
            Err(StoreError::InvariantViolation(_))
        ));
        let file = fs::File::open(&path)?;
        ensure!(fs2::FileExt::try_lock_exclusive(&file).is_ok());
        Ok(())
    }

    #[test]
    fn resolution_serializes_with_outcome_tag() -> anyhow::Result<()> {
        let json = serde_json::to_value(Resolution::NewPairFormed("a@x".to_string()))?;
        ensure!(json == serde_json::json!({"outcome": "NEW_PAIR_FORMED", "partner": "a@x"}));
        let json = serde_json::to_value(Resolution::PendingCreated)?;
        ensure!(json == serde_json::json!({"outcome": "PENDING_CREATED"}));
        Ok(())
    }
}
