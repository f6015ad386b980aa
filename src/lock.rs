use crate::error::{Result, StoreError};
use std::fs::File;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Advisory lock mode.
pub enum LockMode {
    /// Many holders at once, no exclusive holder.
    Shared,
    /// Single holder, no other lock of any kind.
    Exclusive,
}

/// An advisory `flock` held on the store file. Released on drop.
#[derive(Debug)]
pub struct LockGuard<'a> {
    file: &'a File,
    path: &'a Path,
    mode: LockMode,
    held: bool,
}

impl LockGuard<'_> {
    /// Mode currently held.
    #[must_use]
    pub const fn mode(&self) -> LockMode {
        self.mode
    }

    /// Convert a shared lock into an exclusive one, blocking until every other
    /// holder is gone.
    ///
    /// `flock` conversion is not atomic: another process may take the
    /// exclusive lock in between, so anything read under the shared lock must
    /// be read again afterwards.
    ///
    /// # Errors
    /// Returns [`StoreError::Lock`] if the lock cannot be taken.
    pub fn upgrade(&mut self) -> Result<()> {
        if self.mode == LockMode::Exclusive {
            return Ok(());
        }
        lock_file(self.file, self.path, LockMode::Exclusive)?;
        self.mode = LockMode::Exclusive;
        Ok(())
    }

    /// Release the lock explicitly, surfacing any unlock error.
    ///
    /// # Errors
    /// Returns [`StoreError::Lock`] if unlocking fails.
    pub fn release(mut self) -> Result<()> {
        self.release_inner()
    }

    fn release_inner(&mut self) -> Result<()> {
        if !self.held {
            return Ok(());
        }
        self.held = false;
        fs2::FileExt::unlock(self.file).map_err(|source| StoreError::Lock {
            path: self.path.to_path_buf(),
            source,
        })
    }
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        let _ = self.release_inner();
    }
}

fn lock_file(file: &File, path: &Path, mode: LockMode) -> Result<()> {
    let res = match mode {
        LockMode::Shared => fs2::FileExt::lock_shared(file),
        LockMode::Exclusive => fs2::FileExt::lock_exclusive(file),
    };
    res.map_err(|source| StoreError::Lock {
        path: path.to_path_buf(),
        source,
    })
}

/// Block until `mode` is held on `file`.
///
/// # Errors
/// Returns [`StoreError::Lock`] if the filesystem refuses the lock.
pub fn acquire<'a>(file: &'a File, path: &'a Path, mode: LockMode) -> Result<LockGuard<'a>> {
    lock_file(file, path, mode)?;
    Ok(LockGuard {
        file,
        path,
        mode,
        held: true,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::ensure;
    use std::fs::OpenOptions;
    use std::path::PathBuf;

    fn open(path: &Path) -> std::io::Result<File> {
        OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path)
    }

    fn store_path(dir: &tempfile::TempDir) -> PathBuf {
        dir.path().join("friends.csv")
    }

    #[test]
    fn shared_locks_coexist_and_block_exclusive() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = store_path(&dir);
        let (f1, f2, f3) = (open(&path)?, open(&path)?, open(&path)?);

        let g1 = acquire(&f1, &path, LockMode::Shared)?;
        let g2 = acquire(&f2, &path, LockMode::Shared)?;
        ensure!(fs2::FileExt::try_lock_exclusive(&f3).is_err());

        g1.release()?;
        drop(g2);
        ensure!(fs2::FileExt::try_lock_exclusive(&f3).is_ok());
        fs2::FileExt::unlock(&f3)?;
        Ok(())
    }

    #[test]
    fn upgrade_excludes_other_readers_until_drop() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = store_path(&dir);
        let (f1, f2) = (open(&path)?, open(&path)?);

        {
            let mut guard = acquire(&f1, &path, LockMode::Shared)?;
            guard.upgrade()?;
            ensure!(guard.mode() == LockMode::Exclusive);
            ensure!(fs2::FileExt::try_lock_shared(&f2).is_err());
        }

        ensure!(fs2::FileExt::try_lock_shared(&f2).is_ok());
        fs2::FileExt::unlock(&f2)?;
        Ok(())
    }
}
