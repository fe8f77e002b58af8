//! Process-wide single-writer guard.
//!
//! An exclusive advisory lock on a file beside the store. The embedded engine
//! corrupts under concurrent writer processes, so exactly one ingestion
//! process may hold this at a time; a second process fails startup with a
//! distinguishable error instead of silently sharing the store.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use fs2::FileExt;

/// Held for the lifetime of the ingestion process; the lock releases on drop
/// (including signal-driven shutdown, since the file closes with the process).
#[derive(Debug)]
pub struct SingleWriterGuard {
    // Held to maintain the exclusive lock; released on drop.
    file: File,
    path: PathBuf,
}

impl SingleWriterGuard {
    /// Acquire the writer lock, creating parent directories as needed.
    ///
    /// Fails immediately (no blocking) when another process holds the lock;
    /// the error names the path and the competing-writer condition so
    /// operators can tell it apart from I/O failures.
    pub fn acquire(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create lock dir {:?}", parent))?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .with_context(|| format!("open writer lock {:?}", path))?;

        file.try_lock_exclusive().map_err(|e| {
            anyhow!(
                "writer lock {:?} is held by another ingestion process \
                 (single-writer invariant): {e}",
                path
            )
        })?;

        // Best-effort PID stamp for diagnostics; the lock itself is the
        // authority.
        let _ = file.set_len(0);
        let _ = writeln!(file, "{}", std::process::id());

        Ok(Self { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for SingleWriterGuard {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}
