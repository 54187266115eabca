use crate::error::CoreResult;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use ulid::Ulid;

pub const SCRATCH_PREFIX: &str = "epi-verify-";

/// Exclusively owned extraction target for one verification.
///
/// Disposal is idempotent. Dropping a `ScratchDir` that was neither disposed nor kept
/// removes the directory.
#[derive(Debug)]
pub struct ScratchDir {
    path: PathBuf,
    released: bool,
}

impl ScratchDir {
    pub fn create_in(parent: &Path) -> CoreResult<Self> {
        fs::create_dir_all(parent)?;
        let path = parent.join(format!("{}{}", SCRATCH_PREFIX, Ulid::new()));
        // create_dir (not create_dir_all): an existing directory means someone else owns it.
        create_private_dir(&path)?;
        Ok(Self {
            path,
            released: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_disposed(&self) -> bool {
        self.released
    }

    pub fn dispose(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        dispose_scratch(&self.path);
    }

    /// Detaches the directory; the caller becomes responsible for removing it.
    pub fn keep(mut self) -> PathBuf {
        self.released = true;
        std::mem::take(&mut self.path)
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Removes a scratch directory by path.
///
/// A no-op for paths that are already gone, and for paths that were never scratch
/// directories (their final component must carry [`SCRATCH_PREFIX`]).
pub fn dispose_scratch(path: &Path) {
    let is_scratch = path
        .file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with(SCRATCH_PREFIX))
        .unwrap_or(false);
    if !is_scratch {
        tracing::warn!(path = %path.display(), "refusing to dispose non-scratch path");
        return;
    }
    match fs::remove_dir_all(path) {
        Ok(()) => tracing::debug!(path = %path.display(), "scratch directory disposed"),
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "scratch directory disposal failed")
        }
    }
}

#[cfg(unix)]
fn create_private_dir(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::DirBuilderExt;
    fs::DirBuilder::new().mode(0o700).create(path)
}

#[cfg(not(unix))]
fn create_private_dir(path: &Path) -> std::io::Result<()> {
    fs::create_dir(path)
}
