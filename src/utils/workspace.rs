use crate::error::Result;
use chrono::Local;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::warn;

/// Timestamp file touched by workers while they make progress.
#[derive(Debug, Clone)]
pub struct Heartbeat {
    path: PathBuf,
}

impl Heartbeat {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Best effort: a heartbeat that cannot be written only weakens stall detection.
    pub fn touch(&self) {
        if let Err(e) = fs::write(&self.path, Local::now().to_rfc3339()) {
            warn!(path = %self.path.display(), error = %e, "could not update heartbeat");
        }
    }

    /// Time since the last touch; zero when the file has never been written.
    pub fn idle_for(&self) -> Duration {
        fs::metadata(&self.path)
            .and_then(|m| m.modified())
            .ok()
            .and_then(|modified| SystemTime::now().duration_since(modified).ok())
            .unwrap_or(Duration::ZERO)
    }
}

/// The shared `tempStats` scratch tree. Jobs own disjoint subdirectories.
#[derive(Debug, Clone)]
pub struct ScratchWorkspace {
    root: PathBuf,
}

impl ScratchWorkspace {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Remove every job directory, keeping top-level files such as the heartbeat.
    ///
    /// Failures are logged and skipped; returns the number of directories removed.
    pub fn clear(&self) -> usize {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(path = %self.root.display(), error = %e, "could not list scratch workspace");
                return 0;
            }
        };

        let mut removed = 0;
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            if remove_dir_best_effort(&path) {
                removed += 1;
            }
        }
        removed
    }
}

/// Delete a directory tree, logging instead of failing.
pub fn remove_dir_best_effort(path: &Path) -> bool {
    match fs::remove_dir_all(path) {
        Ok(()) => true,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "could not remove scratch directory");
            false
        }
    }
}

/// Delete every file in `folder` whose stem is exactly `stem` (all sidecars of a table).
pub fn delete_sidecars(folder: &Path, stem: &str) -> Result<usize> {
    if !folder.exists() {
        return Ok(0);
    }

    let mut deleted = 0;
    for entry in fs::read_dir(folder)? {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        if path.file_stem().and_then(|s| s.to_str()) == Some(stem) {
            fs::remove_file(&path)?;
            deleted += 1;
        }
    }
    Ok(deleted)
}
