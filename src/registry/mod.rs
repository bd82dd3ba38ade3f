//! Persistent exclusion list: senders who opted out of transcription.
//!
//! Stored as a plain text file, one identifier per line, so operators can
//! hand-edit it while the bot runs. Every read loads the file fresh; every
//! mutation rewrites it through a temp file + rename, so a concurrent
//! reader sees either the old set or the new one, never a partial file.

use std::collections::BTreeSet;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("invalid sender identifier: {0:?}")]
    InvalidIdentifier(String),

    #[error("exclusion store I/O failed: {0}")]
    Storage(#[from] io::Error),
}

#[derive(Debug, Clone)]
pub struct ExclusionRegistry {
    path: PathBuf,
}

impl ExclusionRegistry {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the current set from disk. A missing file is an empty set.
    pub fn load(&self) -> Result<BTreeSet<String>, RegistryError> {
        match fs::read_to_string(&self.path) {
            Ok(content) => Ok(content
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(String::from)
                .collect()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(BTreeSet::new()),
            Err(e) => Err(e.into()),
        }
    }

    /// Membership test against the latest persisted set. Never cached: the
    /// file may have been edited out-of-band since the last call.
    pub fn contains(&self, id: &str) -> Result<bool, RegistryError> {
        Ok(self.load()?.contains(id))
    }

    /// Add `id` to the set. Returns `false` (still success) when it was
    /// already present.
    pub fn add(&self, id: &str) -> Result<bool, RegistryError> {
        let id = validate_identifier(id)?;
        let mut set = self.load()?;
        if !set.insert(id.to_string()) {
            return Ok(false);
        }
        self.store(&set)?;
        Ok(true)
    }

    /// Remove `id` from the set. Returns `false` (still success) when it
    /// was not present.
    pub fn remove(&self, id: &str) -> Result<bool, RegistryError> {
        let id = validate_identifier(id)?;
        let mut set = self.load()?;
        if !set.remove(id) {
            return Ok(false);
        }
        self.store(&set)?;
        Ok(true)
    }

    /// Atomically replace the store with `set`: write to a temp file in the
    /// same directory, fsync, rename over the old file.
    fn store(&self, set: &BTreeSet<String>) -> Result<(), RegistryError> {
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        fs::create_dir_all(dir)?;

        let mut tmp = NamedTempFile::new_in(dir)?;
        for id in set {
            writeln!(tmp, "{id}")?;
        }
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path)
            .map_err(|e| RegistryError::Storage(e.error))?;
        Ok(())
    }
}

fn validate_identifier(id: &str) -> Result<&str, RegistryError> {
    if id.is_empty() || id.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(RegistryError::InvalidIdentifier(id.to_string()));
    }
    Ok(id)
}
