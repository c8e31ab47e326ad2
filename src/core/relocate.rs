use crate::core::card::Record;
use crate::logging::EventLog;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RelocationError {
    #[error("Failed to create directory {path}: {source}")]
    CreateFolder {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Refusing to overwrite {destination} while moving {source_path}")]
    Collision {
        source_path: PathBuf,
        destination: PathBuf,
    },

    #[error("Failed to move {from} → {to}: {source}")]
    Move {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Path has no file name: {path}")]
    MissingFileName { path: PathBuf },

    #[error("File name is not valid UTF-8 and cannot be recorded in the cull history: {path}")]
    NonUtf8Path { path: PathBuf },
}

/// Side effect applied to each duplicate the partitioner finds.
pub trait Relocator {
    /// Where `record`'s file would go, failing if it cannot be moved there.
    /// Touches nothing on disk.
    fn plan(&self, record: &Record) -> Result<PathBuf, RelocationError>;

    /// Move `record`'s file out of the way, returning where it went (or
    /// would go).
    fn relocate(&mut self, record: &Record, log: &dyn EventLog) -> Result<PathBuf, RelocationError>;
}

fn destination_for(folder: &Path, record: &Record) -> Result<PathBuf, RelocationError> {
    let file_name = record
        .source_path()
        .file_name()
        .ok_or_else(|| RelocationError::MissingFileName {
            path: record.source_path().to_path_buf(),
        })?;
    Ok(folder.join(file_name))
}

/// Moves duplicates into a folder, keeping file names and never overwriting.
#[derive(Debug)]
pub struct FolderRelocator {
    folder: PathBuf,
}

impl FolderRelocator {
    /// Creates `folder` if it does not exist yet.
    pub fn create(folder: impl Into<PathBuf>) -> Result<Self, RelocationError> {
        let folder = folder.into();
        fs::create_dir_all(&folder).map_err(|source| RelocationError::CreateFolder {
            path: folder.clone(),
            source,
        })?;
        Ok(Self { folder })
    }
}

impl Relocator for FolderRelocator {
    fn plan(&self, record: &Record) -> Result<PathBuf, RelocationError> {
        let from = record.source_path();
        // the history ledger stores paths as JSON strings
        if from.to_str().is_none() {
            return Err(RelocationError::NonUtf8Path {
                path: from.to_path_buf(),
            });
        }

        let to = destination_for(&self.folder, record)?;
        // symlink_metadata so a dangling link at the destination still counts
        if fs::symlink_metadata(&to).is_ok() {
            return Err(RelocationError::Collision {
                source_path: from.to_path_buf(),
                destination: to,
            });
        }
        Ok(to)
    }

    fn relocate(&mut self, record: &Record, log: &dyn EventLog) -> Result<PathBuf, RelocationError> {
        let from = record.source_path();
        let to = self.plan(record)?;

        fs::rename(from, &to).map_err(|source| RelocationError::Move {
            from: from.to_path_buf(),
            to: to.clone(),
            source,
        })?;
        log.info(
            "moved duplicate",
            &[("from", &from.display()), ("to", &to.display())],
        );
        Ok(to)
    }
}

/// Reports where duplicates would go without touching the disk.
#[derive(Debug)]
pub struct DryRunRelocator {
    folder: PathBuf,
}

impl DryRunRelocator {
    pub fn new(folder: impl Into<PathBuf>) -> Self {
        Self {
            folder: folder.into(),
        }
    }
}

impl Relocator for DryRunRelocator {
    fn plan(&self, record: &Record) -> Result<PathBuf, RelocationError> {
        destination_for(&self.folder, record)
    }

    fn relocate(&mut self, record: &Record, log: &dyn EventLog) -> Result<PathBuf, RelocationError> {
        let to = self.plan(record)?;
        log.info(
            "[dry-run] would move duplicate",
            &[("from", &record.source_path().display()), ("to", &to.display())],
        );
        Ok(to)
    }
}
