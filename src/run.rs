use crate::config::{ConfigurationError, Settings};
use crate::core::card::Record;
use crate::core::equivalence::EquivalenceEngine;
use crate::core::history::{CullHistory, HistoryError};
use crate::core::loader::{CardLoader, LoadError};
use crate::core::partition::{Partition, Partitioner};
use crate::core::relocate::{DryRunRelocator, FolderRelocator, RelocationError, Relocator};
use crate::logging::EventLog;
use serde::Serialize;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DedupError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Relocation(#[from] RelocationError),

    #[error(transparent)]
    History(#[from] HistoryError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Move duplicates and record them in the history file.
    Cull,
    /// Report what would move; touch nothing.
    DryRun,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DuplicateReport {
    pub duplicate: PathBuf,
    pub canonical: PathBuf,
    pub destination: PathBuf,
}

/// Outcome of one pass over a directory; serializable as the `scan --json`
/// report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub directory: PathBuf,
    pub total_cards: usize,
    pub unique_cards: Vec<PathBuf>,
    pub duplicates: Vec<DuplicateReport>,
    pub dry_run: bool,
    pub history_records: usize,
}

impl RunSummary {
    fn new(settings: &Settings, records: &[Record], partition: &Partition<'_>, mode: Mode) -> Self {
        Self {
            directory: settings.directory.clone(),
            total_cards: records.len(),
            unique_cards: partition
                .unique
                .iter()
                .map(|r| r.source_path().to_path_buf())
                .collect(),
            duplicates: partition
                .duplicates
                .iter()
                .map(|d| DuplicateReport {
                    duplicate: d.duplicate.source_path().to_path_buf(),
                    canonical: d.canonical.source_path().to_path_buf(),
                    destination: d.destination.clone(),
                })
                .collect(),
            dry_run: mode == Mode::DryRun,
            history_records: 0,
        }
    }

    /// Duplicate reports grouped under their canonical path, canonicals in
    /// load order.
    pub fn groups(&self) -> Vec<(&PathBuf, Vec<&DuplicateReport>)> {
        self.unique_cards
            .iter()
            .filter_map(|canonical| {
                let members: Vec<&DuplicateReport> = self
                    .duplicates
                    .iter()
                    .filter(|d| &d.canonical == canonical)
                    .collect();
                (!members.is_empty()).then_some((canonical, members))
            })
            .collect()
    }
}

/// Read every card in the configured directory.
pub fn load(settings: &Settings, log: &dyn EventLog) -> Result<Vec<Record>, DedupError> {
    let loader = CardLoader::new(&settings.ignore_fields).sorted(settings.sorted);
    loader
        .load_directory(&settings.directory, log)
        .map_err(|e| {
            log.error(
                "failed to load card",
                &[("path", &e.path().display()), ("error", &e)],
            );
            DedupError::from(e)
        })
}

/// Partition already-loaded records and, in [`Mode::Cull`], move duplicates
/// and append to the history file.
pub fn cull_records(
    settings: &Settings,
    records: &[Record],
    mode: Mode,
    log: &dyn EventLog,
) -> Result<RunSummary, DedupError> {
    let folder = settings.duplicates_dir();
    let mut relocator: Box<dyn Relocator> = match mode {
        Mode::Cull => Box::new(FolderRelocator::create(&folder).map_err(|e| {
            log.error(
                "failed to prepare duplicates folder",
                &[("path", &folder.display()), ("error", &e)],
            );
            e
        })?),
        Mode::DryRun => Box::new(DryRunRelocator::new(&folder)),
    };

    let engine = EquivalenceEngine::new(settings.case_rule);
    let partition = match Partitioner::new(&engine).partition(records, relocator.as_mut(), log) {
        Ok(partition) => partition,
        Err(failure) => {
            log.error(
                "failed to relocate duplicate",
                &[
                    ("error", &failure.error),
                    ("already_moved", &failure.moved.duplicates.len()),
                ],
            );
            if mode == Mode::Cull {
                // keep whatever did move undoable
                CullHistory::new(&folder).append(&failure.moved)?;
            }
            return Err(failure.error.into());
        }
    };

    let mut summary = RunSummary::new(settings, records, &partition, mode);
    if mode == Mode::Cull {
        summary.history_records = CullHistory::new(&folder).append(&partition)?;
    }

    log.info(
        "unique cards",
        &[
            ("count", &summary.unique_cards.len()),
            ("duplicates", &summary.duplicates.len()),
            ("directory", &settings.directory.display()),
        ],
    );
    Ok(summary)
}

/// Load and cull in one call.
pub fn cull(settings: &Settings, mode: Mode, log: &dyn EventLog) -> Result<RunSummary, DedupError> {
    let records = load(settings, log)?;
    cull_records(settings, &records, mode, log)
}
