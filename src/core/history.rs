use crate::core::partition::Partition;
use crate::logging::EventLog;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const HISTORY_FILE_NAME: &str = ".history.jsonl";

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("History file error {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to encode history record: {0}")]
    Json(#[from] serde_json::Error),

    #[error("No history recorded in {path}")]
    Empty { path: PathBuf },

    #[error("Invalid history index {index}; valid range is 0..{len}")]
    InvalidIndex { index: usize, len: usize },

    #[error("Refusing to overwrite {path} while restoring")]
    Collision { path: PathBuf },

    #[error("Failed to restore {from} → {to}: {source}")]
    Restore {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct CullHistoryRecord {
    pub timestamp: String,
    pub retained: String,
    pub culled: Vec<String>,
    pub action: String,
}

/// One line of the history file; lines that fail to parse are kept verbatim
/// so a rewrite never drops them.
#[derive(Debug, Clone)]
pub enum HistoryLine {
    Record(CullHistoryRecord),
    Malformed { line: String, error: String },
}

/// Append-only JSON-lines ledger of moved duplicates, stored inside the
/// duplicates folder so the loader never sees it.
#[derive(Debug, Clone)]
pub struct CullHistory {
    folder: PathBuf,
}

impl CullHistory {
    pub fn new(folder: impl Into<PathBuf>) -> Self {
        Self {
            folder: folder.into(),
        }
    }

    pub fn path(&self) -> PathBuf {
        self.folder.join(HISTORY_FILE_NAME)
    }

    fn io_error(&self, source: std::io::Error) -> HistoryError {
        HistoryError::Io {
            path: self.path(),
            source,
        }
    }

    /// Append one record per canonical card that had duplicates moved.
    /// Returns the number of records written.
    pub fn append(&self, partition: &Partition<'_>) -> Result<usize, HistoryError> {
        let groups = partition.groups();
        if groups.is_empty() {
            return Ok(0);
        }

        let mut out = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path())
            .map_err(|e| self.io_error(e))?;

        let timestamp = Utc::now().to_rfc3339();
        for (canonical, members) in &groups {
            let record = CullHistoryRecord {
                timestamp: timestamp.clone(),
                retained: canonical.source_path().to_string_lossy().into_owned(),
                culled: members
                    .iter()
                    .map(|d| d.duplicate.source_path().to_string_lossy().into_owned())
                    .collect(),
                action: "moved".to_string(),
            };
            writeln!(out, "{}", serde_json::to_string(&record)?).map_err(|e| self.io_error(e))?;
        }
        Ok(groups.len())
    }

    /// Every line of the history file. A missing file reads as empty.
    pub fn read(&self) -> Result<Vec<HistoryLine>, HistoryError> {
        let file = match File::open(self.path()) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(self.io_error(e)),
        };

        let mut lines = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line.map_err(|e| self.io_error(e))?;
            if line.trim().is_empty() {
                continue;
            }
            lines.push(match serde_json::from_str::<CullHistoryRecord>(&line) {
                Ok(record) => HistoryLine::Record(record),
                Err(e) => HistoryLine::Malformed {
                    line,
                    error: e.to_string(),
                },
            });
        }
        Ok(lines)
    }

    /// Move culled files back to where they came from and drop the restored
    /// records from the ledger. `index` selects one record; `None` restores
    /// all of them. Returns the number of files put back.
    pub fn restore(&self, index: Option<usize>, log: &dyn EventLog) -> Result<usize, HistoryError> {
        let lines = self.read()?;
        let records: Vec<(usize, &CullHistoryRecord)> = lines
            .iter()
            .enumerate()
            .filter_map(|(i, line)| match line {
                HistoryLine::Record(record) => Some((i, record)),
                HistoryLine::Malformed { .. } => None,
            })
            .collect();

        if records.is_empty() {
            return Err(HistoryError::Empty { path: self.path() });
        }

        let selected: Vec<(usize, &CullHistoryRecord)> = match index {
            None => records,
            Some(index) if index < records.len() => vec![records[index]],
            Some(index) => {
                return Err(HistoryError::InvalidIndex {
                    index,
                    len: records.len(),
                });
            }
        };

        let mut restored = 0;
        let mut finished = Vec::new();
        let mut stopped: Option<(usize, CullHistoryRecord, HistoryError)> = None;
        'records: for (line, record) in &selected {
            log.info(
                "restoring record",
                &[("timestamp", &record.timestamp), ("files", &record.culled.len())],
            );
            for (i, original) in record.culled.iter().enumerate() {
                match self.restore_file(original, log) {
                    Ok(moved) => restored += usize::from(moved),
                    Err(error) => {
                        let pending = CullHistoryRecord {
                            culled: record.culled[i..].to_vec(),
                            ..CullHistoryRecord::clone(record)
                        };
                        stopped = Some((*line, pending, error));
                        break 'records;
                    }
                }
            }
            finished.push(*line);
        }

        // rewritten after a failure too; restored files must not stay listed
        let mut remaining = Vec::new();
        for (i, line) in lines.iter().enumerate() {
            if finished.contains(&i) {
                continue;
            }
            remaining.push(match (line, &stopped) {
                (_, Some((at, pending, _))) if *at == i => serde_json::to_string(pending)?,
                (HistoryLine::Record(record), _) => serde_json::to_string(record)?,
                (HistoryLine::Malformed { line, .. }, _) => line.clone(),
            });
        }
        let new_content = if remaining.is_empty() {
            String::new()
        } else {
            remaining.join("\n") + "\n"
        };
        fs::write(self.path(), new_content).map_err(|e| self.io_error(e))?;

        log.info(
            "updated history",
            &[("removed_records", &finished.len()), ("restored", &restored)],
        );
        if let Some((_, pending, error)) = stopped {
            log.warn(
                "restore stopped early; unrestored files stay in history",
                &[("restored", &restored), ("pending", &pending.culled.len())],
            );
            return Err(error);
        }
        Ok(restored)
    }

    /// Move one culled file back. `Ok(false)` means it was skipped.
    fn restore_file(&self, original: &str, log: &dyn EventLog) -> Result<bool, HistoryError> {
        let dest = Path::new(original);
        let Some(file_name) = dest.file_name() else {
            log.warn("history entry has no file name; skipping", &[("path", &original)]);
            return Ok(false);
        };
        let src = self.folder.join(file_name);

        if !src.exists() {
            log.warn("source file does not exist; skipping", &[("path", &src.display())]);
            return Ok(false);
        }
        if fs::symlink_metadata(dest).is_ok() {
            return Err(HistoryError::Collision {
                path: dest.to_path_buf(),
            });
        }
        fs::rename(&src, dest).map_err(|source| HistoryError::Restore {
            from: src.clone(),
            to: dest.to_path_buf(),
            source,
        })?;
        log.info(
            "restored",
            &[("from", &src.display()), ("to", &dest.display())],
        );
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::MemoryLog;
    use tempfile::TempDir;

    fn write_history(folder: &Path, records: &[CullHistoryRecord]) {
        let content: String = records
            .iter()
            .map(|r| serde_json::to_string(r).unwrap() + "\n")
            .collect();
        fs::write(folder.join(HISTORY_FILE_NAME), content).unwrap();
    }

    fn moved(dir: &Path, retained: &str, culled: &[&str]) -> CullHistoryRecord {
        CullHistoryRecord {
            timestamp: "2026-01-01T00:00:00+00:00".to_string(),
            retained: dir.join(retained).to_string_lossy().into_owned(),
            culled: culled
                .iter()
                .map(|c| dir.join(c).to_string_lossy().into_owned())
                .collect(),
            action: "moved".to_string(),
        }
    }

    #[test]
    fn test_read_missing_file_is_empty() {
        let temp_dir = TempDir::new().unwrap();
        let history = CullHistory::new(temp_dir.path().join("duplicates"));
        assert!(history.read().unwrap().is_empty());
    }

    #[test]
    fn test_read_keeps_malformed_lines() {
        let temp_dir = TempDir::new().unwrap();
        let record = moved(temp_dir.path(), "a.vcf", &["b.vcf"]);
        fs::write(
            temp_dir.path().join(HISTORY_FILE_NAME),
            format!("{}\nnot json\n", serde_json::to_string(&record).unwrap()),
        )
        .unwrap();

        let lines = CullHistory::new(temp_dir.path()).read().unwrap();
        assert_eq!(lines.len(), 2);
        assert!(matches!(&lines[0], HistoryLine::Record(r) if *r == record));
        assert!(matches!(&lines[1], HistoryLine::Malformed { line, .. } if line == "not json"));
    }

    #[test]
    fn test_restore_single_record() {
        let temp_dir = TempDir::new().unwrap();
        let folder = temp_dir.path().join("duplicates");
        fs::create_dir(&folder).unwrap();
        fs::write(folder.join("b.vcf"), "b").unwrap();
        fs::write(folder.join("d.vcf"), "d").unwrap();
        let first = moved(temp_dir.path(), "a.vcf", &["b.vcf"]);
        let second = moved(temp_dir.path(), "c.vcf", &["d.vcf"]);
        write_history(&folder, &[first, second.clone()]);

        let history = CullHistory::new(&folder);
        let log = MemoryLog::new();
        let restored = history.restore(Some(0), &log).unwrap();

        assert_eq!(restored, 1);
        assert_eq!(fs::read_to_string(temp_dir.path().join("b.vcf")).unwrap(), "b");
        assert!(folder.join("d.vcf").exists());
        let lines = history.read().unwrap();
        assert_eq!(lines.len(), 1);
        assert!(matches!(&lines[0], HistoryLine::Record(r) if *r == second));
    }

    #[test]
    fn test_restore_refuses_to_overwrite() {
        let temp_dir = TempDir::new().unwrap();
        let folder = temp_dir.path().join("duplicates");
        fs::create_dir(&folder).unwrap();
        fs::write(folder.join("b.vcf"), "moved").unwrap();
        fs::write(temp_dir.path().join("b.vcf"), "newer").unwrap();
        write_history(&folder, &[moved(temp_dir.path(), "a.vcf", &["b.vcf"])]);

        let log = MemoryLog::new();
        let err = CullHistory::new(&folder).restore(None, &log).unwrap_err();
        assert!(matches!(err, HistoryError::Collision { .. }));
        assert_eq!(fs::read_to_string(temp_dir.path().join("b.vcf")).unwrap(), "newer");
    }

    #[test]
    fn test_partial_restore_keeps_unrestored_files_in_history() {
        let temp_dir = TempDir::new().unwrap();
        let folder = temp_dir.path().join("duplicates");
        fs::create_dir(&folder).unwrap();
        fs::write(folder.join("b.vcf"), "b").unwrap();
        fs::write(folder.join("c.vcf"), "c").unwrap();
        fs::write(folder.join("e.vcf"), "e").unwrap();
        fs::write(temp_dir.path().join("c.vcf"), "newer").unwrap();
        let first = moved(temp_dir.path(), "a.vcf", &["b.vcf", "c.vcf"]);
        let second = moved(temp_dir.path(), "d.vcf", &["e.vcf"]);
        write_history(&folder, &[first.clone(), second.clone()]);

        let history = CullHistory::new(&folder);
        let log = MemoryLog::new();
        let err = history.restore(None, &log).unwrap_err();

        assert!(matches!(err, HistoryError::Collision { .. }));
        assert_eq!(fs::read_to_string(temp_dir.path().join("b.vcf")).unwrap(), "b");
        assert_eq!(fs::read_to_string(temp_dir.path().join("c.vcf")).unwrap(), "newer");
        assert!(folder.join("e.vcf").exists());

        let lines = history.read().unwrap();
        assert_eq!(lines.len(), 2);
        let expected = CullHistoryRecord {
            culled: vec![temp_dir.path().join("c.vcf").to_string_lossy().into_owned()],
            ..first
        };
        assert!(matches!(&lines[0], HistoryLine::Record(r) if *r == expected));
        assert!(matches!(&lines[1], HistoryLine::Record(r) if *r == second));
    }

    #[test]
    fn test_restore_invalid_index() {
        let temp_dir = TempDir::new().unwrap();
        write_history(temp_dir.path(), &[moved(temp_dir.path(), "a.vcf", &["b.vcf"])]);

        let log = MemoryLog::new();
        let err = CullHistory::new(temp_dir.path())
            .restore(Some(3), &log)
            .unwrap_err();
        assert!(matches!(err, HistoryError::InvalidIndex { index: 3, len: 1 }));
    }

    #[test]
    fn test_restore_skips_missing_source() {
        let temp_dir = TempDir::new().unwrap();
        let folder = temp_dir.path().join("duplicates");
        fs::create_dir(&folder).unwrap();
        write_history(&folder, &[moved(temp_dir.path(), "a.vcf", &["gone.vcf"])]);

        let log = MemoryLog::new();
        let history = CullHistory::new(&folder);
        assert_eq!(history.restore(None, &log).unwrap(), 0);
        assert_eq!(log.find("source file does not exist; skipping").len(), 1);
        assert!(history.read().unwrap().is_empty());
    }
}
