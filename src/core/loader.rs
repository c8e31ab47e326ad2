use crate::core::card::{Datum, FieldValue, Fields, Record};
use crate::logging::EventLog;
use ical::VcardParser;
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("Failed to list directory {path}: {source}")]
    ReadDirectory {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },

    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {path} as vCard: {message}")]
    Parse { path: PathBuf, message: String },
}

impl LoadError {
    pub fn path(&self) -> &Path {
        match self {
            LoadError::ReadDirectory { path, .. }
            | LoadError::Read { path, .. }
            | LoadError::Parse { path, .. } => path,
        }
    }
}

/// Reads the vCard files of one directory into [`Record`]s.
pub struct CardLoader {
    ignore_fields: HashSet<String>,
    sorted: bool,
}

impl CardLoader {
    pub fn new<I, S>(ignore_fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            ignore_fields: ignore_fields
                .into_iter()
                .map(|name| name.as_ref().to_lowercase())
                .collect(),
            sorted: false,
        }
    }

    /// Load files in file-name order instead of the platform listing order.
    pub fn sorted(mut self, sorted: bool) -> Self {
        self.sorted = sorted;
        self
    }

    pub fn is_ignored(&self, field: &str) -> bool {
        self.ignore_fields.contains(&field.to_lowercase())
    }

    /// Load every regular file directly inside `dir`. Subdirectories are
    /// skipped. The first file that fails aborts the load.
    pub fn load_directory(&self, dir: &Path, log: &dyn EventLog) -> Result<Vec<Record>, LoadError> {
        let mut walker = WalkDir::new(dir).min_depth(1).max_depth(1).follow_links(true);
        if self.sorted {
            walker = walker.sort_by_file_name();
        }

        let mut records = Vec::new();
        for entry in walker {
            let entry = entry.map_err(|source| LoadError::ReadDirectory {
                path: source
                    .path()
                    .map(Path::to_path_buf)
                    .unwrap_or_else(|| dir.to_path_buf()),
                source,
            })?;
            if !entry.file_type().is_file() {
                log.debug("skipping non-file entry", &[("path", &entry.path().display())]);
                continue;
            }
            records.push(self.load_file(entry.path(), log)?);
        }

        log.debug(
            "loaded cards",
            &[("directory", &dir.display()), ("count", &records.len())],
        );
        Ok(records)
    }

    pub fn load_file(&self, path: &Path, log: &dyn EventLog) -> Result<Record, LoadError> {
        let content = fs::read_to_string(path).map_err(|source| LoadError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let fields = self.parse_card(path, &content, log)?;
        Ok(Record::new(path, fields))
    }

    /// Parse vCard text into fields, dropping ignored ones. Blank content is
    /// an empty card rather than an error.
    pub fn parse_card(
        &self,
        path: &Path,
        content: &str,
        log: &dyn EventLog,
    ) -> Result<Fields, LoadError> {
        if content.trim().is_empty() {
            log.debug("empty card", &[("path", &path.display())]);
            return Ok(Fields::new());
        }

        let parse_error = |message: String| LoadError::Parse {
            path: path.to_path_buf(),
            message,
        };

        let mut parser = VcardParser::new(BufReader::new(content.as_bytes()));
        let contact = parser
            .next()
            .ok_or_else(|| parse_error("no vCard found".to_string()))?
            .map_err(|e| parse_error(e.to_string()))?;
        if parser.next().is_some() {
            log.warn(
                "file holds more than one vCard; only the first is compared",
                &[("path", &path.display())],
            );
        }

        let mut fields = Fields::new();
        for property in contact.properties {
            let name = property.name.to_lowercase();
            if self.is_ignored(&name) {
                continue;
            }

            // parameter names are case-insensitive like property names
            let mut params: BTreeMap<String, Vec<String>> = BTreeMap::new();
            for (param, values) in property.params.unwrap_or_default() {
                params.entry(param.to_lowercase()).or_default().extend(values);
            }

            let datum = Datum::parse(property.value.as_deref().unwrap_or_default());
            fields
                .entry(name)
                .or_default()
                .push(FieldValue { params, datum });
        }
        Ok(fields)
    }
}
