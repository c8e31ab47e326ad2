use crate::core::equivalence::CaseRule;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;

/// Fields that identify a card's producer or revision rather than the
/// contact itself.
pub const DEFAULT_IGNORE_FIELDS: [&str; 7] = [
    "prodid",
    "uid",
    "version",
    "rev",
    "x-thunderbird-etag",
    "x-mozilla-html",
    "photo",
];

pub const DEFAULT_DUPLICATES_FOLDER: &str = "duplicates";

#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("No directory given; pass --directory or set `directory` in the config file")]
    MissingDirectory,

    #[error("Directory does not exist: {path}")]
    DirectoryNotFound { path: PathBuf },

    #[error("Not a directory: {path}")]
    NotADirectory { path: PathBuf },

    #[error("Invalid duplicates folder name {name:?}: must be a single path component")]
    InvalidFolderName { name: String },

    #[error("Failed to read config file {path}: {source}")]
    ReadConfig {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config file {path}: {source}")]
    ParseConfig {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Optional settings read from a TOML file. Every key may be omitted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub directory: Option<PathBuf>,
    pub duplicates_folder: Option<String>,
    pub ignore_fields: Option<Vec<String>>,
    pub case_rule: Option<CaseRule>,
    pub sorted: Option<bool>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigurationError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigurationError::ReadConfig {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigurationError::ParseConfig {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Values set in `overrides` win over values set here.
    pub fn merge(self, overrides: FileConfig) -> FileConfig {
        FileConfig {
            directory: overrides.directory.or(self.directory),
            duplicates_folder: overrides.duplicates_folder.or(self.duplicates_folder),
            ignore_fields: overrides.ignore_fields.or(self.ignore_fields),
            case_rule: overrides.case_rule.or(self.case_rule),
            sorted: overrides.sorted.or(self.sorted),
        }
    }
}

/// Validated settings for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub directory: PathBuf,
    pub duplicates_folder: String,
    pub ignore_fields: Vec<String>,
    pub case_rule: CaseRule,
    pub sorted: bool,
}

impl Settings {
    /// Fill gaps with defaults and validate. Nothing on disk is modified.
    pub fn resolve(config: FileConfig) -> Result<Self, ConfigurationError> {
        let directory = config.directory.ok_or(ConfigurationError::MissingDirectory)?;
        if !directory.exists() {
            return Err(ConfigurationError::DirectoryNotFound { path: directory });
        }
        if !directory.is_dir() {
            return Err(ConfigurationError::NotADirectory { path: directory });
        }

        let duplicates_folder = config
            .duplicates_folder
            .unwrap_or_else(|| DEFAULT_DUPLICATES_FOLDER.to_string());
        validate_folder_name(&duplicates_folder)?;

        let ignore_fields = config.ignore_fields.unwrap_or_else(|| {
            DEFAULT_IGNORE_FIELDS
                .iter()
                .map(|field| field.to_string())
                .collect()
        });

        Ok(Self {
            directory,
            duplicates_folder,
            ignore_fields,
            case_rule: config.case_rule.unwrap_or_default(),
            sorted: config.sorted.unwrap_or(false),
        })
    }

    pub fn duplicates_dir(&self) -> PathBuf {
        self.directory.join(&self.duplicates_folder)
    }
}

fn validate_folder_name(name: &str) -> Result<(), ConfigurationError> {
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(()),
        _ => Err(ConfigurationError::InvalidFolderName {
            name: name.to_string(),
        }),
    }
}
