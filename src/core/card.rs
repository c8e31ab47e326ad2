use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Field name → values in file order. Keys are lower-cased vCard property names.
pub type Fields = BTreeMap<String, Vec<FieldValue>>;

/// The payload of one property line.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Datum {
    /// A single-component value such as `FN`, `TEL` or `EMAIL`.
    Text(String),
    /// A value made of `;`-separated components such as `N`, `ADR` or `ORG`.
    Structured(Vec<String>),
}

impl Datum {
    /// Split a raw property value on unescaped `;`. Escape sequences are kept
    /// verbatim inside each component.
    pub fn parse(raw: &str) -> Self {
        let mut components = Vec::new();
        let mut current = String::new();
        let mut escaped = false;

        for ch in raw.chars() {
            if escaped {
                current.push(ch);
                escaped = false;
                continue;
            }
            match ch {
                '\\' => {
                    current.push(ch);
                    escaped = true;
                }
                ';' => components.push(std::mem::take(&mut current)),
                _ => current.push(ch),
            }
        }

        if components.is_empty() {
            Datum::Text(current)
        } else {
            components.push(current);
            Datum::Structured(components)
        }
    }
}

/// One value of a field: its parameters (e.g. `TYPE=CELL`) plus the datum.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FieldValue {
    pub params: BTreeMap<String, Vec<String>>,
    pub datum: Datum,
}

impl FieldValue {
    pub fn text(value: impl Into<String>) -> Self {
        Self {
            params: BTreeMap::new(),
            datum: Datum::Text(value.into()),
        }
    }

    pub fn structured<I, S>(components: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            params: BTreeMap::new(),
            datum: Datum::Structured(components.into_iter().map(Into::into).collect()),
        }
    }

    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params
            .entry(name.into())
            .or_default()
            .push(value.into());
        self
    }

    /// Copy with textual data and its parameter values lower-cased.
    /// Structured data is returned as is, so it only ever matches by full
    /// equality.
    pub fn case_folded(&self) -> Self {
        match &self.datum {
            Datum::Text(text) => Self {
                params: self
                    .params
                    .iter()
                    .map(|(name, values)| {
                        (name.clone(), values.iter().map(|v| v.to_lowercase()).collect())
                    })
                    .collect(),
                datum: Datum::Text(text.to_lowercase()),
            },
            Datum::Structured(_) => self.clone(),
        }
    }
}

/// One loaded contact file. Never mutated after loading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    source_path: PathBuf,
    fields: Fields,
}

impl Record {
    pub fn new(source_path: impl Into<PathBuf>, fields: Fields) -> Self {
        Self {
            source_path: source_path.into(),
            fields,
        }
    }

    pub fn source_path(&self) -> &Path {
        &self.source_path
    }

    pub fn fields(&self) -> &Fields {
        &self.fields
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Sorted field names; records with different key sets are never equal.
    pub fn key_set(&self) -> Vec<&str> {
        self.fields.keys().map(String::as_str).collect()
    }
}
