//! Decides whether two contact records describe the same contact.
//!
//! The comparison runs in three stages:
//!
//! 1. **Key sets**: a field present on one side only is always a real
//!    difference.
//! 2. **Multisets**: each field's values are compared ignoring their order,
//!    leaving only the values one side has and the other lacks.
//! 3. **Case folding**: leftover values are compared again with text and
//!    its parameter values lower-cased. Whether a difference that disappears here counts as
//!    "the same contact" is governed by [`CaseRule`].

use crate::core::card::{FieldValue, Fields, Record};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Equal,
    NotEqual,
}

/// Policy for values that differ only by letter case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum CaseRule {
    /// Case-only differences are not substantive.
    #[default]
    Insensitive,
    /// Any case difference keeps two records apart.
    Strict,
}

/// Values of one field that have no exact counterpart on the other side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangedField<'a> {
    pub name: &'a str,
    pub left: Vec<&'a FieldValue>,
    pub right: Vec<&'a FieldValue>,
}

impl ChangedField<'_> {
    /// True when the unmatched values pair up once text is lower-cased.
    pub fn is_case_only(&self) -> bool {
        if self.left.len() != self.right.len() {
            return false;
        }
        let mut left: Vec<FieldValue> = self.left.iter().map(|v| v.case_folded()).collect();
        let mut right: Vec<FieldValue> = self.right.iter().map(|v| v.case_folded()).collect();
        left.sort();
        right.sort();
        left == right
    }
}

/// Structural difference between two field maps.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordDiff<'a> {
    /// Keys only the right-hand record has.
    pub added: Vec<&'a str>,
    /// Keys only the left-hand record has.
    pub removed: Vec<&'a str>,
    pub changed: Vec<ChangedField<'a>>,
}

impl<'a> RecordDiff<'a> {
    pub fn between(left: &'a Fields, right: &'a Fields) -> Self {
        let mut diff = RecordDiff::default();

        for (name, left_values) in left {
            match right.get(name) {
                None => diff.removed.push(name.as_str()),
                Some(right_values) => {
                    let (left_only, right_only) = multiset_difference(left_values, right_values);
                    if !left_only.is_empty() || !right_only.is_empty() {
                        diff.changed.push(ChangedField {
                            name: name.as_str(),
                            left: left_only,
                            right: right_only,
                        });
                    }
                }
            }
        }
        diff.added = right
            .keys()
            .filter(|name| !left.contains_key(*name))
            .map(String::as_str)
            .collect();

        diff
    }

    pub fn is_identical(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }

    pub fn has_key_changes(&self) -> bool {
        !self.added.is_empty() || !self.removed.is_empty()
    }
}

/// Values in `left` but not in `right`, and vice versa, counting repeats.
fn multiset_difference<'a>(
    left: &'a [FieldValue],
    right: &'a [FieldValue],
) -> (Vec<&'a FieldValue>, Vec<&'a FieldValue>) {
    let mut left: Vec<&FieldValue> = left.iter().collect();
    let mut right: Vec<&FieldValue> = right.iter().collect();
    left.sort();
    right.sort();

    let (mut left_only, mut right_only) = (Vec::new(), Vec::new());
    let (mut i, mut j) = (0, 0);
    while i < left.len() && j < right.len() {
        match left[i].cmp(right[j]) {
            Ordering::Less => {
                left_only.push(left[i]);
                i += 1;
            }
            Ordering::Greater => {
                right_only.push(right[j]);
                j += 1;
            }
            Ordering::Equal => {
                i += 1;
                j += 1;
            }
        }
    }
    left_only.extend_from_slice(&left[i..]);
    right_only.extend_from_slice(&right[j..]);
    (left_only, right_only)
}

#[derive(Debug, Clone, Copy, Default)]
pub struct EquivalenceEngine {
    case_rule: CaseRule,
}

impl EquivalenceEngine {
    pub fn new(case_rule: CaseRule) -> Self {
        Self { case_rule }
    }

    pub fn compare(&self, a: &Record, b: &Record) -> Comparison {
        self.resolve(&RecordDiff::between(a.fields(), b.fields()))
    }

    pub fn resolve(&self, diff: &RecordDiff<'_>) -> Comparison {
        if diff.is_identical() {
            return Comparison::Equal;
        }
        if diff.has_key_changes() {
            return Comparison::NotEqual;
        }
        if !diff.changed.iter().all(ChangedField::is_case_only) {
            return Comparison::NotEqual;
        }
        match self.case_rule {
            CaseRule::Insensitive => Comparison::Equal,
            CaseRule::Strict => Comparison::NotEqual,
        }
    }
}
