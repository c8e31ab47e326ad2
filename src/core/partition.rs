use crate::core::card::Record;
use crate::core::equivalence::{Comparison, EquivalenceEngine};
use crate::core::relocate::{RelocationError, Relocator};
use crate::logging::EventLog;
use std::collections::HashMap;
use std::path::PathBuf;

/// A record found equal to an earlier one, and where its file was sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Duplicate<'a> {
    pub duplicate: &'a Record,
    pub canonical: &'a Record,
    pub destination: PathBuf,
}

#[derive(Debug, Default)]
pub struct Partition<'a> {
    /// Records with no earlier equal, in load order.
    pub unique: Vec<&'a Record>,
    /// Duplicates in the order they were found.
    pub duplicates: Vec<Duplicate<'a>>,
}

impl<'a> Partition<'a> {
    /// Duplicates grouped under their canonical record, canonicals in load
    /// order.
    pub fn groups(&self) -> Vec<(&'a Record, Vec<&Duplicate<'a>>)> {
        self.unique
            .iter()
            .filter_map(|canonical| {
                let members: Vec<&Duplicate<'a>> = self
                    .duplicates
                    .iter()
                    .filter(|d| std::ptr::eq(d.canonical, *canonical))
                    .collect();
                (!members.is_empty()).then_some((*canonical, members))
            })
            .collect()
    }
}

/// Splits records into canonical copies and duplicates; the first record seen
/// in a group of equals is the one kept.
pub struct Partitioner<'e> {
    engine: &'e EquivalenceEngine,
}

impl<'e> Partitioner<'e> {
    pub fn new(engine: &'e EquivalenceEngine) -> Self {
        Self { engine }
    }

    /// Walk `records` in order and pair every duplicate with the first
    /// earlier record it equals. Nothing is moved.
    ///
    /// The unique set is bucketed by key set: records whose field names
    /// differ always compare `NotEqual`, so only the bucket sharing the
    /// incoming key set needs scanning, and its insertion order keeps the
    /// first match the same as a full linear scan.
    pub fn classify<'a>(
        &self,
        records: &'a [Record],
        log: &dyn EventLog,
    ) -> (Vec<&'a Record>, Vec<(&'a Record, &'a Record)>) {
        let mut unique = Vec::new();
        let mut pairs = Vec::new();
        let mut buckets: HashMap<Vec<&'a str>, Vec<&'a Record>> = HashMap::new();

        for record in records {
            let bucket = buckets.entry(record.key_set()).or_default();
            let canonical = bucket
                .iter()
                .copied()
                .find(|member| self.engine.compare(record, member) == Comparison::Equal);

            match canonical {
                Some(canonical) => {
                    log.debug(
                        "duplicate found",
                        &[
                            ("duplicate", &record.source_path().display()),
                            ("canonical", &canonical.source_path().display()),
                        ],
                    );
                    pairs.push((record, canonical));
                }
                None => {
                    bucket.push(record);
                    unique.push(record);
                }
            }
        }

        (unique, pairs)
    }

    /// Classify `records`, then relocate every duplicate.
    ///
    /// All destinations are checked before the first move, so a collision
    /// aborts with nothing moved. A move that still fails returns the
    /// duplicates already relocated alongside the error.
    pub fn partition<'a>(
        &self,
        records: &'a [Record],
        relocator: &mut dyn Relocator,
        log: &dyn EventLog,
    ) -> Result<Partition<'a>, RelocationFailure<'a>> {
        let (unique, pairs) = self.classify(records, log);
        let mut partition = Partition {
            unique,
            duplicates: Vec::with_capacity(pairs.len()),
        };

        for (duplicate, _) in &pairs {
            if let Err(error) = relocator.plan(duplicate) {
                return Err(RelocationFailure {
                    moved: partition,
                    error,
                });
            }
        }

        for (duplicate, canonical) in pairs {
            match relocator.relocate(duplicate, log) {
                Ok(destination) => partition.duplicates.push(Duplicate {
                    duplicate,
                    canonical,
                    destination,
                }),
                Err(error) => {
                    return Err(RelocationFailure {
                        moved: partition,
                        error,
                    });
                }
            }
        }

        Ok(partition)
    }
}

/// A relocation that stopped partway, with what had already been moved.
#[derive(Debug)]
pub struct RelocationFailure<'a> {
    pub moved: Partition<'a>,
    pub error: RelocationError,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::card::{FieldValue, Fields};
    use crate::core::equivalence::CaseRule;
    use crate::core::relocate::DryRunRelocator;
    use crate::logging::MemoryLog;
    use std::path::Path;

    fn card(path: &str, name: &str, tels: &[&str]) -> Record {
        let mut fields = Fields::new();
        fields.insert("fn".to_string(), vec![FieldValue::text(name)]);
        if !tels.is_empty() {
            fields.insert(
                "tel".to_string(),
                tels.iter().map(|t| FieldValue::text(*t)).collect(),
            );
        }
        Record::new(path, fields)
    }

    /// Records every relocation request without touching the disk.
    #[derive(Default)]
    struct Recorder {
        moved: Vec<PathBuf>,
    }

    impl Relocator for Recorder {
        fn plan(&self, record: &Record) -> Result<PathBuf, RelocationError> {
            Ok(Path::new("dups").join(record.source_path()))
        }

        fn relocate(&mut self, record: &Record, _log: &dyn EventLog) -> Result<PathBuf, RelocationError> {
            self.moved.push(record.source_path().to_path_buf());
            Ok(Path::new("dups").join(record.source_path()))
        }
    }

    #[test]
    fn test_first_seen_is_canonical() {
        let records = vec![
            card("a.vcf", "John Doe", &["111", "222"]),
            card("b.vcf", "Jane Doe", &[]),
            card("c.vcf", "John Doe", &["222", "111"]),
            card("d.vcf", "john doe", &["111", "222"]),
        ];
        let engine = EquivalenceEngine::new(CaseRule::Insensitive);
        let mut recorder = Recorder::default();
        let log = MemoryLog::new();

        let partition = Partitioner::new(&engine)
            .partition(&records, &mut recorder, &log)
            .unwrap();

        let unique: Vec<&Path> = partition.unique.iter().map(|r| r.source_path()).collect();
        assert_eq!(unique, vec![Path::new("a.vcf"), Path::new("b.vcf")]);
        assert_eq!(partition.duplicates.len(), 2);
        assert_eq!(partition.duplicates[0].duplicate.source_path(), Path::new("c.vcf"));
        assert_eq!(partition.duplicates[0].canonical.source_path(), Path::new("a.vcf"));
        assert_eq!(partition.duplicates[1].duplicate.source_path(), Path::new("d.vcf"));
        assert_eq!(
            recorder.moved,
            vec![PathBuf::from("c.vcf"), PathBuf::from("d.vcf")]
        );
    }

    #[test]
    fn test_strict_case_keeps_case_variants_apart() {
        let records = vec![
            card("a.vcf", "John Doe", &[]),
            card("b.vcf", "JOHN DOE", &[]),
        ];
        let engine = EquivalenceEngine::new(CaseRule::Strict);
        let mut recorder = Recorder::default();
        let log = MemoryLog::new();

        let partition = Partitioner::new(&engine)
            .partition(&records, &mut recorder, &log)
            .unwrap();
        assert_eq!(partition.unique.len(), 2);
        assert!(partition.duplicates.is_empty());
        assert!(recorder.moved.is_empty());
    }

    #[test]
    fn test_empty_cards_collapse_together() {
        let records = vec![
            Record::new("a.vcf", Fields::new()),
            card("b.vcf", "John Doe", &[]),
            Record::new("c.vcf", Fields::new()),
        ];
        let engine = EquivalenceEngine::default();
        let log = MemoryLog::new();

        let partition = Partitioner::new(&engine)
            .partition(&records, &mut DryRunRelocator::new("dups"), &log)
            .unwrap();
        assert_eq!(partition.unique.len(), 2);
        assert_eq!(partition.duplicates.len(), 1);
        assert_eq!(partition.duplicates[0].canonical.source_path(), Path::new("a.vcf"));
        assert_eq!(partition.duplicates[0].destination, Path::new("dups").join("c.vcf"));
    }

    #[test]
    fn test_groups_follow_canonical_order() {
        let records = vec![
            card("a.vcf", "John Doe", &[]),
            card("b.vcf", "Jane Doe", &[]),
            card("c.vcf", "Jane Doe", &[]),
            card("d.vcf", "John Doe", &[]),
            card("e.vcf", "John Doe", &[]),
        ];
        let engine = EquivalenceEngine::default();
        let log = MemoryLog::new();
        let partition = Partitioner::new(&engine)
            .partition(&records, &mut DryRunRelocator::new("dups"), &log)
            .unwrap();

        let groups = partition.groups();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].0.source_path(), Path::new("a.vcf"));
        assert_eq!(groups[0].1.len(), 2);
        assert_eq!(groups[1].0.source_path(), Path::new("b.vcf"));
        assert_eq!(groups[1].1.len(), 1);
    }

    #[test]
    fn test_planning_error_moves_nothing() {
        struct Colliding {
            moved: usize,
        }
        impl Relocator for Colliding {
            fn plan(&self, record: &Record) -> Result<PathBuf, RelocationError> {
                if record.source_path() == Path::new("d.vcf") {
                    return Err(RelocationError::Collision {
                        source_path: record.source_path().to_path_buf(),
                        destination: PathBuf::from("dups/d.vcf"),
                    });
                }
                Ok(Path::new("dups").join(record.source_path()))
            }

            fn relocate(&mut self, record: &Record, _log: &dyn EventLog) -> Result<PathBuf, RelocationError> {
                self.moved += 1;
                self.plan(record)
            }
        }

        let records = vec![
            card("a.vcf", "John Doe", &[]),
            card("b.vcf", "John Doe", &[]),
            card("c.vcf", "Jane Doe", &[]),
            card("d.vcf", "Jane Doe", &[]),
        ];
        let engine = EquivalenceEngine::default();
        let log = MemoryLog::new();
        let mut relocator = Colliding { moved: 0 };
        let failure = Partitioner::new(&engine)
            .partition(&records, &mut relocator, &log)
            .unwrap_err();

        assert!(matches!(failure.error, RelocationError::Collision { .. }));
        assert!(failure.moved.duplicates.is_empty());
        assert_eq!(relocator.moved, 0);
    }

    #[test]
    fn test_failed_move_reports_what_was_moved() {
        struct FailsSecondMove {
            calls: usize,
        }
        impl Relocator for FailsSecondMove {
            fn plan(&self, record: &Record) -> Result<PathBuf, RelocationError> {
                Ok(Path::new("dups").join(record.source_path()))
            }

            fn relocate(&mut self, record: &Record, _log: &dyn EventLog) -> Result<PathBuf, RelocationError> {
                self.calls += 1;
                if self.calls == 2 {
                    return Err(RelocationError::Move {
                        from: record.source_path().to_path_buf(),
                        to: PathBuf::from("dups"),
                        source: std::io::Error::other("disk full"),
                    });
                }
                self.plan(record)
            }
        }

        let records = vec![
            card("a.vcf", "John Doe", &[]),
            card("b.vcf", "John Doe", &[]),
            card("c.vcf", "John Doe", &[]),
        ];
        let engine = EquivalenceEngine::default();
        let log = MemoryLog::new();
        let failure = Partitioner::new(&engine)
            .partition(&records, &mut FailsSecondMove { calls: 0 }, &log)
            .unwrap_err();

        assert!(matches!(failure.error, RelocationError::Move { .. }));
        assert_eq!(failure.moved.unique.len(), 1);
        assert_eq!(failure.moved.duplicates.len(), 1);
        assert_eq!(failure.moved.duplicates[0].duplicate.source_path(), Path::new("b.vcf"));
    }
}
