pub mod card;
pub mod equivalence;
pub mod history;
pub mod loader;
pub mod partition;
pub mod relocate;

pub use card::{Datum, FieldValue, Fields, Record};
pub use equivalence::{CaseRule, Comparison, EquivalenceEngine, RecordDiff};
pub use history::{CullHistory, CullHistoryRecord, HistoryError, HistoryLine};
pub use loader::{CardLoader, LoadError};
pub use partition::{Duplicate, Partition, Partitioner, RelocationFailure};
pub use relocate::{DryRunRelocator, FolderRelocator, RelocationError, Relocator};
