//! Find vCard files that describe the same contact and move the extra copies
//! into a side folder, keeping the first-seen card of each group in place.

pub mod config;
pub mod core;
pub mod logging;
pub mod run;

pub use config::{ConfigurationError, FileConfig, Settings};
pub use logging::{EventLog, LogFacade, MemoryLog};
pub use run::{DedupError, Mode, RunSummary, cull, cull_records, load};
