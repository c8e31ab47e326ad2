use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use find_duplicate_contacts::config::{FileConfig, Settings};
use find_duplicate_contacts::core::{CaseRule, CullHistory, HistoryLine};
use find_duplicate_contacts::logging::{EventLog, LogFacade};
use find_duplicate_contacts::run::{self, Mode, RunSummary};
use indicatif::{ProgressBar, ProgressStyle};
use log::LevelFilter;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

#[derive(Parser, Debug)]
#[command(
    name = "find-duplicate-contacts",
    version,
    about = "Find duplicate vCard files and move them aside"
)]
struct Cli {
    /// Log level for console output
    #[arg(short, long, value_enum, default_value_t = DebugLevel::Info, global = true)]
    debug_level: DebugLevel,

    /// Append log output to this file instead of stderr
    #[arg(short, long, value_name = "FILE", global = true)]
    log_file: Option<PathBuf>,

    /// TOML file with default settings; command-line flags win
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Find and list duplicate cards without moving anything
    Scan {
        #[command(flatten)]
        target: TargetArgs,
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Move duplicate cards into `<dir>/<folder>`
    Cull {
        #[command(flatten)]
        target: TargetArgs,
        /// Only show what would be moved
        #[arg(long)]
        dry_run: bool,
    },

    /// Work with cull history
    History {
        #[command(subcommand)]
        command: HistoryCmd,
    },
}

#[derive(Subcommand, Debug)]
enum HistoryCmd {
    /// List all cull history records
    List {
        #[command(flatten)]
        target: FolderArgs,
    },

    /// Move culled cards back to where they came from
    Restore {
        #[command(flatten)]
        target: FolderArgs,
        /// Restore a specific record index
        #[arg(long, conflicts_with = "all", required_unless_present = "all")]
        record: Option<usize>,
        /// Restore all records
        #[arg(long, conflicts_with = "record")]
        all: bool,
    },
}

#[derive(Args, Debug, Clone)]
struct FolderArgs {
    /// Directory containing vCard files
    #[arg(short = 'D', long, value_name = "DIR")]
    directory: Option<PathBuf>,

    /// Name of the subfolder duplicates are moved into (default: `duplicates`)
    #[arg(long, value_name = "NAME")]
    folder: Option<String>,
}

#[derive(Args, Debug, Clone)]
struct TargetArgs {
    #[command(flatten)]
    folder: FolderArgs,

    /// Field to leave out of comparisons; repeat to build the list (replaces the default set)
    #[arg(long = "ignore-field", value_name = "FIELD")]
    ignore_fields: Vec<String>,

    /// How to treat values that differ only by letter case
    #[arg(long, value_enum)]
    case_rule: Option<CaseRule>,

    /// Process files in name order instead of directory-listing order
    #[arg(long)]
    sorted: bool,
}

impl From<FolderArgs> for FileConfig {
    fn from(args: FolderArgs) -> Self {
        FileConfig {
            directory: args.directory,
            duplicates_folder: args.folder,
            ..FileConfig::default()
        }
    }
}

impl From<TargetArgs> for FileConfig {
    fn from(args: TargetArgs) -> Self {
        FileConfig {
            ignore_fields: (!args.ignore_fields.is_empty()).then_some(args.ignore_fields),
            case_rule: args.case_rule,
            sorted: args.sorted.then_some(true),
            ..FileConfig::from(args.folder)
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
enum DebugLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<DebugLevel> for LevelFilter {
    fn from(level: DebugLevel) -> Self {
        match level {
            DebugLevel::Error => LevelFilter::Error,
            DebugLevel::Warn => LevelFilter::Warn,
            DebugLevel::Info => LevelFilter::Info,
            DebugLevel::Debug => LevelFilter::Debug,
            DebugLevel::Trace => LevelFilter::Trace,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.debug_level.into(), cli.log_file.as_deref())?;
    let log = LogFacade;

    let file_config = match &cli.config {
        Some(path) => FileConfig::load(path)?,
        None => FileConfig::default(),
    };

    match cli.command {
        Commands::Scan { target, json } => {
            let settings = Settings::resolve(file_config.merge(target.into()))?;
            let summary = load_and_cull(&settings, Mode::DryRun, &log)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                print_groups(&summary);
            }
        }

        Commands::Cull { target, dry_run } => {
            let settings = Settings::resolve(file_config.merge(target.into()))?;
            println!("▶ Culling duplicates in: {}", settings.directory.display());
            let mode = if dry_run { Mode::DryRun } else { Mode::Cull };
            let summary = load_and_cull(&settings, mode, &log)?;
            print_groups(&summary);

            if summary.dry_run {
                println!("\n⚠️  Dry-run only; no files were changed.");
            } else if summary.history_records > 0 {
                println!(
                    "\n✅ Recorded cull history in {}",
                    CullHistory::new(settings.duplicates_dir()).path().display()
                );
            }
        }

        Commands::History { command } => match command {
            HistoryCmd::List { target } => {
                let settings = Settings::resolve(file_config.merge(target.into()))?;
                let history = CullHistory::new(settings.duplicates_dir());
                let lines = history
                    .read()
                    .with_context(|| format!("Could not read history file {:?}", history.path()))?;

                println!("🗂️  Cull History:");
                let mut index = 0;
                for line in lines {
                    match line {
                        HistoryLine::Record(rec) => {
                            println!(
                                "{}: [{}] {} → retained {}, culled {} file(s)",
                                index,
                                rec.timestamp,
                                rec.action,
                                rec.retained,
                                rec.culled.len()
                            );
                            index += 1;
                        }
                        HistoryLine::Malformed { error, .. } => {
                            eprintln!("⚠️ Skipping malformed history line: {}", error);
                        }
                    }
                }
                if index == 0 {
                    println!("(empty)");
                }
            }

            HistoryCmd::Restore {
                target,
                record,
                all,
            } => {
                let settings = Settings::resolve(file_config.merge(target.into()))?;
                let history = CullHistory::new(settings.duplicates_dir());
                let index = if all { None } else { record };
                let restored = history.restore(index, &log).with_context(|| {
                    format!("Failed to restore from history {:?}", history.path())
                })?;
                println!("🔄 Restored {} file(s)", restored);
            }
        },
    }

    Ok(())
}

/// Route `log` output to stderr, or to `log_file` when given.
fn init_logging(level: LevelFilter, log_file: Option<&Path>) -> Result<()> {
    let mut builder = env_logger::Builder::new();
    builder.filter_level(level).format_timestamp_secs();

    if let Some(path) = log_file {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("Failed to open log file {:?}", path))?;
        builder.target(env_logger::Target::Pipe(Box::new(file)));
    }

    builder.try_init().context("Failed to initialize logging")
}

/// Load with a spinner, then partition. The spinner is cleared before any
/// per-duplicate logging starts.
fn load_and_cull(settings: &Settings, mode: Mode, log: &dyn EventLog) -> Result<RunSummary> {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::with_template("{spinner:.green} {msg}")?);
    spinner.set_message("Loading cards…");
    spinner.enable_steady_tick(Duration::from_millis(100));

    let records = benchmark("loading cards", || run::load(settings, log));
    spinner.finish_and_clear();
    let records =
        records.with_context(|| format!("Failed to load cards from {:?}", settings.directory))?;

    let summary = benchmark("comparing cards", || {
        run::cull_records(settings, &records, mode, log)
    })
    .with_context(|| format!("Failed to cull duplicates in {:?}", settings.directory))?;
    Ok(summary)
}

fn print_groups(summary: &RunSummary) {
    let groups = summary.groups();
    if groups.is_empty() {
        println!("No duplicates found.");
        return;
    }

    println!("Found {} duplicate group(s):", groups.len());
    for (i, (canonical, members)) in groups.iter().enumerate() {
        println!("\n✨ Group {}:", i + 1);
        println!("   🏆 Keeping → {}", canonical.display());
        for dup in members {
            let verb = if summary.dry_run { "[dry-run] MOVE" } else { "Moved" };
            println!(
                "   📦 {} {} → {}",
                verb,
                dup.duplicate.display(),
                dup.destination.display()
            );
        }
    }
}

/// Run `f()`, log how long it took (with `label`), and return its result.
fn benchmark<T, F: FnOnce() -> T>(label: &str, f: F) -> T {
    let start = Instant::now();
    let result = f();
    log::debug!("⏱ {} took {:.2?}", label, start.elapsed());
    result
}
