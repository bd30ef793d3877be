//! Command-line interface definition for listman
//!
//! Provides argument parsing and validation for the wordlist manager.

use clap::{ArgGroup, Parser, ValueEnum};
use std::path::PathBuf;

use crate::source::SourceFormat;

/// Wordlist manager: merge many wordlists into one deduplicated master list
///
/// Reads plain, gzip and bz2 wordlists with multiple threads, removes duplicates,
/// and can be paused with Ctrl-C and resumed later.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "listman",
    author = "CySec Don <cysecdon@proton.me>",
    version = concat!("v", env!("CARGO_PKG_VERSION"), " by CySec Don <cysecdon@proton.me>"),
    about = "Merge wordlists into one deduplicated master list",
    long_about = r#"
Unify multiple wordlists (plain, gzip, bz2) into a single master wordlist.
Supports multi-threading, logging, pause/resume and compression.

EXAMPLES:
    # Create a new master wordlist from files
    listman --create file1.txt file2.txt --threads 8

    # Create from a folder of wordlists, gzip the master
    listman --create-folder /path/to/lists --compress gzip

    # Add new lists to an existing master, skipping already logged files
    listman --add newlist.txt --log --skip-logged

    # Resume after Ctrl-C
    listman --resume

EXIT CODES:
    0   completed
    75  paused, safe to resume with --resume
    1   fatal error
"#
)]
#[command(group(ArgGroup::new("create_mode").args(["create", "create_folder"]).multiple(true)))]
#[command(group(ArgGroup::new("add_mode").args(["add", "add_folder"]).multiple(true)))]
pub struct Args {
    /// Create a new master wordlist from files
    #[arg(long, num_args = 1.., value_name = "FILE", conflicts_with = "add_mode")]
    pub create: Vec<PathBuf>,

    /// Create a new master wordlist from folders of wordlists
    #[arg(long, num_args = 1.., value_name = "DIR", conflicts_with = "add_mode")]
    pub create_folder: Vec<PathBuf>,

    /// Add wordlist files to the existing master
    #[arg(long, num_args = 1.., value_name = "FILE")]
    pub add: Vec<PathBuf>,

    /// Add folders of wordlists to the existing master
    #[arg(long, num_args = 1.., value_name = "DIR")]
    pub add_folder: Vec<PathBuf>,

    /// Number of worker threads
    #[arg(short = 't', long, value_name = "NUM", default_value_t = 4)]
    pub threads: usize,

    /// Log completed files
    #[arg(long, default_value_t = false)]
    pub log: bool,

    /// Path to the log file
    #[arg(long, value_name = "PATH", default_value = "listman.log")]
    pub log_file: PathBuf,

    /// Skip files already recorded in the log
    #[arg(long, default_value_t = false)]
    pub skip_logged: bool,

    /// Resume the last interrupted run
    #[arg(long, default_value_t = false)]
    pub resume: bool,

    /// Compress the master wordlist
    #[arg(long, value_enum, value_name = "CODEC")]
    pub compress: Option<Compression>,

    /// Output directory for the master list and resume state (default: current directory)
    #[arg(short, long, value_name = "DIR")]
    pub output: Option<PathBuf>,

    /// File extensions picked up from folders
    #[arg(long, value_name = "EXT", default_value = "txt,gz,bz2")]
    pub extensions: String,

    /// Walk folders recursively
    #[arg(short, long, default_value_t = false)]
    pub recursive: bool,

    /// Lowercase entries before deduplication
    #[arg(long, default_value_t = false)]
    pub lowercase: bool,

    /// Deduplication strategy
    #[arg(long, value_enum, default_value_t = DedupStrategy::Fingerprint)]
    pub dedup_strategy: DedupStrategy,

    /// Entries written between commits of the master file
    #[arg(long, value_name = "NUM", default_value_t = 100_000)]
    pub batch_lines: usize,

    /// Seconds between commits of the master file
    #[arg(long, value_name = "SECS", default_value_t = 5)]
    pub commit_interval: u64,

    /// Quiet mode - minimal output
    #[arg(short, long, default_value_t = false)]
    pub quiet: bool,

    /// Verbose mode - detailed logging
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,

    /// Show the about banner and exit
    #[arg(long, default_value_t = false)]
    pub about: bool,
}

/// Codec for the master wordlist
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Compression {
    Gzip,
    Bz2,
}

impl From<Compression> for SourceFormat {
    fn from(value: Compression) -> Self {
        match value {
            Compression::Gzip => SourceFormat::Gzip,
            Compression::Bz2 => SourceFormat::Bzip2,
        }
    }
}

/// How entries are cased before comparison
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CasePolicy {
    /// Keep entries as they are
    #[default]
    Preserve,
    /// Compare and store lowercased entries
    Lower,
}

/// Storage strategy of the dedup index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum DedupStrategy {
    /// 128-bit fingerprints (16 bytes per entry)
    #[default]
    Fingerprint,
    /// Full entries (exact, more memory)
    Exact,
}

/// Requested run mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    Create,
    Add,
}

impl RunMode {
    /// Action label used in the log file
    pub fn label(self) -> &'static str {
        match self {
            Self::Create => "CREATE",
            Self::Add => "ADD",
        }
    }
}

impl Args {
    /// Run mode requested on the command line, if any
    pub fn mode(&self) -> Option<RunMode> {
        if !self.create.is_empty() || !self.create_folder.is_empty() {
            Some(RunMode::Create)
        } else if !self.add.is_empty() || !self.add_folder.is_empty() {
            Some(RunMode::Add)
        } else {
            None
        }
    }

    /// Input files for the selected mode
    pub fn files(&self) -> Vec<PathBuf> {
        match self.mode() {
            Some(RunMode::Create) => self.create.clone(),
            Some(RunMode::Add) => self.add.clone(),
            None => Vec::new(),
        }
    }

    /// Input folders for the selected mode
    pub fn folders(&self) -> Vec<PathBuf> {
        match self.mode() {
            Some(RunMode::Create) => self.create_folder.clone(),
            Some(RunMode::Add) => self.add_folder.clone(),
            None => Vec::new(),
        }
    }

    /// Get output directory, defaulting to current directory
    pub fn get_output_dir(&self) -> PathBuf {
        self.output.clone().unwrap_or_else(|| PathBuf::from("."))
    }

    /// Parse file extensions to pick up from folders
    pub fn get_extensions(&self) -> Vec<String> {
        self.extensions
            .split(',')
            .map(|s| s.trim().trim_start_matches('.').to_lowercase())
            .filter(|s| !s.is_empty())
            .collect()
    }

    pub fn case_policy(&self) -> CasePolicy {
        if self.lowercase {
            CasePolicy::Lower
        } else {
            CasePolicy::Preserve
        }
    }
}
