//! # ListMan
//!
//! Merge many wordlists into one deduplicated master wordlist.
//!
//! ## Features
//!
//! - **Formats**: plain text, gzip and bz2 inputs; the master can be written in any of them
//! - **Deduplication**: sharded concurrent index, every normalized entry is written once
//! - **Parallel processing**: a pool of readers feeding a single merge writer
//! - **Pause/resume**: Ctrl-C pauses safely; `--resume` continues where the run stopped
//! - **Logging**: completed files are recorded and can be skipped on later runs
//! - **Encoding detection**: non-UTF-8 lists are transcoded
//!
//! ## Usage
//!
//! ```bash
//! # Create a master list from two files
//! listman --create rockyou.txt extra.txt.gz --threads 8
//!
//! # Add a folder of lists, skipping the ones already merged
//! listman --add-folder ./lists --log --skip-logged
//!
//! # Continue an interrupted run
//! listman --resume
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use listman::cli::RunMode;
//! use listman::pause::PauseToken;
//! use listman::processor::{Processor, ProcessorConfig};
//! use std::path::PathBuf;
//!
//! let mut config = ProcessorConfig::new(RunMode::Create, "./output");
//! config.files = vec![PathBuf::from("rockyou.txt")];
//! config.threads = 8;
//!
//! let report = Processor::new(config).run(&PauseToken::new()).unwrap();
//! std::process::exit(report.exit_code());
//! ```

pub mod checkpoint;
pub mod cli;
pub mod dedup;
pub mod encoding;
pub mod enumerate;
pub mod error;
pub mod logbook;
pub mod pause;
pub mod processor;
pub mod progress;
pub mod queue;
pub mod source;
pub mod tracker;
pub mod worker;
pub mod writer;

pub use cli::Args;
pub use error::{ListmanError, Result};
pub use pause::PauseToken;
pub use processor::{Processor, ProcessorConfig, RunReport};
pub use tracker::RunState;
