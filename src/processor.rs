//! Core processing engine
//!
//! Wires enumeration, the worker pool, the merge writer and the state tracker
//! into one run. The calling thread acts as the state tracker; workers and the
//! merge writer run on their own threads for the lifetime of the run.

use crate::checkpoint::{Checkpoint, FileState, FileStatus, MasterState, CHECKPOINT_FILE};
use crate::cli::{Args, CasePolicy, DedupStrategy, RunMode};
use crate::dedup::{create_index, normalize, Deduplicator};
use crate::enumerate::{enumerate, InputSpec};
use crate::error::{ListmanError, Result};
use crate::logbook::{Logbook, LOG_FILE};
use crate::pause::PauseToken;
use crate::progress::{
    create_progress_bar, create_spinner, format_number, print_bullet, print_header, print_info, print_success,
    print_warning, ProcessingStats,
};
use crate::queue::{SourceFile, WorkQueue};
use crate::source::{LineReader, SourceFormat};
use crate::tracker::{FailedFile, RunState, StateTracker};
use crate::worker::{run_pool, WorkerContext};
use crate::writer::{CommitPolicy, MasterSink, MergeWriter};

use bytesize::ByteSize;
use crossbeam_channel::{bounded, unbounded};
use indicatif::ProgressBar;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Base name of the master wordlist; the codec suffix is appended
pub const MASTER_FILE: &str = "master_wordlist.txt";

/// Upper bound on the entries preallocated in the dedup index
const MAX_PREALLOCATED: u64 = 16 * 1024 * 1024;

/// Processor configuration
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    /// `None` is only valid together with `resume`
    pub mode: Option<RunMode>,
    pub files: Vec<PathBuf>,
    pub folders: Vec<PathBuf>,
    pub threads: usize,
    pub output_dir: PathBuf,
    /// Codec of a newly created master; `None` writes plain text
    pub compress: Option<SourceFormat>,
    pub log_enabled: bool,
    pub log_file: PathBuf,
    pub skip_logged: bool,
    pub resume: bool,
    pub extensions: Vec<String>,
    pub recursive: bool,
    pub case_policy: CasePolicy,
    pub dedup_strategy: DedupStrategy,
    /// Capacity of the bounded channel between workers and the merge writer
    pub channel_capacity: usize,
    pub batch_lines: usize,
    pub commit_interval: Duration,
    /// Lines between progress markers sent by a worker
    pub progress_interval: u64,
    pub quiet: bool,
}

impl ProcessorConfig {
    pub fn new(mode: RunMode, output_dir: impl Into<PathBuf>) -> Self {
        let output_dir = output_dir.into();
        Self {
            mode: Some(mode),
            files: Vec::new(),
            folders: Vec::new(),
            threads: 4,
            log_file: output_dir.join(LOG_FILE),
            output_dir,
            compress: None,
            log_enabled: false,
            skip_logged: false,
            resume: false,
            extensions: vec!["txt".to_string(), "gz".to_string(), "bz2".to_string()],
            recursive: false,
            case_policy: CasePolicy::Preserve,
            dedup_strategy: DedupStrategy::Fingerprint,
            channel_capacity: 8192,
            batch_lines: 100_000,
            commit_interval: Duration::from_secs(5),
            progress_interval: 10_000,
            quiet: false,
        }
    }

    pub fn from_args(args: &Args) -> anyhow::Result<Self> {
        if args.mode().is_none() && !args.resume {
            anyhow::bail!("Nothing to do: use --create, --add (or their folder variants) or --resume");
        }
        if args.threads == 0 {
            anyhow::bail!("--threads must be at least 1");
        }
        if args.batch_lines == 0 {
            anyhow::bail!("--batch-lines must be at least 1");
        }

        let mut config = Self::new(args.mode().unwrap_or(RunMode::Create), args.get_output_dir());
        config.mode = args.mode();
        config.files = args.files();
        config.folders = args.folders();
        config.threads = args.threads;
        config.compress = args.compress.map(SourceFormat::from);
        config.log_enabled = args.log;
        config.log_file = args.log_file.clone();
        config.skip_logged = args.skip_logged;
        config.resume = args.resume;
        config.extensions = args.get_extensions();
        config.recursive = args.recursive;
        config.case_policy = args.case_policy();
        config.dedup_strategy = args.dedup_strategy;
        config.batch_lines = args.batch_lines;
        config.commit_interval = Duration::from_secs(args.commit_interval.max(1));
        config.quiet = args.quiet;
        Ok(config)
    }

    /// Path of the master wordlist in the given format
    pub fn master_path(&self, format: SourceFormat) -> PathBuf {
        self.output_dir
            .join(format!("{}{}", MASTER_FILE, format.suffix()))
    }

    pub fn checkpoint_path(&self) -> PathBuf {
        self.output_dir.join(CHECKPOINT_FILE)
    }
}

/// Outcome of a run that reached a terminal state
#[derive(Debug)]
pub struct RunReport {
    pub state: RunState,
    pub mode: RunMode,
    pub master_path: PathBuf,
    pub master_len: u64,
    /// Files left out because the log already records them
    pub skipped_files: usize,
    pub resumed: bool,
    pub stats: Arc<ProcessingStats>,
    pub failures: Vec<FailedFile>,
}

impl RunReport {
    pub fn exit_code(&self) -> i32 {
        self.state.exit_code()
    }

    pub fn elapsed(&self) -> Duration {
        self.stats.elapsed()
    }
}

/// A run ready to start processing
struct Prepared {
    checkpoint: Checkpoint,
    sink: MasterSink,
    skipped: usize,
    resumed: bool,
}

/// Main processor
pub struct Processor {
    config: ProcessorConfig,
}

impl Processor {
    pub fn new(config: ProcessorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    /// Run until every queued file is merged, a pause is requested, or a fatal error
    pub fn run(&self, pause: &PauseToken) -> Result<RunReport> {
        let stats = Arc::new(ProcessingStats::new());
        let mut tracker = StateTracker::new(self.config.checkpoint_path(), None);

        match self.execute(&mut tracker, pause, &stats) {
            Ok(report) => Ok(report),
            Err(e) => {
                if !tracker.state().is_terminal() {
                    tracker.fail();
                }
                Err(e)
            }
        }
    }

    fn execute(
        &self,
        tracker: &mut StateTracker,
        pause: &PauseToken,
        stats: &Arc<ProcessingStats>,
    ) -> Result<RunReport> {
        let quiet = self.config.quiet;
        tracker.transition(RunState::Enumerating)?;

        fs::create_dir_all(&self.config.output_dir).map_err(|e| {
            ListmanError::io(
                format!("failed to create output directory {}", self.config.output_dir.display()),
                e,
            )
        })?;

        let Prepared {
            mut checkpoint,
            mut sink,
            skipped,
            resumed,
        } = self.prepare()?;
        let mode = checkpoint.mode;

        // A resumed run keeps logging where the paused run did unless --log says otherwise
        if self.config.log_enabled {
            checkpoint.log_file = Some(self.config.log_file.clone());
        } else if let Some(log_file) = &checkpoint.log_file {
            log::info!("Logging completed files to {:?} as the paused run did", log_file);
        }
        tracker.set_logbook(checkpoint.log_file.clone().map(Logbook::new));

        let case_policy = checkpoint.case_policy;
        let master = checkpoint.master.clone();

        let index = create_index(
            self.config.dedup_strategy,
            (master.committed_len / 8).min(MAX_PREALLOCATED) as usize,
        );
        if master.committed_len > 0 {
            let spinner = if quiet {
                ProgressBar::hidden()
            } else {
                create_spinner("Loading existing master list...")
            };
            let loaded = rehydrate(index.as_ref(), &master, case_policy);
            spinner.finish_and_clear();
            let (loaded, terminated) = loaded?;
            if !terminated {
                log::info!("{:?} does not end with a newline, adding one", master.path);
                sink.terminate_last_line();
            }
            stats.set_preloaded(loaded);
            if !quiet {
                print_info(&format!(
                    "{} entries from {:?} ({})",
                    format_number(loaded),
                    master.path,
                    ByteSize(master.committed_len)
                ));
            }
        }

        let queued: Vec<SourceFile> = checkpoint
            .incomplete()
            .map(|(id, file)| SourceFile {
                id,
                path: file.path.clone(),
                format: file.format,
                offset: file.offset,
                accepted: file.accepted,
            })
            .collect();
        stats.add_files(queued.len() as u64);

        tracker.install(checkpoint)?;
        tracker.transition(RunState::Processing)?;

        if !quiet {
            print_header(&format!("Merging into {:?} ({})", master.path, mode.label()));
            print_info(&format!("{} files queued, {} threads", queued.len(), self.config.threads));
        }

        let progress = if quiet {
            ProgressBar::hidden()
        } else {
            create_progress_bar(queued.len() as u64, "Merging...")
        };
        let queue = WorkQueue::from_files(queued);

        let (entry_tx, entry_rx) = bounded(self.config.channel_capacity.max(1));
        let (commit_tx, commit_rx) = unbounded();
        let writer = MergeWriter::new(
            sink,
            entry_rx,
            commit_tx,
            CommitPolicy {
                batch_lines: self.config.batch_lines.max(1),
                interval: self.config.commit_interval,
            },
        );
        let threads = self.config.threads.max(1);

        let pipeline = thread::scope(|s| {
            let writer_handle = thread::Builder::new()
                .name("listman-writer".into())
                .spawn_scoped(s, move || writer.run())
                .map_err(|e| ListmanError::io("failed to start merge writer", e))?;

            let pool_handle = thread::Builder::new()
                .name("listman-pool".into())
                .spawn_scoped(s, || {
                    let ctx = WorkerContext {
                        queue: &queue,
                        index: index.as_ref(),
                        output: entry_tx,
                        pause,
                        stats: stats.as_ref(),
                        progress: &progress,
                        case_policy,
                        progress_interval: self.config.progress_interval.max(1),
                    };
                    run_pool(threads, &ctx)
                })
                .map_err(|e| ListmanError::io("failed to start worker pool", e))?;

            tracker.run(commit_rx, pause);

            let pool_result = pool_handle.join().unwrap_or_else(|_| Err(panicked("worker pool")));
            let writer_result = writer_handle.join().unwrap_or_else(|_| Err(panicked("merge writer")));

            let report = writer_result?;
            pool_result?;
            Ok(report)
        });

        progress.finish_and_clear();

        let writer_report = match &pipeline {
            Ok(report) => Some(*report),
            Err(_) => None,
        };
        let state = tracker.finish(pipeline.map(|_| ()))?;

        let master_len = writer_report.map_or(master.committed_len, |r| r.master_len);
        let report = RunReport {
            state,
            mode,
            master_path: master.path,
            master_len,
            skipped_files: skipped,
            resumed,
            stats: Arc::clone(stats),
            failures: tracker.failures().to_vec(),
        };

        if !quiet {
            self.print_outcome(&report);
        }
        Ok(report)
    }

    /// Build the checkpoint and open the master, either fresh or from a saved run
    fn prepare(&self) -> Result<Prepared> {
        let checkpoint_path = self.config.checkpoint_path();

        if self.config.resume {
            match Checkpoint::load(&checkpoint_path)? {
                Some(checkpoint) => return self.prepare_resume(checkpoint),
                None => {
                    log::warn!("No resume state at {:?}, starting a fresh run", checkpoint_path);
                    if !self.config.quiet {
                        print_warning("No saved run to resume, starting a fresh run");
                    }
                }
            }
        } else if checkpoint_path.is_file() {
            log::warn!("Discarding stale resume state {:?}", checkpoint_path);
            if !self.config.quiet {
                print_warning("Discarding the resume state of an earlier run");
            }
            Checkpoint::clear(&checkpoint_path)?;
        }

        self.prepare_fresh()
    }

    fn prepare_fresh(&self) -> Result<Prepared> {
        let quiet = self.config.quiet;
        let mode = self.config.mode.ok_or_else(|| {
            ListmanError::Config("no saved run to resume and no --create or --add given".into())
        })?;

        let (format, committed_len) = match mode {
            RunMode::Create => (self.config.compress.unwrap_or(SourceFormat::Plain), 0),
            RunMode::Add => {
                let format = self.existing_master().ok_or_else(|| {
                    ListmanError::Config(format!(
                        "add mode needs an existing {} in {}",
                        MASTER_FILE,
                        self.config.output_dir.display()
                    ))
                })?;
                if let Some(requested) = self.config.compress.filter(|c| *c != format) {
                    log::warn!("Master list is {}, ignoring --compress {}", format, requested);
                    if !quiet {
                        print_warning(&format!("Existing master is {}, keeping that format", format));
                    }
                }
                let path = self.config.master_path(format);
                let len = fs::metadata(&path)
                    .map_err(|e| ListmanError::io(format!("failed to stat {}", path.display()), e))?
                    .len();
                (format, len)
            }
        };
        let master_path = self.config.master_path(format);

        if !quiet {
            print_header("Scanning input...");
        }
        let spec = InputSpec {
            files: self.config.files.clone(),
            folders: self.config.folders.clone(),
            extensions: self.config.extensions.clone(),
            recursive: self.config.recursive,
        };
        let mut files = enumerate(&spec, &self.excluded_paths())?;

        let mut skipped = 0;
        if self.config.skip_logged {
            let logbook = Logbook::new(self.config.log_file.clone());
            match logbook.filter_logged(files.clone()) {
                Ok((remaining, count)) => {
                    files = remaining;
                    skipped = count;
                }
                Err(e) => log::warn!("Cannot read log {:?}, nothing skipped: {}", logbook.path(), e),
            }
        }

        if !quiet {
            let total: u64 = files
                .iter()
                .filter_map(|p| fs::metadata(p).ok())
                .map(|m| m.len())
                .sum();
            print_info(&format!("Found {} files ({} total)", files.len(), ByteSize(total)));
            if skipped > 0 {
                print_info(&format!("Skipped {} files already in the log", skipped));
            }
        }
        if files.is_empty() {
            log::warn!("No input files to merge");
        }

        let sink = match mode {
            RunMode::Create => MasterSink::create(&master_path, format)?,
            RunMode::Add => MasterSink::append(&master_path, format)?,
        };

        let mut checkpoint = Checkpoint::new(
            mode,
            self.config.case_policy,
            MasterState {
                path: master_path,
                format,
                committed_len,
            },
            files.into_iter().map(FileState::new).collect(),
        );
        checkpoint.log_file = self
            .config
            .log_enabled
            .then(|| self.config.log_file.clone());

        Ok(Prepared {
            checkpoint,
            sink,
            skipped,
            resumed: false,
        })
    }

    fn prepare_resume(&self, mut checkpoint: Checkpoint) -> Result<Prepared> {
        let checkpoint_path = self.config.checkpoint_path();
        let master = &checkpoint.master;

        let actual_len = match fs::metadata(&master.path) {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound && master.committed_len == 0 => 0,
            Err(e) => {
                return Err(ListmanError::corrupt_state(
                    &checkpoint_path,
                    format!("master list {:?} is unavailable: {}", master.path, e),
                ))
            }
        };

        if actual_len < master.committed_len {
            return Err(ListmanError::corrupt_state(
                &checkpoint_path,
                format!(
                    "master list {:?} is {} bytes, shorter than the committed {} bytes",
                    master.path, actual_len, master.committed_len
                ),
            ));
        }
        if actual_len > master.committed_len {
            log::warn!(
                "Discarding {} uncommitted bytes from {:?}",
                actual_len - master.committed_len,
                master.path
            );
            truncate(&master.path, master.committed_len)?;
        }

        for file in checkpoint.files.iter_mut().filter(|f| f.is_failed()) {
            file.status = FileStatus::Pending;
        }

        let remaining = checkpoint.incomplete().count();
        log::info!(
            "Resuming {} run: {} of {} files left",
            checkpoint.mode.label(),
            remaining,
            checkpoint.files.len()
        );
        if !self.config.quiet {
            print_header("Resuming saved run...");
            print_info(&format!(
                "{} of {} files left, master at {}",
                remaining,
                checkpoint.files.len(),
                ByteSize(checkpoint.master.committed_len)
            ));
        }

        let sink = MasterSink::append(&checkpoint.master.path, checkpoint.master.format)?;
        Ok(Prepared {
            checkpoint,
            sink,
            skipped: 0,
            resumed: true,
        })
    }

    /// Format of the master list already present in the output directory
    fn existing_master(&self) -> Option<SourceFormat> {
        [SourceFormat::Plain, SourceFormat::Gzip, SourceFormat::Bzip2]
            .into_iter()
            .find(|f| self.config.master_path(*f).is_file())
    }

    /// Our own files, never treated as inputs
    fn excluded_paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = [SourceFormat::Plain, SourceFormat::Gzip, SourceFormat::Bzip2]
            .into_iter()
            .map(|f| self.config.master_path(f))
            .collect();
        paths.push(self.config.checkpoint_path());
        paths.push(self.config.log_file.clone());

        paths
            .iter()
            .filter_map(|p| fs::canonicalize(p).ok())
            .collect()
    }

    fn print_outcome(&self, report: &RunReport) {
        let title = match report.state {
            RunState::Completed => "MERGE COMPLETE",
            RunState::Paused => "MERGE PAUSED",
            _ => "MERGE FAILED",
        };
        report.stats.print_summary(title, report.master_len);

        if !report.failures.is_empty() {
            print_header("Files that could not be merged");
            for failure in &report.failures {
                print_bullet(&format!("{:?}: {}", failure.path, failure.reason));
            }
        }

        match report.state {
            RunState::Completed => print_success(&format!("Master list: {:?}", report.master_path)),
            RunState::Paused => print_warning("Run paused, continue with --resume"),
            _ => {}
        }
    }
}

/// Load every entry of the master list into the index. Also reports whether the
/// list ends with a newline.
fn rehydrate(
    index: &dyn Deduplicator,
    master: &MasterState,
    case_policy: CasePolicy,
) -> Result<(u64, bool)> {
    let unreadable = |e: ListmanError| match e {
        ListmanError::Format { reason, .. } => {
            ListmanError::corrupt_state(&master.path, format!("master list is unreadable: {}", reason))
        }
        other => other,
    };

    let mut reader = LineReader::open(&master.path, master.format, 0).map_err(unreadable)?;
    let mut loaded = 0;
    while let Some(line) = reader.next_line().map_err(unreadable)? {
        if let Some(entry) = normalize(&line, case_policy) {
            if index.try_add(&entry) {
                loaded += 1;
            }
        }
    }

    log::info!("Loaded {} entries from {:?}", loaded, master.path);
    Ok((loaded, reader.ends_with_newline()))
}

fn truncate(path: &Path, len: u64) -> Result<()> {
    let file = OpenOptions::new()
        .write(true)
        .open(path)
        .map_err(|e| ListmanError::io(format!("failed to open {}", path.display()), e))?;
    file.set_len(len)
        .and_then(|_| file.sync_all())
        .map_err(|e| ListmanError::io(format!("failed to truncate {}", path.display()), e))
}

fn panicked(what: &str) -> ListmanError {
    ListmanError::io(
        format!("{} thread panicked", what),
        std::io::Error::new(std::io::ErrorKind::Other, "thread panicked"),
    )
}
