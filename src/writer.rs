//! Merge writer
//!
//! The single consumer of accepted entries and the only writer of the master file.
//! Entries are appended in batches; a commit makes everything received so far
//! durable and publishes the file progress markers that arrived with it.
//!
//! Compressed masters are written as a sequence of complete gzip/bz2 members, one
//! per commit, so every committed prefix of the file is a valid stream.

use crate::checkpoint::FileStatus;
use crate::error::{ListmanError, Result};
use crate::source::SourceFormat;

use bzip2::write::BzEncoder;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use flate2::write::GzEncoder;
use hashbrown::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Default buffer size for the master file (8MB)
const DEFAULT_BUFFER_SIZE: usize = 8 * 1024 * 1024;

/// Messages from workers. Each worker's messages arrive in the order it sent them,
/// so a progress marker always follows the entries it covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriterMessage {
    /// A normalized entry accepted by the dedup index
    Entry(String),
    /// All entries of `file` up to `offset` have been sent
    Progress { file: usize, offset: u64, accepted: u64 },
    /// `file` was read to the end
    Finished { file: usize, offset: u64, accepted: u64 },
    /// `file` could not be read any further
    Failed { file: usize, offset: u64, accepted: u64, reason: String },
}

/// Last known position of a file, as of a commit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileProgress {
    pub offset: u64,
    pub accepted: u64,
    pub status: FileStatus,
}

/// Published after every commit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitSnapshot {
    /// Master file length after the commit
    pub master_len: u64,
    /// Files whose progress changed since the previous commit
    pub files: Vec<(usize, FileProgress)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitPolicy {
    pub batch_lines: usize,
    pub interval: Duration,
}

impl Default for CommitPolicy {
    fn default() -> Self {
        Self {
            batch_lines: 100_000,
            interval: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriterReport {
    pub entries_written: u64,
    pub commits: u64,
    pub master_len: u64,
}

#[derive(Debug, Clone, Copy)]
enum Codec {
    Gzip,
    Bzip2,
}

enum Member {
    Gzip(GzEncoder<BufWriter<File>>),
    Bzip2(BzEncoder<BufWriter<File>>),
}

impl Member {
    fn start(codec: Codec, out: BufWriter<File>) -> Self {
        match codec {
            Codec::Gzip => Self::Gzip(GzEncoder::new(out, flate2::Compression::default())),
            Codec::Bzip2 => Self::Bzip2(BzEncoder::new(out, bzip2::Compression::default())),
        }
    }

    fn writer(&mut self) -> &mut dyn Write {
        match self {
            Self::Gzip(enc) => enc,
            Self::Bzip2(enc) => enc,
        }
    }

    fn finish(self) -> io::Result<BufWriter<File>> {
        match self {
            Self::Gzip(enc) => enc.finish(),
            Self::Bzip2(enc) => enc.finish(),
        }
    }
}

/// Append-only master file in one of the three formats
pub struct MasterSink {
    path: PathBuf,
    codec: Option<Codec>,
    out: Option<BufWriter<File>>,
    member: Option<Member>,
    /// The existing content lacks a final newline; emit one before the next entry
    separator_pending: bool,
}

impl MasterSink {
    /// Create or truncate the master file
    pub fn create(path: &Path, format: SourceFormat) -> Result<Self> {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .map_err(|e| ListmanError::io(format!("failed to create master file {}", path.display()), e))?;
        Ok(Self::from_file(path, format, file))
    }

    /// Open an existing master file for appending
    pub fn append(path: &Path, format: SourceFormat) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| ListmanError::io(format!("failed to open master file {}", path.display()), e))?;
        Ok(Self::from_file(path, format, file))
    }

    fn from_file(path: &Path, format: SourceFormat, file: File) -> Self {
        let codec = match format {
            SourceFormat::Plain => None,
            SourceFormat::Gzip => Some(Codec::Gzip),
            SourceFormat::Bzip2 => Some(Codec::Bzip2),
        };

        Self {
            path: path.to_path_buf(),
            codec,
            out: Some(BufWriter::with_capacity(DEFAULT_BUFFER_SIZE, file)),
            member: None,
            separator_pending: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Start the next entry on a new line. For a compressed master the newline
    /// opens the next member.
    pub fn terminate_last_line(&mut self) {
        self.separator_pending = true;
    }

    /// Write one entry followed by a newline
    pub fn write_line(&mut self, line: &str) -> io::Result<()> {
        if let Some(codec) = self.codec {
            if self.member.is_none() {
                let out = self.out.take().ok_or_else(poisoned)?;
                self.member = Some(Member::start(codec, out));
            }
        }

        let writer: &mut dyn Write = match (&mut self.member, &mut self.out) {
            (Some(member), _) => member.writer(),
            (None, Some(out)) => out,
            (None, None) => return Err(poisoned()),
        };
        if self.separator_pending {
            writer.write_all(b"\n")?;
            self.separator_pending = false;
        }
        writer.write_all(line.as_bytes())?;
        writer.write_all(b"\n")
    }

    /// Close the open member, flush and sync. Returns the file length.
    pub fn commit(&mut self) -> io::Result<u64> {
        if let Some(member) = self.member.take() {
            self.out = Some(member.finish()?);
        }

        let out = self.out.as_mut().ok_or_else(poisoned)?;
        out.flush()?;
        out.get_ref().sync_data()?;
        Ok(out.get_ref().metadata()?.len())
    }
}

fn poisoned() -> io::Error {
    io::Error::new(io::ErrorKind::Other, "master file unusable after an earlier write error")
}

/// Single consumer draining the bounded entry channel into the master file
pub struct MergeWriter {
    sink: MasterSink,
    rx: Receiver<WriterMessage>,
    commits: Sender<CommitSnapshot>,
    policy: CommitPolicy,
    pending: HashMap<usize, FileProgress>,
    uncommitted: usize,
    report: WriterReport,
}

impl MergeWriter {
    pub fn new(
        sink: MasterSink,
        rx: Receiver<WriterMessage>,
        commits: Sender<CommitSnapshot>,
        policy: CommitPolicy,
    ) -> Self {
        Self {
            sink,
            rx,
            commits,
            policy,
            pending: HashMap::new(),
            uncommitted: 0,
            report: WriterReport::default(),
        }
    }

    /// Drain the channel until every worker has hung up, then commit a last time
    pub fn run(mut self) -> Result<WriterReport> {
        let mut deadline = Instant::now() + self.policy.interval;

        loop {
            let timeout = deadline.saturating_duration_since(Instant::now());
            match self.rx.recv_timeout(timeout) {
                Ok(message) => {
                    self.apply(message)?;
                    if self.uncommitted >= self.policy.batch_lines {
                        self.commit()?;
                        deadline = Instant::now() + self.policy.interval;
                    }
                }
                Err(RecvTimeoutError::Timeout) => {
                    if self.is_dirty() {
                        self.commit()?;
                    }
                    deadline = Instant::now() + self.policy.interval;
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        self.commit()?;
        log::debug!(
            "Merge writer done: {} entries, {} commits",
            self.report.entries_written,
            self.report.commits
        );
        Ok(self.report)
    }

    fn apply(&mut self, message: WriterMessage) -> Result<()> {
        match message {
            WriterMessage::Entry(line) => {
                self.sink.write_line(&line).map_err(|e| {
                    ListmanError::io(format!("failed to write master file {}", self.sink.path().display()), e)
                })?;
                self.uncommitted += 1;
                self.report.entries_written += 1;
            }
            WriterMessage::Progress { file, offset, accepted } => {
                self.record(file, offset, accepted, FileStatus::Pending);
            }
            WriterMessage::Finished { file, offset, accepted } => {
                self.record(file, offset, accepted, FileStatus::Completed);
            }
            WriterMessage::Failed {
                file,
                offset,
                accepted,
                reason,
            } => {
                self.record(file, offset, accepted, FileStatus::Failed { reason });
            }
        }
        Ok(())
    }

    fn record(&mut self, file: usize, offset: u64, accepted: u64, status: FileStatus) {
        self.pending.insert(
            file,
            FileProgress {
                offset,
                accepted,
                status,
            },
        );
    }

    fn is_dirty(&self) -> bool {
        self.uncommitted > 0 || !self.pending.is_empty()
    }

    fn commit(&mut self) -> Result<()> {
        let master_len = self.sink.commit().map_err(|e| {
            ListmanError::io(format!("failed to commit master file {}", self.sink.path().display()), e)
        })?;

        self.uncommitted = 0;
        self.report.commits += 1;
        self.report.master_len = master_len;

        let snapshot = CommitSnapshot {
            master_len,
            files: self.pending.drain().collect(),
        };
        if self.commits.send(snapshot).is_err() {
            log::warn!("State tracker is gone, commit at {} bytes not recorded", master_len);
        }
        Ok(())
    }
}
