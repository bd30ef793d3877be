//! Log of completed files
//!
//! One human-readable line per file that was fully merged:
//!
//! ```text
//! 2024-05-01T12:00:00+02:00 | CREATE | /lists/rockyou.txt | 139921497:1714557600 | 14344391 words
//! ```
//!
//! Lines written by older versions have no fingerprint column and match on path alone.

use crate::cli::RunMode;

use chrono::{DateTime, Local};
use hashbrown::HashMap;
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

/// Default log file name
pub const LOG_FILE: &str = "listman.log";

/// Cheap identity of a file's content: size and modification time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    pub size: u64,
    pub modified: u64,
}

impl Fingerprint {
    /// Fingerprint from metadata only; the file is never opened
    pub fn of(path: &Path) -> std::io::Result<Self> {
        let meta = fs::metadata(path)?;
        let modified = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map_or(0, |d| d.as_secs());
        Ok(Self {
            size: meta.len(),
            modified,
        })
    }

    fn parse(s: &str) -> Option<Self> {
        let (size, modified) = s.trim().split_once(':')?;
        Some(Self {
            size: size.parse().ok()?,
            modified: modified.parse().ok()?,
        })
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.size, self.modified)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub timestamp: DateTime<Local>,
    pub action: RunMode,
    pub path: PathBuf,
    pub fingerprint: Option<Fingerprint>,
    pub words: u64,
}

impl LogRecord {
    pub fn new(action: RunMode, path: &Path, words: u64) -> Self {
        Self {
            timestamp: Local::now(),
            action,
            path: path.to_path_buf(),
            fingerprint: Fingerprint::of(path).ok(),
            words,
        }
    }

    fn to_line(&self) -> String {
        let fingerprint = self
            .fingerprint
            .map_or_else(|| "-".to_string(), |f| f.to_string());
        format!(
            "{} | {:<6} | {} | {} | {} words",
            self.timestamp.to_rfc3339(),
            self.action.label(),
            self.path.display(),
            fingerprint,
            self.words
        )
    }

    /// Parse a log line; `None` for lines that are not records
    fn parse(line: &str) -> Option<Self> {
        let parts: Vec<&str> = line.trim().split(" | ").collect();
        if parts.len() < 3 {
            return None;
        }

        let timestamp = DateTime::parse_from_rfc3339(parts[0].trim())
            .map(|t| t.with_timezone(&Local))
            .or_else(|_| {
                chrono::NaiveDateTime::parse_from_str(parts[0].trim(), "%Y-%m-%dT%H:%M:%S%.f")
                    .map(|t| t.and_local_timezone(Local).single().unwrap_or_else(Local::now))
            })
            .ok()?;
        let action = match parts[1].trim() {
            "CREATE" => RunMode::Create,
            "ADD" => RunMode::Add,
            _ => return None,
        };
        let path = PathBuf::from(parts[2].trim());
        if path.as_os_str().is_empty() {
            return None;
        }

        // Four columns is the legacy layout: path then word count
        let (fingerprint, words_col) = match parts.len() {
            3 => (None, None),
            4 => (None, Some(parts[3])),
            _ => (Fingerprint::parse(parts[3]), Some(parts[4])),
        };
        let words = words_col
            .and_then(|w| w.trim().trim_end_matches("words").trim().parse().ok())
            .unwrap_or(0);

        Some(Self {
            timestamp,
            action,
            path,
            fingerprint,
            words,
        })
    }
}

/// Files already recorded in the log
#[derive(Debug, Default)]
pub struct LoggedFiles {
    by_path: HashMap<PathBuf, Vec<Option<Fingerprint>>>,
}

impl LoggedFiles {
    /// Whether `path` with this fingerprint was already merged
    pub fn contains(&self, path: &Path, fingerprint: Option<Fingerprint>) -> bool {
        let Some(seen) = self.by_path.get(path) else {
            return false;
        };
        seen.iter().any(|logged| match (logged, fingerprint) {
            (None, _) => true,
            (Some(logged), Some(current)) => *logged == current,
            (Some(_), None) => false,
        })
    }

    pub fn len(&self) -> usize {
        self.by_path.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_path.is_empty()
    }
}

/// Append-only log of completed files
#[derive(Debug, Clone)]
pub struct Logbook {
    path: PathBuf,
}

impl Logbook {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append records in one write
    pub fn append(&self, records: &[LogRecord]) -> std::io::Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let mut writer = BufWriter::new(file);
        for record in records {
            writeln!(writer, "{}", record.to_line())?;
        }
        writer.flush()
    }

    /// Read all records. A missing log is empty.
    pub fn records(&self) -> std::io::Result<Vec<LogRecord>> {
        let content = match fs::read(&self.path) {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        Ok(content.lines().filter_map(LogRecord::parse).collect())
    }

    /// Index records by path. Paths that still exist are canonicalized so that
    /// relative or symlinked entries match enumerated files.
    pub fn load(&self) -> std::io::Result<LoggedFiles> {
        let mut logged = LoggedFiles::default();
        for record in self.records()? {
            let path = fs::canonicalize(&record.path).unwrap_or(record.path);
            logged
                .by_path
                .entry(path)
                .or_default()
                .push(record.fingerprint);
        }
        Ok(logged)
    }

    /// Drop files already logged. Only metadata is read; skipped files are never opened.
    pub fn filter_logged(&self, files: Vec<PathBuf>) -> std::io::Result<(Vec<PathBuf>, usize)> {
        let logged = self.load()?;
        if logged.is_empty() {
            return Ok((files, 0));
        }

        let before = files.len();
        let remaining: Vec<PathBuf> = files
            .into_iter()
            .filter(|path| {
                let skip = logged.contains(path, Fingerprint::of(path).ok());
                if skip {
                    log::debug!("Skipping logged file {:?}", path);
                }
                !skip
            })
            .collect();
        let skipped = before - remaining.len();
        Ok((remaining, skipped))
    }
}
