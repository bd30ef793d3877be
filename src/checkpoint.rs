//! Resume checkpoint
//!
//! `resume_state.json` is replaced atomically (temp file, fsync, rename), so a
//! reader always sees either the previous snapshot or the new one.

use crate::cli::{CasePolicy, RunMode};
use crate::error::{ListmanError, Result};
use crate::source::SourceFormat;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Schema version written by this build
pub const CHECKPOINT_VERSION: u32 = 1;

/// Default checkpoint file name
pub const CHECKPOINT_FILE: &str = "resume_state.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointStatus {
    Processing,
    Paused,
    Failed,
}

/// Progress of one source file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum FileStatus {
    Pending,
    Completed,
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileState {
    pub path: PathBuf,
    pub format: SourceFormat,
    /// Decoded bytes whose entries are committed to the master file
    pub offset: u64,
    pub accepted: u64,
    pub status: FileStatus,
}

impl FileState {
    pub fn new(path: PathBuf) -> Self {
        let format = SourceFormat::from_path(&path);
        Self {
            path,
            format,
            offset: 0,
            accepted: 0,
            status: FileStatus::Pending,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == FileStatus::Completed
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.status, FileStatus::Failed { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MasterState {
    pub path: PathBuf,
    pub format: SourceFormat,
    /// Master file length at the last commit
    pub committed_len: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub version: u32,
    pub mode: RunMode,
    pub status: CheckpointStatus,
    pub case_policy: CasePolicy,
    pub updated_at: DateTime<Utc>,
    pub master: MasterState,
    /// Log of completed files, if the run keeps one
    #[serde(default)]
    pub log_file: Option<PathBuf>,
    pub files: Vec<FileState>,
}

#[derive(Deserialize)]
struct VersionHeader {
    version: u32,
}

impl Checkpoint {
    pub fn new(mode: RunMode, case_policy: CasePolicy, master: MasterState, files: Vec<FileState>) -> Self {
        Self {
            version: CHECKPOINT_VERSION,
            mode,
            status: CheckpointStatus::Processing,
            case_policy,
            updated_at: Utc::now(),
            master,
            log_file: None,
            files,
        }
    }

    /// Files that still need work (pending, partially read, or failed earlier)
    pub fn incomplete(&self) -> impl Iterator<Item = (usize, &FileState)> {
        self.files.iter().enumerate().filter(|(_, f)| !f.is_completed())
    }

    /// Whether any file is neither completed nor recorded as failed
    pub fn has_unfinished(&self) -> bool {
        self.files.iter().any(|f| f.status == FileStatus::Pending)
    }

    /// Write atomically to `path`
    pub fn persist(&mut self, path: &Path) -> Result<()> {
        self.updated_at = Utc::now();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .map_err(|e| ListmanError::io(format!("failed to create {}", parent.display()), e))?;
        }

        let bytes = serde_json::to_vec_pretty(self).map_err(|e| {
            ListmanError::io("failed to serialize checkpoint", std::io::Error::other(e))
        })?;

        let tmp = path.with_extension("json.tmp");
        let write_tmp = || -> std::io::Result<()> {
            let mut file = File::create(&tmp)?;
            file.write_all(&bytes)?;
            file.sync_all()
        };
        write_tmp().map_err(|e| ListmanError::io(format!("failed to write {}", tmp.display()), e))?;

        fs::rename(&tmp, path).map_err(|e| {
            ListmanError::io(
                format!("failed to move {} to {}", tmp.display(), path.display()),
                e,
            )
        })?;

        log::debug!("Checkpoint persisted to {:?} ({:?})", path, self.status);
        Ok(())
    }

    /// Load a checkpoint. `Ok(None)` if there is none.
    pub fn load(path: &Path) -> Result<Option<Self>> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(ListmanError::corrupt_state(path, format!("unreadable: {}", e))),
        };

        let header: VersionHeader = serde_json::from_slice(&bytes)
            .map_err(|e| ListmanError::corrupt_state(path, format!("malformed: {}", e)))?;
        if header.version == 0 || header.version > CHECKPOINT_VERSION {
            return Err(ListmanError::corrupt_state(
                path,
                format!("unsupported schema version {}", header.version),
            ));
        }

        let checkpoint: Self = serde_json::from_slice(&bytes)
            .map_err(|e| ListmanError::corrupt_state(path, format!("malformed: {}", e)))?;
        Ok(Some(checkpoint))
    }

    /// Remove the checkpoint after a completed run
    pub fn clear(path: &Path) -> Result<()> {
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ListmanError::io(format!("failed to remove {}", path.display()), e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample() -> Checkpoint {
        let mut done = FileState::new(PathBuf::from("/lists/a.txt"));
        done.status = FileStatus::Completed;
        done.offset = 120;
        done.accepted = 10;

        let mut partial = FileState::new(PathBuf::from("/lists/b.txt.gz"));
        partial.offset = 64;

        let mut broken = FileState::new(PathBuf::from("/lists/c.bz2"));
        broken.status = FileStatus::Failed {
            reason: "corrupt stream".to_string(),
        };

        Checkpoint::new(
            RunMode::Create,
            CasePolicy::Preserve,
            MasterState {
                path: PathBuf::from("master_wordlist.txt"),
                format: SourceFormat::Plain,
                committed_len: 42,
            },
            vec![done, partial, broken],
        )
    }

    #[test]
    fn test_persist_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CHECKPOINT_FILE);

        let mut checkpoint = sample();
        checkpoint.log_file = Some(PathBuf::from("/var/log/listman.log"));
        checkpoint.persist(&path).unwrap();
        assert!(!path.with_extension("json.tmp").exists());

        let loaded = Checkpoint::load(&path).unwrap().unwrap();
        assert_eq!(loaded.version, CHECKPOINT_VERSION);
        assert_eq!(loaded.files, checkpoint.files);
        assert_eq!(loaded.master.committed_len, 42);
        assert_eq!(loaded.files[1].format, SourceFormat::Gzip);
        assert_eq!(loaded.log_file, checkpoint.log_file);
    }

    #[test]
    fn test_incomplete_includes_failed() {
        let checkpoint = sample();
        let ids: Vec<usize> = checkpoint.incomplete().map(|(id, _)| id).collect();
        assert_eq!(ids, vec![1, 2]);
        assert!(checkpoint.has_unfinished());
    }

    #[test]
    fn test_missing_checkpoint() {
        let dir = TempDir::new().unwrap();
        assert!(Checkpoint::load(&dir.path().join(CHECKPOINT_FILE)).unwrap().is_none());
    }

    #[test]
    fn test_malformed_checkpoint_is_corrupt_state() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CHECKPOINT_FILE);
        std::fs::write(&path, b"{\"version\": 1, \"mode\": ").unwrap();

        let err = Checkpoint::load(&path).unwrap_err();
        assert!(matches!(err, ListmanError::CorruptState { .. }));
    }

    #[test]
    fn test_future_version_is_corrupt_state() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CHECKPOINT_FILE);
        std::fs::write(&path, b"{\"version\": 99}").unwrap();

        let err = Checkpoint::load(&path).unwrap_err();
        assert!(err.to_string().contains("unsupported schema version 99"));
    }

    #[test]
    fn test_clear() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CHECKPOINT_FILE);
        sample().persist(&path).unwrap();

        Checkpoint::clear(&path).unwrap();
        assert!(!path.exists());
        Checkpoint::clear(&path).unwrap();
    }
}
