//! Run state machine and checkpoint keeper
//!
//! The tracker only ever sees committed progress: it receives a snapshot from the
//! merge writer after each durable flush, folds it into the checkpoint, logs the
//! files that just completed and persists the checkpoint.

use crate::checkpoint::{Checkpoint, CheckpointStatus, FileStatus};
use crate::error::{ListmanError, Result};
use crate::logbook::{LogRecord, Logbook};
use crate::pause::PauseToken;
use crate::writer::CommitSnapshot;

use crossbeam_channel::Receiver;
use std::fmt;
use std::path::{Path, PathBuf};

/// Exit code for a paused run that is safe to resume (EX_TEMPFAIL)
pub const EXIT_PAUSED: i32 = 75;
/// Exit code for fatal enumeration or I/O failures
pub const EXIT_FAILED: i32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Enumerating,
    Processing,
    Paused,
    Completed,
    Failed,
}

impl RunState {
    pub fn can_transition_to(self, next: RunState) -> bool {
        use RunState::*;
        matches!(
            (self, next),
            (Idle, Enumerating)
                | (Idle, Failed)
                | (Enumerating, Processing)
                | (Enumerating, Failed)
                | (Processing, Paused)
                | (Processing, Completed)
                | (Processing, Failed)
                | (Paused, Processing)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Paused | Self::Completed | Self::Failed)
    }

    pub fn exit_code(self) -> i32 {
        match self {
            Self::Completed => 0,
            Self::Paused => EXIT_PAUSED,
            _ => EXIT_FAILED,
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Enumerating => "enumerating",
            Self::Processing => "processing",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// A file that could not be merged in this session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedFile {
    pub path: PathBuf,
    pub reason: String,
}

pub struct StateTracker {
    state: RunState,
    checkpoint_path: PathBuf,
    checkpoint: Option<Checkpoint>,
    logbook: Option<Logbook>,
    failures: Vec<FailedFile>,
    fatal: Option<ListmanError>,
}

impl StateTracker {
    pub fn new(checkpoint_path: PathBuf, logbook: Option<Logbook>) -> Self {
        Self {
            state: RunState::Idle,
            checkpoint_path,
            checkpoint: None,
            logbook,
            failures: Vec::new(),
            fatal: None,
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn checkpoint_path(&self) -> &Path {
        &self.checkpoint_path
    }

    pub fn failures(&self) -> &[FailedFile] {
        &self.failures
    }

    /// Where completed files are logged; `None` disables logging
    pub fn set_logbook(&mut self, logbook: Option<Logbook>) {
        self.logbook = logbook;
    }

    pub fn transition(&mut self, next: RunState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(ListmanError::Config(format!(
                "illegal run state transition {} -> {}",
                self.state, next
            )));
        }
        log::info!("Run state: {} -> {}", self.state, next);
        self.state = next;
        Ok(())
    }

    /// Take ownership of the run's checkpoint and persist it as the starting point
    pub fn install(&mut self, mut checkpoint: Checkpoint) -> Result<()> {
        checkpoint.status = CheckpointStatus::Processing;
        checkpoint.persist(&self.checkpoint_path)?;
        self.checkpoint = Some(checkpoint);
        Ok(())
    }

    /// Fold one commit into the checkpoint, log completions, persist
    pub fn apply(&mut self, snapshot: CommitSnapshot) -> Result<()> {
        let checkpoint = self
            .checkpoint
            .as_mut()
            .ok_or_else(|| ListmanError::Config("commit received before a checkpoint was installed".into()))?;

        checkpoint.master.committed_len = snapshot.master_len;

        let mut records = Vec::new();
        for (id, progress) in snapshot.files {
            let Some(file) = checkpoint.files.get_mut(id) else {
                log::warn!("Commit references unknown file #{}", id);
                continue;
            };

            let newly_completed = progress.status == FileStatus::Completed && !file.is_completed();
            if let FileStatus::Failed { reason } = &progress.status {
                self.failures.push(FailedFile {
                    path: file.path.clone(),
                    reason: reason.clone(),
                });
            }

            file.offset = progress.offset;
            file.accepted = progress.accepted;
            file.status = progress.status;

            if newly_completed {
                log::info!("Merged {:?} ({} new entries)", file.path, file.accepted);
                if self.logbook.is_some() {
                    records.push(LogRecord::new(checkpoint.mode, &file.path, file.accepted));
                }
            }
        }

        if let Some(logbook) = &self.logbook {
            if let Err(e) = logbook.append(&records) {
                log::warn!("Failed to append to log {:?}: {}", logbook.path(), e);
            }
        }

        checkpoint.status = CheckpointStatus::Processing;
        checkpoint.persist(&self.checkpoint_path)
    }

    /// Event loop: apply commits until the merge writer hangs up. A persistence
    /// failure stops the workers through the pause token and fails the run later.
    pub fn run(&mut self, commits: Receiver<CommitSnapshot>, pause: &PauseToken) {
        for snapshot in commits.iter() {
            if self.fatal.is_some() {
                continue;
            }
            if let Err(e) = self.apply(snapshot) {
                log::error!("Checkpoint update failed: {}", e);
                self.fatal = Some(e);
                pause.request();
            }
        }
    }

    /// Decide the terminal state once workers and writer have stopped
    pub fn finish(&mut self, pipeline: Result<()>) -> Result<RunState> {
        if let Err(e) = pipeline {
            self.fatal.get_or_insert(e);
        }
        if let Some(err) = self.fatal.take() {
            self.fail();
            return Err(err);
        }

        let unfinished = self
            .checkpoint
            .as_ref()
            .map_or(false, Checkpoint::has_unfinished);

        if unfinished {
            self.transition(RunState::Paused)?;
            if let Err(e) = self.persist_with(CheckpointStatus::Paused) {
                self.fail();
                return Err(e);
            }
        } else {
            self.transition(RunState::Completed)?;
            Checkpoint::clear(&self.checkpoint_path)?;
        }

        Ok(self.state)
    }

    /// Move to `Failed`, flushing the checkpoint one last time if there is one
    pub fn fail(&mut self) {
        if self.state.can_transition_to(RunState::Failed) {
            self.state = RunState::Failed;
        }
        if self.checkpoint.is_some() {
            if let Err(e) = self.persist_with(CheckpointStatus::Failed) {
                log::error!("Final checkpoint flush failed: {}", e);
            }
        }
    }

    fn persist_with(&mut self, status: CheckpointStatus) -> Result<()> {
        match self.checkpoint.as_mut() {
            Some(checkpoint) => {
                checkpoint.status = status;
                checkpoint.persist(&self.checkpoint_path)
            }
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::{FileState, MasterState, CHECKPOINT_FILE};
    use crate::cli::{CasePolicy, RunMode};
    use crate::logbook::LOG_FILE;
    use crate::source::SourceFormat;
    use crate::writer::FileProgress;
    use tempfile::TempDir;

    fn checkpoint(dir: &Path) -> Checkpoint {
        let a = dir.join("a.txt");
        let b = dir.join("b.txt");
        std::fs::write(&a, "x\n").unwrap();
        std::fs::write(&b, "y\n").unwrap();

        Checkpoint::new(
            RunMode::Create,
            CasePolicy::Preserve,
            MasterState {
                path: dir.join("master_wordlist.txt"),
                format: SourceFormat::Plain,
                committed_len: 0,
            },
            vec![FileState::new(a), FileState::new(b)],
        )
    }

    fn processing_tracker(dir: &Path, logbook: Option<Logbook>) -> StateTracker {
        let mut tracker = StateTracker::new(dir.join(CHECKPOINT_FILE), logbook);
        tracker.transition(RunState::Enumerating).unwrap();
        tracker.install(checkpoint(dir)).unwrap();
        tracker.transition(RunState::Processing).unwrap();
        tracker
    }

    fn progress(offset: u64, accepted: u64, status: FileStatus) -> FileProgress {
        FileProgress {
            offset,
            accepted,
            status,
        }
    }

    #[test]
    fn test_transitions() {
        use RunState::*;
        assert!(Idle.can_transition_to(Enumerating));
        assert!(Processing.can_transition_to(Paused));
        assert!(Paused.can_transition_to(Processing));
        assert!(!Completed.can_transition_to(Processing));
        assert!(!Idle.can_transition_to(Processing));
        assert!(!Paused.can_transition_to(Completed));

        let mut tracker = StateTracker::new(PathBuf::from(CHECKPOINT_FILE), None);
        assert!(tracker.transition(Processing).is_err());
        assert_eq!(tracker.state(), Idle);
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(RunState::Completed.exit_code(), 0);
        assert_eq!(RunState::Paused.exit_code(), EXIT_PAUSED);
        assert_eq!(RunState::Failed.exit_code(), EXIT_FAILED);
        assert_ne!(EXIT_PAUSED, EXIT_FAILED);
    }

    #[test]
    fn test_apply_logs_only_completed_files() {
        let dir = TempDir::new().unwrap();
        let logbook = Logbook::new(dir.path().join(LOG_FILE));
        let mut tracker = processing_tracker(dir.path(), Some(logbook.clone()));

        tracker
            .apply(CommitSnapshot {
                master_len: 2,
                files: vec![
                    (0, progress(2, 1, FileStatus::Completed)),
                    (1, progress(0, 0, FileStatus::Pending)),
                ],
            })
            .unwrap();

        let records = logbook.records().unwrap();
        assert_eq!(records.len(), 1);
        assert!(records[0].path.ends_with("a.txt"));
        assert_eq!(records[0].words, 1);

        let persisted = Checkpoint::load(tracker.checkpoint_path()).unwrap().unwrap();
        assert_eq!(persisted.master.committed_len, 2);
        assert!(persisted.files[0].is_completed());
        assert!(!persisted.files[1].is_completed());
    }

    #[test]
    fn test_finish_paused_keeps_checkpoint() {
        let dir = TempDir::new().unwrap();
        let mut tracker = processing_tracker(dir.path(), None);

        tracker
            .apply(CommitSnapshot {
                master_len: 2,
                files: vec![(0, progress(2, 1, FileStatus::Completed))],
            })
            .unwrap();

        assert_eq!(tracker.finish(Ok(())).unwrap(), RunState::Paused);
        let persisted = Checkpoint::load(tracker.checkpoint_path()).unwrap().unwrap();
        assert_eq!(persisted.status, CheckpointStatus::Paused);
    }

    #[test]
    fn test_finish_completed_clears_checkpoint() {
        let dir = TempDir::new().unwrap();
        let mut tracker = processing_tracker(dir.path(), None);

        tracker
            .apply(CommitSnapshot {
                master_len: 2,
                files: vec![
                    (0, progress(2, 1, FileStatus::Completed)),
                    (
                        1,
                        progress(0, 0, FileStatus::Failed {
                            reason: "corrupt stream".into(),
                        }),
                    ),
                ],
            })
            .unwrap();

        assert_eq!(tracker.finish(Ok(())).unwrap(), RunState::Completed);
        assert!(!tracker.checkpoint_path().exists());
        assert_eq!(tracker.failures().len(), 1);
    }

    #[test]
    fn test_finish_failed_flushes_checkpoint() {
        let dir = TempDir::new().unwrap();
        let mut tracker = processing_tracker(dir.path(), None);

        let err = tracker
            .finish(Err(ListmanError::io(
                "failed to write master file",
                std::io::Error::new(std::io::ErrorKind::Other, "no space left on device"),
            )))
            .unwrap_err();

        assert!(matches!(err, ListmanError::Io { .. }));
        assert_eq!(tracker.state(), RunState::Failed);
        let persisted = Checkpoint::load(tracker.checkpoint_path()).unwrap().unwrap();
        assert_eq!(persisted.status, CheckpointStatus::Failed);
    }

    #[test]
    fn test_persist_failure_pauses_workers_and_fails_run() {
        let dir = TempDir::new().unwrap();
        let state_dir = dir.path().join("state");
        let mut tracker = StateTracker::new(state_dir.join(CHECKPOINT_FILE), None);
        tracker.transition(RunState::Enumerating).unwrap();
        tracker.install(checkpoint(dir.path())).unwrap();
        tracker.transition(RunState::Processing).unwrap();

        // The checkpoint's directory turns into a regular file
        std::fs::remove_dir_all(&state_dir).unwrap();
        std::fs::write(&state_dir, "not a directory").unwrap();

        let (tx, rx) = crossbeam_channel::unbounded();
        for len in [2, 4] {
            tx.send(CommitSnapshot {
                master_len: len,
                files: vec![(0, progress(len, len / 2, FileStatus::Pending))],
            })
            .unwrap();
        }
        drop(tx);

        let pause = PauseToken::new();
        tracker.run(rx, &pause);
        assert!(pause.is_requested());

        let err = tracker.finish(Ok(())).unwrap_err();
        assert!(matches!(err, ListmanError::Io { .. }));
        assert_eq!(tracker.state(), RunState::Failed);
    }
}
