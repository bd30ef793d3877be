//! Error taxonomy for a merge run
//!
//! Per-file problems (`Format`) are collected and reported; everything else aborts
//! the run or its startup.

use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ListmanError {
    /// A requested file or folder is missing or unreadable
    #[error("cannot enumerate {path:?}: {reason}")]
    Enumeration { path: PathBuf, reason: String },

    /// A source file could not be opened or read
    #[error("cannot read {path:?}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Compression magic mismatch or corrupt stream in a source file
    #[error("format error in {path:?}: {reason}")]
    Format { path: PathBuf, reason: String },

    /// I/O failure on the master file, checkpoint, or another resource
    #[error("{context}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },

    /// The resume checkpoint cannot be trusted; discard it and start over
    #[error("corrupt resume state {path:?}: {reason} (delete it to start a fresh run)")]
    CorruptState { path: PathBuf, reason: String },

    /// Invalid combination of options
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl ListmanError {
    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    pub fn format(path: &Path, reason: impl Into<String>) -> Self {
        Self::Format {
            path: path.to_path_buf(),
            reason: reason.into(),
        }
    }

    pub fn unreadable(path: &Path, source: io::Error) -> Self {
        Self::Unreadable {
            path: path.to_path_buf(),
            source,
        }
    }

    pub fn enumeration(path: &Path, reason: impl Into<String>) -> Self {
        Self::Enumeration {
            path: path.to_path_buf(),
            reason: reason.into(),
        }
    }

    pub fn corrupt_state(path: &Path, reason: impl Into<String>) -> Self {
        Self::CorruptState {
            path: path.to_path_buf(),
            reason: reason.into(),
        }
    }

    /// Whether the error only affects a single source file
    pub fn is_per_file(&self) -> bool {
        matches!(self, Self::Format { .. } | Self::Unreadable { .. })
    }
}

pub type Result<T> = std::result::Result<T, ListmanError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_per_file_classification() {
        let format = ListmanError::format(Path::new("a.gz"), "bad magic");
        assert!(format.is_per_file());

        let unreadable = ListmanError::unreadable(
            Path::new("locked.txt"),
            io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        );
        assert!(unreadable.is_per_file());

        let io = ListmanError::io("write master", io::Error::new(io::ErrorKind::Other, "disk full"));
        assert!(!io.is_per_file());
        assert_eq!(io.to_string(), "write master");
    }

    #[test]
    fn test_corrupt_state_message_mentions_path() {
        let err = ListmanError::corrupt_state(Path::new("resume_state.json"), "unexpected EOF");
        let msg = err.to_string();
        assert!(msg.contains("resume_state.json"));
        assert!(msg.contains("unexpected EOF"));
    }
}
