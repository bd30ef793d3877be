//! Work queue of source files waiting to be ingested

use crate::pause::PauseToken;
use crate::source::SourceFormat;

use crossbeam_channel::{unbounded, Receiver, Sender};
use std::path::PathBuf;

/// A source file handed to exactly one worker at a time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    /// Index into the checkpoint's file table
    pub id: usize,
    pub path: PathBuf,
    /// Declared format; verified against magic bytes when opened
    pub format: SourceFormat,
    /// Decoded bytes already reflected in the master file
    pub offset: u64,
    /// Entries this file contributed so far
    pub accepted: u64,
}

/// Thread-safe FIFO of source files
pub struct WorkQueue {
    tx: Option<Sender<SourceFile>>,
    rx: Receiver<SourceFile>,
}

impl WorkQueue {
    pub fn new() -> Self {
        let (tx, rx) = unbounded();
        Self { tx: Some(tx), rx }
    }

    /// Build a queue holding `files`, already closed
    pub fn from_files(files: impl IntoIterator<Item = SourceFile>) -> Self {
        let mut queue = Self::new();
        for file in files {
            queue.push(file);
        }
        queue.close();
        queue
    }

    /// Enqueue a file. Ignored once the queue is closed.
    pub fn push(&self, file: SourceFile) {
        if let Some(tx) = &self.tx {
            // The receiver lives as long as the queue, so this cannot fail
            let _ = tx.send(file);
        }
    }

    /// No more files will be pushed; workers exit once the queue drains
    pub fn close(&mut self) {
        self.tx = None;
    }

    /// Take the next file. Blocks while the queue is open and empty.
    /// Returns `None` when drained and closed, or when a pause was requested.
    pub fn pop(&self, pause: &PauseToken) -> Option<SourceFile> {
        if pause.is_requested() {
            return None;
        }
        self.rx.recv().ok()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }
}

impl Default for WorkQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(id: usize) -> SourceFile {
        SourceFile {
            id,
            path: PathBuf::from(format!("list{}.txt", id)),
            format: SourceFormat::Plain,
            offset: 0,
            accepted: 0,
        }
    }

    #[test]
    fn test_fifo_until_closed() {
        let queue = WorkQueue::from_files((0..3).map(file));
        let pause = PauseToken::new();

        assert_eq!(queue.len(), 3);
        assert_eq!(queue.pop(&pause).map(|f| f.id), Some(0));
        assert_eq!(queue.pop(&pause).map(|f| f.id), Some(1));
        assert_eq!(queue.pop(&pause).map(|f| f.id), Some(2));
        assert_eq!(queue.pop(&pause), None);
    }

    #[test]
    fn test_pause_stops_admission() {
        let queue = WorkQueue::from_files((0..3).map(file));
        let pause = PauseToken::new();
        pause.request();

        assert_eq!(queue.pop(&pause), None);
        assert_eq!(queue.len(), 3);
    }

    #[test]
    fn test_blocked_worker_wakes_on_push() {
        let mut queue = WorkQueue::new();
        let pause = PauseToken::new();

        std::thread::scope(|s| {
            let handle = s.spawn(|| queue.pop(&pause).map(|f| f.id));
            queue.push(file(7));
            assert_eq!(handle.join().unwrap(), Some(7));
        });

        queue.close();
        assert_eq!(queue.pop(&pause), None);
    }
}
