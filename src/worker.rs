//! Worker pool
//!
//! Each worker pulls a file from the queue, streams its lines through the
//! decompression adapter, tests them against the dedup index and forwards
//! accepted entries to the merge writer. The writer channel is bounded, so a fast
//! pool blocks instead of buffering unbounded input.

use crate::cli::CasePolicy;
use crate::dedup::{normalize, Deduplicator};
use crate::error::{ListmanError, Result};
use crate::pause::PauseToken;
use crate::progress::ProcessingStats;
use crate::queue::{SourceFile, WorkQueue};
use crate::source::LineReader;
use crate::writer::WriterMessage;

use crossbeam_channel::Sender;
use indicatif::ProgressBar;

/// Everything the workers share
pub struct WorkerContext<'a> {
    pub queue: &'a WorkQueue,
    pub index: &'a dyn Deduplicator,
    pub output: Sender<WriterMessage>,
    pub pause: &'a PauseToken,
    pub stats: &'a ProcessingStats,
    pub progress: &'a ProgressBar,
    pub case_policy: CasePolicy,
    /// Lines between progress markers
    pub progress_interval: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Finished,
    Failed,
    Paused,
    /// The merge writer hung up; nothing more can be written
    WriterGone,
}

struct Worker<'a> {
    id: usize,
    ctx: &'a WorkerContext<'a>,
    output: Sender<WriterMessage>,
}

impl<'a> Worker<'a> {
    fn new(id: usize, ctx: &'a WorkerContext<'a>) -> Self {
        Self {
            id,
            ctx,
            output: ctx.output.clone(),
        }
    }

    fn run(self) {
        while let Some(file) = self.ctx.queue.pop(self.ctx.pause) {
            log::debug!("worker {} took {:?} at offset {}", self.id, file.path, file.offset);

            match self.ingest(&file) {
                Outcome::Finished => {
                    self.ctx.stats.complete_file();
                    self.ctx.progress.inc(1);
                }
                Outcome::Failed => {
                    self.ctx.stats.fail_file();
                    self.ctx.progress.inc(1);
                }
                Outcome::Paused => {
                    log::info!("worker {} paused in {:?}", self.id, file.path);
                    break;
                }
                Outcome::WriterGone => {
                    log::debug!("worker {} stopping, merge writer is gone", self.id);
                    break;
                }
            }
        }
    }

    fn ingest(&self, file: &SourceFile) -> Outcome {
        let ctx = self.ctx;

        let mut reader = match LineReader::open(&file.path, file.format, file.offset) {
            Ok(reader) => reader,
            Err(e) => return self.fail(file, file.offset, file.accepted, e),
        };
        if reader.encoding().encoding != encoding_rs::UTF_8 {
            let encoding = reader.encoding();
            log::info!(
                "{:?} decoded as {} (confidence {:.0}%)",
                file.path,
                encoding.name,
                encoding.confidence * 100.0
            );
        }

        let mut accepted = file.accepted;
        let mut since_marker = 0u64;

        loop {
            if ctx.pause.is_requested() {
                return self.send_or_gone(
                    WriterMessage::Progress {
                        file: file.id,
                        offset: reader.offset(),
                        accepted,
                    },
                    Outcome::Paused,
                );
            }

            let line = match reader.next_line() {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(e) => return self.fail(file, reader.offset(), accepted, e),
            };

            ctx.pause.note_line();
            ctx.stats.add_line();

            match normalize(&line, ctx.case_policy) {
                Some(entry) => {
                    if ctx.index.try_add(&entry) {
                        if self.output.send(WriterMessage::Entry(entry.into_owned())).is_err() {
                            return Outcome::WriterGone;
                        }
                        accepted += 1;
                        ctx.stats.add_accepted();
                    } else {
                        ctx.stats.add_duplicate();
                    }
                }
                None => ctx.stats.add_blank(),
            }

            since_marker += 1;
            if since_marker >= ctx.progress_interval {
                since_marker = 0;
                let marker = WriterMessage::Progress {
                    file: file.id,
                    offset: reader.offset(),
                    accepted,
                };
                if self.output.send(marker).is_err() {
                    return Outcome::WriterGone;
                }
            }
        }

        log::debug!("worker {} finished {:?} ({} new entries)", self.id, file.path, accepted);
        self.send_or_gone(
            WriterMessage::Finished {
                file: file.id,
                offset: reader.offset(),
                accepted,
            },
            Outcome::Finished,
        )
    }

    fn fail(&self, file: &SourceFile, offset: u64, accepted: u64, err: ListmanError) -> Outcome {
        log::warn!("Skipping {:?}: {}", file.path, err);
        self.send_or_gone(
            WriterMessage::Failed {
                file: file.id,
                offset,
                accepted,
                reason: err.to_string(),
            },
            Outcome::Failed,
        )
    }

    fn send_or_gone(&self, message: WriterMessage, outcome: Outcome) -> Outcome {
        match self.output.send(message) {
            Ok(()) => outcome,
            Err(_) => Outcome::WriterGone,
        }
    }
}

/// Run `threads` workers on a dedicated pool until the queue is drained or a
/// pause is requested
pub fn run_pool(threads: usize, ctx: &WorkerContext<'_>) -> Result<()> {
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .thread_name(|i| format!("listman-worker-{}", i))
        .build()
        .map_err(|e| ListmanError::Config(format!("cannot start {} worker threads: {}", threads, e)))?;

    pool.scope(|s| {
        for id in 0..threads {
            s.spawn(move |_| Worker::new(id, ctx).run());
        }
    });

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dedup::FingerprintIndex;
    use crate::source::SourceFormat;
    use crossbeam_channel::bounded;
    use std::path::Path;
    use tempfile::TempDir;

    fn source(id: usize, path: &Path) -> SourceFile {
        SourceFile {
            id,
            path: path.to_path_buf(),
            format: SourceFormat::from_path(path),
            offset: 0,
            accepted: 0,
        }
    }

    fn collect(rx: crossbeam_channel::Receiver<WriterMessage>) -> (Vec<String>, Vec<WriterMessage>) {
        let mut entries = Vec::new();
        let mut markers = Vec::new();
        for message in rx.iter() {
            match message {
                WriterMessage::Entry(e) => entries.push(e),
                other => markers.push(other),
            }
        }
        entries.sort();
        (entries, markers)
    }

    #[test]
    fn test_pool_dedups_across_files() {
        let dir = TempDir::new().unwrap();
        let first = dir.path().join("file1.txt");
        let second = dir.path().join("file2.txt");
        std::fs::write(&first, "a\nb\na\n").unwrap();
        std::fs::write(&second, "b\nc\n\n").unwrap();

        let queue = WorkQueue::from_files(vec![source(0, &first), source(1, &second)]);
        let index = FingerprintIndex::new(4);
        let pause = PauseToken::new();
        let stats = ProcessingStats::new();
        let progress = ProgressBar::hidden();
        let (tx, rx) = bounded(1);

        std::thread::scope(|s| {
            s.spawn(|| {
                let ctx = WorkerContext {
                    queue: &queue,
                    index: &index,
                    output: tx,
                    pause: &pause,
                    stats: &stats,
                    progress: &progress,
                    case_policy: CasePolicy::Preserve,
                    progress_interval: 1,
                };
                run_pool(2, &ctx).unwrap();
            });

            let (entries, markers) = collect(rx);
            assert_eq!(entries, vec!["a", "b", "c"]);
            let finished = markers
                .iter()
                .filter(|m| matches!(m, WriterMessage::Finished { .. }))
                .count();
            assert_eq!(finished, 2);
        });

        assert_eq!(stats.get_completed_files(), 2);
        assert_eq!(stats.get_duplicate_lines(), 2);
        assert_eq!(stats.get_blank_lines(), 1);
    }

    #[test]
    fn test_bad_file_is_reported_and_skipped() {
        let dir = TempDir::new().unwrap();
        let fake = dir.path().join("fake.gz");
        let good = dir.path().join("good.txt");
        std::fs::write(&fake, "plain text pretending\n").unwrap();
        std::fs::write(&good, "ok\n").unwrap();

        let queue = WorkQueue::from_files(vec![source(0, &fake), source(1, &good)]);
        let index = FingerprintIndex::new(4);
        let pause = PauseToken::new();
        let stats = ProcessingStats::new();
        let progress = ProgressBar::hidden();
        let (tx, rx) = bounded(16);

        let ctx = WorkerContext {
            queue: &queue,
            index: &index,
            output: tx,
            pause: &pause,
            stats: &stats,
            progress: &progress,
            case_policy: CasePolicy::Preserve,
            progress_interval: 100,
        };
        run_pool(1, &ctx).unwrap();
        drop(ctx);

        let (entries, markers) = collect(rx);
        assert_eq!(entries, vec!["ok"]);
        assert!(markers
            .iter()
            .any(|m| matches!(m, WriterMessage::Failed { file: 0, reason, .. } if reason.contains("gzip"))));
        assert_eq!(stats.get_failed_files(), 1);
        assert_eq!(stats.get_completed_files(), 1);
    }

    #[test]
    fn test_pause_leaves_progress_marker() {
        let dir = TempDir::new().unwrap();
        let list = dir.path().join("list.txt");
        std::fs::write(&list, "one\ntwo\nthree\nfour\n").unwrap();

        let queue = WorkQueue::from_files(vec![source(0, &list)]);
        let index = FingerprintIndex::new(4);
        let pause = PauseToken::with_line_budget(2);
        let stats = ProcessingStats::new();
        let progress = ProgressBar::hidden();
        let (tx, rx) = bounded(16);

        let ctx = WorkerContext {
            queue: &queue,
            index: &index,
            output: tx,
            pause: &pause,
            stats: &stats,
            progress: &progress,
            case_policy: CasePolicy::Preserve,
            progress_interval: 100,
        };
        run_pool(1, &ctx).unwrap();
        drop(ctx);

        let (entries, markers) = collect(rx);
        assert_eq!(entries, vec!["one", "two"]);
        assert_eq!(
            markers,
            vec![WriterMessage::Progress { file: 0, offset: 8, accepted: 2 }]
        );
    }

    #[test]
    fn test_writer_gone_stops_workers() {
        let dir = TempDir::new().unwrap();
        let list = dir.path().join("list.txt");
        std::fs::write(&list, "x\ny\n").unwrap();

        let queue = WorkQueue::from_files(vec![source(0, &list), source(1, &list)]);
        let index = FingerprintIndex::new(4);
        let pause = PauseToken::new();
        let stats = ProcessingStats::new();
        let progress = ProgressBar::hidden();
        let (tx, rx) = bounded(1);
        drop(rx);

        let ctx = WorkerContext {
            queue: &queue,
            index: &index,
            output: tx,
            pause: &pause,
            stats: &stats,
            progress: &progress,
            case_policy: CasePolicy::Preserve,
            progress_interval: 100,
        };
        run_pool(1, &ctx).unwrap();

        assert_eq!(stats.get_completed_files(), 0);
        assert_eq!(queue.len(), 1);
    }
}
