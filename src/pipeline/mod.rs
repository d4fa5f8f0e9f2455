//! Buffered log pipeline decoupling output producers from the rendering sink.
//!
//! Producers (process output readers, the verifier, the scheduler) enqueue
//! [`LogEntry`] values through a cloneable [`LogProducer`]; enqueue never
//! blocks and never touches the sink. A single consumer drains the three
//! queues on a fixed interval, classifies and formats progress entries,
//! batches consecutive same-color lines into one sink append, and enforces a
//! retention cap on the progress buffer. Per-queue FIFO order is preserved;
//! there is no ordering guarantee across queues.

mod sink;

pub use sink::{ConsoleSink, FormattedBlock, LogSink, MemorySink};

use std::time::Duration;

use chrono::Local;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::classify::{self, LineKind};

/// Display color for a batch of lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Color {
    Default,
    Green,
    Yellow,
    Red,
    Gray,
}

/// Logical rendering destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogDest {
    Progress,
    CopyResult,
    Error,
}

/// One enqueued log line. Ownership transfers to the queue on enqueue and to
/// the flush batch on dequeue.
#[derive(Debug, Clone)]
pub struct LogEntry {
    pub text: String,
    /// Overrides the color derived from the error flag or classification
    /// when set.
    pub color: Option<Color>,
    pub is_error: bool,
}

impl LogEntry {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            color: None,
            is_error: false,
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            color: None,
            is_error: true,
        }
    }

    pub fn with_color(mut self, color: Color) -> Self {
        self.color = Some(color);
        self
    }
}

/// Producer half of the pipeline. Cloneable; every method is non-blocking
/// and safe to call from any task or thread, including the raw process
/// output readers.
#[derive(Clone)]
pub struct LogProducer {
    progress_tx: mpsc::UnboundedSender<LogEntry>,
    copy_tx: mpsc::UnboundedSender<LogEntry>,
    error_tx: mpsc::UnboundedSender<LogEntry>,
}

impl LogProducer {
    pub fn progress(&self, entry: LogEntry) {
        // A dropped consumer just means the run is over; losing the line is
        // the intended outcome then.
        let _ = self.progress_tx.send(entry);
    }

    pub fn copy_result(&self, entry: LogEntry) {
        let _ = self.copy_tx.send(entry);
    }

    pub fn error(&self, entry: LogEntry) {
        let _ = self.error_tx.send(entry);
    }
}

/// Pipeline configuration.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Consumer flush cadence.
    pub flush_interval: Duration,
    /// Retention cap on the progress destination, in lines.
    pub max_progress_lines: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            flush_interval: Duration::from_millis(80),
            max_progress_lines: 10_000,
        }
    }
}

/// Consumer half of the pipeline: owns the queues' receiving ends and the
/// sink. Exactly one exists per pipeline; flushing is never re-entrant.
pub struct LogPipeline<S: LogSink> {
    producer: LogProducer,
    progress_rx: mpsc::UnboundedReceiver<LogEntry>,
    copy_rx: mpsc::UnboundedReceiver<LogEntry>,
    error_rx: mpsc::UnboundedReceiver<LogEntry>,
    sink: S,
    config: PipelineConfig,
    retained_progress: usize,
}

impl<S: LogSink> LogPipeline<S> {
    pub fn new(sink: S, config: PipelineConfig) -> Self {
        let (progress_tx, progress_rx) = mpsc::unbounded_channel();
        let (copy_tx, copy_rx) = mpsc::unbounded_channel();
        let (error_tx, error_rx) = mpsc::unbounded_channel();
        Self {
            producer: LogProducer {
                progress_tx,
                copy_tx,
                error_tx,
            },
            progress_rx,
            copy_rx,
            error_rx,
            sink,
            config,
            retained_progress: 0,
        }
    }

    /// A new producer handle for this pipeline.
    pub fn producer(&self) -> LogProducer {
        self.producer.clone()
    }

    /// Drain all three queues to empty and deliver to the sink. Synchronous;
    /// also the final-drain primitive used at shutdown.
    pub fn flush(&mut self) {
        let progress = drain(&mut self.progress_rx);
        if !progress.is_empty() {
            let appended = progress.len();
            for block in batch_by_color(progress, true) {
                self.sink.append(LogDest::Progress, block);
            }
            self.retained_progress += appended;
            self.enforce_retention();
        }

        // Copy-result and error entries were formatted by their producers;
        // a second formatting pass would collapse their tab columns.
        for (rx, dest) in [
            (&mut self.copy_rx, LogDest::CopyResult),
            (&mut self.error_rx, LogDest::Error),
        ] {
            let entries = drain(rx);
            if entries.is_empty() {
                continue;
            }
            for block in batch_by_color(entries, false) {
                self.sink.append(dest, block);
            }
        }
    }

    /// Run the periodic flush loop until cancelled, then perform one final
    /// drain so no enqueued-but-unflushed entry is lost.
    pub async fn run(&mut self, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.flush_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => self.flush(),
                _ = shutdown.cancelled() => {
                    self.flush();
                    debug!("pipeline consumer stopped after final drain");
                    return;
                }
            }
        }
    }

    /// Consume the pipeline, returning its sink after a final drain.
    pub fn into_sink(mut self) -> S {
        self.flush();
        self.sink
    }

    pub fn retained_progress_lines(&self) -> usize {
        self.retained_progress
    }

    fn enforce_retention(&mut self) {
        let max = self.config.max_progress_lines;
        if max == 0 || self.retained_progress <= max {
            return;
        }
        // Trim back to three quarters of the cap so long-running jobs keep
        // recent context without unbounded growth.
        let keep = max - max / 4;
        let drop = self.retained_progress - keep;
        self.sink.drop_oldest(LogDest::Progress, drop);
        self.retained_progress = keep;
        debug!(dropped = drop, retained = keep, "progress retention trim");
    }
}

fn drain(rx: &mut mpsc::UnboundedReceiver<LogEntry>) -> Vec<LogEntry> {
    let mut out = Vec::new();
    while let Ok(entry) = rx.try_recv() {
        out.push(entry);
    }
    out
}

/// Group drained entries into consecutive same-color blocks so the sink
/// pays styling cost per batch rather than per line. Color precedence:
/// explicit override, then the error flag, then classification of the
/// text. `reformat` runs each line through the display formatter and is
/// reserved for the progress queue, whose entries arrive raw.
fn batch_by_color(entries: Vec<LogEntry>, reformat: bool) -> impl Iterator<Item = FormattedBlock> {
    let mut blocks: Vec<FormattedBlock> = Vec::new();
    for entry in entries {
        let color = entry.color.unwrap_or_else(|| {
            if entry.is_error {
                Color::Red
            } else {
                color_for_kind(classify::classify(&entry.text).kind)
            }
        });
        let line = if reformat {
            classify::format_file_line(&entry.text, None)
        } else {
            entry.text
        };
        match blocks.last_mut() {
            Some(block) if block.color == color => block.lines.push(line),
            _ => blocks.push(FormattedBlock {
                color,
                lines: vec![line],
            }),
        }
    }
    blocks.into_iter()
}

fn color_for_kind(kind: LineKind) -> Color {
    match kind {
        LineKind::Error => Color::Red,
        LineKind::Extra => Color::Yellow,
        LineKind::Copying => Color::Green,
        LineKind::Skipped | LineKind::Separator => Color::Gray,
        LineKind::Summary | LineKind::Info | LineKind::Plain => Color::Default,
    }
}

/// Prefix `text` with the wall-clock stamp the wrapper uses for its own
/// status lines.
pub fn stamped(text: impl AsRef<str>) -> String {
    format!("[{}] {}", Local::now().format("%H:%M:%S"), text.as_ref())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_pipeline(max_lines: usize) -> LogPipeline<MemorySink> {
        LogPipeline::new(
            MemorySink::new(),
            PipelineConfig {
                flush_interval: Duration::from_millis(10),
                max_progress_lines: max_lines,
            },
        )
    }

    fn into_memory(pipeline: LogPipeline<MemorySink>) -> MemorySink {
        pipeline.into_sink()
    }

    #[test]
    fn fifo_within_a_queue() {
        let mut p = test_pipeline(100);
        let producer = p.producer();
        for text in ["a", "b", "c"] {
            producer.progress(LogEntry::new(text));
        }
        p.flush();
        let sink = into_memory(p);
        assert_eq!(sink.progress, vec!["a", "b", "c"]);
    }

    #[test]
    fn queues_render_to_independent_destinations() {
        let mut p = test_pipeline(100);
        let producer = p.producer();
        producer.progress(LogEntry::new("p1"));
        producer.copy_result(LogEntry::new("c1"));
        producer.error(LogEntry::error("e1"));
        producer.progress(LogEntry::new("p2"));
        p.flush();
        let sink = into_memory(p);
        assert_eq!(sink.progress, vec!["p1", "p2"]);
        assert_eq!(sink.copy_result, vec!["c1"]);
        assert_eq!(sink.error, vec!["e1"]);
    }

    #[test]
    fn same_color_entries_batch_into_one_append() {
        let mut p = test_pipeline(100);
        let producer = p.producer();
        producer.progress(LogEntry::new("one").with_color(Color::Green));
        producer.progress(LogEntry::new("two").with_color(Color::Green));
        producer.progress(LogEntry::new("three").with_color(Color::Red));
        p.flush();
        let sink = into_memory(p);
        let progress_appends: Vec<_> = sink
            .appends
            .iter()
            .filter(|(d, _)| *d == LogDest::Progress)
            .collect();
        assert_eq!(progress_appends.len(), 2);
        assert_eq!(progress_appends[0].1.lines, vec!["one", "two"]);
        assert_eq!(progress_appends[0].1.color, Color::Green);
        assert_eq!(progress_appends[1].1.lines, vec!["three"]);
    }

    #[test]
    fn copy_and_error_entries_flush_verbatim() {
        let mut p = test_pipeline(100);
        let producer = p.producer();
        let formatted = "  New File\t1.0 KB\t/backup/a.txt";
        producer.copy_result(LogEntry::new(formatted));
        producer.error(LogEntry::error("[exception] stop failed:\tdetails"));
        p.flush();
        let sink = into_memory(p);
        // Producer-side formatting survives the flush byte for byte.
        assert_eq!(sink.copy_result, vec![formatted]);
        assert_eq!(sink.error, vec!["[exception] stop failed:\tdetails"]);
    }

    #[test]
    fn error_flag_alone_styles_red() {
        let mut p = test_pipeline(100);
        let producer = p.producer();
        producer.error(LogEntry::error("something broke"));
        p.flush();
        let sink = into_memory(p);
        assert_eq!(sink.appends[0].0, LogDest::Error);
        assert_eq!(sink.appends[0].1.color, Color::Red);
    }

    #[test]
    fn retention_cap_drops_oldest_quarter() {
        let max = 1000;
        let mut p = test_pipeline(max);
        let producer = p.producer();
        for i in 0..max + 1000 {
            producer.progress(LogEntry::new(format!("line-{i}")).with_color(Color::Default));
        }
        p.flush();
        assert_eq!(p.retained_progress_lines(), max - max / 4);
        let sink = into_memory(p);
        assert_eq!(sink.progress.len(), max - max / 4);
        // The most recently appended line is always retained.
        assert_eq!(sink.progress.last().unwrap(), &format!("line-{}", max + 999));
    }

    #[test]
    fn derived_color_comes_from_classification() {
        let mut p = test_pipeline(100);
        let producer = p.producer();
        producer.progress(LogEntry::new("\tNew File \t 10\ta.txt"));
        p.flush();
        let sink = into_memory(p);
        assert_eq!(sink.appends[0].1.color, Color::Green);
        assert_eq!(sink.progress, vec!["  New File\t10 B\ta.txt"]);
    }

    #[tokio::test]
    async fn shutdown_performs_final_drain() {
        let mut p = test_pipeline(100);
        let producer = p.producer();
        let token = CancellationToken::new();
        producer.progress(LogEntry::new("pending"));
        token.cancel();
        p.run(token).await;
        let sink = into_memory(p);
        assert_eq!(sink.progress, vec!["pending"]);
    }
}
