//! Sink seam between the pipeline and whatever renders the logs.

use super::{Color, LogDest};

/// A batch of same-color lines delivered in one append.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormattedBlock {
    pub color: Color,
    pub lines: Vec<String>,
}

/// Rendering destination for batched log output.
///
/// The pipeline is the only caller and never calls concurrently with itself,
/// so implementations need no internal synchronization.
pub trait LogSink: Send {
    /// Append one same-color block to a destination.
    fn append(&mut self, dest: LogDest, block: FormattedBlock);

    /// Discard the oldest `lines` lines from the front of a destination's
    /// buffer. Invoked by the retention cap.
    fn drop_oldest(&mut self, dest: LogDest, lines: usize);
}

/// Sink that renders to the process's own stdout/stderr, for headless CLI
/// use.
pub struct ConsoleSink;

impl LogSink for ConsoleSink {
    fn append(&mut self, dest: LogDest, block: FormattedBlock) {
        for line in &block.lines {
            match dest {
                LogDest::Progress => println!("{line}"),
                LogDest::CopyResult => println!("[result] {line}"),
                LogDest::Error => eprintln!("[error] {line}"),
            }
        }
    }

    fn drop_oldest(&mut self, _dest: LogDest, _lines: usize) {
        // Console output has no retained buffer to trim.
    }
}

/// In-memory sink recording every call, for tests.
#[derive(Default)]
pub struct MemorySink {
    pub progress: Vec<String>,
    pub copy_result: Vec<String>,
    pub error: Vec<String>,
    pub appends: Vec<(LogDest, FormattedBlock)>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    fn buffer_mut(&mut self, dest: LogDest) -> &mut Vec<String> {
        match dest {
            LogDest::Progress => &mut self.progress,
            LogDest::CopyResult => &mut self.copy_result,
            LogDest::Error => &mut self.error,
        }
    }
}

impl LogSink for MemorySink {
    fn append(&mut self, dest: LogDest, block: FormattedBlock) {
        self.appends.push((dest, block.clone()));
        self.buffer_mut(dest).extend(block.lines);
    }

    fn drop_oldest(&mut self, dest: LogDest, lines: usize) {
        let buf = self.buffer_mut(dest);
        let n = lines.min(buf.len());
        buf.drain(..n);
    }
}
