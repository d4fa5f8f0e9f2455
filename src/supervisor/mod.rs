//! Running one copy job at a time: spawn the tool, route its output into
//! the log queues, count what it did, and expose pause/resume/stop.

mod control;
mod error;
mod runner;

pub use control::{platform_control, ProcessControl, UnsupportedProcessControl};
#[cfg(unix)]
pub use control::UnixProcessControl;
pub use error::{ControlError, SupervisorError};
pub use runner::{TokioToolRunner, ToolCommand, ToolExit, ToolProcess, ToolRunner};

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Local;
use futures::StreamExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::classify::{classify, counter_category, format_file_line, CounterCategory, LineKind};
use crate::pipeline::{stamped, LogEntry, LogProducer};

const SEPARATOR_WIDTH: usize = 70;
/// Emit a progress summary every this many processed files.
const SUMMARY_EVERY: u64 = 100;

/// Live per-run counters, updated from the output reader tasks.
#[derive(Debug, Default)]
pub struct RunCounters {
    copied: AtomicU64,
    skipped: AtomicU64,
    extra: AtomicU64,
    errors: AtomicU64,
}

impl RunCounters {
    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            copied: self.copied.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            extra: self.extra.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }

    fn add(&self, category: CounterCategory) {
        let field = match category {
            CounterCategory::Copied => &self.copied,
            CounterCategory::Skipped => &self.skipped,
            CounterCategory::Extra => &self.extra,
        };
        field.fetch_add(1, Ordering::Relaxed);
    }

    fn add_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterSnapshot {
    pub copied: u64,
    pub skipped: u64,
    pub extra: u64,
    pub errors: u64,
}

impl CounterSnapshot {
    pub fn total(&self) -> u64 {
        self.copied + self.skipped + self.extra + self.errors
    }

    pub fn summary(&self) -> String {
        format!(
            "copied: {}, skipped: {}, extra: {}, errors: {}",
            self.copied, self.skipped, self.extra, self.errors
        )
    }
}

/// Single-job exclusivity shared by the manual path and the scheduler.
#[derive(Clone, Default)]
pub struct JobGate(Arc<AtomicBool>);

impl JobGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the gate; `None` means a job already holds it.
    pub fn try_acquire(&self) -> Option<JobGuard> {
        self.0
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| JobGuard(self.clone()))
    }

    pub fn is_busy(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Releases the gate on drop, including on panic or cancellation.
pub struct JobGuard(JobGate);

impl Drop for JobGuard {
    fn drop(&mut self) {
        (self.0).0.store(false, Ordering::Release);
    }
}

/// Outcome classes of the tool's exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitClass {
    Success,
    PartialFailure,
    Fatal,
}

impl ExitClass {
    pub fn from_code(code: i32) -> Self {
        match code {
            c if c < 8 => ExitClass::Success,
            8..=15 => ExitClass::PartialFailure,
            _ => ExitClass::Fatal,
        }
    }
}

/// What to run: tool program, source/dest, and extra option text.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub program: String,
    pub source: String,
    pub dest: String,
    pub options: String,
}

impl RunRequest {
    pub fn command(&self) -> ToolCommand {
        let mut args = vec![
            trim_path(&self.source).to_string(),
            trim_path(&self.dest).to_string(),
        ];
        args.extend(self.options.split_whitespace().map(str::to_string));
        ToolCommand {
            program: self.program.clone(),
            args,
            working_dir: None,
        }
    }
}

/// Paths pasted from a file manager often carry quotes and stray spaces.
pub fn trim_path(raw: &str) -> &str {
    raw.trim().trim_matches('"').trim()
}

/// Final report of one run.
#[derive(Debug, Clone, Copy)]
pub struct RunReport {
    pub exit: ToolExit,
    pub class: ExitClass,
    pub counters: CounterSnapshot,
    pub killed: bool,
}

/// Owns the runner and control backends plus the job gate.
pub struct Supervisor {
    runner: Arc<dyn ToolRunner>,
    control: Arc<dyn ProcessControl>,
    gate: JobGate,
}

impl Supervisor {
    pub fn new(
        runner: Arc<dyn ToolRunner>,
        control: Arc<dyn ProcessControl>,
        gate: JobGate,
    ) -> Self {
        Self {
            runner,
            control,
            gate,
        }
    }

    pub fn production(gate: JobGate) -> Self {
        Self::new(Arc::new(TokioToolRunner), platform_control(), gate)
    }

    pub fn gate(&self) -> &JobGate {
        &self.gate
    }

    /// Start a run. Fails with `Busy` when another job holds the gate.
    pub async fn start(
        &self,
        request: RunRequest,
        producer: LogProducer,
    ) -> Result<RunningJob, SupervisorError> {
        let guard = self.gate.try_acquire().ok_or(SupervisorError::Busy)?;

        let command = request.command();
        producer.progress(LogEntry::new(stamped(&format!(
            "{} {}",
            command.program,
            command.args.join(" ")
        ))));
        producer.progress(LogEntry::new("─".repeat(SEPARATOR_WIDTH)));

        let process = self.runner.spawn_streaming(command).await?;
        debug!(pid = process.pid, "copy tool started");

        let counters = Arc::new(RunCounters::default());
        let dest: PathBuf = trim_path(&request.dest).into();
        let stdout_task =
            spawn_stdout_reader(process.stdout, counters.clone(), producer.clone(), dest);
        let stderr_task = spawn_stderr_reader(process.stderr, counters.clone(), producer.clone());

        Ok(RunningJob {
            pid: process.pid,
            counters,
            paused: false,
            killed: false,
            control: self.control.clone(),
            producer,
            stdout_task,
            stderr_task,
            status: process.status,
            _guard: guard,
        })
    }
}

/// A job in flight. Dropping it releases the gate but does not kill the
/// tool; call `stop` for that.
pub struct RunningJob {
    pid: u32,
    counters: Arc<RunCounters>,
    paused: bool,
    killed: bool,
    control: Arc<dyn ProcessControl>,
    producer: LogProducer,
    stdout_task: JoinHandle<()>,
    stderr_task: JoinHandle<()>,
    status: runner::StatusFuture,
    _guard: JobGuard,
}

impl RunningJob {
    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn counters(&self) -> CounterSnapshot {
        self.counters.snapshot()
    }

    pub fn pause(&mut self) {
        if self.paused {
            return;
        }
        match self.control.suspend(self.pid) {
            Ok(()) => {
                self.paused = true;
                self.producer.progress(LogEntry::new(stamped("paused")));
            }
            Err(e) => self.report_control_failure("pause", e),
        }
    }

    pub fn resume(&mut self) {
        if !self.paused {
            return;
        }
        match self.control.resume(self.pid) {
            Ok(()) => {
                self.paused = false;
                self.producer.progress(LogEntry::new(stamped("resumed")));
            }
            Err(e) => self.report_control_failure("resume", e),
        }
    }

    /// Kill the tool and its children. A suspended process is resumed
    /// first so the kill signal is delivered.
    pub fn stop(&mut self) {
        if self.paused {
            if let Err(e) = self.control.resume(self.pid) {
                warn!(pid = self.pid, error = %e, "resume before kill failed");
            }
            self.paused = false;
        }
        self.killed = true;
        match self.control.kill_tree(self.pid) {
            Ok(()) => {
                let line = stamped("stopped");
                self.producer.progress(LogEntry::new(&line));
                self.producer.error(LogEntry::error(&line));
            }
            Err(e) => self.report_control_failure("stop", e),
        }
    }

    fn report_control_failure(&self, op: &str, e: ControlError) {
        warn!(pid = self.pid, error = %e, "process control failed");
        self.producer
            .error(LogEntry::error(format!("[exception] {op} failed: {e}")));
    }

    /// Wait for exit, drain both readers, and emit the closing lines.
    pub async fn wait(mut self) -> Result<RunReport, SupervisorError> {
        let exit = (&mut self.status).await?;
        self.finish(exit).await
    }

    /// Like [`wait`](Self::wait), but stops the tool and its children if
    /// `shutdown` fires first, then reports the killed run.
    pub async fn wait_with_shutdown(
        mut self,
        shutdown: CancellationToken,
    ) -> Result<RunReport, SupervisorError> {
        let first = tokio::select! {
            exit = &mut self.status => Some(exit?),
            _ = shutdown.cancelled() => None,
        };
        let exit = match first {
            Some(exit) => exit,
            None => {
                self.stop();
                (&mut self.status).await?
            }
        };
        self.finish(exit).await
    }

    async fn finish(self, exit: ToolExit) -> Result<RunReport, SupervisorError> {
        let RunningJob {
            counters,
            killed,
            producer,
            stdout_task,
            stderr_task,
            _guard,
            ..
        } = self;

        // The exit status alone does not guarantee the reader tasks have
        // drained the pipes.
        let _ = stdout_task.await;
        let _ = stderr_task.await;

        let code = exit.code();
        let class = ExitClass::from_code(code);
        let snapshot = counters.snapshot();

        if class != ExitClass::Success {
            let msg = if class == ExitClass::Fatal {
                format!("[fatal] exit code {code} - the copy tool reported a fatal error")
            } else {
                format!("[copy failed] exit code {code} - some files could not be copied")
            };
            producer.progress(LogEntry::error(&msg));
            producer.error(LogEntry::error(&msg));
        }

        producer.progress(LogEntry::new(stamped(&snapshot.summary())));

        let verdict = format!(
            "finished (exit code: {code}, errors: {}){}",
            snapshot.errors,
            if class == ExitClass::Success {
                ""
            } else {
                " with errors"
            }
        );
        let finish = format!(
            "── {} {verdict} ──",
            Local::now().format("%Y/%m/%d %H:%M:%S")
        );
        producer.progress(LogEntry::new(&finish));
        producer.copy_result(LogEntry::new(&finish));
        producer.error(LogEntry::new(&finish));

        Ok(RunReport {
            exit,
            class,
            counters: snapshot,
            killed,
        })
    }
}

fn spawn_stdout_reader(
    mut stream: runner::LineStream,
    counters: Arc<RunCounters>,
    producer: LogProducer,
    dest: PathBuf,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut last_reported: u64 = 0;
        while let Some(item) = stream.next().await {
            match item {
                Ok(line) => {
                    route_stdout_line(&line, &counters, &producer, &dest, &mut last_reported)
                }
                Err(e) => {
                    counters.add_error();
                    producer.error(LogEntry::error(format!("[exception] stdout read: {e}")));
                }
            }
        }
    })
}

/// Route one stdout line into the queues and counters.
fn route_stdout_line(
    line: &str,
    counters: &RunCounters,
    producer: &LogProducer,
    dest: &Path,
    last_reported: &mut u64,
) {
    let classified = classify(line);

    let Some(status) = classified.status.as_deref() else {
        // Unstructured output: errors go to the error queue, everything
        // else scrolls by as progress.
        if classified.kind == LineKind::Error {
            counters.add_error();
            producer.error(LogEntry::error(line));
        } else {
            producer.progress(LogEntry::new(line));
        }
        return;
    };

    let category = counter_category(status);

    if classified.kind == LineKind::Error {
        counters.add_error();
        producer.error(LogEntry::error(format_file_line(line, None)));
    } else if !status.is_empty() && category != Some(CounterCategory::Skipped) {
        // Skips are counted but not worth a copy-result line.
        producer.copy_result(LogEntry::new(format_file_line(line, Some(dest))));
    }

    if let Some(cat) = category {
        counters.add(cat);
    }

    let total = counters.snapshot().total();
    if total >= *last_reported + SUMMARY_EVERY {
        *last_reported = total;
        producer.progress(LogEntry::new(stamped(&format!(
            "processing... {}",
            counters.snapshot().summary()
        ))));
    }
}

fn spawn_stderr_reader(
    mut stream: runner::LineStream,
    counters: Arc<RunCounters>,
    producer: LogProducer,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(item) = stream.next().await {
            match item {
                Ok(line) => {
                    counters.add_error();
                    producer.progress(LogEntry::new(format!("[stderr] {line}")));
                    producer.error(LogEntry::error(format!("[stderr] {line}")));
                }
                Err(e) => {
                    counters.add_error();
                    producer.error(LogEntry::error(format!("[exception] stderr read: {e}")));
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{LogPipeline, MemorySink, PipelineConfig};

    fn pipeline() -> LogPipeline<MemorySink> {
        LogPipeline::new(MemorySink::default(), PipelineConfig::default())
    }

    #[test]
    fn gate_is_exclusive_and_releases_on_drop() {
        let gate = JobGate::new();
        let guard = gate.try_acquire().expect("first acquire");
        assert!(gate.is_busy());
        assert!(gate.try_acquire().is_none());
        drop(guard);
        assert!(!gate.is_busy());
        assert!(gate.try_acquire().is_some());
    }

    #[test]
    fn exit_class_thresholds() {
        assert_eq!(ExitClass::from_code(0), ExitClass::Success);
        assert_eq!(ExitClass::from_code(7), ExitClass::Success);
        assert_eq!(ExitClass::from_code(8), ExitClass::PartialFailure);
        assert_eq!(ExitClass::from_code(15), ExitClass::PartialFailure);
        assert_eq!(ExitClass::from_code(16), ExitClass::Fatal);
        assert_eq!(ExitClass::from_code(255), ExitClass::Fatal);
    }

    #[test]
    fn trim_path_strips_quotes_and_whitespace() {
        assert_eq!(trim_path("  \"/data/src\"  "), "/data/src");
        assert_eq!(trim_path("/plain"), "/plain");
    }

    #[test]
    fn run_request_builds_argument_line() {
        let request = RunRequest {
            program: "robocopy".to_string(),
            source: " \"/a\" ".to_string(),
            dest: "/b".to_string(),
            options: "/MIR /R:1".to_string(),
        };
        let command = request.command();
        assert_eq!(command.program, "robocopy");
        assert_eq!(command.args, vec!["/a", "/b", "/MIR", "/R:1"]);
    }

    #[test]
    fn structured_routing_counts_and_queues() {
        let mut pipeline = pipeline();
        let producer = pipeline.producer();
        let counters = RunCounters::default();
        let dest = Path::new("/backup");
        let mut last = 0;

        route_stdout_line("\t  New File  \t     1024\ta.txt", &counters, &producer, dest, &mut last);
        route_stdout_line("\t     Same  \t      512\tb.txt", &counters, &producer, dest, &mut last);
        route_stdout_line("\t*EXTRA File\t      256\tc.txt", &counters, &producer, dest, &mut last);
        route_stdout_line("\t   FAILED  \t      128\td.txt", &counters, &producer, dest, &mut last);

        let snap = counters.snapshot();
        assert_eq!(
            (snap.copied, snap.skipped, snap.extra, snap.errors),
            (1, 1, 1, 1)
        );

        pipeline.flush();
        let sink = pipeline.into_sink();
        assert_eq!(sink.copy_result.len(), 2);
        assert!(sink.copy_result[0].ends_with("/backup/a.txt"));
        assert!(sink.copy_result[1].ends_with("/backup/c.txt"));
        assert_eq!(sink.error.len(), 1);
        assert!(sink.error[0].contains("d.txt"));
    }

    #[test]
    fn progress_summary_every_hundred_lines() {
        let mut pipeline = pipeline();
        let producer = pipeline.producer();
        let counters = RunCounters::default();
        let dest = Path::new("/backup");
        let mut last = 0;

        for i in 0..150 {
            let line = format!("\t  New File  \t     1024\tfile{i}.txt");
            route_stdout_line(&line, &counters, &producer, dest, &mut last);
        }

        pipeline.flush();
        let sink = pipeline.into_sink();
        let summaries: Vec<&String> = sink
            .progress
            .iter()
            .filter(|l| l.contains("processing..."))
            .collect();
        assert_eq!(summaries.len(), 1);
        assert!(summaries[0].contains("copied: 100"));
    }

    #[test]
    fn unstructured_error_line_counts() {
        let mut pipeline = pipeline();
        let producer = pipeline.producer();
        let counters = RunCounters::default();
        let mut last = 0;

        route_stdout_line(
            "ERROR 5 (0x00000005) Accessing Source Directory",
            &counters,
            &producer,
            Path::new("/backup"),
            &mut last,
        );

        assert_eq!(counters.snapshot().errors, 1);
        pipeline.flush();
        let sink = pipeline.into_sink();
        assert_eq!(sink.error.len(), 1);
    }

    #[tokio::test]
    async fn busy_gate_rejects_second_start() {
        let gate = JobGate::new();
        let _held = gate.try_acquire().expect("hold gate");
        let supervisor = Supervisor::production(gate);
        let mut pipeline = pipeline();
        let producer = pipeline.producer();

        let request = RunRequest {
            program: "true".to_string(),
            source: "/a".to_string(),
            dest: "/b".to_string(),
            options: String::new(),
        };
        let result = supervisor.start(request, producer).await;
        assert!(matches!(result, Err(SupervisorError::Busy)));
    }
}
