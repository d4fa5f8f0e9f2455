use std::io;

/// Errors at the supervisor boundary. A failed run never terminates the
/// application; callers surface these as log entries and return to idle.
#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("a copy or verify job is already running")]
    Busy,

    #[error("copy tool not found: {0}")]
    ToolNotFound(String),

    #[error("failed to spawn {command}: {source}")]
    SpawnFailed {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to capture {0} of the copy tool")]
    StreamCapture(&'static str),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Errors from the process-control capability (suspend/resume/kill-tree).
/// All are recoverable; in particular operations against an already-exited
/// process report [`ControlError::ProcessGone`] rather than failing the run.
#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    #[error("process {0} has already exited")]
    ProcessGone(u32),

    #[error("process control is not supported on this platform")]
    Unsupported,

    #[error("signal delivery failed: {0}")]
    Signal(String),
}
