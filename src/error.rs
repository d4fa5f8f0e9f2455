//! Top-level error type for library consumers.

use thiserror::Error;

use crate::supervisor::SupervisorError;
use crate::verify::VerifyError;

#[derive(Debug, Error)]
pub enum RobowrapError {
    #[error("a job is already running")]
    Busy,
    #[error("source and destination paths must both be set")]
    PathsUnset,
    #[error(transparent)]
    Supervisor(#[from] SupervisorError),
    #[error(transparent)]
    Verify(#[from] VerifyError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
