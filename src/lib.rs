//! Supervisor for a robocopy-style external file-copy tool.
//!
//! The crate runs the tool as a child process, classifies and formats its
//! line-oriented output, and fans the result into buffered log queues. On
//! top of that sit a pause/resume/stop process controller, a wall-clock
//! scheduler for recurring runs, and a cancellable checksum verifier.
//!
//! - [`classify`] - output line classification and display formatting
//! - [`pipeline`] - buffered three-queue log pipeline
//! - [`supervisor`] - process lifecycle, counters, and the job gate
//! - [`scheduler`] - recurring run slots driven by polling
//! - [`verify`] - SHA-256 source/destination reconciliation
//! - [`config`] - persisted settings

pub mod classify;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod scheduler;
pub mod supervisor;
pub mod verify;

pub use error::RobowrapError;
