//! Platform process control behind a small capability interface.
//!
//! The copy tool is paused by suspending the OS process in place rather than
//! sending anything the tool itself interprets, and stopped by killing its
//! whole process group (children included). A suspended process cannot
//! reliably receive a termination signal everywhere, so callers resume
//! before killing.

use super::error::ControlError;

/// Suspend/resume/kill-tree against a process id. Every operation must
/// tolerate a process that has already exited.
pub trait ProcessControl: Send + Sync {
    fn suspend(&self, pid: u32) -> Result<(), ControlError>;
    fn resume(&self, pid: u32) -> Result<(), ControlError>;
    fn kill_tree(&self, pid: u32) -> Result<(), ControlError>;
}

/// Unix backend: SIGSTOP/SIGCONT to the process, SIGKILL to its process
/// group. The runner spawns the tool in its own group, so the negative-pid
/// form reaches every child it forked.
#[cfg(unix)]
pub struct UnixProcessControl;

#[cfg(unix)]
impl UnixProcessControl {
    fn send(pid: i32, signal: nix::sys::signal::Signal, target: u32) -> Result<(), ControlError> {
        use nix::errno::Errno;
        use nix::sys::signal::kill;
        use nix::unistd::Pid;

        match kill(Pid::from_raw(pid), signal) {
            Ok(()) => Ok(()),
            Err(Errno::ESRCH) => Err(ControlError::ProcessGone(target)),
            Err(e) => Err(ControlError::Signal(e.to_string())),
        }
    }
}

#[cfg(unix)]
impl ProcessControl for UnixProcessControl {
    fn suspend(&self, pid: u32) -> Result<(), ControlError> {
        Self::send(pid as i32, nix::sys::signal::Signal::SIGSTOP, pid)
    }

    fn resume(&self, pid: u32) -> Result<(), ControlError> {
        Self::send(pid as i32, nix::sys::signal::Signal::SIGCONT, pid)
    }

    fn kill_tree(&self, pid: u32) -> Result<(), ControlError> {
        // Negative pid addresses the process group.
        Self::send(-(pid as i32), nix::sys::signal::Signal::SIGKILL, pid)
    }
}

/// Fallback for platforms without a backend; callers already treat control
/// failures as recoverable log lines.
pub struct UnsupportedProcessControl;

impl ProcessControl for UnsupportedProcessControl {
    fn suspend(&self, _pid: u32) -> Result<(), ControlError> {
        Err(ControlError::Unsupported)
    }

    fn resume(&self, _pid: u32) -> Result<(), ControlError> {
        Err(ControlError::Unsupported)
    }

    fn kill_tree(&self, _pid: u32) -> Result<(), ControlError> {
        Err(ControlError::Unsupported)
    }
}

/// The platform-default control backend.
pub fn platform_control() -> std::sync::Arc<dyn ProcessControl> {
    #[cfg(unix)]
    {
        std::sync::Arc::new(UnixProcessControl)
    }
    #[cfg(not(unix))]
    {
        std::sync::Arc::new(UnsupportedProcessControl)
    }
}
