//! Spawning the external copy tool with streamed stdout/stderr.

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::process::Stdio;

use async_trait::async_trait;
use futures::stream::Stream;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;

use super::error::SupervisorError;

/// Command line for one copy run.
#[derive(Debug, Clone)]
pub struct ToolCommand {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
}

/// How the tool process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolExit {
    Code(i32),
    Signal(i32),
}

impl ToolExit {
    /// Numeric exit code, with the shell convention for signal deaths.
    pub fn code(&self) -> i32 {
        match self {
            ToolExit::Code(code) => *code,
            ToolExit::Signal(sig) => 128 + sig,
        }
    }
}

pub type LineStream = Pin<Box<dyn Stream<Item = Result<String, std::io::Error>> + Send>>;
pub type StatusFuture = Pin<Box<dyn Future<Output = Result<ToolExit, SupervisorError>> + Send>>;

/// A running tool: its pid, both output streams, and a future resolving to
/// the exit status.
pub struct ToolProcess {
    pub pid: u32,
    pub stdout: LineStream,
    pub stderr: LineStream,
    pub status: StatusFuture,
}

#[async_trait]
pub trait ToolRunner: Send + Sync {
    async fn spawn_streaming(&self, command: ToolCommand) -> Result<ToolProcess, SupervisorError>;
}

/// Production runner on top of `tokio::process`.
pub struct TokioToolRunner;

impl TokioToolRunner {
    /// Strip the trailing newline (and a CR before it) and decode. The tool
    /// may emit its platform's legacy console code page, so decoding is
    /// lossy rather than failing.
    fn decode_line(mut bytes: Vec<u8>) -> String {
        if bytes.last() == Some(&b'\n') {
            bytes.pop();
        }
        if bytes.last() == Some(&b'\r') {
            bytes.pop();
        }
        String::from_utf8_lossy(&bytes).into_owned()
    }

    fn line_stream<R>(reader: BufReader<R>) -> LineStream
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        Box::pin(futures::stream::unfold(reader, |mut reader| async move {
            let mut buf = Vec::new();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => None,
                Ok(_) => Some((Ok(Self::decode_line(buf)), reader)),
                Err(e) => Some((Err(e), reader)),
            }
        }))
    }

    fn convert_exit(status: std::process::ExitStatus) -> ToolExit {
        if let Some(code) = status.code() {
            return ToolExit::Code(code);
        }
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if let Some(sig) = status.signal() {
                return ToolExit::Signal(sig);
            }
        }
        ToolExit::Code(-1)
    }

    fn status_future(mut child: tokio::process::Child, command_line: String) -> StatusFuture {
        Box::pin(async move {
            let status = child.wait().await.map_err(|source| {
                SupervisorError::SpawnFailed {
                    command: command_line,
                    source,
                }
            })?;
            Ok(Self::convert_exit(status))
        })
    }
}

#[async_trait]
impl ToolRunner for TokioToolRunner {
    async fn spawn_streaming(&self, command: ToolCommand) -> Result<ToolProcess, SupervisorError> {
        let command_line = format!("{} {}", command.program, command.args.join(" "));
        tracing::debug!(command = %command_line, "spawning copy tool");

        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        // Own process group, so kill-tree can address the tool and any
        // children it spawns in one signal.
        #[cfg(unix)]
        cmd.process_group(0);
        if let Some(dir) = &command.working_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                SupervisorError::ToolNotFound(command.program.clone())
            } else {
                SupervisorError::SpawnFailed {
                    command: command_line.clone(),
                    source,
                }
            }
        })?;

        let pid = child
            .id()
            .ok_or(SupervisorError::StreamCapture("process id"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or(SupervisorError::StreamCapture("stdout"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or(SupervisorError::StreamCapture("stderr"))?;

        Ok(ToolProcess {
            pid,
            stdout: Self::line_stream(BufReader::new(stdout)),
            stderr: Self::line_stream(BufReader::new(stderr)),
            status: Self::status_future(child, command_line),
        })
    }
}
