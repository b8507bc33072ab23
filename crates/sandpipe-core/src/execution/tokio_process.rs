use std::collections::VecDeque;
use std::process::Stdio;
use std::time::{Duration, SystemTime};

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Child;
use tokio::task::JoinHandle;

use crate::execution::{
    ProcessExecutor, ProcessExitStatus, ProcessOutput, ProcessSpawnRequest,
    ProcessTerminationMode, ProcessWaitFuture, RunningProcess,
};
use crate::models::error::cancelled_error;
use crate::models::{CoreError, CoreErrorKind, CoreResult};
use crate::scope::Scope;

const CAPTURE_CHUNK: usize = 8 * 1024;

/// Runs bodies as host processes, one process group per body.
pub struct TokioProcessExecutor;

impl ProcessExecutor for TokioProcessExecutor {
    fn spawn(&self, request: ProcessSpawnRequest) -> CoreResult<Box<dyn RunningProcess>> {
        let ProcessSpawnRequest {
            task,
            command,
            output_limit,
            grace,
        } = request;

        let mut child = tokio::process::Command::new(&command.program)
            .args(&command.args)
            .envs(&command.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .kill_on_drop(true)
            .spawn()
            .map_err(|error| {
                process_failure(
                    &task,
                    format!("could not start '{}': {error}", command.program.display()),
                )
            })?;

        let pid = child.id();
        tracing::debug!(task = %task, ?pid, program = %command.program.display(), "process spawned");

        // Readers start right away so a chatty body never blocks on a full pipe.
        let stdout = child
            .stdout
            .take()
            .map(|stream| tokio::spawn(capture_tail(stream, output_limit)));
        let stderr = child
            .stderr
            .take()
            .map(|stream| tokio::spawn(capture_tail(stream, output_limit)));

        Ok(Box::new(GroupProcess {
            task,
            child,
            pid,
            stdout,
            stderr,
            grace,
            started_at: SystemTime::now(),
        }))
    }
}

struct GroupProcess {
    task: String,
    child: Child,
    pid: Option<u32>,
    stdout: Option<JoinHandle<Vec<u8>>>,
    stderr: Option<JoinHandle<Vec<u8>>>,
    grace: Duration,
    started_at: SystemTime,
}

impl RunningProcess for GroupProcess {
    fn pid(&self) -> Option<u32> {
        self.pid
    }

    fn terminate(&self, mode: ProcessTerminationMode) -> CoreResult<()> {
        let signal = match mode {
            ProcessTerminationMode::Graceful => libc::SIGTERM,
            ProcessTerminationMode::Immediate => libc::SIGKILL,
        };
        signal_group(&self.task, self.pid, signal)
    }

    fn wait(self: Box<Self>, scope: Option<Scope>) -> ProcessWaitFuture {
        Box::pin(async move {
            let GroupProcess {
                task,
                mut child,
                pid,
                stdout,
                stderr,
                grace,
                started_at,
            } = *self;

            let cancelled = async {
                match &scope {
                    Some(scope) => scope.cancelled().await,
                    None => std::future::pending().await,
                }
            };
            let exited = tokio::select! {
                status = child.wait() => Some(status),
                () = cancelled => None,
            };

            let (status, was_cancelled) = match exited {
                Some(status) => (status, false),
                None => {
                    tracing::info!(task = %task, ?pid, "stopping cancelled process group");
                    warn_on_failure(&task, signal_group(&task, pid, libc::SIGTERM));
                    let status = match tokio::time::timeout(grace, child.wait()).await {
                        Ok(status) => status,
                        Err(_) => {
                            warn_on_failure(&task, signal_group(&task, pid, libc::SIGKILL));
                            child.wait().await
                        }
                    };
                    (status, true)
                }
            };
            let status = status
                .map_err(|error| process_failure(&task, format!("could not wait for process: {error}")))?;

            // Background processes left in the group would hold the pipes open.
            warn_on_failure(&task, signal_group(&task, pid, libc::SIGKILL));
            let stdout = collect(stdout, grace).await;
            let stderr = collect(stderr, grace).await;

            if was_cancelled {
                return Err(cancelled_error(Some(&task), "process cancelled with its scope"));
            }

            Ok(ProcessOutput {
                status: match status.code() {
                    Some(code) => ProcessExitStatus::ExitCode(code),
                    None => ProcessExitStatus::Terminated,
                },
                stdout,
                stderr,
                started_at,
                finished_at: SystemTime::now(),
            })
        })
    }
}

/// Drains `stream`, keeping only its last `limit` bytes.
async fn capture_tail<R: AsyncRead + Unpin>(mut stream: R, limit: usize) -> Vec<u8> {
    let mut tail = VecDeque::new();
    let mut chunk = vec![0u8; CAPTURE_CHUNK];
    loop {
        match stream.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(read) => {
                tail.extend(&chunk[..read]);
                if tail.len() > limit {
                    let excess = tail.len() - limit;
                    tail.drain(..excess);
                }
            }
        }
    }
    Vec::from(tail)
}

async fn collect(reader: Option<JoinHandle<Vec<u8>>>, bound: Duration) -> Vec<u8> {
    let Some(reader) = reader else {
        return Vec::new();
    };
    match tokio::time::timeout(bound, reader).await {
        Ok(Ok(captured)) => captured,
        _ => Vec::new(),
    }
}

/// Signals every process in the group led by `pid`. A group that no longer
/// exists is not an error.
fn signal_group(task: &str, pid: Option<u32>, signal: libc::c_int) -> CoreResult<()> {
    let Some(pid) = pid else {
        return Ok(());
    };

    if unsafe { libc::kill(-(pid as libc::pid_t), signal) } == 0 {
        return Ok(());
    }
    let os_error = std::io::Error::last_os_error();
    if os_error.raw_os_error() == Some(libc::ESRCH) {
        return Ok(());
    }
    Err(process_failure(
        task,
        format!("could not send signal {signal} to process group {pid}: {os_error}"),
    ))
}

fn warn_on_failure(task: &str, result: CoreResult<()>) {
    if let Err(error) = result {
        tracing::warn!(task, message = %error.message, "process group signal failed");
    }
}

fn process_failure(task: &str, message: String) -> CoreError {
    CoreError::for_task(task, CoreErrorKind::ProcessFailure, message)
}
