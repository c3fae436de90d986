//! Host process execution with streamed, bounded output capture.

use super::output::OutputCollector;
use super::Completion;
use crate::cancellation::CancellationToken;
use crate::config::Environment;
use crate::core::FailureKind;
use crate::stages::CommandSpec;
use parking_lot::Mutex;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::debug;

/// How long to keep reading pipes after the child has exited or been killed.
const DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

/// Splits `reader` into lines and feeds them to `sink`.
///
/// An unterminated line is flushed once it reaches the collector's limit, so
/// neither the pending buffer nor the collector grows with the output.
fn capture<R>(reader: Option<R>, sink: Arc<Mutex<OutputCollector>>) -> Option<JoinHandle<()>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let mut reader = reader?;
    let limit = sink.lock().limit();
    Some(tokio::spawn(async move {
        let mut buf = [0u8; 4096];
        let mut pending: Vec<u8> = Vec::new();
        loop {
            let n = match reader.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => n,
            };
            for chunk in buf[..n].split_inclusive(|b| *b == b'\n') {
                if let Some(line) = chunk.strip_suffix(b"\n") {
                    pending.extend_from_slice(line);
                    sink.lock().push_line(&String::from_utf8_lossy(&pending));
                    pending.clear();
                } else {
                    pending.extend_from_slice(chunk);
                    if pending.len() >= limit {
                        sink.lock().push_line(&String::from_utf8_lossy(&pending));
                        pending.clear();
                    }
                }
            }
        }
        if !pending.is_empty() {
            sink.lock().push_line(&String::from_utf8_lossy(&pending));
        }
    }))
}

/// Maps an exit status to a shell-style exit code (`128 + signal` when killed).
pub(crate) fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    1
}

enum Exit {
    Status(ExitStatus),
    WaitFailed(std::io::Error),
    TimedOut(Duration),
    Cancelled,
}

/// Runs `command` with the host environment overlaid by `env`.
///
/// Output goes through `output` as it arrives. The child is killed when
/// `timeout` expires, when `cancel` fires, or when the returned future is
/// dropped.
pub(crate) async fn run_command(
    command: &CommandSpec,
    env: &Environment,
    timeout: Option<Duration>,
    cancel: &CancellationToken,
    output: OutputCollector,
) -> Completion {
    let mut cmd = Command::new(command.program());
    cmd.args(command.arg_list())
        .envs(env.iter())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = command.working_dir() {
        cmd.current_dir(dir);
    }

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => {
            return Completion::failed(
                FailureKind::Spawn,
                format!("failed to spawn '{}': {e}", command.program()),
            )
        }
    };
    debug!(command = %command, pid = ?child.id(), "process spawned");

    let sink = Arc::new(Mutex::new(output));
    let readers: Vec<_> = [
        capture(child.stdout.take(), sink.clone()),
        capture(child.stderr.take(), sink.clone()),
    ]
    .into_iter()
    .flatten()
    .collect();

    let exit = {
        let waited = async {
            match timeout {
                Some(limit) => match tokio::time::timeout(limit, child.wait()).await {
                    Ok(status) => status.map_or_else(Exit::WaitFailed, Exit::Status),
                    Err(_) => Exit::TimedOut(limit),
                },
                None => child.wait().await.map_or_else(Exit::WaitFailed, Exit::Status),
            }
        };
        tokio::select! {
            exit = waited => exit,
            () = cancel.cancelled() => Exit::Cancelled,
        }
    };

    if matches!(exit, Exit::TimedOut(_) | Exit::Cancelled) {
        if let Err(e) = child.kill().await {
            debug!(command = %command, error = %e, "kill failed");
        }
    }

    for mut reader in readers {
        if tokio::time::timeout(DRAIN_TIMEOUT, &mut reader).await.is_err() {
            reader.abort();
        }
    }
    let output = sink.lock().finish();

    match exit {
        Exit::Status(status) => Completion::exited(exit_code(status), output),
        Exit::WaitFailed(e) => Completion::failed(FailureKind::Spawn, format!("failed to wait for process: {e}"))
            .with_output(output),
        Exit::TimedOut(limit) => Completion::failed(
            FailureKind::Timeout,
            format!("timed out after {}s", limit.as_secs_f64()),
        )
        .with_output(output),
        Exit::Cancelled => Completion::failed(FailureKind::Cancelled, "cancelled while running").with_output(output),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collector() -> OutputCollector {
        OutputCollector::new(crate::executor::DEFAULT_OUTPUT_LIMIT)
    }

    async fn run(script: &str, timeout: Option<Duration>) -> Completion {
        let env = Environment::from_pairs([("GREETING", "hello")]);
        run_command(&CommandSpec::shell(script), &env, timeout, &CancellationToken::new(), collector()).await
    }

    #[tokio::test]
    async fn test_success_captures_combined_output() {
        let done = run("echo $GREETING; echo oops >&2", None).await;
        assert!(done.failure.is_none());
        assert_eq!(done.exit_code, Some(0));
        assert!(done.output.tail.contains("hello"));
        assert!(done.output.tail.contains("oops"));
    }

    #[tokio::test]
    async fn test_non_zero_exit() {
        let done = run("exit 3", None).await;
        assert_eq!(done.failure, Some(FailureKind::ProcessExit));
        assert_eq!(done.exit_code, Some(3));
    }

    #[tokio::test]
    async fn test_timeout_kills_process() {
        let done = run("echo started; sleep 5", Some(Duration::from_millis(200))).await;
        assert_eq!(done.failure, Some(FailureKind::Timeout));
        assert_eq!(done.exit_code, None);
        assert!(done.output.tail.contains("started"));
    }

    #[tokio::test]
    async fn test_spawn_failure() {
        let done = run_command(
            &CommandSpec::new("/definitely/not/a/binary"),
            &Environment::new(),
            None,
            &CancellationToken::new(),
            collector(),
        )
        .await;
        assert_eq!(done.failure, Some(FailureKind::Spawn));
    }

    #[tokio::test]
    async fn test_cancel_kills_process() {
        let cancel = Arc::new(CancellationToken::new());
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel("test");
        });

        let done = run_command(&CommandSpec::shell("sleep 5"), &Environment::new(), None, &cancel, collector()).await;
        assert_eq!(done.failure, Some(FailureKind::Cancelled));
    }

    #[tokio::test]
    async fn test_large_output_stays_bounded() {
        let done = run_command(
            &CommandSpec::shell("i=0; while [ $i -lt 5000 ]; do echo \"line $i of noisy output\"; i=$((i+1)); done; printf tail-without-newline"),
            &Environment::new(),
            None,
            &CancellationToken::new(),
            OutputCollector::new(512),
        )
        .await;

        assert!(done.failure.is_none());
        assert!(done.output.tail.len() < 512 + 64, "kept {} bytes", done.output.tail.len());
        assert!(done.output.tail.contains("line 4999 of noisy output"));
        assert!(done.output.tail.ends_with("tail-without-newline\n"));
    }
}
