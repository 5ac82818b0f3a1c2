use crate::runner::Cancellation;
use mtrprom_model::ProbeError;
use std::io::{ErrorKind, Read};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver};
use std::thread;
use std::time::{Duration, Instant};
use tracing::debug;

/// How often a running child is polled for exit, deadline and cancellation.
pub const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// How long the pipes may stay open after the child exited.
pub const DRAIN_GRACE: Duration = Duration::from_millis(200);

#[derive(Debug)]
pub struct ProcessOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

/// Runs `command` to completion, killing it once `timeout` elapses or `cancel`
/// is raised. Output pipes are drained on their own threads so a chatty child
/// never blocks on a full pipe.
pub fn run_with_deadline(
    command: &mut Command,
    timeout: Duration,
    cancel: &Cancellation,
) -> Result<ProcessOutput, ProbeError> {
    let program = command.get_program().to_string_lossy().to_string();
    let started = Instant::now();
    let deadline = started + timeout;

    if cancel.is_cancelled() {
        return Err(ProbeError::TimedOut { after_ms: 0 });
    }

    let mut child = command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|err| spawn_error(&program, err))?;
    debug!(program = %program, pid = child.id(), "spawned measurement");

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| ProbeError::Execution(format!("missing {program} stdout")))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| ProbeError::Execution(format!("missing {program} stderr")))?;
    let stdout_rx = drain(stdout);
    let stderr_rx = drain(stderr);

    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) => {}
            Err(err) => {
                reap(&mut child);
                return Err(ProbeError::Execution(format!(
                    "failed to wait for {program}: {err}"
                )));
            }
        }

        if cancel.is_cancelled() || Instant::now() >= deadline {
            reap(&mut child);
            let after_ms = started.elapsed().as_millis() as u64;
            debug!(program = %program, after_ms, "killed measurement");
            return Err(ProbeError::TimedOut { after_ms });
        }

        let wait = POLL_INTERVAL.min(deadline.saturating_duration_since(Instant::now()));
        if !wait.is_zero() {
            thread::sleep(wait);
        }
    };

    let stdout = collect(&program, "stdout", stdout_rx)?;
    let stderr = collect(&program, "stderr", stderr_rx)?;

    Ok(ProcessOutput {
        status,
        stdout,
        stderr,
    })
}

fn spawn_error(program: &str, err: std::io::Error) -> ProbeError {
    match err.kind() {
        ErrorKind::NotFound => ProbeError::Execution(format!("{program} not found")),
        ErrorKind::PermissionDenied => {
            ProbeError::Execution(format!("permission denied running {program}"))
        }
        _ => ProbeError::Execution(format!("failed to spawn {program}: {err}")),
    }
}

fn reap(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

fn drain<R: Read + Send + 'static>(mut reader: R) -> Receiver<Vec<u8>> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = reader.read_to_end(&mut buf);
        let _ = tx.send(buf);
    });
    rx
}

fn collect(program: &str, stream: &str, rx: Receiver<Vec<u8>>) -> Result<String, ProbeError> {
    let bytes = rx.recv_timeout(DRAIN_GRACE).map_err(|_| {
        ProbeError::Execution(format!("{program} {stream} stayed open after exit"))
    })?;
    Ok(String::from_utf8_lossy(&bytes).to_string())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn captures_output_of_a_finished_child() {
        let mut command = Command::new("sh");
        command.arg("-c").arg("echo hop; echo oops >&2; exit 3");
        let output =
            run_with_deadline(&mut command, Duration::from_secs(5), &Cancellation::new()).unwrap();
        assert_eq!(output.stdout.trim(), "hop");
        assert_eq!(output.stderr.trim(), "oops");
        assert_eq!(output.status.code(), Some(3));
    }

    #[test]
    fn kills_a_child_past_its_deadline() {
        let mut command = Command::new("sleep");
        command.arg("5");
        let started = Instant::now();
        let err = run_with_deadline(&mut command, Duration::from_millis(100), &Cancellation::new())
            .unwrap_err();
        assert!(matches!(err, ProbeError::TimedOut { .. }));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn cancellation_stops_before_spawning() {
        let cancel = Cancellation::new();
        cancel.cancel();
        let mut command = Command::new("sleep");
        command.arg("5");
        let err = run_with_deadline(&mut command, Duration::from_secs(5), &cancel).unwrap_err();
        assert_eq!(err, ProbeError::TimedOut { after_ms: 0 });
    }

    #[test]
    fn missing_program_is_an_execution_error() {
        let mut command = Command::new("mtrprom-definitely-not-installed");
        let err = run_with_deadline(&mut command, Duration::from_secs(1), &Cancellation::new())
            .unwrap_err();
        assert!(matches!(err, ProbeError::Execution(message) if message.contains("not found")));
    }
}
