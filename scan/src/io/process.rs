//! Child process execution with a deadline and bounded output capture.

use std::io::{Read, Write};
use std::process::{Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument, warn};
use wait_timeout::ChildExt;

/// Output of a finished (or killed) child process.
#[derive(Debug)]
pub struct ProcessOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    /// Bytes discarded from stdout/stderr beyond the capture limit.
    pub truncated_bytes: usize,
    pub timed_out: bool,
}

impl ProcessOutput {
    /// Trimmed stderr, or a placeholder when the child wrote nothing.
    pub fn stderr_summary(&self) -> String {
        let text = String::from_utf8_lossy(&self.stderr);
        let text = text.trim();
        if text.is_empty() {
            format!("exit status {:?}", self.status.code())
        } else {
            text.to_string()
        }
    }
}

/// How long to wait for output pipes to close after a timed-out child is killed.
const KILL_GRACE: Duration = Duration::from_millis(500);

/// Run `cmd`, feeding `stdin`, and wait at most `timeout`.
///
/// stdin is written and stdout/stderr are drained on helper threads so a chatty
/// child can never deadlock against a full pipe. At most `output_limit_bytes`
/// per stream are kept; the rest is drained and counted.
///
/// On unix the child leads its own process group and the whole group is killed
/// on timeout. Output still held open by an escaped descendant is abandoned
/// after a short grace period.
#[instrument(skip_all, fields(timeout_secs = timeout.as_secs_f64()))]
pub fn run_with_deadline(
    mut cmd: Command,
    stdin: Vec<u8>,
    timeout: Duration,
    output_limit_bytes: usize,
) -> Result<ProcessOutput> {
    cmd.stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }

    let mut child = cmd.spawn().context("spawn command")?;
    debug!(pid = child.id(), "child spawned");

    let mut child_stdin = child
        .stdin
        .take()
        .ok_or_else(|| anyhow!("stdin was not piped"))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;

    let writer = thread::spawn(move || {
        // A child that exits without reading stdin closes the pipe; that is not our error.
        let _ = child_stdin.write_all(&stdin);
    });
    let stdout_reader = spawn_reader(stdout, output_limit_bytes);
    let stderr_reader = spawn_reader(stderr, output_limit_bytes);

    let (status, timed_out) = match child.wait_timeout(timeout).context("wait for command")? {
        Some(status) => (status, false),
        None => {
            warn!(timeout_ms = timeout.as_millis(), "command timed out, killing");
            kill_process_group(child.id());
            if let Err(err) = child.kill() {
                debug!(error = %err, "kill after group kill");
            }
            (child.wait().context("wait command after kill")?, true)
        }
    };

    let grace = timed_out.then_some(KILL_GRACE);
    if !timed_out {
        let _ = writer.join();
    }
    let (stdout, stdout_dropped) = collect_output(&stdout_reader, grace).context("join stdout")?;
    let (stderr, stderr_dropped) = collect_output(&stderr_reader, grace).context("join stderr")?;
    let truncated_bytes = stdout_dropped + stderr_dropped;
    if truncated_bytes > 0 {
        warn!(truncated_bytes, "command output truncated");
    }

    debug!(exit_code = ?status.code(), timed_out, "command finished");
    Ok(ProcessOutput {
        status,
        stdout,
        stderr,
        truncated_bytes,
        timed_out,
    })
}

type Drained = Result<(Vec<u8>, usize)>;

fn spawn_reader<R: Read + Send + 'static>(reader: R, limit: usize) -> Receiver<Drained> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let _ = tx.send(drain_limited(reader, limit));
    });
    rx
}

/// Wait for a reader; with a `grace`, give up and return nothing once it expires.
fn collect_output(rx: &Receiver<Drained>, grace: Option<Duration>) -> Drained {
    let Some(grace) = grace else {
        return rx
            .recv()
            .map_err(|_| anyhow!("output reader thread panicked"))?;
    };
    match rx.recv_timeout(grace) {
        Ok(drained) => drained,
        Err(RecvTimeoutError::Timeout) => {
            warn!("output pipe still open after kill, abandoning reader");
            Ok((Vec::new(), 0))
        }
        Err(RecvTimeoutError::Disconnected) => Err(anyhow!("output reader thread panicked")),
    }
}

#[cfg(unix)]
fn kill_process_group(pgid: u32) {
    // `kill -KILL -<pgid>` signals every process in the group.
    match Command::new("kill")
        .arg("-KILL")
        .arg(format!("-{pgid}"))
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
    {
        Ok(status) if status.success() => debug!(pgid, "process group killed"),
        Ok(status) => debug!(pgid, exit_code = ?status.code(), "process group kill failed"),
        Err(err) => warn!(pgid, error = %err, "run kill for process group"),
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pgid: u32) {}

fn drain_limited<R: Read>(mut reader: R, limit: usize) -> Result<(Vec<u8>, usize)> {
    let mut kept = Vec::new();
    let mut dropped = 0usize;
    let mut chunk = [0u8; 8192];
    loop {
        let n = reader.read(&mut chunk).context("read output")?;
        if n == 0 {
            break;
        }
        let room = limit.saturating_sub(kept.len()).min(n);
        kept.extend_from_slice(&chunk[..room]);
        dropped += n - room;
    }
    Ok((kept, dropped))
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Instant;

    fn sh(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    #[test]
    fn echoes_stdin_and_captures_stderr() {
        let output = run_with_deadline(
            sh("cat; echo oops >&2"),
            b"hello".to_vec(),
            Duration::from_secs(10),
            1024,
        )
        .expect("run");
        assert!(output.status.success());
        assert_eq!(output.stdout, b"hello");
        assert_eq!(output.stderr_summary(), "oops");
        assert!(!output.timed_out);
    }

    #[test]
    fn truncates_beyond_limit() {
        let output = run_with_deadline(
            sh("printf 0123456789"),
            Vec::new(),
            Duration::from_secs(10),
            4,
        )
        .expect("run");
        assert_eq!(output.stdout, b"0123");
        assert_eq!(output.truncated_bytes, 6);
    }

    #[test]
    fn timeout_kills_forked_descendants_promptly() {
        let started = Instant::now();
        let output = run_with_deadline(
            sh("sleep 3; true"),
            Vec::new(),
            Duration::from_millis(200),
            1024,
        )
        .expect("run");
        assert!(output.timed_out);
        assert!(
            started.elapsed() < Duration::from_secs(2),
            "took {:?}",
            started.elapsed()
        );
    }

    #[test]
    fn kills_on_timeout() {
        let output = run_with_deadline(
            sh("exec sleep 5"),
            Vec::new(),
            Duration::from_millis(100),
            1024,
        )
        .expect("run");
        assert!(output.timed_out);
        assert!(!output.status.success());
    }
}
