//! Helpers for running child processes with timeouts and line-streamed stdout.

use std::io::{BufRead, BufReader, Read};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

/// How long a resolved child gets to exit on its own before it is killed.
const RESOLVED_EXIT_GRACE: Duration = Duration::from_secs(5);

/// Returned by the line callback to keep reading or to settle the run early.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineControl {
    Continue,
    Resolve,
}

/// How a streamed run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEnd {
    /// The callback asked to resolve before the child exited.
    Resolved,
    Exited(ExitStatus),
    /// The deadline passed; the child was killed.
    TimedOut,
}

#[derive(Debug)]
pub struct StreamOutput {
    pub end: StreamEnd,
    pub stderr: Vec<u8>,
    pub stderr_truncated: usize,
}

impl StreamOutput {
    pub fn stderr_text(&self) -> String {
        String::from_utf8_lossy(&self.stderr).trim().to_string()
    }
}

/// Spawn `cmd` and feed each stdout line to `on_line` as it arrives.
///
/// The run settles exactly once: on the first `LineControl::Resolve`, on child
/// exit, or at `timeout`, whichever the single receive loop sees first. A line
/// arriving after the deadline is never delivered. stderr is drained on its
/// own thread and bounded by `stderr_limit_bytes`.
#[instrument(skip_all, fields(timeout_secs = timeout.as_secs(), stderr_limit_bytes))]
pub fn run_command_streaming<F>(
    mut cmd: Command,
    timeout: Duration,
    stderr_limit_bytes: usize,
    mut on_line: F,
) -> Result<StreamOutput>
where
    F: FnMut(&str) -> LineControl,
{
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    debug!("spawning child process");
    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            error!(err = %e, "failed to spawn command");
            return Err(e).context("spawn command");
        }
    };

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;

    let (tx, rx) = mpsc::channel::<String>();
    thread::spawn(move || forward_lines(stdout, &tx));
    let stderr_handle = thread::spawn(move || read_stream_limited(stderr, stderr_limit_bytes));

    let deadline = Instant::now() + timeout;
    let end = loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break StreamEnd::TimedOut;
        }
        match rx.recv_timeout(remaining) {
            Ok(line) => {
                if on_line(&line) == LineControl::Resolve {
                    break StreamEnd::Resolved;
                }
            }
            Err(RecvTimeoutError::Timeout) => break StreamEnd::TimedOut,
            Err(RecvTimeoutError::Disconnected) => {
                let remaining = deadline.saturating_duration_since(Instant::now());
                match child.wait_timeout(remaining).context("wait for command")? {
                    Some(status) => break StreamEnd::Exited(status),
                    None => break StreamEnd::TimedOut,
                }
            }
        }
    };
    drop(rx);

    match end {
        StreamEnd::TimedOut => {
            warn!(
                timeout_secs = timeout.as_secs(),
                "command timed out, killing"
            );
            child.kill().context("kill command")?;
            child.wait().context("wait command after kill")?;
        }
        StreamEnd::Resolved => reap_in_background(child),
        StreamEnd::Exited(_) => {}
    }

    // Grandchildren may keep stderr open after a kill, so only a finished
    // reader is joined outside the normal-exit path.
    let (stderr, stderr_truncated) =
        if matches!(end, StreamEnd::Exited(_)) || stderr_handle.is_finished() {
            join_output(stderr_handle).context("join stderr")?
        } else {
            (Vec::new(), 0)
        };

    if stderr_truncated > 0 {
        warn!(stderr_truncated, "stderr truncated");
    }

    debug!(?end, "command finished");
    Ok(StreamOutput {
        end,
        stderr,
        stderr_truncated,
    })
}

/// Send stdout lines until EOF. Once the receiver is gone the pipe is still
/// drained so the child never blocks on a full buffer.
fn forward_lines<R: Read>(reader: R, tx: &mpsc::Sender<String>) {
    let mut reader = BufReader::new(reader);
    let mut receiver_open = true;
    loop {
        let mut buf = Vec::new();
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) => break,
            Ok(_) => {
                if receiver_open {
                    let line = String::from_utf8_lossy(&buf)
                        .trim_end_matches(['\r', '\n'])
                        .to_string();
                    receiver_open = tx.send(line).is_ok();
                }
            }
            Err(e) => {
                warn!(err = %e, "stdout read failed");
                break;
            }
        }
    }
}

fn reap_in_background(mut child: Child) {
    thread::spawn(move || match child.wait_timeout(RESOLVED_EXIT_GRACE) {
        Ok(Some(_)) => {}
        Ok(None) => {
            debug!("resolved child still running, killing");
            if let Err(e) = child.kill() {
                warn!(err = %e, "failed to kill resolved child");
            }
            let _ = child.wait();
        }
        Err(e) => warn!(err = %e, "failed to wait for resolved child"),
    });
}

fn join_output(handle: thread::JoinHandle<Result<(Vec<u8>, usize)>>) -> Result<(Vec<u8>, usize)> {
    match handle.join() {
        Ok(result) => result,
        Err(_) => Err(anyhow!("output reader thread panicked")),
    }
}

fn read_stream_limited<R: Read>(mut reader: R, limit: usize) -> Result<(Vec<u8>, usize)> {
    let mut buf = Vec::new();
    let mut truncated = 0usize;
    let mut chunk = [0u8; 8192];

    loop {
        let n = reader.read(&mut chunk).context("read output")?;
        if n == 0 {
            break;
        }
        let remaining = limit.saturating_sub(buf.len());
        if remaining > 0 {
            let keep = n.min(remaining);
            buf.extend_from_slice(&chunk[..keep]);
            truncated += n.saturating_sub(keep);
        } else {
            truncated += n;
        }
    }

    Ok((buf, truncated))
}
