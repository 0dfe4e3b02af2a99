//! Helpers for running agent processes with bounded output and cancellation.

use std::collections::VecDeque;
use std::io::{BufRead, BufReader, Read};
use std::process::{Command, ExitStatus, Stdio};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, info, instrument, warn};
use wait_timeout::ChildExt;

use crate::errors::Cancelled;
use crate::io::cancel::CancelToken;

/// How often a running child is polled for exit and cancellation.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Captured child process output.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    /// First `output_limit_bytes` of stdout.
    pub stdout: Vec<u8>,
    /// Last `output_limit_bytes` of stderr, where failure causes usually are.
    pub stderr: Vec<u8>,
    /// Bytes dropped from the end of stdout.
    pub stdout_truncated: usize,
    /// Bytes dropped from the start of stderr.
    pub stderr_truncated: usize,
}

impl CommandOutput {
    pub fn stdout_truncated_notice(&self, label: &str) -> String {
        if self.stdout_truncated > 0 {
            format!(
                "\n[{label} stdout truncated {} bytes]\n",
                self.stdout_truncated
            )
        } else {
            String::new()
        }
    }

    pub fn stderr_truncated_notice(&self, label: &str) -> String {
        if self.stderr_truncated > 0 {
            format!(
                "\n[{label} stderr: {} earlier bytes dropped]\n",
                self.stderr_truncated
            )
        } else {
            String::new()
        }
    }

    /// Last `max_lines` lines of stderr, for error reports.
    pub fn stderr_tail(&self, max_lines: usize) -> String {
        let text = String::from_utf8_lossy(&self.stderr);
        let lines: Vec<&str> = text.lines().collect();
        let start = lines.len().saturating_sub(max_lines);
        lines[start..].join("\n")
    }
}

#[derive(Debug, Clone, Copy)]
enum Stream {
    Stdout,
    Stderr,
}

/// Run a command to completion, streaming its output into the tracing sink.
///
/// Both pipes are read line by line on their own threads while the child runs,
/// so progress is visible as it happens and neither pipe can fill up. Lines are
/// logged under the `docgen::agent` target. `output_limit_bytes` bounds what is
/// kept in memory per stream: the head of stdout (where the agent protocol
/// output starts) and the tail of stderr. The rest is drained and counted.
///
/// The wait polls `cancel`; on cancellation the child is killed and the call
/// fails with [`Cancelled`].
#[instrument(skip_all, fields(label, output_limit_bytes))]
pub fn run_command_streaming(
    mut cmd: Command,
    label: &str,
    output_limit_bytes: usize,
    cancel: &CancelToken,
) -> Result<CommandOutput> {
    cancel.check()?;
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

    let stdout_label = label.to_string();
    let stderr_label = label.to_string();
    let stdout_handle = thread::spawn(move || {
        read_lines_limited(stdout, output_limit_bytes, &stdout_label, Stream::Stdout)
    });
    let stderr_handle = thread::spawn(move || {
        read_lines_limited(stderr, output_limit_bytes, &stderr_label, Stream::Stderr)
    });

    let status = loop {
        if cancel.is_cancelled() {
            warn!("cancelled, killing child process");
            child.kill().context("kill command")?;
            child.wait().context("wait command after kill")?;
            // Grandchildren may still hold the pipes; readers are left detached.
            drop((stdout_handle, stderr_handle));
            return Err(Cancelled.into());
        }
        if let Some(status) = child
            .wait_timeout(POLL_INTERVAL)
            .context("wait for command")?
        {
            break status;
        }
    };

    let (stdout, stdout_truncated) = join_output(stdout_handle).context("join stdout")?;
    let (stderr, stderr_truncated) = join_output(stderr_handle).context("join stderr")?;

    if stdout_truncated > 0 || stderr_truncated > 0 {
        warn!(stdout_truncated, stderr_truncated, "output truncated");
    }

    debug!(exit_code = ?status.code(), "command finished");
    Ok(CommandOutput {
        status,
        stdout,
        stderr,
        stdout_truncated,
        stderr_truncated,
    })
}

fn join_output(handle: thread::JoinHandle<Result<(Vec<u8>, usize)>>) -> Result<(Vec<u8>, usize)> {
    match handle.join() {
        Ok(result) => result,
        Err(_) => Err(anyhow!("output reader thread panicked")),
    }
}

/// Read a stream line by line with a size limit, logging each line.
///
/// Stdout keeps the first `limit` bytes; stderr keeps the last `limit` bytes.
fn read_lines_limited<R: Read>(
    reader: R,
    limit: usize,
    label: &str,
    stream: Stream,
) -> Result<(Vec<u8>, usize)> {
    let mut buf_reader = BufReader::new(reader);
    let mut head = Vec::new();
    let mut tail = TailWindow::new(limit);
    let mut truncated = 0usize;

    loop {
        let mut line = Vec::new();
        let n = buf_reader
            .read_until(b'\n', &mut line)
            .context("read line")?;
        if n == 0 {
            break;
        }

        let text = String::from_utf8_lossy(&line);
        let text = text.trim_end();
        match stream {
            Stream::Stderr => info!(target: "docgen::agent", agent = label, "{text}"),
            Stream::Stdout => debug!(target: "docgen::agent", agent = label, "{text}"),
        }

        match stream {
            Stream::Stdout => {
                let keep = n.min(limit.saturating_sub(head.len()));
                head.extend_from_slice(&line[..keep]);
                truncated += n - keep;
            }
            Stream::Stderr => truncated += tail.push(line),
        }
    }

    match stream {
        Stream::Stdout => Ok((head, truncated)),
        Stream::Stderr => Ok((tail.into_bytes(), truncated)),
    }
}

/// The most recent lines of a stream, at most `limit` bytes in total.
#[derive(Debug)]
struct TailWindow {
    limit: usize,
    len: usize,
    lines: VecDeque<Vec<u8>>,
}

impl TailWindow {
    fn new(limit: usize) -> Self {
        Self {
            limit,
            len: 0,
            lines: VecDeque::new(),
        }
    }

    /// Append a line, evicting from the front. Returns the bytes dropped.
    fn push(&mut self, mut line: Vec<u8>) -> usize {
        let mut dropped = 0;
        if line.len() > self.limit {
            let cut = line.len() - self.limit;
            line.drain(..cut);
            dropped += cut;
        }
        self.len += line.len();
        self.lines.push_back(line);
        while self.len > self.limit {
            let Some(front) = self.lines.pop_front() else {
                break;
            };
            self.len -= front.len();
            dropped += front.len();
        }
        dropped
    }

    fn into_bytes(self) -> Vec<u8> {
        self.lines.into_iter().flatten().collect()
    }
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
    fn captures_both_streams() {
        let output = run_command_streaming(
            sh("echo out; echo err 1>&2; exit 3"),
            "test",
            1024,
            &CancelToken::new(),
        )
        .expect("run");
        assert_eq!(output.status.code(), Some(3));
        assert_eq!(String::from_utf8_lossy(&output.stdout), "out\n");
        assert_eq!(output.stderr_tail(5), "err");
    }

    #[test]
    fn output_beyond_limit_is_counted() {
        let output = run_command_streaming(
            sh("printf 'abcdefghij\\n'"),
            "test",
            4,
            &CancelToken::new(),
        )
        .expect("run");
        assert_eq!(output.stdout, b"abcd");
        assert_eq!(output.stdout_truncated, 7);
        assert!(output.stdout_truncated_notice("agent").contains("7 bytes"));
    }

    #[test]
    fn stderr_tail_keeps_last_lines() {
        let output = run_command_streaming(
            sh("printf 'a\\nb\\nc\\n' 1>&2"),
            "test",
            1024,
            &CancelToken::new(),
        )
        .expect("run");
        assert_eq!(output.stderr_tail(2), "b\nc");
    }

    #[test]
    fn stderr_over_limit_keeps_the_failure_cause() {
        let script = "for i in 1 2 3 4 5 6 7 8 9; do echo line$i 1>&2; done; \
                      echo FATAL-real-cause 1>&2; exit 1";
        let output = run_command_streaming(
            sh(script),
            "test",
            24,
            &CancelToken::new(),
        )
        .expect("run");
        assert_eq!(output.stderr_tail(1), "FATAL-real-cause");
        assert_eq!(output.stderr_tail(3), "line9\nFATAL-real-cause");
        // 9 * "lineN\n" + "FATAL-real-cause\n" = 71 bytes, 23 kept.
        assert_eq!(output.stderr.len(), 23);
        assert_eq!(output.stderr_truncated, 71 - 23);
        assert!(output.stderr_truncated_notice("agent").contains("48 earlier bytes dropped"));
    }

    #[test]
    fn tail_window_trims_oversized_line_from_the_front() {
        let mut window = TailWindow::new(4);
        assert_eq!(window.push(b"ab\n".to_vec()), 0);
        assert_eq!(window.push(b"0123456789\n".to_vec()), 3 + 7);
        assert_eq!(window.into_bytes(), b"789\n");
    }

    #[test]
    fn cancellation_kills_child() {
        let cancel = CancelToken::new();
        let remote = cancel.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            remote.cancel();
        });

        let start = Instant::now();
        let err = run_command_streaming(sh("exec sleep 30"), "test", 1024, &cancel)
            .expect_err("should be cancelled");
        handle.join().expect("join");

        assert!(err.downcast_ref::<Cancelled>().is_some());
        assert!(start.elapsed() < Duration::from_secs(10));
    }
}
