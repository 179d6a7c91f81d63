//! Bounded child processes for `git` and `gh`.
//!
//! Every external call is a suspension point, so each one gets a deadline and
//! a cap on how much output is kept in memory.

use std::io::{self, Read, Write};
use std::process::{Command, ExitStatus, Stdio};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument, warn};
use wait_timeout::ChildExt;

/// Per-stream cap on captured output.
pub const DEFAULT_OUTPUT_LIMIT_BYTES: usize = 4_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessLimits {
    pub timeout: Duration,
    pub output_limit: usize,
}

impl ProcessLimits {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout,
            output_limit: DEFAULT_OUTPUT_LIMIT_BYTES,
        }
    }
}

/// What a finished (or killed) child left behind.
#[derive(Debug)]
pub struct Captured {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    /// Bytes drained from stdout but not kept.
    pub dropped_stdout: u64,
    pub timed_out: bool,
}

impl Captured {
    pub fn success(&self) -> bool {
        self.status.success() && !self.timed_out
    }

    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    /// Trimmed stderr, for error messages.
    pub fn stderr_text(&self) -> String {
        String::from_utf8_lossy(&self.stderr).trim().to_owned()
    }
}

/// Spawn `cmd`, feed it `stdin`, and wait at most `limits.timeout`.
///
/// Both pipes are drained on their own threads while stdin is written, so a
/// chatty child can never block on a full pipe. A child that overruns the
/// deadline is killed and reported with `timed_out` set.
#[instrument(skip_all, fields(program = ?cmd.get_program(), timeout_ms = limits.timeout.as_millis() as u64))]
pub fn run_bounded(mut cmd: Command, stdin: Option<&[u8]>, limits: ProcessLimits) -> Result<Captured> {
    cmd.stdin(if stdin.is_some() {
        Stdio::piped()
    } else {
        Stdio::null()
    })
    .stdout(Stdio::piped())
    .stderr(Stdio::piped());

    let mut child = cmd
        .spawn()
        .with_context(|| format!("spawn {:?}", cmd.get_program()))?;
    let child_stdin = child.stdin.take();
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("child stdout not captured"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("child stderr not captured"))?;

    thread::scope(|scope| {
        let out_reader = scope.spawn(|| read_capped(stdout, limits.output_limit));
        let err_reader = scope.spawn(|| read_capped(stderr, limits.output_limit));

        if let (Some(input), Some(mut pipe)) = (stdin, child_stdin) {
            // A child that exits without reading everything closes the pipe early.
            if let Err(err) = pipe.write_all(input)
                && err.kind() != io::ErrorKind::BrokenPipe
            {
                return Err(err).context("write child stdin");
            }
        }

        let (status, timed_out) = match child.wait_timeout(limits.timeout).context("wait for child")? {
            Some(status) => (status, false),
            None => {
                warn!("child exceeded deadline, killing");
                child.kill().context("kill child")?;
                (child.wait().context("reap killed child")?, true)
            }
        };

        let (stdout, dropped_stdout) = out_reader
            .join()
            .map_err(|_| anyhow!("stdout reader panicked"))?
            .context("read child stdout")?;
        let (stderr, _) = err_reader
            .join()
            .map_err(|_| anyhow!("stderr reader panicked"))?
            .context("read child stderr")?;

        if dropped_stdout > 0 {
            warn!(dropped_stdout, "child stdout exceeded capture limit");
        }
        debug!(exit_code = ?status.code(), timed_out, "child finished");
        Ok(Captured {
            status,
            stdout,
            stderr,
            dropped_stdout,
            timed_out,
        })
    })
}

/// Keep the first `limit` bytes of `reader` and drain the rest.
fn read_capped<R: Read>(reader: R, limit: usize) -> io::Result<(Vec<u8>, u64)> {
    let mut kept = Vec::new();
    let mut head = reader.take(limit as u64);
    head.read_to_end(&mut kept)?;
    let dropped = io::copy(&mut head.into_inner(), &mut io::sink())?;
    Ok((kept, dropped))
}
