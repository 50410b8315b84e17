//! Subprocess discipline for external fetches (§4.4).
//!
//! Fire-and-forget spawns that discard stderr are a persistent bug hazard —
//! a failure becomes invisible and the cached value goes silently stale for
//! hours (§9 Design Notes). Every external sampler this crate shells out to
//! goes through [`run_bounded`]: stderr is always captured, exit status is
//! always inspected, and a hard wall-clock always applies.

use anyhow::{Context, Result};
use std::io::Read;
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

/// Longest stderr excerpt retained when logging a non-zero exit.
const STDERR_TAIL_BYTES: usize = 200;

#[derive(Debug, Clone)]
pub struct BoundedOutput {
    pub stdout: String,
    pub stderr_tail: String,
    pub success: bool,
}

/// Runs `cmd` to completion, capped at `timeout`. A timeout is treated as a
/// fetch failure, same as a non-zero exit (§4.4 Subprocess discipline).
pub fn run_bounded(mut cmd: Command, timeout: Duration) -> Result<BoundedOutput> {
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
    let mut child = cmd.spawn().context("Failed to spawn subprocess")?;

    let deadline = Instant::now() + timeout;
    let status = loop {
        match child.try_wait().context("Failed to poll subprocess")? {
            Some(status) => break status,
            None => {
                if Instant::now() >= deadline {
                    kill_and_reap(&mut child);
                    anyhow::bail!("subprocess exceeded {:?} timeout", timeout);
                }
                std::thread::sleep(Duration::from_millis(20));
            }
        }
    };

    let mut stdout = String::new();
    if let Some(mut out) = child.stdout.take() {
        let _ = out.read_to_string(&mut stdout);
    }
    let mut stderr = String::new();
    if let Some(mut err) = child.stderr.take() {
        let _ = err.read_to_string(&mut stderr);
    }

    let success = status.success();
    let tail = tail_bytes(&stderr, STDERR_TAIL_BYTES);
    if !success {
        tracing::warn!(
            code = status.code(),
            stderr_tail = %tail,
            "subprocess exited non-zero"
        );
    }

    Ok(BoundedOutput { stdout, stderr_tail: tail, success })
}

fn kill_and_reap(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

fn tail_bytes(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.trim().to_string();
    }
    // Walk back to a char boundary so we never slice mid-codepoint.
    let mut start = s.len() - max;
    while start < s.len() && !s.is_char_boundary(start) {
        start += 1;
    }
    s[start..].trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn captures_stdout_on_success() {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg("echo hello");
        let out = run_bounded(cmd, Duration::from_secs(5)).unwrap();
        assert!(out.success);
        assert_eq!(out.stdout.trim(), "hello");
    }

    #[test]
    fn captures_stderr_tail_on_failure() {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg("echo oops 1>&2; exit 1");
        let out = run_bounded(cmd, Duration::from_secs(5)).unwrap();
        assert!(!out.success);
        assert_eq!(out.stderr_tail, "oops");
    }

    #[test]
    fn timeout_is_treated_as_failure() {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg("sleep 5");
        let result = run_bounded(cmd, Duration::from_millis(50));
        assert!(result.is_err());
    }

    #[test]
    fn stderr_tail_is_bounded() {
        let long = "x".repeat(1000);
        let tail = tail_bytes(&long, STDERR_TAIL_BYTES);
        assert!(tail.len() <= STDERR_TAIL_BYTES);
    }
}
