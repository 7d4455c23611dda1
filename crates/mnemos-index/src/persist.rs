//! Retrying file persistence.
//!
//! Index artifacts are written with write-to-temp-then-rename so a reader
//! never sees a half-written file.  Transient I/O faults are retried with
//! exponential backoff (100 ms, 200 ms, 400 ms by default); when every
//! attempt fails the last [`std::io::Error`] is kept as the error source.

use std::fs;
use std::io;
use std::path::Path;
use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

/// Errors raised by [`write_atomic`] and [`read_with_retry`].
#[derive(Error, Debug)]
pub enum PersistError {
    #[error("{operation} on {path} failed after {attempts} attempt(s)")]
    Exhausted {
        operation: &'static str,
        path: String,
        attempts: u32,
        #[source]
        source: io::Error,
    },
}

/// Retry schedule for persistence I/O.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay before the second attempt; doubled for each further attempt.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}
fn default_base_delay_ms() -> u64 {
    100
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
        }
    }
}

impl RetryPolicy {
    /// A policy that retries without sleeping (tests).
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay_ms: 0,
        }
    }

    /// Delay slept after failed attempt number `attempt` (0-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.base_delay_ms.saturating_mul(1u64 << attempt.min(16)))
    }

    /// Run `op` until it succeeds or the attempts are used up.
    pub fn run<T>(
        &self,
        operation: &'static str,
        path: &Path,
        mut op: impl FnMut() -> io::Result<T>,
    ) -> Result<T, PersistError> {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            match op() {
                Ok(v) => return Ok(v),
                Err(e) if attempt + 1 < attempts && is_transient(&e) => {
                    let delay = self.delay_for(attempt);
                    warn!(
                        operation,
                        path = %path.display(),
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "persistence I/O failed; retrying"
                    );
                    thread::sleep(delay);
                    attempt += 1;
                }
                Err(e) => {
                    return Err(PersistError::Exhausted {
                        operation,
                        path: path.display().to_string(),
                        attempts: attempt + 1,
                        source: e,
                    });
                }
            }
        }
    }
}

/// Missing files and malformed input are terminal; everything else may be
/// a passing fault.
fn is_transient(e: &io::Error) -> bool {
    !matches!(
        e.kind(),
        io::ErrorKind::NotFound | io::ErrorKind::InvalidData | io::ErrorKind::InvalidInput
    )
}

/// Write `bytes` to `path` atomically, creating parent directories.
pub fn write_atomic(path: &Path, bytes: &[u8], policy: &RetryPolicy) -> Result<(), PersistError> {
    let tmp = path.with_extension("tmp");
    policy.run("write", path, || {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, path)
    })
}

/// Read the whole file at `path`.
pub fn read_with_retry(path: &Path, policy: &RetryPolicy) -> Result<Vec<u8>, PersistError> {
    policy.run("read", path, || fs::read(path))
}
