// src/exec/runner.rs

//! External command runner.

use std::collections::HashSet;
use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::process::Command;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::errors::CommandError;

/// Fully buffered result of a successful (exit zero) command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Trait abstracting how external programs are executed.
///
/// Production code uses [`ProcessRunner`]; tests provide scripted
/// implementations that never spawn processes.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `program` with `args` and buffer its output.
    ///
    /// A non-zero exit is reported as [`CommandError::Exit`], which still
    /// carries the captured stdout/stderr so callers can inspect them.
    async fn run(
        &self,
        cancel: &CancellationToken,
        program: &str,
        args: &[&str],
    ) -> Result<CommandOutput, CommandError>;
}

/// Runner that spawns real OS processes via `tokio::process::Command`.
///
/// Programs whose basename is listed as non-reentrant are serialised through
/// a single process-wide mutex. Waiting on that mutex still observes
/// cancellation.
#[derive(Debug, Default)]
pub struct ProcessRunner {
    non_reentrant: HashSet<String>,
    exclusive: Mutex<()>,
    timeout: Option<Duration>,
}

impl ProcessRunner {
    pub fn new<I, S>(non_reentrant: I, timeout: Option<Duration>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            non_reentrant: non_reentrant.into_iter().map(Into::into).collect(),
            exclusive: Mutex::new(()),
            timeout,
        }
    }

    fn is_non_reentrant(&self, program: &str) -> bool {
        let basename = Path::new(program)
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or(program);
        self.non_reentrant.contains(basename)
    }

    async fn spawn_and_wait(
        &self,
        cancel: &CancellationToken,
        program: &str,
        args: &[&str],
    ) -> Result<std::process::Output, CommandError> {
        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| CommandError::Spawn {
                program: program.to_string(),
                source,
            })?;

        // Dropping the wait future drops the child, which kills it.
        let wait = child.wait_with_output();

        let res = match self.timeout {
            Some(limit) => {
                tokio::select! {
                    res = tokio::time::timeout(limit, wait) => match res {
                        Ok(res) => res,
                        Err(_) => {
                            return Err(CommandError::Timeout {
                                program: program.to_string(),
                                limit,
                            });
                        }
                    },
                    _ = cancel.cancelled() => {
                        return Err(CommandError::Cancelled { program: program.to_string() });
                    }
                }
            }
            None => {
                tokio::select! {
                    res = wait => res,
                    _ = cancel.cancelled() => {
                        return Err(CommandError::Cancelled { program: program.to_string() });
                    }
                }
            }
        };

        res.map_err(|source| CommandError::Io {
            program: program.to_string(),
            source,
        })
    }
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(
        &self,
        cancel: &CancellationToken,
        program: &str,
        args: &[&str],
    ) -> Result<CommandOutput, CommandError> {
        if cancel.is_cancelled() {
            return Err(CommandError::Cancelled {
                program: program.to_string(),
            });
        }

        let _guard = if self.is_non_reentrant(program) {
            tokio::select! {
                guard = self.exclusive.lock() => Some(guard),
                _ = cancel.cancelled() => {
                    debug!(program, "cancelled while waiting for exclusive command slot");
                    return Err(CommandError::Cancelled { program: program.to_string() });
                }
            }
        } else {
            None
        };

        debug!(program, ?args, "executing command");

        let started = Instant::now();
        let output = self.spawn_and_wait(cancel, program, args).await?;
        let elapsed = started.elapsed();

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        if !output.status.success() {
            let code = output.status.code().unwrap_or(-1);
            warn!(
                program,
                ?args,
                exit_code = code,
                ?elapsed,
                stderr = %stderr.trim(),
                "command exited with failure"
            );
            return Err(CommandError::Exit {
                program: program.to_string(),
                code,
                stdout,
                stderr,
            });
        }

        debug!(program, ?args, ?elapsed, "command executed successfully");
        Ok(CommandOutput { stdout, stderr })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_reentrant_matches_on_basename() {
        let runner = ProcessRunner::new(["bv"], None);
        assert!(runner.is_non_reentrant("bv"));
        assert!(runner.is_non_reentrant("/usr/bin/bv"));
        assert!(!runner.is_non_reentrant("bvx"));
        assert!(!runner.is_non_reentrant("/usr/bin/echo"));
    }
}
