use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use snapd::errors::CommandError;
use snapd::exec::{CommandOutput, CommandRunner};
use tokio_util::sync::CancellationToken;

/// What a scripted invocation answers with.
#[derive(Debug, Clone)]
pub enum Reply {
    /// Exit 0 with this stdout.
    Stdout(String),
    /// Non-zero exit with captured output.
    Exit {
        code: i32,
        stdout: String,
        stderr: String,
    },
    /// The program could not be started.
    SpawnFailure,
    /// Block until the caller's token is cancelled.
    Hang,
}

impl Reply {
    pub fn stdout(s: impl Into<String>) -> Self {
        Reply::Stdout(s.into())
    }

    pub fn exit(code: i32, stderr: impl Into<String>) -> Self {
        Reply::Exit {
            code,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    /// Exit 1 with the tool's "no such job" message.
    pub fn no_job() -> Self {
        Reply::exit(1, "Error: job 'upload' not found")
    }
}

/// A fake runner that:
/// - records every invocation (program + args)
/// - answers from per-command scripts keyed by the space-joined args.
///
/// One-shot replies queued with [`ScriptedRunner::push`] are served before
/// the sticky reply set with [`ScriptedRunner::on`]. Commands with no script
/// exit 127.
#[derive(Default)]
pub struct ScriptedRunner {
    queued: Mutex<HashMap<String, VecDeque<Reply>>>,
    sticky: Mutex<HashMap<String, Reply>>,
    calls: Mutex<Vec<Vec<String>>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `args` with `reply` every time.
    pub fn on(&self, args: &str, reply: Reply) -> &Self {
        self.sticky.lock().unwrap().insert(args.to_string(), reply);
        self
    }

    /// Answer the next call of `args` with `reply`.
    pub fn push(&self, args: &str, reply: Reply) -> &Self {
        self.queued
            .lock()
            .unwrap()
            .entry(args.to_string())
            .or_default()
            .push_back(reply);
        self
    }

    /// Sticky reply for `node job <node> info upload`.
    pub fn on_info(&self, node: &str, reply: Reply) -> &Self {
        self.on(&info_args(node), reply)
    }

    /// Sticky reply for `node run upload <node>`.
    pub fn on_start(&self, node: &str, reply: Reply) -> &Self {
        self.on(&start_args(node), reply)
    }

    /// All invocations so far, as `program arg1 arg2 ...`.
    pub fn calls(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|c| c.join(" "))
            .collect()
    }

    /// How many times `args` was run.
    pub fn count(&self, args: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c[1..].join(" ") == args)
            .count()
    }

    pub fn start_count(&self, node: &str) -> usize {
        self.count(&start_args(node))
    }

    fn reply_for(&self, key: &str) -> Option<Reply> {
        if let Some(queue) = self.queued.lock().unwrap().get_mut(key)
            && let Some(reply) = queue.pop_front()
        {
            return Some(reply);
        }
        self.sticky.lock().unwrap().get(key).cloned()
    }
}

pub fn info_args(node: &str) -> String {
    format!("node job {node} info upload")
}

pub fn start_args(node: &str) -> String {
    format!("node run upload {node}")
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(
        &self,
        cancel: &CancellationToken,
        program: &str,
        args: &[&str],
    ) -> Result<CommandOutput, CommandError> {
        let mut call = vec![program.to_string()];
        call.extend(args.iter().map(|a| a.to_string()));
        self.calls.lock().unwrap().push(call);

        if cancel.is_cancelled() {
            return Err(CommandError::Cancelled {
                program: program.to_string(),
            });
        }

        let key = args.join(" ");
        match self.reply_for(&key) {
            Some(Reply::Stdout(stdout)) => Ok(CommandOutput {
                stdout,
                stderr: String::new(),
            }),
            Some(Reply::Exit {
                code,
                stdout,
                stderr,
            }) => Err(CommandError::Exit {
                program: program.to_string(),
                code,
                stdout,
                stderr,
            }),
            Some(Reply::SpawnFailure) => Err(CommandError::Spawn {
                program: program.to_string(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "scripted spawn failure"),
            }),
            Some(Reply::Hang) => {
                cancel.cancelled().await;
                Err(CommandError::Cancelled {
                    program: program.to_string(),
                })
            }
            None => Err(CommandError::Exit {
                program: program.to_string(),
                code: 127,
                stdout: String::new(),
                stderr: format!("no scripted reply for '{key}'"),
            }),
        }
    }
}
