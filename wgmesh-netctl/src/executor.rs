//! Single indirection point for every kernel-control subprocess invocation.
//!
//! Section 5 calls for command execution to be "funnelled through a single
//! indirection so tests can substitute a mock". [`Executor`] is that seam:
//! the real driver never calls `tokio::process::Command` directly, it always
//! goes through an `Arc<dyn Executor>` so unit tests run against
//! [`RecordingExecutor`] with no kernel privileges required.

use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::{NetCtlError, NetCtlResult};

#[derive(Debug, Clone)]
pub struct CommandInvocation {
    pub program: String,
    pub args: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

#[async_trait]
pub trait Executor: Send + Sync {
    async fn run(&self, program: &str, args: &[&str]) -> NetCtlResult<CommandOutput>;
}

/// Executes commands against the real operating system via `tokio::process`.
pub struct SystemExecutor;

#[async_trait]
impl Executor for SystemExecutor {
    async fn run(&self, program: &str, args: &[&str]) -> NetCtlResult<CommandOutput> {
        let output = tokio::process::Command::new(program)
            .args(args)
            .output()
            .await
            .map_err(|e| NetCtlError::Spawn(format!("{program}: {e}")))?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        if !output.status.success() {
            return Err(NetCtlError::CommandFailed {
                program: program.to_string(),
                status: output.status.code().unwrap_or(-1),
                stderr,
            });
        }
        Ok(CommandOutput { stdout, stderr })
    }
}

/// Records every invocation instead of running it; used by driver unit tests.
#[derive(Default)]
pub struct RecordingExecutor {
    invocations: Mutex<Vec<CommandInvocation>>,
    scripted_outputs: Mutex<Vec<NetCtlResult<CommandOutput>>>,
}

impl RecordingExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a canned response for the next `run` call, FIFO.
    pub fn push_response(&self, output: NetCtlResult<CommandOutput>) {
        self.scripted_outputs.lock().unwrap().push(output);
    }

    pub fn invocations(&self) -> Vec<CommandInvocation> {
        self.invocations.lock().unwrap().clone()
    }
}

#[async_trait]
impl Executor for RecordingExecutor {
    async fn run(&self, program: &str, args: &[&str]) -> NetCtlResult<CommandOutput> {
        self.invocations.lock().unwrap().push(CommandInvocation {
            program: program.to_string(),
            args: args.iter().map(|s| s.to_string()).collect(),
        });
        let mut queue = self.scripted_outputs.lock().unwrap();
        if queue.is_empty() {
            Ok(CommandOutput::default())
        } else {
            queue.remove(0)
        }
    }
}
