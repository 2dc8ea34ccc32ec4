//! Command runner trait and the values that cross it
//!
//! The core never spawns processes itself. A host provides a
//! [`CommandRunner`] (the CLI ships one on top of `tokio::process`; tests and
//! demo mode use [`FakeRuntime`](crate::fake::FakeRuntime)).

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::RunnerError;

/// One fully-resolved external command
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    /// Added on top of the inherited environment
    pub env: BTreeMap<String, String>,
    /// The runner must kill the command once this elapses
    pub timeout: Duration,
}

impl Invocation {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            cwd: None,
            env: BTreeMap::new(),
            timeout: Duration::from_secs(60),
        }
    }

    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn with_env(mut self, env: BTreeMap<String, String>) -> Self {
        self.env = env;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Program and arguments joined with spaces, for display and audit
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Outcome of a command that was started
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CommandResult {
    /// `None` when the process was terminated by a signal
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandResult {
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            exit_code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failure(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            exit_code: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn succeeded(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Pluggable process backend.
///
/// Implementations return `Ok` for any command that ran, whatever its exit
/// code, and `Err` only when it could not be started or hit its timeout.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Human-readable name of this runner
    fn name(&self) -> &'static str;

    async fn run(&self, invocation: &Invocation) -> Result<CommandResult, RunnerError>;
}
