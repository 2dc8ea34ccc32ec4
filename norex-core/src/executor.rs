use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use tracing::{debug, warn};

use crate::action::{Scripts, ServiceAction};
use crate::audit::AuditLog;
use crate::error::RunnerError;
use crate::runner::{CommandResult, CommandRunner, Invocation};

/// Runs [`ServiceAction`]s through a [`CommandRunner`], inside the project
/// root, and mirrors every invocation to the audit log.
#[derive(Clone)]
pub struct Executor {
    runner: Arc<dyn CommandRunner>,
    audit: AuditLog,
    project_root: PathBuf,
    scripts: Scripts,
    env: BTreeMap<String, String>,
}

impl Executor {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        audit: AuditLog,
        project_root: PathBuf,
        scripts: Scripts,
        mut env: BTreeMap<String, String>,
    ) -> Self {
        env.insert(
            "PROJECT_ROOT".to_string(),
            project_root.display().to_string(),
        );
        Self {
            runner,
            audit,
            project_root,
            scripts,
            env,
        }
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    pub fn scripts(&self) -> &Scripts {
        &self.scripts
    }

    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    pub fn runner_name(&self) -> &'static str {
        self.runner.name()
    }

    pub fn invocation(&self, action: &ServiceAction, timeout: Duration) -> Invocation {
        let (program, args) = action.argv(&self.scripts);
        Invocation::new(program, args)
            .with_cwd(self.project_root.clone())
            .with_env(self.env.clone())
            .with_timeout(timeout)
    }

    pub async fn execute(
        &self,
        action: &ServiceAction,
        timeout: Duration,
    ) -> Result<CommandResult, RunnerError> {
        let invocation = self.invocation(action, timeout);
        self.run(&invocation).await
    }

    /// Run one invocation. The deadline is enforced here as well as in the
    /// runner, so a runner that never returns still yields `Timeout`.
    pub async fn run(&self, invocation: &Invocation) -> Result<CommandResult, RunnerError> {
        let started_at = Local::now();
        debug!(command = %invocation.command_line(), runner = self.runner.name(), "executing");

        let outcome =
            match tokio::time::timeout(invocation.timeout, self.runner.run(invocation)).await {
                Ok(outcome) => outcome,
                Err(_) => Err(RunnerError::Timeout {
                    command: invocation.command_line(),
                    timeout: invocation.timeout,
                }),
            };

        match &outcome {
            Ok(result) if !result.succeeded() => {
                debug!(command = %invocation.command_line(), code = ?result.exit_code, "command exited non-zero");
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "command did not complete"),
        }

        self.audit.record_run(invocation, started_at, &outcome);
        outcome
    }
}
