use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};
use uuid::Uuid;

use norex_core::error::RunnerError;
use norex_core::runner::{CommandResult, CommandRunner, Invocation};

/// Runs invocations as real child processes.
///
/// Each child leads its own process group, so a command that times out is
/// killed together with everything it spawned (`docker compose` helpers,
/// script subshells).
#[derive(Debug, Default)]
pub struct ProcessRunner;

impl ProcessRunner {
    pub fn new() -> Self {
        Self
    }
}

/// Kills the whole process group unless disarmed
struct GroupGuard {
    pgid: Option<i32>,
}

impl GroupGuard {
    fn disarm(mut self) {
        self.pgid = None;
    }
}

impl Drop for GroupGuard {
    fn drop(&mut self) {
        if let Some(pgid) = self.pgid.filter(|p| *p > 0) {
            #[cfg(unix)]
            unsafe {
                libc::killpg(pgid, libc::SIGKILL);
            }
            #[cfg(not(unix))]
            let _ = pgid;
        }
    }
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    fn name(&self) -> &'static str {
        "process"
    }

    async fn run(&self, invocation: &Invocation) -> Result<CommandResult, RunnerError> {
        let run_id = Uuid::new_v4();
        let command_line = invocation.command_line();

        let mut cmd = Command::new(&invocation.program);
        cmd.args(&invocation.args);
        if let Some(cwd) = &invocation.cwd {
            cmd.current_dir(cwd);
        }
        cmd.envs(&invocation.env);

        // New process group for reliable cleanup
        #[cfg(unix)]
        unsafe {
            cmd.pre_exec(|| {
                libc::setsid();
                Ok(())
            });
        }

        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        let child = cmd.spawn().map_err(|source| RunnerError::Spawn {
            command: command_line.clone(),
            source,
        })?;
        let pid = child.id();
        let guard = GroupGuard {
            pgid: pid.map(|p| p as i32),
        };
        debug!(%run_id, ?pid, command = %command_line, "spawned");

        match tokio::time::timeout(invocation.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => {
                guard.disarm();
                let result = CommandResult {
                    exit_code: output.status.code(),
                    stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                    stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                };
                debug!(%run_id, code = ?result.exit_code, "exited");
                Ok(result)
            }
            Ok(Err(source)) => Err(RunnerError::Spawn {
                command: command_line,
                source,
            }),
            Err(_) => {
                warn!(%run_id, command = %command_line, timeout = ?invocation.timeout, "killing timed out command");
                drop(guard);
                Err(RunnerError::Timeout {
                    command: command_line,
                    timeout: invocation.timeout,
                })
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::time::Duration;

    fn sh(script: &str) -> Invocation {
        Invocation::new("sh", vec!["-c".into(), script.into()])
    }

    #[tokio::test]
    async fn test_captures_output() {
        let result = ProcessRunner::new().run(&sh("echo hello; echo oops >&2")).await.unwrap();
        assert!(result.succeeded());
        assert_eq!(result.stdout, "hello\n");
        assert_eq!(result.stderr, "oops\n");
    }

    #[tokio::test]
    async fn test_non_zero_exit_is_a_result() {
        let result = ProcessRunner::new().run(&sh("exit 3")).await.unwrap();
        assert_eq!(result.exit_code, Some(3));
        assert!(!result.succeeded());
    }

    #[tokio::test]
    async fn test_missing_program_is_spawn_error() {
        let invocation = Invocation::new("norex-definitely-not-installed", vec![]);
        let err = ProcessRunner::new().run(&invocation).await.unwrap_err();
        assert!(matches!(err, RunnerError::Spawn { .. }));
    }

    #[tokio::test]
    async fn test_timeout_kills_command() {
        let invocation = sh("sleep 5").with_timeout(Duration::from_millis(100));
        let started = std::time::Instant::now();
        let err = ProcessRunner::new().run(&invocation).await.unwrap_err();
        assert!(matches!(err, RunnerError::Timeout { .. }));
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[tokio::test]
    async fn test_cwd_and_env() {
        let dir = std::env::temp_dir();
        let mut env = BTreeMap::new();
        env.insert("PROJECT_ROOT".to_string(), "/srv/norex".to_string());
        let invocation = sh("pwd; echo $PROJECT_ROOT")
            .with_cwd(dir.clone())
            .with_env(env);

        let result = ProcessRunner::new().run(&invocation).await.unwrap();
        let lines: Vec<&str> = result.stdout.lines().collect();
        assert_eq!(
            std::fs::canonicalize(lines[0]).unwrap(),
            std::fs::canonicalize(&dir).unwrap()
        );
        assert_eq!(lines[1], "/srv/norex");
    }
}
