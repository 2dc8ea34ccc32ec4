//! In-memory stand-in for the Docker CLI and the stack scripts
//!
//! Used by `norex --demo` and by the test suite. Containers move between
//! `running` and `exited` as start/stop commands arrive, and every invocation
//! is recorded so callers can assert on ordering and poll counts.

use std::collections::{BTreeMap, BTreeSet};
use std::io;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::Mutex;

use crate::error::RunnerError;
use crate::runner::{CommandResult, CommandRunner, Invocation};

const RUNNING: &str = "running";
const EXITED: &str = "exited";

#[derive(Debug, Default)]
struct FakeState {
    /// container name → runtime state text
    containers: BTreeMap<String, String>,
    calls: Vec<Invocation>,
    payload_override: Option<String>,
    failing: BTreeSet<String>,
    docker_missing: bool,
    daemon_down: bool,
    hung: bool,
}

#[derive(Debug, Default)]
pub struct FakeRuntime {
    state: Mutex<FakeState>,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Containers of the default stack, all exited
    pub fn norex_default() -> Self {
        Self::with_containers(&["norex_apache", "norex_mysql", "norex_pma"])
    }

    pub fn with_containers(names: &[&str]) -> Self {
        let containers = names
            .iter()
            .map(|n| (n.to_string(), EXITED.to_string()))
            .collect();
        Self {
            state: Mutex::new(FakeState {
                containers,
                ..FakeState::default()
            }),
        }
    }

    pub async fn set_state(&self, container: &str, state: &str) {
        self.state
            .lock()
            .await
            .containers
            .insert(container.to_string(), state.to_string());
    }

    pub async fn state_of(&self, container: &str) -> Option<String> {
        self.state.lock().await.containers.get(container).cloned()
    }

    /// Serve this text verbatim for the status query
    pub async fn set_payload(&self, payload: Option<&str>) {
        self.state.lock().await.payload_override = payload.map(str::to_string);
    }

    /// `docker` binary not installed: every docker call fails to spawn
    pub async fn set_docker_missing(&self, missing: bool) {
        self.state.lock().await.docker_missing = missing;
    }

    /// Daemon not reachable: docker calls exit 1
    pub async fn set_daemon_down(&self, down: bool) {
        self.state.lock().await.daemon_down = down;
    }

    /// Status queries never return
    pub async fn set_hung(&self, hung: bool) {
        self.state.lock().await.hung = hung;
    }

    /// Make this exact command line exit 1 without touching any state
    pub async fn fail_command(&self, command_line: &str) {
        self.state
            .lock()
            .await
            .failing
            .insert(command_line.to_string());
    }

    pub async fn calls(&self) -> Vec<Invocation> {
        self.state.lock().await.calls.clone()
    }

    pub async fn command_lines(&self) -> Vec<String> {
        self.state
            .lock()
            .await
            .calls
            .iter()
            .map(Invocation::command_line)
            .collect()
    }

    /// How many recorded calls rendered to exactly this command line
    pub async fn count(&self, command_line: &str) -> usize {
        self.command_lines()
            .await
            .iter()
            .filter(|c| c.as_str() == command_line)
            .count()
    }

    pub async fn clear_calls(&self) {
        self.state.lock().await.calls.clear();
    }
}

fn status_text(state: &str) -> &'static str {
    match state {
        RUNNING => "Up 2 minutes",
        EXITED => "Exited (0) 1 minute ago",
        _ => "",
    }
}

fn set_all(state: &mut FakeState, to: &str) -> String {
    let mut out = String::new();
    for (name, current) in state.containers.iter_mut() {
        *current = to.to_string();
        out.push_str(&format!("Container {}  {}\n", name, to));
    }
    out
}

#[async_trait]
impl CommandRunner for FakeRuntime {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn run(&self, invocation: &Invocation) -> Result<CommandResult, RunnerError> {
        let command_line = invocation.command_line();
        let args: Vec<&str> = invocation.args.iter().map(String::as_str).collect();

        let hang = {
            let mut state = self.state.lock().await;
            state.calls.push(invocation.clone());

            if invocation.program == "docker" && state.docker_missing {
                return Err(RunnerError::Spawn {
                    command: command_line,
                    source: io::Error::new(io::ErrorKind::NotFound, "docker: not found"),
                });
            }
            if state.failing.contains(&command_line) {
                return Ok(CommandResult::failure(1, "simulated failure"));
            }
            state.hung && args.first() == Some(&"compose")
        };

        if hang {
            std::future::pending::<()>().await;
        }

        let mut state = self.state.lock().await;
        let daemon_down = state.daemon_down;
        let down = || {
            CommandResult::failure(
                1,
                "Cannot connect to the Docker daemon. Is the docker daemon running?",
            )
        };

        let result = match (invocation.program.as_str(), args.as_slice()) {
            ("docker", _) if daemon_down => down(),
            ("docker", ["compose", "ps", ..]) => {
                if let Some(payload) = &state.payload_override {
                    CommandResult::success(payload.clone())
                } else {
                    let lines: Vec<String> = state
                        .containers
                        .iter()
                        .map(|(name, st)| {
                            json!({"Name": name, "State": st, "Status": status_text(st)})
                                .to_string()
                        })
                        .collect();
                    CommandResult::success(lines.join("\n"))
                }
            }
            ("docker", [verb @ ("start" | "stop" | "restart"), name]) => {
                match state.containers.get_mut(*name) {
                    Some(current) => {
                        let next = if *verb == "stop" { EXITED } else { RUNNING };
                        *current = next.to_string();
                        CommandResult::success(format!("{}\n", name))
                    }
                    None => CommandResult::failure(
                        1,
                        format!("Error response from daemon: No such container: {}", name),
                    ),
                }
            }
            ("docker", ["logs", "--tail", tail, name]) => {
                if state.containers.contains_key(*name) {
                    let n = tail.parse::<usize>().unwrap_or(0).min(3);
                    let lines: Vec<String> =
                        (1..=n).map(|i| format!("[{}] log line {}", name, i)).collect();
                    CommandResult::success(lines.join("\n"))
                } else {
                    CommandResult::failure(1, format!("Error: No such container: {}", name))
                }
            }
            ("bash", [script]) if script.ends_with("start.sh") => {
                if daemon_down {
                    down()
                } else {
                    CommandResult::success(set_all(&mut state, RUNNING))
                }
            }
            ("bash", [script]) if script.ends_with("stop.sh") => {
                if daemon_down {
                    down()
                } else {
                    CommandResult::success(set_all(&mut state, EXITED))
                }
            }
            ("bash", [script]) if script.ends_with("status.sh") => {
                let lines: Vec<String> = state
                    .containers
                    .iter()
                    .map(|(name, st)| format!("{}: {}", name, st))
                    .collect();
                CommandResult::success(lines.join("\n"))
            }
            ("xdg-open" | "open" | "explorer", [_]) => CommandResult::success(""),
            _ => CommandResult::failure(127, format!("{}: command not found", command_line)),
        };

        Ok(result)
    }
}
