//! The closed set of host commands the bridge is allowed to run
//!
//! Every command goes through [`ServiceAction`], which renders to an argv
//! (never a shell string). Free-form command lines coming from a presenter are
//! accepted only if [`ServiceAction::parse`] maps them onto one of these
//! variants.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::ActionError;

/// Default number of lines fetched by `docker logs --tail`
pub const DEFAULT_LOG_TAIL: u32 = 100;

/// A container name that passed the allow-list.
///
/// Docker names are `[a-zA-Z0-9][a-zA-Z0-9_.-]*`; anything else (spaces,
/// quotes, `;`, `$`) is rejected before it can reach a process.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RuntimeRef(String);

impl RuntimeRef {
    pub fn new(reference: impl Into<String>) -> Result<Self, ActionError> {
        let reference = reference.into();
        let mut chars = reference.chars();
        let valid = match chars.next() {
            Some(first) if first.is_ascii_alphanumeric() => {
                chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
            }
            _ => false,
        };
        if valid {
            Ok(Self(reference))
        } else {
            Err(ActionError::InvalidRuntimeRef { reference })
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RuntimeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Stack-level scripts, relative to the project root
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct Scripts {
    #[serde(default = "default_start_script")]
    pub start: String,
    #[serde(default = "default_stop_script")]
    pub stop: String,
    #[serde(default = "default_status_script")]
    pub status: String,
}

fn default_start_script() -> String {
    "scripts/start.sh".into()
}
fn default_stop_script() -> String {
    "scripts/stop.sh".into()
}
fn default_status_script() -> String {
    "scripts/status.sh".into()
}

impl Default for Scripts {
    fn default() -> Self {
        Self {
            start: default_start_script(),
            stop: default_stop_script(),
            status: default_status_script(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ServiceAction {
    /// `bash scripts/start.sh`
    StartStack,
    /// `bash scripts/stop.sh`
    StopStack,
    /// `bash scripts/status.sh`
    StackStatus,
    StartContainer(RuntimeRef),
    StopContainer(RuntimeRef),
    RestartContainer(RuntimeRef),
    ContainerLogs { container: RuntimeRef, tail: u32 },
    /// The batched status query used by the poller
    ListContainers,
    /// Open a directory with the platform file manager
    OpenPath(PathBuf),
}

impl ServiceAction {
    /// Program and arguments for this action
    pub fn argv(&self, scripts: &Scripts) -> (String, Vec<String>) {
        let docker = |args: &[&str]| {
            (
                "docker".to_string(),
                args.iter().map(|s| s.to_string()).collect::<Vec<_>>(),
            )
        };
        match self {
            ServiceAction::StartStack => ("bash".into(), vec![scripts.start.clone()]),
            ServiceAction::StopStack => ("bash".into(), vec![scripts.stop.clone()]),
            ServiceAction::StackStatus => ("bash".into(), vec![scripts.status.clone()]),
            ServiceAction::StartContainer(c) => docker(&["start", c.as_str()]),
            ServiceAction::StopContainer(c) => docker(&["stop", c.as_str()]),
            ServiceAction::RestartContainer(c) => docker(&["restart", c.as_str()]),
            ServiceAction::ContainerLogs { container, tail } => {
                let tail = tail.to_string();
                docker(&["logs", "--tail", tail.as_str(), container.as_str()])
            }
            ServiceAction::ListContainers => docker(&["compose", "ps", "--format", "json"]),
            ServiceAction::OpenPath(path) => (
                opener_program().to_string(),
                vec![path.display().to_string()],
            ),
        }
    }

    /// Short human label used in events and audit messages
    pub fn label(&self) -> String {
        match self {
            ServiceAction::StartStack => "start all services".into(),
            ServiceAction::StopStack => "stop all services".into(),
            ServiceAction::StackStatus => "stack status".into(),
            ServiceAction::StartContainer(c) => format!("start {}", c),
            ServiceAction::StopContainer(c) => format!("stop {}", c),
            ServiceAction::RestartContainer(c) => format!("restart {}", c),
            ServiceAction::ContainerLogs { container, .. } => format!("logs {}", container),
            ServiceAction::ListContainers => "list containers".into(),
            ServiceAction::OpenPath(p) => format!("open {}", p.display()),
        }
    }

    /// Map a free-form command line onto an allowed action.
    ///
    /// Accepted shapes: `bash <script>` or `<script>` for the three configured
    /// scripts, `docker start|stop|restart <name>`,
    /// `docker logs [--tail N] <name>` and `docker compose ps --format json`.
    pub fn parse(command_line: &str, scripts: &Scripts) -> Result<Self, ActionError> {
        let rejected = || ActionError::Rejected {
            command: command_line.to_string(),
        };
        let tokens: Vec<&str> = command_line.split_whitespace().collect();

        let script = match tokens.as_slice() {
            ["bash", script] | ["sh", script] | [script] => Some(*script),
            _ => None,
        };
        if let Some(script) = script {
            let script = script.trim_start_matches("./");
            if script == scripts.start {
                return Ok(ServiceAction::StartStack);
            }
            if script == scripts.stop {
                return Ok(ServiceAction::StopStack);
            }
            if script == scripts.status {
                return Ok(ServiceAction::StackStatus);
            }
            return Err(rejected());
        }

        match tokens.as_slice() {
            ["docker", "start", name] => Ok(ServiceAction::StartContainer(RuntimeRef::new(*name)?)),
            ["docker", "stop", name] => Ok(ServiceAction::StopContainer(RuntimeRef::new(*name)?)),
            ["docker", "restart", name] => {
                Ok(ServiceAction::RestartContainer(RuntimeRef::new(*name)?))
            }
            ["docker", "logs", name] => Ok(ServiceAction::ContainerLogs {
                container: RuntimeRef::new(*name)?,
                tail: DEFAULT_LOG_TAIL,
            }),
            ["docker", "logs", "--tail", tail, name] => Ok(ServiceAction::ContainerLogs {
                container: RuntimeRef::new(*name)?,
                tail: tail.parse().map_err(|_| rejected())?,
            }),
            ["docker", "compose", "ps", "--format", "json"] => Ok(ServiceAction::ListContainers),
            _ => Err(rejected()),
        }
    }
}

fn opener_program() -> &'static str {
    if cfg!(target_os = "macos") {
        "open"
    } else if cfg!(target_os = "windows") {
        "explorer"
    } else {
        "xdg-open"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runtime_ref_allow_list() {
        assert!(RuntimeRef::new("norex_apache").is_ok());
        assert!(RuntimeRef::new("db-1.local").is_ok());
        assert!(RuntimeRef::new("").is_err());
        assert!(RuntimeRef::new("-flag").is_err());
        assert!(RuntimeRef::new("a b").is_err());
        assert!(RuntimeRef::new("x;rm").is_err());
        assert!(RuntimeRef::new("$(whoami)").is_err());
    }

    #[test]
    fn test_argv_rendering() {
        let scripts = Scripts::default();
        let apache = RuntimeRef::new("norex_apache").unwrap();

        let (prog, args) = ServiceAction::StartStack.argv(&scripts);
        assert_eq!(prog, "bash");
        assert_eq!(args, vec!["scripts/start.sh"]);

        let (prog, args) = ServiceAction::RestartContainer(apache.clone()).argv(&scripts);
        assert_eq!(prog, "docker");
        assert_eq!(args, vec!["restart", "norex_apache"]);

        let (_, args) = ServiceAction::ContainerLogs {
            container: apache,
            tail: 50,
        }
        .argv(&scripts);
        assert_eq!(args, vec!["logs", "--tail", "50", "norex_apache"]);

        let (_, args) = ServiceAction::ListContainers.argv(&scripts);
        assert_eq!(args, vec!["compose", "ps", "--format", "json"]);
    }

    #[test]
    fn test_parse_allowed_lines() {
        let scripts = Scripts::default();
        assert_eq!(
            ServiceAction::parse("bash scripts/start.sh", &scripts),
            Ok(ServiceAction::StartStack)
        );
        assert_eq!(
            ServiceAction::parse("./scripts/stop.sh", &scripts),
            Ok(ServiceAction::StopStack)
        );
        assert_eq!(
            ServiceAction::parse("bash scripts/status.sh", &scripts),
            Ok(ServiceAction::StackStatus)
        );
        assert_eq!(
            ServiceAction::parse("docker  start   norex_mysql", &scripts),
            Ok(ServiceAction::StartContainer(
                RuntimeRef::new("norex_mysql").unwrap()
            ))
        );
        assert_eq!(
            ServiceAction::parse("docker logs --tail 20 norex_pma", &scripts),
            Ok(ServiceAction::ContainerLogs {
                container: RuntimeRef::new("norex_pma").unwrap(),
                tail: 20,
            })
        );
    }

    #[test]
    fn test_parse_rejects_everything_else() {
        let scripts = Scripts::default();
        for line in [
            "",
            "rm -rf /",
            "bash scripts/evil.sh",
            "docker start norex_apache; rm -rf /",
            "docker start norex_apache && echo hi",
            "docker rm norex_apache",
            "docker logs --tail many norex_apache",
            "explorer . || xdg-open .",
        ] {
            assert!(
                ServiceAction::parse(line, &scripts).is_err(),
                "should reject {:?}",
                line
            );
        }
    }

    #[test]
    fn test_parse_rejects_bad_container_name() {
        let scripts = Scripts::default();
        assert!(matches!(
            ServiceAction::parse("docker stop $(id)", &scripts),
            Err(ActionError::InvalidRuntimeRef { .. })
        ));
    }
}
