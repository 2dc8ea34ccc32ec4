//! The bridge a presenter talks to
//!
//! Owns the registry, the executor, the poller and the controller, and
//! exposes the host-command surface: arbitrary (allow-listed) commands, the
//! raw status payload, the audit log directory and folder opening.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, watch};
use tracing::info;

use crate::action::{RuntimeRef, ServiceAction};
use crate::audit::{AuditLog, LogCategory};
use crate::config::NorexConfig;
use crate::controller::{LifecycleController, LifecycleTiming};
use crate::error::{ActionError, BridgeError, ConfigError};
use crate::event::{EventBus, EventEnvelope};
use crate::executor::Executor;
use crate::intent::Intent;
use crate::model::StatusSnapshot;
use crate::poller::StatusPoller;
use crate::registry::ServiceRegistry;
use crate::runner::{CommandResult, CommandRunner};

pub struct Bridge {
    registry: Arc<ServiceRegistry>,
    executor: Executor,
    poller: Arc<StatusPoller>,
    controller: Arc<LifecycleController>,
    events: EventBus,
    action_timeout: Duration,
    poll_interval: Duration,
    initial_poll_delay: Duration,
}

impl Bridge {
    /// Build a bridge for `config`, resolving the project root from `cwd`
    pub fn new(
        config: &NorexConfig,
        cwd: &Path,
        runner: Arc<dyn CommandRunner>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let registry = Arc::new(config.registry()?);
        let project_root = config.resolve_project_root(cwd);
        let audit = AuditLog::new(config.logs_dir(&project_root));
        let executor = Executor::new(
            runner,
            audit,
            project_root,
            config.scripts.clone(),
            config.env.clone(),
        );
        let events = EventBus::new();
        let poller = Arc::new(StatusPoller::new(
            registry.clone(),
            executor.clone(),
            config.query_timeout(),
            events.clone(),
        ));
        let timing = LifecycleTiming {
            action_timeout: config.action_timeout(),
            service_settle: config.service_settle(),
            stack_settle: config.stack_settle(),
        };
        let controller = Arc::new(LifecycleController::new(
            registry.clone(),
            executor.clone(),
            poller.clone(),
            events.clone(),
            timing,
        ));

        info!(
            project_root = %executor.project_root().display(),
            services = registry.len(),
            runner = executor.runner_name(),
            "bridge ready"
        );

        Ok(Self {
            registry,
            executor,
            poller,
            controller,
            events,
            action_timeout: config.action_timeout(),
            poll_interval: config.poll_interval(),
            initial_poll_delay: config.initial_poll_delay(),
        })
    }

    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        &self.registry
    }

    pub fn poller(&self) -> &Arc<StatusPoller> {
        &self.poller
    }

    pub fn controller(&self) -> &Arc<LifecycleController> {
        &self.controller
    }

    pub fn project_root(&self) -> &Path {
        self.executor.project_root()
    }

    pub fn audit(&self) -> &AuditLog {
        self.executor.audit()
    }

    pub fn runner_name(&self) -> &'static str {
        self.executor.runner_name()
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub fn initial_poll_delay(&self) -> Duration {
        self.initial_poll_delay
    }

    pub fn subscribe(&self) -> watch::Receiver<StatusSnapshot> {
        self.poller.subscribe()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<EventEnvelope> {
        self.events.subscribe()
    }

    /// Run a free-form command line after mapping it onto an allowed action.
    /// Anything outside the allow-list is rejected before a process exists.
    pub async fn execute_service_command(
        &self,
        command_line: &str,
    ) -> Result<CommandResult, BridgeError> {
        let action = match ServiceAction::parse(command_line, self.executor.scripts()) {
            Ok(action) => action,
            Err(e) => {
                self.audit().record(
                    LogCategory::Commands,
                    format!("REJECTED: {}", command_line.trim()),
                );
                return Err(e.into());
            }
        };
        Ok(self.executor.execute(&action, self.action_timeout).await?)
    }

    /// Record a user-initiated action in the actions log
    pub fn record_intent(&self, intent: &Intent) {
        self.audit()
            .record(LogCategory::Actions, format!("ACTION: {}", intent.action_name()));
    }

    /// Raw runtime status payload, `"[]"` when the runtime is offline
    pub async fn query_runtime_status(&self) -> String {
        self.poller.query_raw().await
    }

    pub fn list_log_files(&self) -> Result<Vec<String>, BridgeError> {
        Ok(self.audit().list_files()?)
    }

    pub fn read_log_file(&self, name: &str) -> Result<String, BridgeError> {
        Ok(self.audit().read_file(name)?)
    }

    pub fn append_user_log(&self, message: &str) -> Result<(), BridgeError> {
        Ok(self.audit().append_user_log(message)?)
    }

    /// Open a folder under the project root with the platform file manager
    pub async fn open_path(&self, name: &str) -> Result<CommandResult, BridgeError> {
        let path = self.resolve_folder(name)?;
        let result = self
            .executor
            .execute(&ServiceAction::OpenPath(path), self.action_timeout)
            .await?;
        Ok(result)
    }

    fn resolve_folder(&self, name: &str) -> Result<PathBuf, BridgeError> {
        let relative = Path::new(name);
        let plain = !name.trim().is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !plain {
            return Err(BridgeError::Action(ActionError::Rejected {
                command: format!("open {}", name),
            }));
        }

        let path = self.project_root().join(relative);
        if !path.exists() {
            return Err(BridgeError::PathNotFound {
                name: name.to_string(),
            });
        }
        Ok(path)
    }

    /// Last `tail` lines of a container's output. `target` is a service id or
    /// the container name of a registered service.
    pub async fn container_logs(&self, target: &str, tail: u32) -> Result<String, BridgeError> {
        let container = self
            .registry
            .runtime_ref(target)
            .or_else(|| {
                self.registry
                    .by_runtime_ref(target)
                    .and_then(|s| RuntimeRef::new(s.runtime_ref.as_str()).ok())
            })
            .ok_or_else(|| BridgeError::UnknownService {
                id: target.to_string(),
            })?;

        let action = ServiceAction::ContainerLogs {
            container: container.clone(),
            tail,
        };
        let result = self.executor.execute(&action, self.action_timeout).await?;
        if result.succeeded() {
            Ok(format!("{}{}", result.stdout, result.stderr))
        } else {
            Err(BridgeError::ContainerLogs {
                container: container.to_string(),
            })
        }
    }
}
