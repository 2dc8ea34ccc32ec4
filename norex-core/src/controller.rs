//! Lifecycle controller
//!
//! Turns start/stop/restart requests into [`ServiceAction`]s, waits for the
//! runtime to settle and asks the poller for a fresh snapshot. Statuses are
//! never written here; the re-poll is the only way a lifecycle change becomes
//! visible.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::action::ServiceAction;
use crate::error::{BridgeError, RunnerError};
use crate::event::{BridgeEvent, EventBus};
use crate::executor::Executor;
use crate::model::{ServiceId, StatusSnapshot};
use crate::poller::StatusPoller;
use crate::registry::ServiceRegistry;
use crate::runner::CommandResult;

/// Timing for lifecycle commands
#[derive(Clone, Copy, Debug)]
pub struct LifecycleTiming {
    pub action_timeout: Duration,
    pub service_settle: Duration,
    pub stack_settle: Duration,
}

impl Default for LifecycleTiming {
    fn default() -> Self {
        Self {
            action_timeout: Duration::from_secs(300),
            service_settle: Duration::from_secs(1),
            stack_settle: Duration::from_secs(3),
        }
    }
}

/// What one lifecycle operation did
#[derive(Debug)]
pub struct ActionReport {
    pub steps: Vec<(ServiceAction, Result<CommandResult, RunnerError>)>,
    /// Snapshot from the follow-up poll
    pub snapshot: StatusSnapshot,
}

impl ActionReport {
    pub fn succeeded(&self) -> bool {
        self.steps
            .iter()
            .all(|(_, outcome)| matches!(outcome, Ok(result) if result.succeeded()))
    }

    /// One line describing the first failing step, if any
    pub fn failure(&self) -> Option<String> {
        self.steps.iter().find_map(|(action, outcome)| match outcome {
            Ok(result) if result.succeeded() => None,
            Ok(result) => {
                let detail = result.stderr.lines().next().unwrap_or("").trim();
                Some(match result.exit_code {
                    Some(code) if detail.is_empty() => {
                        format!("{} failed with exit code {}", action.label(), code)
                    }
                    Some(code) => format!("{} failed with exit code {}: {}", action.label(), code, detail),
                    None => format!("{} was terminated", action.label()),
                })
            }
            Err(e) => Some(format!("{}: {}", action.label(), e)),
        })
    }
}

pub struct LifecycleController {
    registry: Arc<ServiceRegistry>,
    executor: Executor,
    poller: Arc<StatusPoller>,
    events: EventBus,
    timing: LifecycleTiming,
}

impl LifecycleController {
    pub fn new(
        registry: Arc<ServiceRegistry>,
        executor: Executor,
        poller: Arc<StatusPoller>,
        events: EventBus,
        timing: LifecycleTiming,
    ) -> Self {
        Self {
            registry,
            executor,
            poller,
            events,
            timing,
        }
    }

    pub async fn start_all(&self) -> ActionReport {
        self.run_steps("start_all", None, vec![ServiceAction::StartStack], self.timing.stack_settle)
            .await
    }

    pub async fn stop_all(&self) -> ActionReport {
        self.run_steps("stop_all", None, vec![ServiceAction::StopStack], self.timing.stack_settle)
            .await
    }

    /// Stop script, then start script, then a single re-poll
    pub async fn restart_all(&self) -> ActionReport {
        self.run_steps(
            "restart_all",
            None,
            vec![ServiceAction::StopStack, ServiceAction::StartStack],
            self.timing.stack_settle,
        )
        .await
    }

    pub async fn start(&self, id: &str) -> Result<ActionReport, BridgeError> {
        let container = self.container(id)?;
        Ok(self
            .run_steps(
                "start",
                Some(id),
                vec![ServiceAction::StartContainer(container)],
                self.timing.service_settle,
            )
            .await)
    }

    pub async fn stop(&self, id: &str) -> Result<ActionReport, BridgeError> {
        let container = self.container(id)?;
        Ok(self
            .run_steps(
                "stop",
                Some(id),
                vec![ServiceAction::StopContainer(container)],
                self.timing.service_settle,
            )
            .await)
    }

    pub async fn restart(&self, id: &str) -> Result<ActionReport, BridgeError> {
        let container = self.container(id)?;
        Ok(self
            .run_steps(
                "restart",
                Some(id),
                vec![ServiceAction::RestartContainer(container)],
                self.timing.service_settle,
            )
            .await)
    }

    fn container(&self, id: &str) -> Result<crate::action::RuntimeRef, BridgeError> {
        self.registry
            .runtime_ref(id)
            .ok_or_else(|| BridgeError::UnknownService { id: id.to_string() })
    }

    async fn run_steps(
        &self,
        name: &str,
        service: Option<&str>,
        actions: Vec<ServiceAction>,
        settle: Duration,
    ) -> ActionReport {
        let service: Option<ServiceId> = service.map(str::to_string);
        self.events.emit(BridgeEvent::ActionStarted {
            action: name.to_string(),
            service: service.clone(),
        });
        info!(action = name, service = ?service, "lifecycle action started");

        let mut steps = Vec::with_capacity(actions.len());
        for action in actions {
            let outcome = self.executor.execute(&action, self.timing.action_timeout).await;
            steps.push((action, outcome));
        }

        tokio::time::sleep(settle).await;
        let snapshot = self.poller.poll().await;

        let report = ActionReport { steps, snapshot };
        let message = report.failure();
        match &message {
            Some(reason) => warn!(action = name, service = ?service, %reason, "lifecycle action failed"),
            None => info!(action = name, service = ?service, running = report.snapshot.running_count(), "lifecycle action finished"),
        }
        self.events.emit(BridgeEvent::ActionFinished {
            action: name.to_string(),
            service,
            success: message.is_none(),
            message,
        });
        report
    }
}
