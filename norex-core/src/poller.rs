//! Status poller
//!
//! One batched `docker compose ps --format json` per poll, classified into a
//! [`StatusSnapshot`] and published through a `watch` channel. The poller is
//! the only writer of service status. It never fails: when the runtime cannot
//! be queried every service is reported as stopped.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::action::ServiceAction;
use crate::event::{BridgeEvent, EventBus};
use crate::executor::Executor;
use crate::model::{ManagedService, ServiceId, ServiceStatus, StatusSnapshot};
use crate::registry::ServiceRegistry;

/// `Names` is a comma-separated string from `docker ps` and a list elsewhere
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum NameList {
    One(String),
    Many(Vec<String>),
}

impl NameList {
    fn contains(&self, name: &str) -> bool {
        match self {
            NameList::One(s) => s.split(',').any(|n| n.trim().trim_start_matches('/') == name),
            NameList::Many(v) => v.iter().any(|n| n.trim_start_matches('/') == name),
        }
    }
}

/// One container as reported by the runtime. Field names vary between
/// `docker ps` and `docker compose ps`, so every field is optional.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct RuntimeRecord {
    #[serde(default, rename = "Name", alias = "name")]
    pub name: Option<String>,
    #[serde(default, rename = "Names", alias = "names")]
    pub names: Option<NameList>,
    #[serde(default, rename = "Service", alias = "service")]
    pub service: Option<String>,
    #[serde(default, rename = "State", alias = "state")]
    pub state: Option<String>,
    #[serde(default, rename = "Status", alias = "status")]
    pub status: Option<String>,
}

impl RuntimeRecord {
    /// `State`, falling back to `Status` when absent or empty
    pub fn state_text(&self) -> &str {
        self.state
            .as_deref()
            .filter(|s| !s.is_empty())
            .or(self.status.as_deref())
            .unwrap_or("")
    }
}

/// Parse the status payload: newline-delimited objects first, then a single
/// JSON array, else nothing.
pub fn parse_payload(payload: &str) -> Vec<RuntimeRecord> {
    let trimmed = payload.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }

    let per_line: Result<Vec<RuntimeRecord>, _> = trimmed
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| serde_json::from_str::<RuntimeRecord>(l.trim()))
        .collect();
    if let Ok(records) = per_line {
        return records;
    }

    match serde_json::from_str::<Vec<RuntimeRecord>>(trimmed) {
        Ok(records) => records,
        Err(e) => {
            debug!(error = %e, "unparseable status payload, treating as empty");
            Vec::new()
        }
    }
}

/// Map a free-text runtime state onto a status. Empty text means the record
/// carried no state at all and is treated like a missing record.
pub fn classify_state(state: &str) -> ServiceStatus {
    let lower = state.to_lowercase();
    if lower.contains("running") || lower.contains("up") {
        ServiceStatus::Running
    } else if lower.contains("exited") || lower.contains("stopped") {
        ServiceStatus::Stopped
    } else if lower.trim().is_empty() {
        ServiceStatus::Stopped
    } else {
        ServiceStatus::Error
    }
}

/// Exact `Name` match wins; `Names` membership or compose `Service` == id is
/// only consulted when no record carries the exact name.
fn find_record<'a>(svc: &ManagedService, records: &'a [RuntimeRecord]) -> Option<&'a RuntimeRecord> {
    records
        .iter()
        .find(|r| r.name.as_deref() == Some(svc.runtime_ref.as_str()))
        .or_else(|| {
            records.iter().find(|r| {
                r.names
                    .as_ref()
                    .is_some_and(|n| n.contains(&svc.runtime_ref))
                    || r.service.as_deref() == Some(svc.id.as_str())
            })
        })
}

/// Classify every registered service against the parsed records
pub fn reconcile(
    registry: &ServiceRegistry,
    records: &[RuntimeRecord],
) -> BTreeMap<ServiceId, ServiceStatus> {
    registry
        .iter()
        .map(|svc| {
            let status = match find_record(svc, records) {
                Some(record) => classify_state(record.state_text()),
                None => ServiceStatus::Stopped,
            };
            (svc.id.clone(), status)
        })
        .collect()
}

fn all_stopped(registry: &ServiceRegistry) -> BTreeMap<ServiceId, ServiceStatus> {
    registry
        .ids()
        .map(|id| (id.clone(), ServiceStatus::Stopped))
        .collect()
}

pub struct StatusPoller {
    registry: Arc<ServiceRegistry>,
    executor: Executor,
    query_timeout: Duration,
    board: watch::Sender<StatusSnapshot>,
    events: EventBus,
}

impl StatusPoller {
    pub fn new(
        registry: Arc<ServiceRegistry>,
        executor: Executor,
        query_timeout: Duration,
        events: EventBus,
    ) -> Self {
        let (board, _) = watch::channel(StatusSnapshot::checking(registry.ids()));
        Self {
            registry,
            executor,
            query_timeout,
            board,
            events,
        }
    }

    /// Receive every published snapshot
    pub fn subscribe(&self) -> watch::Receiver<StatusSnapshot> {
        self.board.subscribe()
    }

    /// Last published snapshot
    pub fn latest(&self) -> StatusSnapshot {
        self.board.borrow().clone()
    }

    /// Raw status payload, `"[]"` when the runtime is offline
    pub async fn query_raw(&self) -> String {
        match self
            .executor
            .execute(&ServiceAction::ListContainers, self.query_timeout)
            .await
        {
            Ok(result) if result.succeeded() && !result.stdout.trim().is_empty() => result.stdout,
            _ => "[]".to_string(),
        }
    }

    /// Run one poll cycle and publish the result
    pub async fn poll(&self) -> StatusSnapshot {
        let outcome = self
            .executor
            .execute(&ServiceAction::ListContainers, self.query_timeout)
            .await;

        let snapshot = match outcome {
            Ok(result) if result.succeeded() => {
                let records = parse_payload(&result.stdout);
                let statuses = if records.is_empty() {
                    all_stopped(&self.registry)
                } else {
                    reconcile(&self.registry, &records)
                };
                StatusSnapshot::from_statuses(statuses, true)
            }
            Ok(result) => {
                debug!(code = ?result.exit_code, "runtime query failed, reporting all stopped");
                StatusSnapshot::from_statuses(all_stopped(&self.registry), false)
            }
            Err(e) => {
                debug!(error = %e, "runtime unreachable, reporting all stopped");
                StatusSnapshot::from_statuses(all_stopped(&self.registry), false)
            }
        };

        self.publish(snapshot.clone());
        snapshot
    }

    fn publish(&self, snapshot: StatusSnapshot) {
        let previous = self.board.send_replace(snapshot.clone());
        if previous.same_statuses(&snapshot) {
            return;
        }

        info!(
            running = snapshot.running_count(),
            total = snapshot.statuses.len(),
            online = snapshot.runtime_online,
            "service status changed"
        );
        if previous.polled_at.is_none() || previous.runtime_online != snapshot.runtime_online {
            self.events.emit(BridgeEvent::RuntimeAvailability {
                online: snapshot.runtime_online,
            });
        }
        for (id, status) in &snapshot.statuses {
            if previous.status(id) != Some(*status) {
                self.events.emit(BridgeEvent::StatusChanged {
                    id: id.clone(),
                    status: *status,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::AuditLog;
    use crate::fake::FakeRuntime;
    use crate::model::ManagedService;
    use std::path::PathBuf;

    fn apache_only() -> Arc<ServiceRegistry> {
        Arc::new(
            ServiceRegistry::new(vec![ManagedService {
                id: "apache".into(),
                display_name: "Apache".into(),
                runtime_ref: "norex_apache".into(),
                port: Some("8080".into()),
            }])
            .unwrap(),
        )
    }

    fn poller_with(
        fake: Arc<FakeRuntime>,
        registry: Arc<ServiceRegistry>,
        logs: &std::path::Path,
    ) -> StatusPoller {
        let executor = Executor::new(
            fake,
            AuditLog::new(logs),
            PathBuf::from("."),
            Default::default(),
            Default::default(),
        );
        StatusPoller::new(registry, executor, Duration::from_secs(5), EventBus::new())
    }

    #[test]
    fn test_classify_state() {
        assert_eq!(classify_state("running"), ServiceStatus::Running);
        assert_eq!(classify_state("Up 2 minutes"), ServiceStatus::Running);
        assert_eq!(classify_state("RUNNING"), ServiceStatus::Running);
        assert_eq!(classify_state("Exited (0) 3 hours ago"), ServiceStatus::Stopped);
        assert_eq!(classify_state("stopped"), ServiceStatus::Stopped);
        assert_eq!(classify_state("Paused"), ServiceStatus::Error);
        assert_eq!(classify_state("restarting"), ServiceStatus::Error);
        assert_eq!(classify_state("dead"), ServiceStatus::Error);
        assert_eq!(classify_state(""), ServiceStatus::Stopped);
    }

    #[test]
    fn test_parse_ndjson() {
        let payload = "{\"Name\":\"a\",\"State\":\"running\"}\n\n{\"Name\":\"b\",\"State\":\"exited\"}\n";
        let records = parse_payload(payload);
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].name.as_deref(), Some("b"));
    }

    #[test]
    fn test_parse_array_fallback() {
        let payload = r#"[{"Names":"x,y","Status":"Up 1 second"},{"name":"z","state":"paused"}]"#;
        let records = parse_payload(payload);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].state_text(), "Up 1 second");
        assert_eq!(records[1].name.as_deref(), Some("z"));
    }

    #[test]
    fn test_parse_garbage_is_empty() {
        assert!(parse_payload("not json").is_empty());
        assert!(parse_payload("").is_empty());
        assert!(parse_payload("[]").is_empty());
        assert!(parse_payload("{\"Name\":\"a\"}\n{oops").is_empty());
    }

    #[test]
    fn test_state_falls_back_to_status() {
        let record = RuntimeRecord {
            state: Some(String::new()),
            status: Some("Exited (1) 2 days ago".into()),
            ..RuntimeRecord::default()
        };
        assert_eq!(record.state_text(), "Exited (1) 2 days ago");
    }

    #[test]
    fn test_exact_match_wins_over_secondary() {
        let registry = apache_only();
        let records = vec![
            RuntimeRecord {
                service: Some("apache".into()),
                state: Some("paused".into()),
                ..RuntimeRecord::default()
            },
            RuntimeRecord {
                name: Some("norex_apache".into()),
                state: Some("running".into()),
                ..RuntimeRecord::default()
            },
        ];
        let statuses = reconcile(&registry, &records);
        assert_eq!(statuses["apache"], ServiceStatus::Running);
    }

    #[test]
    fn test_secondary_match_paths() {
        let registry = apache_only();
        let by_names = vec![RuntimeRecord {
            names: Some(NameList::One("other,norex_apache".into())),
            status: Some("Up 5 seconds".into()),
            ..RuntimeRecord::default()
        }];
        assert_eq!(reconcile(&registry, &by_names)["apache"], ServiceStatus::Running);

        let by_service = vec![RuntimeRecord {
            service: Some("apache".into()),
            state: Some("exited".into()),
            ..RuntimeRecord::default()
        }];
        assert_eq!(reconcile(&registry, &by_service)["apache"], ServiceStatus::Stopped);

        let substring_only = vec![RuntimeRecord {
            names: Some(NameList::Many(vec!["norex_apache_old".into()])),
            state: Some("running".into()),
            ..RuntimeRecord::default()
        }];
        assert_eq!(
            reconcile(&registry, &substring_only)["apache"],
            ServiceStatus::Stopped
        );
    }

    #[tokio::test]
    async fn test_scenario_running() {
        let dir = tempfile::tempdir().unwrap();
        let fake = Arc::new(FakeRuntime::new());
        fake.set_payload(Some(r#"{"Name":"norex_apache","State":"running"}"#))
            .await;
        let poller = poller_with(fake, apache_only(), dir.path());

        let snap = poller.poll().await;
        assert_eq!(snap.status("apache"), Some(ServiceStatus::Running));
        assert!(snap.any_running);
        assert!(snap.runtime_online);
    }

    #[tokio::test]
    async fn test_scenario_empty_array() {
        let dir = tempfile::tempdir().unwrap();
        let fake = Arc::new(FakeRuntime::new());
        fake.set_payload(Some("[]")).await;
        let poller = poller_with(fake, apache_only(), dir.path());

        let snap = poller.poll().await;
        assert_eq!(snap.statuses.len(), 1);
        assert_eq!(snap.status("apache"), Some(ServiceStatus::Stopped));
        assert!(!snap.any_running);
    }

    #[tokio::test]
    async fn test_scenario_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let fake = Arc::new(FakeRuntime::new());
        fake.set_payload(Some("not json")).await;
        let poller = poller_with(fake, apache_only(), dir.path());

        let snap = poller.poll().await;
        assert_eq!(snap.status("apache"), Some(ServiceStatus::Stopped));
    }

    #[tokio::test]
    async fn test_state_vocabulary_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let fake = Arc::new(FakeRuntime::new());
        let poller = poller_with(fake.clone(), apache_only(), dir.path());

        for (status, expected) in [
            ("Up 2 minutes", ServiceStatus::Running),
            ("Exited (0) 3 hours ago", ServiceStatus::Stopped),
            ("Paused", ServiceStatus::Error),
        ] {
            let payload = format!(r#"{{"Name":"norex_apache","Status":"{}"}}"#, status);
            fake.set_payload(Some(&payload)).await;
            assert_eq!(poller.poll().await.status("apache"), Some(expected));
        }
    }

    #[tokio::test]
    async fn test_docker_missing_reports_all_stopped() {
        let dir = tempfile::tempdir().unwrap();
        let fake = Arc::new(FakeRuntime::norex_default());
        fake.set_state("norex_apache", "running").await;
        fake.set_docker_missing(true).await;
        let registry = Arc::new(ServiceRegistry::norex_default());
        let poller = poller_with(fake, registry, dir.path());

        let snap = poller.poll().await;
        assert_eq!(snap.statuses.len(), 3);
        assert!(snap.statuses.values().all(|s| *s == ServiceStatus::Stopped));
        assert!(!snap.runtime_online);
        assert!(!snap.any_running);
    }

    #[tokio::test]
    async fn test_daemon_down_reports_all_stopped() {
        let dir = tempfile::tempdir().unwrap();
        let fake = Arc::new(FakeRuntime::norex_default());
        fake.set_daemon_down(true).await;
        let poller = poller_with(fake.clone(), Arc::new(ServiceRegistry::norex_default()), dir.path());

        let snap = poller.poll().await;
        assert!(snap.statuses.values().all(|s| *s == ServiceStatus::Stopped));
        assert_eq!(poller.query_raw().await, "[]");
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_query_times_out_to_all_stopped() {
        let dir = tempfile::tempdir().unwrap();
        let fake = Arc::new(FakeRuntime::norex_default());
        fake.set_state("norex_mysql", "running").await;
        fake.set_hung(true).await;
        let poller = poller_with(fake, Arc::new(ServiceRegistry::norex_default()), dir.path());

        let snap = poller.poll().await;
        assert!(snap.statuses.values().all(|s| *s == ServiceStatus::Stopped));
        assert!(!snap.runtime_online);
    }

    #[tokio::test]
    async fn test_poll_is_idempotent_and_complete() {
        let dir = tempfile::tempdir().unwrap();
        let fake = Arc::new(FakeRuntime::norex_default());
        fake.set_state("norex_pma", "running").await;
        fake.set_state("norex_mysql", "paused").await;
        let registry = Arc::new(ServiceRegistry::norex_default());
        let poller = poller_with(fake, registry.clone(), dir.path());

        let first = poller.poll().await;
        let second = poller.poll().await;
        assert_eq!(first.statuses, second.statuses);
        assert_eq!(first.statuses.len(), registry.len());
        assert_eq!(first.status("phpmyadmin"), Some(ServiceStatus::Running));
        assert_eq!(first.status("mysql"), Some(ServiceStatus::Error));
        assert_eq!(first.status("apache"), Some(ServiceStatus::Stopped));
    }

    #[tokio::test]
    async fn test_subscribers_see_whole_snapshots() {
        let dir = tempfile::tempdir().unwrap();
        let fake = Arc::new(FakeRuntime::norex_default());
        let poller = poller_with(fake.clone(), Arc::new(ServiceRegistry::norex_default()), dir.path());
        let mut rx = poller.subscribe();

        let initial = rx.borrow().clone();
        assert!(initial.statuses.values().all(|s| *s == ServiceStatus::Checking));

        fake.set_state("norex_apache", "running").await;
        poller.poll().await;
        assert!(rx.has_changed().unwrap());
        let seen = rx.borrow_and_update().clone();
        assert_eq!(seen.statuses.len(), 3);
        assert_eq!(seen.status("apache"), Some(ServiceStatus::Running));
        assert_eq!(poller.latest(), seen);
    }

    #[tokio::test]
    async fn test_status_changes_are_broadcast_once() {
        let dir = tempfile::tempdir().unwrap();
        let fake = Arc::new(FakeRuntime::norex_default());
        fake.set_state("norex_apache", "running").await;
        let executor = Executor::new(
            fake,
            AuditLog::new(dir.path()),
            PathBuf::from("."),
            Default::default(),
            Default::default(),
        );
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        let poller = StatusPoller::new(
            Arc::new(ServiceRegistry::norex_default()),
            executor,
            Duration::from_secs(5),
            bus,
        );

        poller.poll().await;
        poller.poll().await;

        let mut events = Vec::new();
        while let Ok(env) = rx.try_recv() {
            events.push(env.event);
        }
        assert_eq!(events[0], BridgeEvent::RuntimeAvailability { online: true });
        // three Checking → classified transitions, nothing for the second poll
        assert_eq!(events.len(), 4);
        assert!(events.contains(&BridgeEvent::StatusChanged {
            id: "apache".into(),
            status: ServiceStatus::Running
        }));
    }

    #[tokio::test]
    async fn test_poll_is_audited() {
        let dir = tempfile::tempdir().unwrap();
        let fake = Arc::new(FakeRuntime::norex_default());
        let poller = poller_with(fake, Arc::new(ServiceRegistry::norex_default()), dir.path());
        poller.poll().await;

        let status_log = std::fs::read_to_string(dir.path().join("gui_status.log")).unwrap();
        assert!(status_log.contains("EXECUTING: docker compose ps --format json"));
    }
}
