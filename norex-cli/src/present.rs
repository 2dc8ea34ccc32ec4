//! Plain-terminal rendering of snapshots, reports and events

use norex_core::controller::ActionReport;
use norex_core::event::{BridgeEvent, EventEnvelope};
use norex_core::model::{ServiceStatus, StatusSnapshot};
use norex_core::registry::ServiceRegistry;

const RESET: &str = "\x1b[0m";

fn color(status: ServiceStatus) -> &'static str {
    match status {
        ServiceStatus::Running => "\x1b[32m",
        ServiceStatus::Stopped => "\x1b[90m",
        ServiceStatus::Checking => "\x1b[33m",
        ServiceStatus::Error => "\x1b[31m",
    }
}

fn paint(status: ServiceStatus) -> String {
    format!("{}{} {}{}", color(status), status.icon(), status.label(), RESET)
}

/// One row per registered service, in registry order, then a summary line
pub fn status_table(registry: &ServiceRegistry, snapshot: &StatusSnapshot) -> String {
    let width = registry
        .iter()
        .map(|s| s.display_name.len())
        .max()
        .unwrap_or(0);

    let mut out = String::new();
    for svc in registry.iter() {
        let status = snapshot.status(&svc.id).unwrap_or(ServiceStatus::Checking);
        let port = svc
            .port
            .as_ref()
            .map(|p| format!("  :{}", p))
            .unwrap_or_default();
        out.push_str(&format!(
            "  {:<width$}  {}{}\n",
            svc.display_name,
            paint(status),
            port,
            width = width
        ));
    }
    out.push_str(&summary(snapshot));
    out
}

pub fn summary(snapshot: &StatusSnapshot) -> String {
    let mut line = format!(
        "{}/{} running",
        snapshot.running_count(),
        snapshot.statuses.len()
    );
    if snapshot.polled_at.is_some() && !snapshot.runtime_online {
        line.push_str(" (docker unreachable)");
    }
    line
}

/// Each command the report ran, with its outcome
pub fn report_lines(report: &ActionReport) -> Vec<String> {
    report
        .steps
        .iter()
        .map(|(action, outcome)| match outcome {
            Ok(result) if result.succeeded() => format!("✓ {}", action.label()),
            Ok(result) => match result.exit_code {
                Some(code) => format!("✗ {} (exit code {})", action.label(), code),
                None => format!("✗ {} (terminated)", action.label()),
            },
            Err(e) => format!("✗ {}: {}", action.label(), e),
        })
        .collect()
}

pub fn event_line(registry: &ServiceRegistry, envelope: &EventEnvelope) -> String {
    let at = envelope.at.format("%H:%M:%S");
    let name = |id: &str| {
        registry
            .get(id)
            .map(|s| s.display_name.clone())
            .unwrap_or_else(|| id.to_string())
    };

    let text = match &envelope.event {
        BridgeEvent::ActionStarted { action, service } => match service {
            Some(id) => format!("{} {}...", action, name(id)),
            None => format!("{}...", action),
        },
        BridgeEvent::ActionFinished {
            action,
            success,
            message,
            ..
        } => {
            if *success {
                format!("{} done", action)
            } else {
                format!(
                    "{} failed: {}",
                    action,
                    message.as_deref().unwrap_or("unknown error")
                )
            }
        }
        BridgeEvent::StatusChanged { id, status } => format!("{}: {}", name(id), paint(*status)),
        BridgeEvent::RuntimeAvailability { online } => {
            if *online {
                "docker reachable".to_string()
            } else {
                "docker unreachable".to_string()
            }
        }
    };
    format!("[{}] {}", at, text)
}
