use crate::model::ServiceId;
use crate::registry::ServiceRegistry;

/// Something a presenter asks the supervisor to do
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Intent {
    StartAll,
    StopAll,
    RestartAll,
    Start(ServiceId),
    Stop(ServiceId),
    Restart(ServiceId),
    /// Open a folder under the project root (`www`, `logs`)
    OpenFolder(String),
    Refresh,
    Quit,
}

impl Intent {
    /// Parse a tray / context-menu action name such as `start_all`,
    /// `apache_restart` or `open_www`. Per-service names are only accepted
    /// for registered ids.
    pub fn parse_action(action: &str, registry: &ServiceRegistry) -> Option<Intent> {
        let action = action.trim();
        match action {
            "start_all" => return Some(Intent::StartAll),
            "stop_all" => return Some(Intent::StopAll),
            "restart_all" => return Some(Intent::RestartAll),
            "refresh" => return Some(Intent::Refresh),
            "quit" => return Some(Intent::Quit),
            _ => {}
        }

        if let Some(folder) = action.strip_prefix("open_") {
            return (!folder.is_empty()).then(|| Intent::OpenFolder(folder.to_string()));
        }

        let (id, verb) = action.rsplit_once('_')?;
        registry.get(id)?;
        let id = id.to_string();
        match verb {
            "start" => Some(Intent::Start(id)),
            "stop" => Some(Intent::Stop(id)),
            "restart" => Some(Intent::Restart(id)),
            _ => None,
        }
    }

    /// Action name understood by [`Intent::parse_action`]
    pub fn action_name(&self) -> String {
        match self {
            Intent::StartAll => "start_all".into(),
            Intent::StopAll => "stop_all".into(),
            Intent::RestartAll => "restart_all".into(),
            Intent::Start(id) => format!("{}_start", id),
            Intent::Stop(id) => format!("{}_stop", id),
            Intent::Restart(id) => format!("{}_restart", id),
            Intent::OpenFolder(name) => format!("open_{}", name),
            Intent::Refresh => "refresh".into(),
            Intent::Quit => "quit".into(),
        }
    }
}
