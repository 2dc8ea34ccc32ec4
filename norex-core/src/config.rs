use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::action::Scripts;
use crate::error::ConfigError;
use crate::model::ManagedService;
use crate::registry::ServiceRegistry;

pub const CONFIG_ENV: &str = "NOREX_CONFIG";
pub const CONFIG_NAMES: [&str; 4] = ["norex.yml", "norex.yaml", ".norex.yml", ".norex.yaml"];

/// Service definition in the config file
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ServiceConfig {
    pub id: String,

    /// Display name (defaults to service id)
    #[serde(default)]
    pub name: Option<String>,

    /// Container name reported by the runtime
    pub container: String,

    /// Port shown next to the service (informational)
    #[serde(default)]
    pub port: Option<String>,
}

/// Status poll timing
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct PollConfig {
    #[serde(default = "default_poll_interval")]
    pub interval_ms: u64,
    /// Delay before the first poll after the supervisor starts
    #[serde(default = "default_initial_delay")]
    pub initial_delay_ms: u64,
    /// Deadline for the batched status query
    #[serde(default = "default_query_timeout")]
    pub query_timeout_ms: u64,
}

fn default_poll_interval() -> u64 {
    5000
}
fn default_initial_delay() -> u64 {
    500
}
fn default_query_timeout() -> u64 {
    5000
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_poll_interval(),
            initial_delay_ms: default_initial_delay(),
            query_timeout_ms: default_query_timeout(),
        }
    }
}

/// Pause between a lifecycle command returning and the follow-up poll
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct SettleConfig {
    #[serde(default = "default_service_settle")]
    pub service_ms: u64,
    #[serde(default = "default_stack_settle")]
    pub stack_ms: u64,
}

fn default_service_settle() -> u64 {
    1000
}
fn default_stack_settle() -> u64 {
    3000
}

impl Default for SettleConfig {
    fn default() -> Self {
        Self {
            service_ms: default_service_settle(),
            stack_ms: default_stack_settle(),
        }
    }
}

/// Root configuration file structure
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct NorexConfig {
    /// Project name
    #[serde(default)]
    pub name: Option<String>,

    /// Directory holding `scripts/`, `www/` and `logs/`
    #[serde(default)]
    pub project_root: Option<PathBuf>,

    /// Audit log directory, relative to the project root
    #[serde(default = "default_logs_dir")]
    pub logs_dir: PathBuf,

    #[serde(default)]
    pub scripts: Scripts,

    #[serde(default)]
    pub poll: PollConfig,

    #[serde(default)]
    pub settle: SettleConfig,

    /// Deadline for start/stop/restart commands
    #[serde(default = "default_action_timeout")]
    pub action_timeout_ms: u64,

    /// Extra environment passed to every command
    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// Managed services; empty means the built-in Apache/MySQL/phpMyAdmin stack
    #[serde(default)]
    pub services: Vec<ServiceConfig>,
}

fn default_logs_dir() -> PathBuf {
    PathBuf::from("logs")
}
fn default_action_timeout() -> u64 {
    300_000
}

impl Default for NorexConfig {
    fn default() -> Self {
        Self {
            name: None,
            project_root: None,
            logs_dir: default_logs_dir(),
            scripts: Scripts::default(),
            poll: PollConfig::default(),
            settle: SettleConfig::default(),
            action_timeout_ms: default_action_timeout(),
            env: BTreeMap::new(),
            services: Vec::new(),
        }
    }
}

impl NorexConfig {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let mut config = Self::parse(&content)?;
        // A relative project root is relative to the config file
        if let (Some(root), Some(parent)) = (&config.project_root, path.parent()) {
            if root.is_relative() {
                config.project_root = Some(parent.join(root));
            }
        }
        Ok(config)
    }

    /// Load configuration from a string (useful for testing)
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: NorexConfig = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the poll scheduler and deadlines cannot work with
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("poll.interval_ms", self.poll.interval_ms),
            ("poll.query_timeout_ms", self.poll.query_timeout_ms),
            ("action_timeout_ms", self.action_timeout_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::ZeroDuration { field });
            }
        }
        self.registry()?;
        Ok(())
    }

    /// Search for a config file: `NOREX_CONFIG`, then `start_dir` and its parents
    pub fn discover(start_dir: &Path) -> Result<(PathBuf, Self), ConfigError> {
        let mut searched = Vec::new();

        if let Ok(env_path) = std::env::var(CONFIG_ENV) {
            let path = PathBuf::from(&env_path);
            if path.exists() {
                return Ok((path.clone(), Self::load(&path)?));
            }
            searched.push(path);
        }

        let mut dir = Some(start_dir);
        while let Some(current) = dir {
            for name in &CONFIG_NAMES {
                let path = current.join(name);
                if path.exists() {
                    return Ok((path.clone(), Self::load(&path)?));
                }
                searched.push(path);
            }
            dir = current.parent();
        }

        Err(ConfigError::NotFound { searched })
    }

    /// Build the service registry described by this config
    pub fn registry(&self) -> Result<ServiceRegistry, ConfigError> {
        if self.services.is_empty() {
            return Ok(ServiceRegistry::norex_default());
        }

        let services = self
            .services
            .iter()
            .map(|svc| ManagedService {
                id: svc.id.clone(),
                display_name: svc.name.clone().unwrap_or_else(|| svc.id.clone()),
                runtime_ref: svc.container.clone(),
                port: svc.port.clone(),
            })
            .collect();
        ServiceRegistry::new(services)
    }

    /// Project root: explicit setting, else the first of `cwd` / its parent
    /// that has a `scripts/` directory, else `cwd`.
    pub fn resolve_project_root(&self, cwd: &Path) -> PathBuf {
        if let Some(root) = &self.project_root {
            return root.clone();
        }
        if cwd.join("scripts").is_dir() {
            return cwd.to_path_buf();
        }
        if let Some(parent) = cwd.parent() {
            if parent.join("scripts").is_dir() {
                return parent.to_path_buf();
            }
        }
        cwd.to_path_buf()
    }

    pub fn logs_dir(&self, project_root: &Path) -> PathBuf {
        project_root.join(&self.logs_dir)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll.interval_ms)
    }

    pub fn initial_poll_delay(&self) -> Duration {
        Duration::from_millis(self.poll.initial_delay_ms)
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.poll.query_timeout_ms)
    }

    pub fn service_settle(&self) -> Duration {
        Duration::from_millis(self.settle.service_ms)
    }

    pub fn stack_settle(&self) -> Duration {
        Duration::from_millis(self.settle.stack_ms)
    }

    pub fn action_timeout(&self) -> Duration {
        Duration::from_millis(self.action_timeout_ms)
    }
}
