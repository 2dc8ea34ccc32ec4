use std::collections::BTreeSet;

use crate::action::RuntimeRef;
use crate::error::ConfigError;
use crate::model::{ManagedService, ServiceId};

/// The fixed list of services this process manages.
///
/// Built once at startup and never modified afterwards: there is exactly one
/// service per id and exactly one per runtime reference.
#[derive(Clone, Debug)]
pub struct ServiceRegistry {
    services: Vec<ManagedService>,
}

impl ServiceRegistry {
    pub fn new(services: Vec<ManagedService>) -> Result<Self, ConfigError> {
        let mut ids = BTreeSet::new();
        let mut refs = BTreeSet::new();

        for svc in &services {
            if svc.id.trim().is_empty() {
                return Err(ConfigError::EmptyServiceId);
            }
            if svc.runtime_ref.trim().is_empty() {
                return Err(ConfigError::EmptyContainer {
                    service: svc.id.clone(),
                });
            }
            RuntimeRef::new(svc.runtime_ref.as_str()).map_err(|source| {
                ConfigError::InvalidContainer {
                    service: svc.id.clone(),
                    source,
                }
            })?;
            if !ids.insert(svc.id.as_str()) {
                return Err(ConfigError::DuplicateService {
                    service: svc.id.clone(),
                });
            }
            if !refs.insert(svc.runtime_ref.as_str()) {
                return Err(ConfigError::DuplicateContainer {
                    container: svc.runtime_ref.clone(),
                });
            }
        }

        Ok(Self { services })
    }

    /// Apache, MySQL and phpMyAdmin as shipped with the default compose file
    pub fn norex_default() -> Self {
        let svc = |id: &str, name: &str, container: &str, port: &str| ManagedService {
            id: id.to_string(),
            display_name: name.to_string(),
            runtime_ref: container.to_string(),
            port: Some(port.to_string()),
        };
        Self {
            services: vec![
                svc("apache", "Apache", "norex_apache", "8080"),
                svc("mysql", "MySQL", "norex_mysql", "3306"),
                svc("phpmyadmin", "phpMyAdmin", "norex_pma", "8081"),
            ],
        }
    }

    pub fn get(&self, id: &str) -> Option<&ManagedService> {
        self.services.iter().find(|s| s.id == id)
    }

    pub fn by_runtime_ref(&self, runtime_ref: &str) -> Option<&ManagedService> {
        self.services.iter().find(|s| s.runtime_ref == runtime_ref)
    }

    /// Validated runtime reference for a registered service
    pub fn runtime_ref(&self, id: &str) -> Option<RuntimeRef> {
        self.get(id)
            .and_then(|s| RuntimeRef::new(s.runtime_ref.as_str()).ok())
    }

    pub fn iter(&self) -> impl Iterator<Item = &ManagedService> {
        self.services.iter()
    }

    pub fn ids(&self) -> impl Iterator<Item = &ServiceId> {
        self.services.iter().map(|s| &s.id)
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn svc(id: &str, container: &str) -> ManagedService {
        ManagedService {
            id: id.into(),
            display_name: id.into(),
            runtime_ref: container.into(),
            port: None,
        }
    }

    #[test]
    fn test_default_registry() {
        let registry = ServiceRegistry::norex_default();
        assert_eq!(registry.len(), 3);
        assert_eq!(registry.get("apache").unwrap().runtime_ref, "norex_apache");
        assert_eq!(registry.by_runtime_ref("norex_pma").unwrap().id, "phpmyadmin");
        assert!(registry.get("nginx").is_none());
        assert_eq!(
            registry.runtime_ref("mysql").unwrap().as_str(),
            "norex_mysql"
        );
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let result = ServiceRegistry::new(vec![svc("a", "c1"), svc("a", "c2")]);
        assert!(matches!(result, Err(ConfigError::DuplicateService { .. })));
    }

    #[test]
    fn test_duplicate_runtime_ref_rejected() {
        let result = ServiceRegistry::new(vec![svc("a", "c1"), svc("b", "c1")]);
        assert!(matches!(result, Err(ConfigError::DuplicateContainer { .. })));
    }

    #[test]
    fn test_bad_container_rejected() {
        assert!(matches!(
            ServiceRegistry::new(vec![svc("a", "")]),
            Err(ConfigError::EmptyContainer { .. })
        ));
        assert!(matches!(
            ServiceRegistry::new(vec![svc("a", "x; rm -rf /")]),
            Err(ConfigError::InvalidContainer { .. })
        ));
        assert!(matches!(
            ServiceRegistry::new(vec![svc(" ", "c1")]),
            Err(ConfigError::EmptyServiceId)
        ));
    }

    #[test]
    fn test_preserves_order() {
        let registry =
            ServiceRegistry::new(vec![svc("web", "c-web"), svc("db", "c-db")]).unwrap();
        let ids: Vec<_> = registry.ids().cloned().collect();
        assert_eq!(ids, vec!["web", "db"]);
    }
}
