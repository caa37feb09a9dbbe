//! Service catalogue: per-name configuration and its resolvers.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

use super::role::Port;
use super::{Error, Result};

/// Resolved configuration of one named service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceConfig {
    pub name: String,

    /// Control port of the service's Controller. Zero binds an ephemeral port.
    #[serde(default)]
    pub controller_port: Port,

    #[serde(default)]
    pub broker: BrokerConfig,

    /// Services this Controller forks and manages (one level only).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub managed_names: Vec<String>,

    /// Name of the Controller managing this service, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manager_name: Option<String>,
}

/// Broker section of a service configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BrokerConfig {
    pub enabled: bool,
    pub controller_port: Port,
    pub messaging_port: Port,
}

impl ServiceConfig {
    pub fn new(name: impl Into<String>, controller_port: Port) -> Self {
        Self {
            name: name.into(),
            controller_port,
            broker: BrokerConfig::default(),
            managed_names: Vec::new(),
            manager_name: None,
        }
    }

    pub fn with_broker(mut self, controller_port: Port, messaging_port: Port) -> Self {
        self.broker = BrokerConfig {
            enabled: true,
            controller_port,
            messaging_port,
        };
        self
    }

    pub fn with_managed(mut self, names: &[&str]) -> Self {
        self.managed_names = names.iter().map(|n| n.to_string()).collect();
        self
    }

    pub fn with_manager(mut self, name: impl Into<String>) -> Self {
        self.manager_name = Some(name.into());
        self
    }

    pub fn manager(&self) -> Option<&str> {
        self.manager_name.as_deref().filter(|m| !m.is_empty())
    }

    /// Check the structural invariants of a single configuration.
    pub fn validate(&self) -> Result<()> {
        validate_name(&self.name)?;
        if !self.managed_names.is_empty() && self.manager().is_some() {
            return Err(Error::configuration(format!(
                "service {} declares both managed services and a manager",
                self.name
            )));
        }
        for managed in &self.managed_names {
            validate_name(managed)?;
            if managed == &self.name {
                return Err(Error::configuration(format!(
                    "service {} cannot manage itself",
                    self.name
                )));
            }
        }
        if self.broker.enabled
            && self.broker.controller_port != 0
            && (self.broker.controller_port == self.controller_port
                || self.broker.controller_port == self.broker.messaging_port)
        {
            return Err(Error::configuration(format!(
                "service {} reuses port {} for its broker",
                self.name, self.broker.controller_port
            )));
        }
        Ok(())
    }
}

/// Service names become file names in the run directory.
pub fn validate_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(Error::configuration(format!("invalid service name: {:?}", name)))
    }
}

/// Looks up service configuration by name.
pub trait ServiceResolver: Send + Sync + std::fmt::Debug {
    fn resolve(&self, name: &str) -> Result<ServiceConfig>;
}

#[derive(Debug, Deserialize)]
struct Catalogue {
    #[serde(default)]
    services: Vec<ServiceConfig>,
}

/// Resolver backed by `services.json`, re-read on every lookup.
#[derive(Debug, Clone)]
pub struct FileServiceResolver {
    path: PathBuf,
}

impl FileServiceResolver {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ServiceResolver for FileServiceResolver {
    fn resolve(&self, name: &str) -> Result<ServiceConfig> {
        validate_name(name)?;
        let raw = std::fs::read_to_string(&self.path).map_err(|e| {
            Error::configuration(format!("cannot read {}: {}", self.path.display(), e))
        })?;
        let catalogue: Catalogue = serde_json::from_str(&raw).map_err(|e| {
            Error::configuration(format!("invalid {}: {}", self.path.display(), e))
        })?;
        catalogue
            .services
            .into_iter()
            .find(|s| s.name == name)
            .ok_or_else(|| Error::configuration(format!("unknown service: {}", name)))
    }
}

/// Resolver over an in-memory set of configurations.
#[derive(Debug, Clone, Default)]
pub struct MemoryServiceResolver {
    services: HashMap<String, ServiceConfig>,
}

impl MemoryServiceResolver {
    pub fn new(services: impl IntoIterator<Item = ServiceConfig>) -> Self {
        Self {
            services: services
                .into_iter()
                .map(|s| (s.name.clone(), s))
                .collect(),
        }
    }
}

impl ServiceResolver for MemoryServiceResolver {
    fn resolve(&self, name: &str) -> Result<ServiceConfig> {
        self.services
            .get(name)
            .cloned()
            .ok_or_else(|| Error::configuration(format!("unknown service: {}", name)))
    }
}
