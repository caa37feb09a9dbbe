//! Observed liveness of a service's roles: registered in the run-state store
//! and answering `iz.ping` on the registered port.

use crate::ipc::client;
use crate::store::{RoleRecord, RunStateStore};
use crate::types::{Result, Role, ServiceConfig};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Liveness {
    pub controller: bool,
    pub broker: bool,
    /// One entry per expected role that is not reachable.
    pub reasons: Vec<String>,
}

impl Liveness {
    pub fn any_reachable(&self) -> bool {
        self.controller || self.broker
    }
}

/// Probe the Controller, and the Broker when `config` enables one.
pub async fn probe(store: &RunStateStore, config: &ServiceConfig) -> Result<Liveness> {
    let document = store.read(&config.name).await?;
    let mut liveness = Liveness::default();

    let mut roles = vec![Role::Controller];
    if config.broker.enabled {
        roles.push(Role::Broker);
    }

    for role in roles {
        let reachable = match RoleRecord::from_document(&document, role) {
            None => {
                liveness
                    .reasons
                    .push(format!("{} for {} is not registered", role, config.name));
                false
            }
            Some(record) if client::ping(record.listening_port).await => true,
            Some(record) => {
                liveness.reasons.push(format!(
                    "{} for {} is not answering on port {}",
                    role, config.name, record.listening_port
                ));
                false
            }
        };
        match role {
            Role::Controller => liveness.controller = reachable,
            Role::Broker => liveness.broker = reachable,
        }
    }

    Ok(liveness)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::RunDocument;

    #[tokio::test]
    async fn unregistered_service_reports_reasons() {
        let dir = tempfile::tempdir().unwrap();
        let store = RunStateStore::new(dir.path());
        let config = ServiceConfig::new("alpha", 24001).with_broker(24002, 24003);

        let liveness = probe(&store, &config).await.unwrap();
        assert!(!liveness.any_reachable());
        assert_eq!(liveness.reasons.len(), 2);
    }

    #[tokio::test]
    async fn registered_but_dead_role_is_not_reachable() {
        let dir = tempfile::tempdir().unwrap();
        let store = RunStateStore::new(dir.path());
        let dead_port = {
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };
        let record = RoleRecord {
            pid: 1,
            listening_port: dead_port,
            config_snapshot: serde_json::Value::Null,
        };
        store
            .write_role("alpha", Role::Controller, &record, &RunDocument::new())
            .await
            .unwrap();

        let liveness = probe(&store, &ServiceConfig::new("alpha", 0)).await.unwrap();
        assert!(!liveness.controller);
        assert!(liveness.reasons[0].contains("not answering"));
    }
}
