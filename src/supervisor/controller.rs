//! Controller role: owns an optional Broker and, at the top level, the
//! managed Controllers of its service.

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::sync::{Arc, Mutex, OnceLock};
use tokio::sync::mpsc;

use super::cascade::{self, StopTarget};
use super::common::{dispatch, RoleBehavior, Supervisor};
use crate::ipc::{Command, CommandHandler, Reply};
use crate::launch::MAX_DEPTH;
use crate::process::{Advertisement, SpawnRequest};
use crate::types::{Port, Role, ServiceResolver};

/// A process forked by this Controller.
#[derive(Debug)]
struct Dependent {
    role: Role,
    name: String,
    pid: u32,
    configured_port: Port,
    /// Port from the dependent's own advertisement.
    advertised_port: Arc<OnceLock<Port>>,
}

impl Dependent {
    fn port(&self) -> Port {
        self.advertised_port
            .get()
            .copied()
            .unwrap_or(self.configured_port)
    }
}

#[derive(Debug)]
pub struct Controller {
    core: Arc<Supervisor>,
    resolver: Arc<dyn ServiceResolver>,
    managed: Mutex<Vec<Dependent>>,
    broker: Mutex<Option<Dependent>>,
}

impl Controller {
    pub fn new(core: Supervisor, resolver: Arc<dyn ServiceResolver>) -> Self {
        Self {
            core: Arc::new(core),
            resolver,
            managed: Mutex::new(Vec::new()),
            broker: Mutex::new(None),
        }
    }

    /// Fork one dependent and start relaying its channel upward.
    async fn fork(&self, request: SpawnRequest, configured_port: Port) -> Option<Dependent> {
        let role = request.role;
        let name = request.name.clone();
        let spawned = match self.core.process().spawn(request).await {
            Ok(spawned) => spawned,
            Err(e) => {
                tracing::error!(%role, service = %name, "failed to launch: {}", e);
                return None;
            }
        };

        let advertised_port = Arc::new(OnceLock::new());
        self.relay_advertisements(role, spawned.advertisements, advertised_port.clone());
        Some(Dependent {
            role,
            name,
            pid: spawned.pid,
            configured_port,
            advertised_port,
        })
    }

    /// Forward every advertisement read from a dependent's channel, noting the
    /// dependent's own port from the first one that carries its role.
    fn relay_advertisements(
        &self,
        role: Role,
        mut advertisements: mpsc::UnboundedReceiver<Advertisement>,
        advertised_port: Arc<OnceLock<Port>>,
    ) {
        let core = self.core.clone();
        let cancel = core.cancel_token().clone();
        self.core.background().spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    next = advertisements.recv() => match next {
                        Some(advertisement) => {
                            if advertisement.role == role {
                                let _ = advertised_port.set(advertisement.port);
                            }
                            core.forward_advertisement(&advertisement);
                        }
                        None => break,
                    }
                }
            }
        });
    }

    fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
        mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl RoleBehavior for Controller {
    fn core(&self) -> &Supervisor {
        &self.core
    }

    async fn launch_dependents(&self) {
        let core = &self.core;
        let service = core.service();
        let depth = core.depth();

        if service.broker.enabled {
            let manager = core.manager().map(String::from);
            let request = SpawnRequest::broker(&service.name, depth, manager);
            if let Some(broker) = self.fork(request, service.broker.controller_port).await {
                *Self::lock(&self.broker) = Some(broker);
            }
        }

        if service.managed_names.is_empty() {
            return;
        }
        if depth >= MAX_DEPTH {
            tracing::warn!(
                service = %service.name,
                managed = ?service.managed_names,
                "managed services of a managed Controller are ignored"
            );
            return;
        }

        for name in &service.managed_names {
            let managed = match self.resolver.resolve(name) {
                Ok(managed) => managed,
                Err(e) => {
                    tracing::error!(service = %name, "cannot launch managed service: {}", e);
                    continue;
                }
            };
            let request = SpawnRequest::controller(name, depth + 1, Some(service.name.clone()));
            if let Some(dependent) = self.fork(request, managed.controller_port).await {
                Self::lock(&self.managed).push(dependent);
            }
        }
    }

    async fn status_fields(&self) -> Map<String, Value> {
        let service = self.core.service();
        let dependents: Vec<Value> = {
            let managed = Self::lock(&self.managed);
            let broker = Self::lock(&self.broker);
            managed
                .iter()
                .chain(broker.iter())
                .map(|d| {
                    json!({ "role": d.role, "name": d.name, "pid": d.pid, "port": d.port() })
                })
                .collect()
        };

        let mut fields = Map::new();
        fields.insert("broker".into(), json!(service.broker));
        fields.insert("managed".into(), json!(service.managed_names));
        fields.insert("dependents".into(), Value::Array(dependents));
        fields
    }

    /// Managed Controllers first, then our own Broker.
    async fn stop_dependents(&self) -> Vec<Value> {
        let dependents: Vec<(Role, String, Port)> = {
            let managed = Self::lock(&self.managed);
            let broker = Self::lock(&self.broker);
            managed
                .iter()
                .chain(broker.iter())
                .map(|d| (d.role, d.name.clone(), d.port()))
                .collect()
        };
        let targets: Vec<StopTarget<'_>> = dependents
            .iter()
            .map(|(role, name, port)| StopTarget {
                role: *role,
                name,
                port: *port,
            })
            .collect();
        cascade::stop_all(&self.core, &targets).await
    }
}

#[async_trait]
impl CommandHandler for Controller {
    async fn handle(&self, command: Command, reply: Reply) {
        dispatch(self, command, reply).await;
    }

    async fn on_listener_error(&self, error: std::io::Error) {
        self.core.listener_failed(&error);
    }
}
