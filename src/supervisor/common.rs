//! State and operations shared by every role process.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use super::lifecycle::{RoleState, RoleStatus};
use super::{RoleDeps, RoleLaunch};
use crate::ipc::client;
use crate::ipc::codec::{help_document, ACK, PING, RELAY};
use crate::ipc::{Command, Reply};
use crate::metrics::MetricsProvider;
use crate::process::{
    Advertisement, ProcessControl, Signal, DEPTH_ENV, MANAGER_ENV, ROLE_ENV, SERVICE_ENV,
};
use crate::store::{RoleRecord, RunStateStore};
use crate::types::{Error, IpcConfig, Paths, Port, Result, Role, ServiceConfig, HOME_ENV};

/// The supervisor half of a role: identity, lifecycle, registration and the
/// documents every role answers with.
#[derive(Debug)]
pub struct Supervisor {
    launch: RoleLaunch,
    service: ServiceConfig,
    paths: Paths,
    ipc: IpcConfig,
    store: RunStateStore,
    process: Arc<dyn ProcessControl>,
    metrics: Arc<dyn MetricsProvider>,
    state: Mutex<RoleState>,
    cancel: CancellationToken,
    background: TaskTracker,
    started_at: DateTime<Utc>,
}

impl Supervisor {
    pub fn new(launch: RoleLaunch, service: ServiceConfig, deps: &RoleDeps) -> Self {
        let pid = deps.process.pid();
        let state = RoleState::new(launch.role, launch.name.clone(), pid);
        Self {
            launch,
            service,
            paths: deps.paths.clone(),
            ipc: deps.config.ipc.clone(),
            store: RunStateStore::new(&deps.paths.run_dir),
            process: deps.process.clone(),
            metrics: deps.metrics.clone(),
            state: Mutex::new(state),
            cancel: CancellationToken::new(),
            background: TaskTracker::new(),
            started_at: Utc::now(),
        }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn role(&self) -> Role {
        self.launch.role
    }

    pub fn name(&self) -> &str {
        &self.launch.name
    }

    pub fn depth(&self) -> u8 {
        self.launch.depth
    }

    /// Managing Controller's service name, from the launch or the service config.
    pub fn manager(&self) -> Option<&str> {
        self.launch
            .manager
            .as_deref()
            .filter(|m| !m.is_empty())
            .or_else(|| self.service.manager())
    }

    pub fn service(&self) -> &ServiceConfig {
        &self.service
    }

    pub fn process(&self) -> &Arc<dyn ProcessControl> {
        &self.process
    }

    pub fn ipc(&self) -> &IpcConfig {
        &self.ipc
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn background(&self) -> &TaskTracker {
        &self.background
    }

    pub fn pid(&self) -> u32 {
        self.state().pid
    }

    /// Bound control port; zero until the listener is bound.
    pub fn port(&self) -> Port {
        self.state().tcp_port.unwrap_or(0)
    }

    pub fn status(&self) -> RoleStatus {
        self.state().status
    }

    /// Port the control listener should bind, as configured for this role.
    pub fn configured_port(&self) -> Port {
        match self.launch.role {
            Role::Controller => self.service.controller_port,
            Role::Broker => self.service.broker.controller_port,
        }
    }

    fn state(&self) -> MutexGuard<'_, RoleState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // =========================================================================
    // Startup
    // =========================================================================

    /// Starting → Running once the listener is bound.
    pub fn mark_running(&self, port: Port) -> Result<()> {
        self.state().mark_running(port)?;
        tracing::info!(role = %self.role(), service = self.name(), port, "role running");
        Ok(())
    }

    /// Record this role in the run-state store.
    ///
    /// A write that loses the optimistic-concurrency check is logged and the
    /// role keeps running unregistered.
    pub async fn register(&self) -> Result<()> {
        let snapshot = self.store.read(self.name()).await?;
        let record = RoleRecord {
            pid: self.pid(),
            listening_port: self.port(),
            config_snapshot: serde_json::to_value(&self.service)?,
        };
        match self
            .store
            .write_role(self.name(), self.role(), &record, &snapshot)
            .await
        {
            Ok(_) => {
                tracing::debug!(
                    "registered {} for {} in {}",
                    self.role(),
                    self.name(),
                    self.store.path_for(self.name()).display()
                );
                Ok(())
            }
            Err(e @ Error::Changed(_)) => {
                tracing::warn!("{} for {} not registered: {}", self.role(), self.name(), e);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Send this role's startup advertisement up its fork channel, if it has one.
    pub fn advertise(&self) {
        if !self.process.has_parent_channel() {
            tracing::debug!("no parent channel; startup advertisement not sent");
            return;
        }
        let advertisement = Advertisement::new(self.role(), self.pid(), self.port());
        if let Err(e) = self.process.send_message(&advertisement) {
            tracing::debug!("startup advertisement not delivered: {}", e);
        }
    }

    /// Forward an advertisement read from a dependent's channel to our own parent.
    pub fn forward_advertisement(&self, advertisement: &Advertisement) {
        if !self.process.has_parent_channel() {
            return;
        }
        if let Err(e) = self.process.send_message(advertisement) {
            tracing::debug!(
                "advertisement of {} {} not relayed: {}",
                advertisement.role,
                advertisement.pid,
                e
            );
        }
    }

    // =========================================================================
    // Documents
    // =========================================================================

    pub fn help(&self) -> Value {
        help_document()
    }

    pub fn ping(&self) -> Value {
        json!({ PING: ACK })
    }

    /// `{ <Role>: { name, pid, port, status, environment, ...extra, manager, ... } }`
    pub fn status_document(&self, extra: Map<String, Value>) -> Value {
        let (pid, port, status) = {
            let state = self.state();
            (state.pid, state.tcp_port, state.status)
        };

        let mut body = Map::new();
        body.insert("name".into(), json!(self.name()));
        body.insert("pid".into(), json!(pid));
        body.insert("port".into(), json!(port));
        body.insert("status".into(), json!(status));
        body.insert("environment".into(), self.environment());
        body.extend(extra);
        body.insert("manager".into(), json!(self.manager()));
        body.insert(
            "logfile".into(),
            json!(self.paths.log_file(self.name(), self.role()).display().to_string()),
        );
        body.insert(
            "runfile".into(),
            json!(self.store.path_for(self.name()).display().to_string()),
        );
        body.insert(
            "storageDir".into(),
            json!(self.paths.storage_dir.display().to_string()),
        );
        body.insert("version".into(), json!(env!("CARGO_PKG_VERSION")));
        body.insert("startedAt".into(), json!(self.started_at.to_rfc3339()));
        body.insert("pidUsage".into(), json!(self.metrics.usage(pid)));

        let mut document = Map::new();
        document.insert(self.role().to_string(), Value::Object(body));
        Value::Object(document)
    }

    /// The role markers this process was launched with.
    fn environment(&self) -> Value {
        let mut env = Map::new();
        env.insert(ROLE_ENV.into(), json!(self.role()));
        env.insert(SERVICE_ENV.into(), json!(self.name()));
        env.insert(DEPTH_ENV.into(), json!(self.depth().to_string()));
        if let Some(manager) = self.manager() {
            env.insert(MANAGER_ENV.into(), json!(manager));
        }
        env.insert(HOME_ENV.into(), json!(self.paths.home().display().to_string()));
        Value::Object(env)
    }

    /// Acknowledgement returned to the caller of `iz.stop`.
    pub fn stop_ack(&self, dependents: Vec<Value>) -> Value {
        json!({
            "role": self.role(),
            "name": self.name(),
            "forkable": self.process.has_parent_channel(),
            "pid": self.pid(),
            "port": self.port(),
            "manager": self.manager(),
            "dependents": dependents,
        })
    }

    // =========================================================================
    // Shutdown
    // =========================================================================

    /// Enter Stopping. Returns `false` when a stop is already in progress.
    pub fn begin_stopping(&self, forward_port: Option<Port>) -> bool {
        let entered = self.state().begin_stopping(forward_port);
        if entered {
            tracing::info!(
                role = %self.role(),
                service = self.name(),
                forward_port,
                "stopping"
            );
        }
        entered
    }

    pub fn forward_port(&self) -> Option<Port> {
        self.state().forward_port
    }

    /// Relay an acknowledgement to the forward port, if one was given.
    ///
    /// Fire-and-forget: the relay runs in the background and a failure is only logged.
    pub fn relay_upward(&self, ack: Value) {
        let Some(port) = self.forward_port() else {
            return;
        };
        self.background.spawn(async move {
            if let Err(e) = client::send(port, &Command::Relay(ack)).await {
                tracing::debug!("relay to port {} failed: {}", port, e);
            }
        });
    }

    /// Handle an acknowledgement relayed by a dependent.
    pub fn accept_relay(&self, ack: Value) -> Value {
        tracing::info!(service = self.name(), "relayed acknowledgement: {}", ack);
        if self.state().is_stopping() {
            self.relay_upward(ack);
        }
        json!({ RELAY: ACK })
    }

    /// Last step of a stop: drop our store entry, answer the caller, then
    /// close the listener.
    pub async fn finish(&self, dependents: Vec<Value>, reply: Reply) {
        match self.store.remove_role(self.name(), self.role()).await {
            Ok(_) => tracing::debug!("{} for {} unregistered", self.role(), self.name()),
            Err(e) => tracing::warn!("failed to unregister {} for {}: {}", self.role(), self.name(), e),
        }
        reply.send(self.stop_ack(dependents)).await;
        self.cancel.cancel();
    }

    /// The listener can no longer accept: terminate ourselves unless already stopping.
    pub fn listener_failed(&self, error: &std::io::Error) {
        tracing::error!(
            role = %self.role(),
            service = self.name(),
            "control listener failed: {}",
            error
        );
        if self.state().is_stopping() {
            return;
        }
        if let Err(e) = self.process.send_signal(self.pid(), Signal::Terminate) {
            tracing::error!("self-termination failed: {}", e);
            self.cancel.cancel();
        }
    }
}

// =============================================================================
// Role behaviour
// =============================================================================

/// What distinguishes a Controller from a Broker.
#[async_trait]
pub trait RoleBehavior: Send + Sync + 'static {
    fn core(&self) -> &Supervisor;

    /// Runs after the control listener is bound and before the role is registered.
    async fn prepare(&self) -> Result<()> {
        Ok(())
    }

    /// Launch the processes this role owns; failures are logged per dependent.
    async fn launch_dependents(&self) {}

    /// Role-specific fields of the status document.
    async fn status_fields(&self) -> Map<String, Value>;

    /// Stop everything this role owns. Returns the dependents' acknowledgements.
    async fn stop_dependents(&self) -> Vec<Value>;
}

/// Dispatch one decoded command to `role`.
pub async fn dispatch<B: RoleBehavior + ?Sized>(role: &B, command: Command, reply: Reply) {
    let core = role.core();
    match command {
        Command::Help => reply.send(core.help()).await,
        Command::Ping => reply.send(core.ping()).await,
        Command::Status => {
            let extra = role.status_fields().await;
            reply.send(core.status_document(extra)).await;
        }
        Command::Relay(ack) => reply.send(core.accept_relay(ack)).await,
        Command::Stop(forward_port) => {
            if !core.begin_stopping(forward_port) {
                tracing::debug!("stop already in progress");
                reply.send(core.stop_ack(Vec::new())).await;
                return;
            }
            let dependents = role.stop_dependents().await;
            core.finish(dependents, reply).await;
        }
    }
}
