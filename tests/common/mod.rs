//! Shared test harness: roles run as tasks of the test runtime.
#![allow(dead_code)]

use async_trait::async_trait;
use iz_supervisor::metrics::NoMetrics;
use iz_supervisor::process::{Advertisement, ProcessControl, Signal, SpawnRequest, SpawnedRole};
use iz_supervisor::store::{RoleRecord, RunStateStore};
use iz_supervisor::supervisor::{run_role, RoleDeps, RoleLaunch};
use iz_supervisor::types::{
    Config, Error, LaunchConfig, MemoryServiceResolver, Paths, Port, Result, Role, ServiceConfig,
    ServiceResolver,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::{mpsc, Notify};

/// Everything the in-process roles of one test share.
#[derive(Debug)]
pub struct World {
    pub home: TempDir,
    pub paths: Paths,
    pub config: Config,
    pub resolver: Arc<dyn ServiceResolver>,
    next_pid: AtomicU32,
    signals: Mutex<HashMap<u32, Arc<Notify>>>,
}

impl World {
    pub fn new(services: impl IntoIterator<Item = ServiceConfig>) -> Arc<Self> {
        Self::with_per_role_timeout(services, Duration::from_secs(2))
    }

    /// A world whose launch window is `per_role_timeout` per expected advertisement.
    pub fn with_per_role_timeout(
        services: impl IntoIterator<Item = ServiceConfig>,
        per_role_timeout: Duration,
    ) -> Arc<Self> {
        let home = tempfile::tempdir().unwrap();
        let paths = Paths::new(home.path());
        let mut config = Config::default();
        config.launch = LaunchConfig {
            per_role_timeout,
            poll_interval: Duration::from_millis(10),
        };
        Arc::new(Self {
            home,
            paths,
            config,
            resolver: Arc::new(MemoryServiceResolver::new(services)),
            next_pid: AtomicU32::new(1000),
            signals: Mutex::new(HashMap::new()),
        })
    }

    pub fn store(&self) -> RunStateStore {
        RunStateStore::new(&self.paths.run_dir)
    }

    /// Process control of the launching command (no parent channel).
    pub fn launcher(self: &Arc<Self>) -> Arc<InProcessControl> {
        Arc::new(InProcessControl::new(self.clone(), None))
    }

    /// Deliver a termination signal to an in-process role.
    pub fn terminate(&self, pid: u32) {
        if let Some(notify) = self.signals.lock().unwrap().get(&pid) {
            notify.notify_one();
        }
    }

    /// Dependencies for running a role directly with `process`.
    pub fn deps(&self, process: Arc<dyn ProcessControl>) -> RoleDeps {
        RoleDeps {
            paths: self.paths.clone(),
            config: self.config.clone(),
            resolver: self.resolver.clone(),
            process,
            metrics: Arc::new(NoMetrics),
        }
    }
}

/// A role "process": a pid, a signal slot and an optional parent channel.
#[derive(Debug)]
pub struct InProcessControl {
    world: Arc<World>,
    pid: u32,
    signal: Arc<Notify>,
    parent: Option<mpsc::UnboundedSender<Advertisement>>,
}

impl InProcessControl {
    fn new(world: Arc<World>, parent: Option<mpsc::UnboundedSender<Advertisement>>) -> Self {
        let pid = world.next_pid.fetch_add(1, Ordering::Relaxed);
        let signal = Arc::new(Notify::new());
        world.signals.lock().unwrap().insert(pid, signal.clone());
        Self {
            world,
            pid,
            signal,
            parent,
        }
    }
}

#[async_trait]
impl ProcessControl for InProcessControl {
    async fn spawn(&self, request: SpawnRequest) -> Result<SpawnedRole> {
        let (tx, rx) = mpsc::unbounded_channel();
        let child = Arc::new(InProcessControl::new(self.world.clone(), Some(tx)));
        let pid = child.pid;
        let launch = RoleLaunch {
            role: request.role,
            name: request.name,
            depth: request.depth,
            manager: request.manager,
        };
        let deps = self.world.deps(child);
        tokio::spawn(async move {
            if let Err(e) = run_role(launch, deps).await {
                eprintln!("in-process role {} failed: {}", pid, e);
            }
        });
        Ok(SpawnedRole {
            pid,
            advertisements: rx,
        })
    }

    fn send_signal(&self, pid: u32, _signal: Signal) -> Result<()> {
        match self.world.signals.lock().unwrap().get(&pid) {
            Some(notify) => {
                notify.notify_one();
                Ok(())
            }
            None => Err(Error::internal(format!("no such process {}", pid))),
        }
    }

    async fn on_signal(&self) -> Result<()> {
        self.signal.notified().await;
        Ok(())
    }

    fn send_message(&self, advertisement: &Advertisement) -> Result<()> {
        let parent = self
            .parent
            .as_ref()
            .ok_or_else(|| Error::connectivity("no parent channel"))?;
        parent
            .send(*advertisement)
            .map_err(|_| Error::connectivity("parent channel closed"))
    }

    fn has_parent_channel(&self) -> bool {
        self.parent.is_some()
    }

    fn pid(&self) -> u32 {
        self.pid
    }
}

/// Poll the store until `role` of `name` is registered.
pub async fn wait_registered(store: &RunStateStore, name: &str, role: Role) -> RoleRecord {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let document = store.read(name).await.unwrap();
            if let Some(record) = RoleRecord::from_document(&document, role) {
                return record;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("role never registered")
}

/// Poll until the run-state file of `name` is gone.
pub async fn wait_unregistered(store: &RunStateStore, name: &str) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while store.path_for(name).exists() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("run-state file never removed")
}

/// Poll until nothing answers on `port`.
pub async fn wait_closed(port: Port) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while iz_supervisor::ipc::client::ping(port).await {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("listener never closed")
}
