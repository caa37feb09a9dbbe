//! Launch coordinator.
//!
//! `start(name)` forks the service's Controller and waits for the tree to
//! advertise itself:
//! ```text
//! pre-check liveness ─► compute target ─► spawn Controller
//!        │                                      │ advertisements (all depths)
//!        ▼                                      ▼
//!   already running               CountdownBarrier(target)  vs  timeout
//!                                               │
//!                                  re-probe liveness ─► report
//! ```
//! The advertisement count only decides when to stop waiting; success is
//! decided by the liveness observed afterwards.

pub mod barrier;
pub mod liveness;
pub mod target;

pub use barrier::CountdownBarrier;
pub use liveness::{probe, Liveness};
pub use target::{startup_target, MAX_DEPTH};

use serde::Serialize;
use std::sync::{Arc, Mutex};

use crate::process::{Advertisement, ProcessControl, SpawnRequest};
use crate::store::RunStateStore;
use crate::types::{Error, LaunchConfig, Result, ServiceConfig, ServiceResolver};

/// Outcome of a launch.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LaunchReport {
    pub reasons: Vec<String>,
    pub startable: bool,
    pub target: usize,
    #[serde(skip)]
    pub advertisements: Vec<Advertisement>,
}

impl LaunchReport {
    fn refused(reason: String) -> Self {
        Self {
            reasons: vec![reason],
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone)]
pub struct LaunchCoordinator {
    resolver: Arc<dyn ServiceResolver>,
    store: RunStateStore,
    process: Arc<dyn ProcessControl>,
    config: LaunchConfig,
}

impl LaunchCoordinator {
    pub fn new(
        resolver: Arc<dyn ServiceResolver>,
        store: RunStateStore,
        process: Arc<dyn ProcessControl>,
        config: LaunchConfig,
    ) -> Self {
        Self {
            resolver,
            store,
            process,
            config,
        }
    }

    /// Launch `name` and report whether its whole tree came up.
    ///
    /// Configuration errors propagate; every other failure is a reason in the report.
    pub async fn start(&self, name: &str) -> Result<LaunchReport> {
        let config = self.resolver.resolve(name)?;
        config.validate()?;

        let before = probe(&self.store, &config).await?;
        if before.any_reachable() {
            return Ok(LaunchReport::refused(format!("{} is already running", name)));
        }

        let target = startup_target(&config, self.resolver.as_ref(), 0)?;
        let barrier = CountdownBarrier::new(target);
        let seen = Arc::new(Mutex::new(Vec::new()));

        let mut spawned = match self
            .process
            .spawn(SpawnRequest::controller(name, 0, None))
            .await
        {
            Ok(spawned) => spawned,
            Err(e) => {
                return Ok(LaunchReport {
                    reasons: vec![format!("failed to launch Controller for {}: {}", name, e)],
                    target,
                    ..LaunchReport::default()
                })
            }
        };
        tracing::info!(service = name, pid = spawned.pid, target, "waiting for advertisements");

        let counter = {
            let barrier = barrier.clone();
            let seen = seen.clone();
            tokio::spawn(async move {
                while let Some(advertisement) = spawned.advertisements.recv().await {
                    seen.lock()
                        .unwrap_or_else(|poisoned| poisoned.into_inner())
                        .push(advertisement);
                    let left = barrier.arrive();
                    tracing::info!(
                        role = %advertisement.role,
                        pid = advertisement.pid,
                        port = advertisement.port,
                        "{} started ({}/{})",
                        advertisement.role,
                        target - left.min(target),
                        target
                    );
                }
            })
        };

        let raced = self.race(&barrier, target).await;
        counter.abort();

        let mut reasons = self.observe(&config).await?;
        if let Err(elapsed) = raced {
            tracing::warn!(service = name, "{}", elapsed);
            // Roles that advertised late but answer now still count as started.
            if !reasons.is_empty() {
                reasons.push(elapsed.to_string());
            }
        }
        let advertisements = std::mem::take(
            &mut *seen.lock().unwrap_or_else(|poisoned| poisoned.into_inner()),
        );
        Ok(LaunchReport {
            startable: reasons.is_empty(),
            reasons,
            target,
            advertisements,
        })
    }

    /// Wait for the barrier or the launch window, whichever comes first.
    /// An elapsed window is a `Timeout` error.
    async fn race(&self, barrier: &CountdownBarrier, target: usize) -> Result<()> {
        let window = self.config.window(target);
        let deadline = tokio::time::sleep(window);
        tokio::pin!(deadline);
        let mut poll = tokio::time::interval(self.config.poll_interval);

        loop {
            tokio::select! {
                _ = barrier.wait() => {
                    tracing::debug!("all {} advertisements received", target);
                    return Ok(());
                }
                _ = &mut deadline => {
                    return Err(Error::timeout(format!(
                        "launch window of {:?} elapsed with {} of {} advertisements outstanding",
                        window,
                        barrier.remaining(),
                        target
                    )));
                }
                _ = poll.tick() => {
                    tracing::trace!("{} advertisements outstanding", barrier.remaining());
                }
            }
        }
    }

    /// Liveness of the service and, one level down, of its managed services.
    async fn observe(&self, config: &ServiceConfig) -> Result<Vec<String>> {
        let mut reasons = probe(&self.store, config).await?.reasons;
        for managed in &config.managed_names {
            let managed = self.resolver.resolve(managed)?;
            reasons.extend(probe(&self.store, &managed).await?.reasons);
        }
        Ok(reasons)
    }
}
