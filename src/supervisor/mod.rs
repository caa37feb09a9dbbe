//! Role processes: the Controller and Broker supervisors.
//!
//! Every role runs the same sequence:
//! ```text
//! bind listener ─► prepare ─► Running ─► register ─► advertise ─► launch dependents
//!                                                                        │
//!                    serve iz.* until stopped (iz.stop or termination signal)
//!                                                                        │
//!                                      drain replies and relays ─► return
//! ```

pub mod broker;
pub mod cascade;
pub mod common;
pub mod controller;
pub mod lifecycle;

pub use broker::Broker;
pub use controller::Controller;
pub use common::{RoleBehavior, Supervisor};
pub use lifecycle::{RoleState, RoleStatus};

use std::sync::Arc;

use crate::commbus::LineBus;
use crate::ipc::{Command, CommandHandler, ControlServer, Reply};
use crate::launch::MAX_DEPTH;
use crate::metrics::MetricsProvider;
use crate::process::{ProcessControl, DEPTH_ENV, MANAGER_ENV, ROLE_ENV, SERVICE_ENV};
use crate::types::{Config, Error, Paths, Result, Role, ServiceResolver};

/// Identity a role process was launched with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleLaunch {
    pub role: Role,
    pub name: String,
    pub depth: u8,
    pub manager: Option<String>,
}

impl RoleLaunch {
    /// Read the role markers from the environment. `None` when no role is set.
    pub fn from_env() -> Result<Option<Self>> {
        let Some(role) = env_var(ROLE_ENV) else {
            return Ok(None);
        };
        let role: Role = role.parse()?;
        let name = env_var(SERVICE_ENV).ok_or_else(|| {
            Error::configuration(format!("{} is set but {} is not", ROLE_ENV, SERVICE_ENV))
        })?;
        let depth = match env_var(DEPTH_ENV) {
            Some(depth) => depth
                .parse()
                .map_err(|_| Error::configuration(format!("invalid {}: {}", DEPTH_ENV, depth)))?,
            None => 0,
        };
        Ok(Some(Self {
            role,
            name,
            depth,
            manager: env_var(MANAGER_ENV),
        }))
    }
}

fn env_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

/// Everything a role process is constructed from.
#[derive(Debug, Clone)]
pub struct RoleDeps {
    pub paths: Paths,
    pub config: Config,
    pub resolver: Arc<dyn ServiceResolver>,
    pub process: Arc<dyn ProcessControl>,
    pub metrics: Arc<dyn MetricsProvider>,
}

/// Run the role described by `launch` until it is stopped.
pub async fn run_role(launch: RoleLaunch, deps: RoleDeps) -> Result<()> {
    if launch.depth > MAX_DEPTH {
        return Err(Error::configuration(format!(
            "{} for {} launched at depth {}; managed hierarchies are one level deep",
            launch.role, launch.name, launch.depth
        )));
    }
    let service = deps.resolver.resolve(&launch.name)?;
    service.validate()?;

    let role = launch.role;
    let core = Supervisor::new(launch, service, &deps);
    match role {
        Role::Controller => {
            serve_role(Arc::new(Controller::new(core, deps.resolver.clone()))).await
        }
        Role::Broker => serve_role(Arc::new(Broker::new(core, Box::new(LineBus::new())))).await,
    }
}

/// Bind, register and serve an already constructed role until it is stopped.
pub async fn serve_role<B>(role: Arc<B>) -> Result<()>
where
    B: RoleBehavior + CommandHandler,
{
    let core = role.core();
    let server = ControlServer::bind(
        core.configured_port(),
        core.ipc().clone(),
        core.cancel_token().clone(),
    )
    .await
    .map_err(|e| {
        Error::connectivity(format!(
            "{} for {} cannot listen on port {}: {}",
            core.role(),
            core.name(),
            core.configured_port(),
            e
        ))
    })?;

    role.prepare().await?;
    core.mark_running(server.port())?;
    core.register().await?;
    core.advertise();
    role.launch_dependents().await;

    watch_signals(role.clone());
    server.serve(role.clone()).await;

    core.background().close();
    core.background().wait().await;
    tracing::info!(role = %core.role(), service = core.name(), "role exited");
    Ok(())
}

/// A termination signal is handled as `iz.stop` without a forward port.
fn watch_signals<B>(role: Arc<B>)
where
    B: RoleBehavior + CommandHandler,
{
    let core = role.core();
    let process = core.process().clone();
    let cancel = core.cancel_token().clone();
    let background = core.background().clone();
    background.spawn(async move {
        tokio::select! {
            _ = cancel.cancelled() => {}
            signalled = process.on_signal() => match signalled {
                Ok(()) => {
                    tracing::info!("termination signal received");
                    role.handle(Command::Stop(None), Reply::detached()).await;
                }
                Err(e) => tracing::warn!("cannot watch termination signals: {}", e),
            },
        }
    });
}
