//! Process-control capability.
//!
//! Spawning dependents, signalling, and the one-directional advertisement
//! channel to the parent all go through [`ProcessControl`], so tests can
//! substitute their own implementation.

mod advertise;
mod native;

pub use advertise::Advertisement;
pub use native::NativeProcessControl;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::types::{Result, Role};

/// Environment variable carrying the role marker of a launched process.
pub const ROLE_ENV: &str = "IZ_ROLE";
/// Environment variable carrying the service name of a launched process.
pub const SERVICE_ENV: &str = "IZ_SERVICE";
/// Environment variable carrying the hierarchy depth (0 or 1).
pub const DEPTH_ENV: &str = "IZ_DEPTH";
/// Environment variable carrying the managing Controller's service name.
pub const MANAGER_ENV: &str = "IZ_MANAGER";

/// What to launch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnRequest {
    pub role: Role,
    pub name: String,
    pub depth: u8,
    pub manager: Option<String>,
}

impl SpawnRequest {
    pub fn controller(name: impl Into<String>, depth: u8, manager: Option<String>) -> Self {
        Self {
            role: Role::Controller,
            name: name.into(),
            depth,
            manager,
        }
    }

    pub fn broker(name: impl Into<String>, depth: u8, manager: Option<String>) -> Self {
        Self {
            role: Role::Broker,
            name: name.into(),
            depth,
            manager,
        }
    }
}

/// A launched process and its advertisement channel (the on-message side).
///
/// The receiver yields the child's own advertisement and every advertisement
/// the child relays from its dependents; it closes when the child's channel does.
#[derive(Debug)]
pub struct SpawnedRole {
    pub pid: u32,
    pub advertisements: mpsc::UnboundedReceiver<Advertisement>,
}

/// Signals a role can send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Terminate,
}

#[async_trait]
pub trait ProcessControl: Send + Sync + std::fmt::Debug {
    /// Launch a role process.
    async fn spawn(&self, request: SpawnRequest) -> Result<SpawnedRole>;

    /// Deliver `signal` to `pid`.
    fn send_signal(&self, pid: u32, signal: Signal) -> Result<()>;

    /// Resolve when this process receives a termination signal.
    async fn on_signal(&self) -> Result<()>;

    /// Write an advertisement to this process's parent channel.
    fn send_message(&self, advertisement: &Advertisement) -> Result<()>;

    /// Whether this process was launched with a parent channel.
    fn has_parent_channel(&self) -> bool;

    fn pid(&self) -> u32 {
        std::process::id()
    }
}
