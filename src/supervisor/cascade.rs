//! Shutdown cascade: stop dependents one at a time, relay their acknowledgements.
//!
//! ```text
//! iz.stop [fwd] ─► Controller (Stopping)
//!                    ├─ iz.stop <own> ─► managed Controller ─┐ reply ─► relay to fwd
//!                    ├─ iz.stop <own> ─► ...                 │
//!                    └─ iz.stop <own> ─► Broker ─────────────┘ reply ─► relay to fwd
//!                  unregister ─► reply caller ─► close listener
//! ```
//! Every step is best-effort: an unreachable dependent is treated as already
//! gone and never blocks its siblings or the stopping role.

use serde_json::Value;

use super::common::Supervisor;
use crate::ipc::client;
use crate::ipc::Command;
use crate::types::{Port, Role};

/// A process this role stops during its cascade.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StopTarget<'a> {
    pub role: Role,
    pub name: &'a str,
    pub port: Port,
}

/// Stop one dependent and relay its acknowledgement upward.
///
/// Returns the dependent's reply, or `None` when it could not be reached.
pub async fn stop_dependent(core: &Supervisor, target: StopTarget<'_>) -> Option<Value> {
    let command = Command::Stop(Some(core.port()));
    match client::request(target.port, &command).await {
        Ok(ack) => {
            tracing::info!(
                role = %target.role,
                service = target.name,
                port = target.port,
                "dependent stopped"
            );
            core.relay_upward(ack.clone());
            Some(ack)
        }
        Err(e) if e.is_connectivity() => {
            tracing::info!(
                role = %target.role,
                service = target.name,
                port = target.port,
                "dependent unreachable, assuming it is gone: {}",
                e
            );
            None
        }
        Err(e) => {
            tracing::warn!(
                role = %target.role,
                service = target.name,
                "stopping dependent failed: {}",
                e
            );
            None
        }
    }
}

/// Stop `targets` in order, collecting the acknowledgements that came back.
pub async fn stop_all(core: &Supervisor, targets: &[StopTarget<'_>]) -> Vec<Value> {
    let mut acks = Vec::with_capacity(targets.len());
    for target in targets {
        if let Some(ack) = stop_dependent(core, *target).await {
            acks.push(ack);
        }
    }
    acks
}
