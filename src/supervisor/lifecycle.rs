//! Per-role lifecycle state machine.
//!
//! ```text
//! Starting ──(listener bound)──► Running ──(iz.stop | signal)──► Stopping ──► process exit
//! ```
//! There is no reverse transition and no observed terminal state: a stopped
//! role simply ceases to exist.

use serde::{Deserialize, Serialize};

use crate::types::{Error, Port, Result, Role};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Hash)]
pub enum RoleStatus {
    Starting,
    Running,
    Stopping,
}

impl RoleStatus {
    /// Check if transition is valid.
    pub fn can_transition_to(self, to: RoleStatus) -> bool {
        matches!(
            (self, to),
            (RoleStatus::Starting, RoleStatus::Running)
                | (RoleStatus::Starting, RoleStatus::Stopping)
                | (RoleStatus::Running, RoleStatus::Stopping)
        )
    }
}

/// In-process state of the role this process represents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleState {
    pub role: Role,
    pub status: RoleStatus,
    pub tcp_port: Option<Port>,
    pub pid: u32,
    pub name: String,
    /// Destination for relaying dependents' acknowledgements while stopping.
    #[serde(skip)]
    pub forward_port: Option<Port>,
}

impl RoleState {
    pub fn new(role: Role, name: impl Into<String>, pid: u32) -> Self {
        Self {
            role,
            status: RoleStatus::Starting,
            tcp_port: None,
            pid,
            name: name.into(),
            forward_port: None,
        }
    }

    /// Listener bound on `port`: Starting → Running.
    pub fn mark_running(&mut self, port: Port) -> Result<()> {
        if !self.status.can_transition_to(RoleStatus::Running) {
            return Err(Error::internal(format!(
                "cannot mark {} {} running: state is {:?}",
                self.role, self.name, self.status
            )));
        }
        self.status = RoleStatus::Running;
        self.tcp_port = Some(port);
        Ok(())
    }

    /// Enter Stopping. Returns `false` if the role was already stopping,
    /// in which case the existing forward port is kept.
    pub fn begin_stopping(&mut self, forward_port: Option<Port>) -> bool {
        if self.status == RoleStatus::Stopping {
            return false;
        }
        self.status = RoleStatus::Stopping;
        self.forward_port = forward_port;
        true
    }

    pub fn is_stopping(&self) -> bool {
        self.status == RoleStatus::Stopping
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_transitions() {
        let mut state = RoleState::new(Role::Controller, "alpha", 42);
        assert_eq!(state.status, RoleStatus::Starting);
        assert_eq!(state.tcp_port, None);

        state.mark_running(24001).unwrap();
        assert_eq!(state.status, RoleStatus::Running);
        assert_eq!(state.tcp_port, Some(24001));

        assert!(state.begin_stopping(Some(25000)));
        assert!(state.is_stopping());
        assert_eq!(state.forward_port, Some(25000));
    }

    #[test]
    fn test_no_reverse_transition() {
        let mut state = RoleState::new(Role::Broker, "alpha", 42);
        state.mark_running(24002).unwrap();
        assert!(state.mark_running(24003).is_err());

        state.begin_stopping(None);
        assert!(state.mark_running(24002).is_err());
        assert!(!RoleStatus::Stopping.can_transition_to(RoleStatus::Running));
        assert!(!RoleStatus::Running.can_transition_to(RoleStatus::Starting));
    }

    #[test]
    fn test_second_stop_keeps_first_forward_port() {
        let mut state = RoleState::new(Role::Controller, "alpha", 42);
        state.mark_running(24001).unwrap();
        assert!(state.begin_stopping(Some(1)));
        assert!(!state.begin_stopping(Some(2)));
        assert_eq!(state.forward_port, Some(1));
    }

    #[test]
    fn test_stop_before_running() {
        let mut state = RoleState::new(Role::Controller, "alpha", 42);
        assert!(state.begin_stopping(None));
        assert!(state.mark_running(24001).is_err());
    }
}
