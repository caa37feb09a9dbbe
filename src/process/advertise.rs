//! Startup advertisement sent up the fork channel once a role is listening.
//!
//! Wire shape, one JSON document per line:
//! ```text
//! {"Controller": {"event": "startup", "status": "OK", "pid": 4242, "port": 24001}}
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::types::{Error, Port, Result, Role};

const STARTUP_EVENT: &str = "startup";
const STATUS_OK: &str = "OK";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Advertisement {
    pub role: Role,
    pub pid: u32,
    pub port: Port,
}

#[derive(Debug, Serialize, Deserialize)]
struct Body {
    event: String,
    status: String,
    pid: u32,
    port: Port,
}

impl Advertisement {
    pub fn new(role: Role, pid: u32, port: Port) -> Self {
        Self { role, pid, port }
    }

    /// Encode as a single line (without the terminator).
    pub fn encode(&self) -> Result<String> {
        let mut message = BTreeMap::new();
        message.insert(
            self.role.as_str(),
            Body {
                event: STARTUP_EVENT.to_string(),
                status: STATUS_OK.to_string(),
                pid: self.pid,
                port: self.port,
            },
        );
        Ok(serde_json::to_string(&message)?)
    }

    /// Decode one channel line. Anything but a single OK startup entry is rejected.
    pub fn decode(line: &str) -> Result<Self> {
        let message: BTreeMap<String, Body> = serde_json::from_str(line)?;
        let mut entries = message.into_iter();
        let (role, body) = match (entries.next(), entries.next()) {
            (Some(entry), None) => entry,
            _ => return Err(Error::protocol("advertisement must name exactly one role")),
        };
        let role: Role = role.parse()?;
        if body.event != STARTUP_EVENT || body.status != STATUS_OK {
            return Err(Error::protocol(format!(
                "unexpected advertisement event {}/{}",
                body.event, body.status
            )));
        }
        Ok(Self::new(role, body.pid, body.port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_role_keyed_document() {
        let line = Advertisement::new(Role::Broker, 99, 24002).encode().unwrap();
        let value: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["Broker"]["event"], "startup");
        assert_eq!(value["Broker"]["status"], "OK");
        assert_eq!(value["Broker"]["port"], 24002);
        assert_eq!(Advertisement::decode(&line).unwrap().pid, 99);
    }

    #[test]
    fn rejects_other_events_and_noise() {
        assert!(Advertisement::decode(
            r#"{"Controller":{"event":"shutdown","status":"OK","pid":1,"port":2}}"#
        )
        .is_err());
        assert!(Advertisement::decode("listening on 24001").is_err());
        assert!(Advertisement::decode("{}").is_err());
    }
}
