//! Role identity shared by every process in the tree.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::Error;

/// Local TCP port a role listens on.
pub type Port = u16;

/// The two kinds of supervised process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Role {
    Controller,
    Broker,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Controller => "Controller",
            Role::Broker => "Broker",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Controller" => Ok(Role::Controller),
            "Broker" => Ok(Role::Broker),
            other => Err(Error::configuration(format!("unknown role: {}", other))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_round_trips_through_str() {
        for role in [Role::Controller, Role::Broker] {
            assert_eq!(role.as_str().parse::<Role>().unwrap(), role);
        }
        assert!("broker".parse::<Role>().is_err());
    }
}
