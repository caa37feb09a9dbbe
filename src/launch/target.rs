//! Startup target: how many advertisements a launch must observe.
//!
//! ```text
//! target = 1                          own Controller
//!        + 1 if own Broker enabled
//!        + Σ managed (one level only):
//!            1 + 1 if that service's Broker is enabled
//! ```

use crate::types::{Error, Result, ServiceConfig, ServiceResolver};

/// Deepest level a Controller may sit at. Managed Controllers live at level 1.
pub const MAX_DEPTH: u8 = 1;

/// Compute the startup target of `config` launched at `depth`.
///
/// At [`MAX_DEPTH`] a config's own managed list is ignored with a warning;
/// anything deeper is a configuration error.
pub fn startup_target(
    config: &ServiceConfig,
    resolver: &dyn ServiceResolver,
    depth: u8,
) -> Result<usize> {
    if depth > MAX_DEPTH {
        return Err(Error::configuration(format!(
            "service {} would be launched at depth {}; managed hierarchies are one level deep",
            config.name, depth
        )));
    }
    config.validate()?;

    let mut target = 1 + usize::from(config.broker.enabled);
    if config.managed_names.is_empty() {
        return Ok(target);
    }

    if depth == MAX_DEPTH {
        tracing::warn!(
            service = %config.name,
            managed = ?config.managed_names,
            "managed services of a managed Controller are ignored"
        );
        return Ok(target);
    }

    for name in &config.managed_names {
        let managed = resolver.resolve(name)?;
        target += startup_target(&managed, resolver, depth + 1)?;
    }
    Ok(target)
}
