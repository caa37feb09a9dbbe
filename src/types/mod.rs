//! Core types for the supervisor.
//!
//! This module provides foundational types used throughout the system:
//! - **Errors**: Application error types with thiserror derives
//! - **Config**: Settings and the home directory layout
//! - **Roles**: Role identity and ports
//! - **Services**: Per-service configuration and resolvers

mod config;
mod errors;
mod role;
mod service;

pub use config::{Config, IpcConfig, LaunchConfig, ObservabilityConfig, Paths, HOME_ENV};
pub use errors::{Error, Result};
pub use role::{Port, Role};
pub use service::{
    validate_name, BrokerConfig, FileServiceResolver, MemoryServiceResolver, ServiceConfig,
    ServiceResolver,
};
