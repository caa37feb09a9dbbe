//! # iz - supervisor for a small hierarchy of service daemons
//!
//! Starts, monitors and tears down one tree per named service:
//! - a Controller role per service, owning an optional Broker
//! - a Broker role running the service's message bus
//! - managed Controllers, forked by a top-level Controller (one level deep)
//!
//! ## Architecture
//!
//! Every role is its own OS process with its own control port:
//! ```text
//!   iz start alpha
//!        │ spawn                advertisements (stdout, one JSON line each)
//!        ▼                    ◄──────────────────────────────────────────┐
//!   Controller(alpha) ──spawn──► Broker(alpha)                          │
//!        │                                                               │
//!        └──────spawn──────► Controller(beta) ──spawn──► Broker(beta) ───┘
//!
//!   run/alpha.json   { "Controller": {...}, "Broker": {...} }   who is alive
//!   127.0.0.1:<port> iz.help | iz.ping | iz.status | iz.stop [fwd] | iz.relay
//! ```
//! [`launch::LaunchCoordinator`] counts advertisements against a precomputed
//! startup target; [`supervisor`] runs a role until `iz.stop` or a
//! termination signal unwinds it through the shutdown cascade.

// Enforce strict safety at compile time
#![deny(unsafe_code)]
#![warn(missing_debug_implementations)]
#![warn(rust_2018_idioms)]

// Re-export public API
pub mod commbus;
pub mod ipc;
pub mod launch;
pub mod metrics;
pub mod process;
pub mod store;
pub mod supervisor;
pub mod types;

// Internal utilities
pub mod observability;

pub use types::{Config, Error, Result};
