//! Line-oriented TCP control protocol shared by every role.
//!
//! One request line in, one JSON document out, then the server closes the
//! connection. Commands decode into the closed [`Command`] variant and are
//! dispatched to a role's [`CommandHandler`].

pub mod client;
pub mod codec;
pub mod dispatch;
pub mod server;

pub use codec::Command;
pub use dispatch::{CommandHandler, Reply};
pub use server::ControlServer;
