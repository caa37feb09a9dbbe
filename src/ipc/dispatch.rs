//! Dispatch contract between the control server and a role.

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::oneshot;

use crate::ipc::codec::Command;

/// Reply continuation handed to a handler with each command.
///
/// Consumed by [`Reply::send`], so a handler answers at most once; a reply
/// dropped unsent is answered by the server with an internal-error document.
/// `send` returns once the server has written the document to the caller.
#[derive(Debug)]
pub struct Reply {
    tx: Option<oneshot::Sender<(Value, oneshot::Sender<()>)>>,
}

/// Server side of a [`Reply`].
pub(crate) type ReplyReceiver = oneshot::Receiver<(Value, oneshot::Sender<()>)>;

impl Reply {
    pub(crate) fn channel() -> (Self, ReplyReceiver) {
        let (tx, rx) = oneshot::channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// A reply with no caller behind it, used for signal-initiated commands.
    pub fn detached() -> Self {
        Self { tx: None }
    }

    pub async fn send(self, value: Value) {
        let Some(tx) = self.tx else {
            return;
        };
        let (written_tx, written_rx) = oneshot::channel();
        if tx.send((value, written_tx)).is_ok() {
            let _ = written_rx.await;
        }
    }
}

/// A role's command table.
#[async_trait]
pub trait CommandHandler: Send + Sync + 'static {
    /// Handle one decoded command; must call `reply.send` exactly once.
    async fn handle(&self, command: Command, reply: Reply);

    /// The listener failed and can no longer accept connections.
    async fn on_listener_error(&self, error: std::io::Error);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn send_waits_for_write_confirmation() {
        let (reply, rx) = Reply::channel();
        let server = tokio::spawn(async move {
            let (value, written) = rx.await.unwrap();
            written.send(()).unwrap();
            value
        });
        reply.send(json!({"ok": true})).await;
        assert_eq!(server.await.unwrap(), json!({"ok": true}));
    }

    #[tokio::test]
    async fn detached_reply_returns_immediately() {
        Reply::detached().send(json!(null)).await;
    }

    #[tokio::test]
    async fn dropped_reply_closes_channel() {
        let (reply, rx) = Reply::channel();
        drop(reply);
        assert!(rx.await.is_err());
    }
}
