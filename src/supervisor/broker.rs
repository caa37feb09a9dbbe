//! Broker role: runs the service's message bus next to its own control server.

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tokio::sync::Mutex;

use super::common::{dispatch, RoleBehavior, Supervisor};
use crate::commbus::MessageBus;
use crate::ipc::{Command, CommandHandler, Reply};
use crate::types::Result;

#[derive(Debug)]
pub struct Broker {
    core: Supervisor,
    bus: Mutex<Box<dyn MessageBus>>,
}

impl Broker {
    pub fn new(core: Supervisor, bus: Box<dyn MessageBus>) -> Self {
        Self {
            core,
            bus: Mutex::new(bus),
        }
    }
}

#[async_trait]
impl RoleBehavior for Broker {
    fn core(&self) -> &Supervisor {
        &self.core
    }

    async fn prepare(&self) -> Result<()> {
        let port = self.core.service().broker.messaging_port;
        self.bus.lock().await.listen(port).await?;
        Ok(())
    }

    async fn status_fields(&self) -> Map<String, Value> {
        let stats = self.bus.lock().await.stats();
        let mut fields = Map::new();
        fields.insert("messaging".into(), json!(stats));
        fields
    }

    /// No processes to cascade to: just stop the bus.
    async fn stop_dependents(&self) -> Vec<Value> {
        if let Err(e) = self.bus.lock().await.close().await {
            tracing::warn!(service = self.core.name(), "closing message bus failed: {}", e);
        }
        Vec::new()
    }
}

#[async_trait]
impl CommandHandler for Broker {
    async fn handle(&self, command: Command, reply: Reply) {
        dispatch(self, command, reply).await;
    }

    async fn on_listener_error(&self, error: std::io::Error) {
        self.core.listener_failed(&error);
    }
}
