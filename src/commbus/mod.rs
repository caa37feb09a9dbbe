//! Message-bus engine run by a Broker.
//!
//! The supervisor only drives the engine's lifecycle through [`MessageBus`]
//! (`listen` when the Broker starts, `close` when it stops). The shipped
//! engine, [`LineBus`], is a TCP fan-out bus:
//!   - every connected client is a subscriber
//!   - every newline-terminated message a client writes is published to all
//!     connected clients, the sender included
//!   - slow subscribers that fall behind the channel capacity lose messages

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::ipc::codec::read_line;
use crate::types::{Error, Port, Result};

const CHANNEL_CAPACITY: usize = 1024;
const MAX_MESSAGE_BYTES: usize = 1024 * 1024;

/// Lifecycle of an external message-bus engine.
#[async_trait]
pub trait MessageBus: Send + Sync + std::fmt::Debug {
    /// Start accepting clients on `port` (zero binds an ephemeral port).
    /// Returns the bound port.
    async fn listen(&mut self, port: Port) -> Result<Port>;

    /// Stop accepting clients and disconnect the connected ones.
    async fn close(&mut self) -> Result<()>;

    fn stats(&self) -> BusStats;
}

/// Statistics about bus usage.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusStats {
    pub port: Option<Port>,
    pub published: u64,
    pub connections: usize,
}

#[derive(Debug, Default)]
struct Counters {
    published: AtomicU64,
    connections: AtomicUsize,
}

/// TCP fan-out bus.
#[derive(Debug)]
pub struct LineBus {
    port: Option<Port>,
    cancel: CancellationToken,
    counters: Arc<Counters>,
    accept_task: Option<JoinHandle<()>>,
}

impl LineBus {
    pub fn new() -> Self {
        Self {
            port: None,
            cancel: CancellationToken::new(),
            counters: Arc::new(Counters::default()),
            accept_task: None,
        }
    }
}

impl Default for LineBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageBus for LineBus {
    async fn listen(&mut self, port: Port) -> Result<Port> {
        if let Some(bound) = self.port {
            return Err(Error::internal(format!("bus already listening on {}", bound)));
        }
        let listener = TcpListener::bind(SocketAddr::from((Ipv4Addr::LOCALHOST, port))).await?;
        let bound = listener.local_addr()?.port();
        let (tx, _) = broadcast::channel::<Arc<str>>(CHANNEL_CAPACITY);

        let cancel = self.cancel.clone();
        let counters = self.counters.clone();
        self.accept_task = Some(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    accept = listener.accept() => match accept {
                        Ok((stream, peer)) => {
                            tracing::debug!("Bus client connected from {}", peer);
                            tokio::spawn(serve_client(
                                stream,
                                tx.clone(),
                                counters.clone(),
                                cancel.clone(),
                            ));
                        }
                        Err(e) => {
                            tracing::error!("Bus listener failed: {}", e);
                            break;
                        }
                    }
                }
            }
        }));

        self.port = Some(bound);
        tracing::info!("Message bus listening on 127.0.0.1:{}", bound);
        Ok(bound)
    }

    async fn close(&mut self) -> Result<()> {
        self.cancel.cancel();
        if let Some(task) = self.accept_task.take() {
            task.await
                .map_err(|e| Error::internal(format!("bus accept loop failed: {}", e)))?;
        }
        if let Some(port) = self.port {
            tracing::info!("Message bus on port {} closed", port);
        }
        Ok(())
    }

    fn stats(&self) -> BusStats {
        BusStats {
            port: self.port,
            published: self.counters.published.load(Ordering::Relaxed),
            connections: self.counters.connections.load(Ordering::Relaxed),
        }
    }
}

async fn serve_client(
    stream: TcpStream,
    tx: broadcast::Sender<Arc<str>>,
    counters: Arc<Counters>,
    cancel: CancellationToken,
) {
    counters.connections.fetch_add(1, Ordering::Relaxed);
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut rx = tx.subscribe();

    let publish = async {
        loop {
            match read_line(&mut reader, MAX_MESSAGE_BYTES).await {
                Ok(Some(message)) => {
                    counters.published.fetch_add(1, Ordering::Relaxed);
                    let _ = tx.send(Arc::from(message));
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::debug!("Bus client read failed: {}", e);
                    break;
                }
            }
        }
    };
    let deliver = async {
        loop {
            match rx.recv().await {
                Ok(message) => {
                    let mut line = message.as_bytes().to_vec();
                    line.push(b'\n');
                    if writer.write_all(&line).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!("Bus client lagging, {} messages dropped", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    };

    // Both loops keep their own state, so neither read nor write is cut mid-line.
    tokio::select! {
        _ = cancel.cancelled() => {}
        _ = publish => {}
        _ = deliver => {}
    }

    counters.connections.fetch_sub(1, Ordering::Relaxed);
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncBufReadExt;

    #[tokio::test]
    async fn fans_out_to_every_client() {
        let mut bus = LineBus::new();
        let port = bus.listen(0).await.unwrap();

        let a = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        let b = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        let (a_read, mut a_write) = a.into_split();
        let mut b_lines = BufReader::new(b).lines();
        let mut a_lines = BufReader::new(a_read).lines();

        // Let both clients subscribe before publishing.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        a_write.write_all(b"hello bus\n").await.unwrap();

        assert_eq!(b_lines.next_line().await.unwrap().as_deref(), Some("hello bus"));
        assert_eq!(a_lines.next_line().await.unwrap().as_deref(), Some("hello bus"));
        assert_eq!(bus.stats().published, 1);
        assert_eq!(bus.stats().port, Some(port));

        bus.close().await.unwrap();
    }

    #[tokio::test]
    async fn close_stops_accepting() {
        let mut bus = LineBus::new();
        let port = bus.listen(0).await.unwrap();
        bus.close().await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(TcpStream::connect(("127.0.0.1", port)).await.is_err());
    }

    #[tokio::test]
    async fn listen_twice_is_rejected() {
        let mut bus = LineBus::new();
        bus.listen(0).await.unwrap();
        assert!(bus.listen(0).await.is_err());
        bus.close().await.unwrap();
    }
}
