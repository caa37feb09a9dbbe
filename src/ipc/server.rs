//! TCP control server: accept loop and per-connection handler.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::ipc::codec::{read_line, rejection, write_document, Command};
use crate::ipc::dispatch::{CommandHandler, Reply};
use crate::types::{Error, IpcConfig, Port};

/// Control server bound to one local port.
///
/// Binding and serving are separate so a role can record the bound port
/// (and move to Running) before it starts answering.
#[derive(Debug)]
pub struct ControlServer {
    listener: TcpListener,
    port: Port,
    cancel: CancellationToken,
    config: IpcConfig,
    connections: TaskTracker,
}

impl ControlServer {
    /// Bind `127.0.0.1:port`. Port zero binds an ephemeral port.
    pub async fn bind(
        port: Port,
        config: IpcConfig,
        cancel: CancellationToken,
    ) -> std::io::Result<Self> {
        let listener = TcpListener::bind(SocketAddr::from((Ipv4Addr::LOCALHOST, port))).await?;
        let port = listener.local_addr()?.port();
        Ok(Self {
            listener,
            port,
            cancel,
            config,
            connections: TaskTracker::new(),
        })
    }

    pub fn port(&self) -> Port {
        self.port
    }

    /// Request graceful shutdown.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Serve until cancelled, then close the listener and drain in-flight replies.
    pub async fn serve<H: CommandHandler>(self, handler: Arc<H>) {
        let ControlServer {
            listener,
            port,
            cancel,
            config,
            connections,
        } = self;
        let conn_semaphore = Arc::new(Semaphore::new(config.max_connections));
        tracing::info!(
            "Control server listening on 127.0.0.1:{} (max_connections={})",
            port,
            config.max_connections,
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Control server on port {} shutting down", port);
                    break;
                }
                accept = listener.accept() => {
                    let (stream, peer) = match accept {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            handler.on_listener_error(e).await;
                            cancel.cancelled().await;
                            break;
                        }
                    };

                    let permit = match conn_semaphore.clone().try_acquire_owned() {
                        Ok(permit) => permit,
                        Err(_) => {
                            tracing::warn!(
                                "Connection from {} rejected: at max_connections ({})",
                                peer,
                                config.max_connections,
                            );
                            drop(stream);
                            continue;
                        }
                    };

                    tracing::debug!("Control connection from {}", peer);
                    let handler = handler.clone();
                    let config = config.clone();
                    connections.spawn(async move {
                        if let Err(e) = handle_connection(stream, handler, config, permit).await {
                            tracing::debug!("Connection from {} error: {}", peer, e);
                        }
                    });
                }
            }
        }

        drop(listener);
        connections.close();
        connections.wait().await;
        tracing::debug!("Control server on port {} drained", port);
    }
}

/// Handle a single TCP connection: read one command, dispatch, write one reply, close.
async fn handle_connection<H: CommandHandler>(
    stream: TcpStream,
    handler: Arc<H>,
    config: IpcConfig,
    _permit: OwnedSemaphorePermit, // held for connection lifetime
) -> std::io::Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let read_timeout = Duration::from_secs(config.read_timeout_secs);
    let write_timeout = Duration::from_secs(config.write_timeout_secs);

    let line = loop {
        let read = tokio::time::timeout(read_timeout, read_line(&mut reader, config.max_line_bytes));
        match read.await {
            Err(_elapsed) => {
                tracing::debug!("Read timeout ({}s), dropping connection", config.read_timeout_secs);
                return Ok(());
            }
            Ok(Ok(None)) => return Ok(()),
            Ok(Ok(Some(line))) if line.is_empty() => continue,
            Ok(Ok(Some(line))) => break line,
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::InvalidData => {
                let reply = rejection(&Error::protocol(e.to_string()));
                timed_write(&mut writer, &reply, write_timeout).await?;
                return writer.shutdown().await;
            }
            Ok(Err(e)) => return Err(e),
        }
    };

    let command = match Command::decode(&line) {
        Ok(command) => command,
        Err(e) => {
            tracing::debug!("Rejected control line {:?}: {}", line, e);
            timed_write(&mut writer, &rejection(&e), write_timeout).await?;
            return writer.shutdown().await;
        }
    };

    tracing::debug!(command = command.token(), "dispatching control command");
    let (reply, reply_rx) = Reply::channel();
    let handled = handler.handle(command, reply);
    let respond = async {
        match reply_rx.await {
            Ok((value, written)) => {
                let result = timed_write(&mut writer, &value, write_timeout).await;
                let _ = written.send(());
                result
            }
            Err(_) => {
                let value = rejection(&Error::internal("handler produced no reply"));
                timed_write(&mut writer, &value, write_timeout).await
            }
        }
    };
    let ((), written) = tokio::join!(handled, respond);
    written?;
    writer.shutdown().await
}

/// Write a reply with a timeout (prevents slow consumers from holding connections).
async fn timed_write<W: tokio::io::AsyncWrite + Unpin>(
    writer: &mut W,
    value: &serde_json::Value,
    timeout: Duration,
) -> std::io::Result<()> {
    tokio::time::timeout(timeout, write_document(writer, value))
        .await
        .map_err(|_| {
            tracing::warn!("Write timeout ({}s), dropping connection", timeout.as_secs());
            std::io::Error::new(std::io::ErrorKind::TimedOut, "write timeout")
        })?
}
