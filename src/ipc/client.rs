//! Control protocol client.
//!
//! Requests carry no caller-side timeout: a peer that accepts but never
//! answers blocks the caller until the peer's own read timeout drops it.

use serde_json::Value;
use std::net::{Ipv4Addr, SocketAddr};
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use crate::ipc::codec::{read_line, Command, ACK, PING};
use crate::types::{Error, Port, Result};

/// Replies larger than this are treated as malformed.
const MAX_REPLY_BYTES: usize = 4 * 1024 * 1024;

async fn connect(port: Port) -> Result<TcpStream> {
    TcpStream::connect(SocketAddr::from((Ipv4Addr::LOCALHOST, port)))
        .await
        .map_err(|e| Error::connectivity(format!("port {}: {}", port, e)))
}

/// Send `command` to the role on `port` and wait for its JSON reply.
pub async fn request(port: Port, command: &Command) -> Result<Value> {
    let stream = connect(port).await?;
    let (reader, mut writer) = stream.into_split();

    let line = format!("{}\n", command);
    writer
        .write_all(line.as_bytes())
        .await
        .map_err(|e| Error::connectivity(format!("port {}: {}", port, e)))?;

    let mut reader = BufReader::new(reader);
    let reply = read_line(&mut reader, MAX_REPLY_BYTES)
        .await
        .map_err(|e| Error::connectivity(format!("port {}: {}", port, e)))?
        .ok_or_else(|| Error::connectivity(format!("port {}: closed without reply", port)))?;

    serde_json::from_str(&reply)
        .map_err(|e| Error::connectivity(format!("port {}: malformed reply: {}", port, e)))
}

/// Fire-and-forget: deliver `command` without waiting for the reply.
pub async fn send(port: Port, command: &Command) -> Result<()> {
    let mut stream = connect(port).await?;
    let line = format!("{}\n", command);
    stream
        .write_all(line.as_bytes())
        .await
        .map_err(|e| Error::connectivity(format!("port {}: {}", port, e)))?;
    stream
        .shutdown()
        .await
        .map_err(|e| Error::connectivity(format!("port {}: {}", port, e)))
}

/// True when the role on `port` answers `iz.ping` with the fixed ack.
pub async fn ping(port: Port) -> bool {
    match request(port, &Command::Ping).await {
        Ok(reply) => reply.get(PING).and_then(Value::as_str) == Some(ACK),
        Err(e) => {
            tracing::debug!("ping to port {} failed: {}", port, e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    async fn unused_port() -> Port {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    }

    #[tokio::test]
    async fn refused_connection_is_connectivity_error() {
        let port = unused_port().await;
        let err = request(port, &Command::Ping).await.unwrap_err();
        assert!(err.is_connectivity());
        assert!(!ping(port).await);
    }

    #[tokio::test]
    async fn malformed_reply_is_connectivity_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 64];
            let _ = stream.read(&mut buf).await;
            stream.write_all(b"not json\n").await.unwrap();
        });

        let err = request(port, &Command::Status).await.unwrap_err();
        assert!(err.is_connectivity());
    }

    #[tokio::test]
    async fn send_delivers_line_without_reading() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut received = String::new();
            stream.read_to_string(&mut received).await.unwrap();
            received
        });

        send(port, &Command::Stop(Some(24001))).await.unwrap();
        assert_eq!(server.await.unwrap(), "iz.stop 24001\n");
    }
}
