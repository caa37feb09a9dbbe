//! Line codec for the control protocol.
//!
//! Wire format (plaintext, one request per connection):
//! ```text
//! client → server   iz.<command> [arg]*\n
//! server → client   <one JSON document>\n      (then the server closes)
//! ```
//! The command token is decoded into the closed [`Command`] variant; an
//! unknown token is a decode failure, answered with a structured rejection.

use serde_json::{json, Value};
use std::fmt;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::types::{Error, Port, Result};

pub const HELP: &str = "iz.help";
pub const PING: &str = "iz.ping";
pub const STATUS: &str = "iz.status";
pub const STOP: &str = "iz.stop";
pub const RELAY: &str = "iz.relay";

/// Acknowledgement value for `iz.ping` and `iz.relay`.
pub const ACK: &str = "iz.ack";

/// A decoded control command.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// List available commands.
    Help,
    /// Liveness probe, answered with `{"iz.ping":"iz.ack"}`.
    Ping,
    /// Status document of the receiving role.
    Status,
    /// Begin shutdown; dependents' acknowledgements are relayed to the port, if any.
    Stop(Option<Port>),
    /// Acknowledgement relayed upward by a dependent during a cascade.
    Relay(Value),
}

/// One row of the `iz.help` listing.
#[derive(Debug, Clone, Copy)]
pub struct CommandInfo {
    pub command: &'static str,
    pub usage: &'static str,
    pub description: &'static str,
}

pub const COMMANDS: &[CommandInfo] = &[
    CommandInfo {
        command: HELP,
        usage: "iz.help",
        description: "list control commands",
    },
    CommandInfo {
        command: PING,
        usage: "iz.ping",
        description: "liveness probe",
    },
    CommandInfo {
        command: STATUS,
        usage: "iz.status",
        description: "status document of this role",
    },
    CommandInfo {
        command: STOP,
        usage: "iz.stop [forwardPort]",
        description: "stop this role and its dependents",
    },
    CommandInfo {
        command: RELAY,
        usage: "iz.relay <json>",
        description: "accept an acknowledgement relayed by a dependent",
    },
];

impl Command {
    /// Decode one request line.
    pub fn decode(line: &str) -> Result<Self> {
        let line = line.trim();
        let (token, rest) = match line.split_once(char::is_whitespace) {
            Some((token, rest)) => (token, rest.trim()),
            None => (line, ""),
        };

        match token {
            "" => Err(Error::protocol("empty command")),
            HELP => Ok(Command::Help),
            PING => Ok(Command::Ping),
            STATUS => Ok(Command::Status),
            STOP => match rest.split_whitespace().next() {
                None => Ok(Command::Stop(None)),
                Some(arg) => {
                    let port: Port = arg
                        .parse()
                        .map_err(|_| Error::protocol(format!("invalid forward port: {}", arg)))?;
                    Ok(Command::Stop((port != 0).then_some(port)))
                }
            },
            RELAY => {
                if rest.is_empty() {
                    return Err(Error::protocol("iz.relay requires a JSON argument"));
                }
                let value = serde_json::from_str(rest)
                    .map_err(|e| Error::protocol(format!("invalid relay payload: {}", e)))?;
                Ok(Command::Relay(value))
            }
            other => Err(Error::protocol(format!("unknown command: {}", other))),
        }
    }

    pub fn token(&self) -> &'static str {
        match self {
            Command::Help => HELP,
            Command::Ping => PING,
            Command::Status => STATUS,
            Command::Stop(_) => STOP,
            Command::Relay(_) => RELAY,
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Stop(Some(port)) => write!(f, "{} {}", STOP, port),
            Command::Relay(value) => write!(f, "{} {}", RELAY, value),
            other => f.write_str(other.token()),
        }
    }
}

/// `iz.help` reply document.
pub fn help_document() -> Value {
    let rows: Vec<Value> = COMMANDS
        .iter()
        .map(|c| {
            json!({
                "command": c.command,
                "usage": c.usage,
                "description": c.description,
            })
        })
        .collect();
    json!({ HELP: rows })
}

/// Structured rejection for a request that could not be served.
pub fn rejection(error: &Error) -> Value {
    json!({
        "error": {
            "code": error.to_reply_code(),
            "message": error.to_string(),
        }
    })
}

/// Read one newline-terminated line. Returns `None` on clean EOF.
///
/// `max_line_bytes` caps the accepted line length (excluding the terminator).
pub async fn read_line<R: AsyncBufRead + Unpin>(
    reader: &mut R,
    max_line_bytes: usize,
) -> std::io::Result<Option<String>> {
    let mut buf = Vec::new();
    let limit = u64::try_from(max_line_bytes).unwrap_or(u64::MAX).saturating_add(2);
    let read = (&mut *reader).take(limit).read_until(b'\n', &mut buf).await?;
    if read == 0 {
        return Ok(None);
    }

    if buf.last() == Some(&b'\n') {
        buf.pop();
        if buf.last() == Some(&b'\r') {
            buf.pop();
        }
    }
    if buf.len() > max_line_bytes {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("Line too long: more than {} bytes", max_line_bytes),
        ));
    }

    String::from_utf8(buf)
        .map(Some)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}

/// Write a JSON document followed by a newline.
pub async fn write_document<W: AsyncWrite + Unpin>(
    writer: &mut W,
    value: &Value,
) -> std::io::Result<()> {
    let mut bytes = serde_json::to_vec(value)?;
    bytes.push(b'\n');
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tokio::io::BufReader;

    #[test]
    fn decodes_known_commands() {
        assert_eq!(Command::decode("iz.ping").unwrap(), Command::Ping);
        assert_eq!(Command::decode("  iz.status \r").unwrap(), Command::Status);
        assert_eq!(Command::decode("iz.help").unwrap(), Command::Help);
        assert_eq!(Command::decode("iz.stop").unwrap(), Command::Stop(None));
        assert_eq!(Command::decode("iz.stop 0").unwrap(), Command::Stop(None));
        assert_eq!(
            Command::decode("iz.stop 24001").unwrap(),
            Command::Stop(Some(24001))
        );
    }

    #[test]
    fn decode_failures_are_protocol_errors() {
        for line in ["", "   ", "iz.reboot", "iz.stop notaport", "iz.relay", "iz.relay {"] {
            assert!(
                matches!(Command::decode(line), Err(Error::Protocol(_))),
                "line {:?} should be rejected",
                line
            );
        }
    }

    #[test]
    fn relay_carries_json_payload() {
        let command = Command::Relay(json!({"name": "beta", "port": 24010}));
        let line = command.to_string();
        assert!(line.starts_with("iz.relay "));
        assert_eq!(Command::decode(&line).unwrap(), command);
    }

    #[test]
    fn help_lists_every_command() {
        let doc = help_document();
        let rows = doc[HELP].as_array().unwrap();
        assert_eq!(rows.len(), COMMANDS.len());
        assert!(rows.iter().any(|r| r["command"] == STOP));
    }

    #[test]
    fn rejection_carries_code_and_message() {
        let doc = rejection(&Error::protocol("unknown command: iz.x"));
        assert_eq!(doc["error"]["code"], "PROTOCOL");
        assert!(doc["error"]["message"].as_str().unwrap().contains("iz.x"));
    }

    #[tokio::test]
    async fn read_line_splits_and_stops_at_eof() {
        let mut reader = BufReader::new(Cursor::new(b"iz.ping\r\niz.status".to_vec()));
        assert_eq!(read_line(&mut reader, 64).await.unwrap().as_deref(), Some("iz.ping"));
        assert_eq!(read_line(&mut reader, 64).await.unwrap().as_deref(), Some("iz.status"));
        assert_eq!(read_line(&mut reader, 64).await.unwrap(), None);
    }

    #[tokio::test]
    async fn read_line_rejects_oversized() {
        let mut reader = BufReader::new(Cursor::new(vec![b'a'; 100]));
        let err = read_line(&mut reader, 16).await.unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn write_document_is_newline_terminated() {
        let mut out = Vec::new();
        write_document(&mut out, &json!({"iz.ping": ACK})).await.unwrap();
        assert_eq!(out, b"{\"iz.ping\":\"iz.ack\"}\n".to_vec());
    }
}
