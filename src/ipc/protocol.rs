//! IPC message protocol definitions
//!
//! All messages are JSON-encoded, prefixed with a 4-byte little-endian length.

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::events::SessionEvent;
use crate::session::SessionSnapshot;

/// Largest message accepted in either direction
pub const MAX_MESSAGE_LEN: usize = 1024 * 1024;

/// Requests from UI to daemon
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    /// Ping to check connectivity
    Ping,

    /// Request the current session snapshot
    GetStatus,

    StartCamera,
    StopCamera,
    ToggleCamera,
    ToggleVoice,
    ToggleNarration,

    /// Speak the page description (narration must be on)
    ReadDescription,

    /// Subscribe to session event notifications
    Subscribe,
}

/// Responses from daemon to UI
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    /// Current session snapshot
    Status(SessionSnapshot),

    /// Pong response to ping
    Pong,

    /// Command accepted by the controller
    Ack,

    /// Subscription confirmed
    Subscribed,

    /// Error response
    Error { code: String, message: String },
}

impl Response {
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        Response::Error {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

/// Push notification from daemon to UI (for subscribed clients)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    /// Session event occurred
    Event { event: SessionEvent },
}

/// Read one length-prefixed message body. `Ok(None)` on a clean disconnect.
pub async fn read_frame<R>(reader: &mut R) -> std::io::Result<Option<Vec<u8>>>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }

    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_MESSAGE_LEN {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("message too large: {} bytes", len),
        ));
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    Ok(Some(body))
}

/// Send a length-prefixed JSON message
pub async fn write_message<W, T>(writer: &mut W, msg: &T) -> anyhow::Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let msg_bytes = serde_json::to_vec(msg)?;
    if msg_bytes.len() > MAX_MESSAGE_LEN {
        anyhow::bail!("outgoing message too large: {} bytes", msg_bytes.len());
    }
    let msg_len = (msg_bytes.len() as u32).to_le_bytes();

    writer.write_all(&msg_len).await?;
    writer.write_all(&msg_bytes).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::CaptureStatus;

    #[test]
    fn test_request_serialization() {
        let json = serde_json::to_string(&Request::ToggleVoice).unwrap();
        assert_eq!(json, r#"{"type":"toggle_voice"}"#);

        let parsed: Request = serde_json::from_str(r#"{"type":"read_description"}"#).unwrap();
        assert_eq!(parsed, Request::ReadDescription);
    }

    #[test]
    fn test_unknown_request_rejected() {
        assert!(serde_json::from_str::<Request>(r#"{"type":"set_mode"}"#).is_err());
    }

    #[test]
    fn test_notification_carries_event() {
        let note = Notification::Event {
            event: SessionEvent::CaptureStatusChanged {
                status: CaptureStatus::Active,
            },
        };
        let value = serde_json::to_value(&note).unwrap();
        assert_eq!(value["type"], "event");
        assert_eq!(value["event"]["type"], "capture_status_changed");
        assert_eq!(value["event"]["status"], "active");
    }

    #[tokio::test]
    async fn test_frame_length_prefix() {
        let mut buf = Vec::new();
        write_message(&mut buf, &Response::Pong).await.unwrap();
        assert_eq!(&buf[..4], &(buf.len() as u32 - 4).to_le_bytes());

        let mut reader = buf.as_slice();
        let body = read_frame(&mut reader).await.unwrap().unwrap();
        let resp: Response = serde_json::from_slice(&body).unwrap();
        assert_eq!(resp, Response::Pong);
        assert!(read_frame(&mut reader).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let header = ((MAX_MESSAGE_LEN + 1) as u32).to_le_bytes();
        let mut reader = &header[..];
        let err = read_frame(&mut reader).await.unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
    }
}
