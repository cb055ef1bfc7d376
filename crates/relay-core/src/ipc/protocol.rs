//! Wire protocol types and framing.
//!
//! Every message is a 4-byte big-endian length prefix followed by a UTF-8
//! JSON document:
//!
//! ```text
//! [u32 BE: len][UTF-8 JSON bytes of len]
//! ```
//!
//! Three JSON shapes travel over the channel:
//!
//! - request (client → runtime): `{"action", "payload", "correlationId"}`
//! - reply (runtime → client): `{"correlationId", "success", "payload" | "error"}`
//! - event (runtime → client): `{"topic", "type", "source", "payload"}`

use crate::config::TransportConfig;
use crate::error::{RelayError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Correlation identifier attached to a request and echoed by its reply.
pub type CorrelationId = u64;

/// Identity of an application or one of its windows.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    pub uuid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Identity {
    /// Identity marker matching any publisher.
    pub const WILDCARD: &'static str = "*";

    pub fn new(uuid: impl Into<String>) -> Self {
        Self {
            uuid: uuid.into(),
            name: None,
        }
    }

    pub fn with_name(uuid: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            uuid: uuid.into(),
            name: Some(name.into()),
        }
    }

    /// A filter matching events from every source.
    pub fn any() -> Self {
        Self::new(Self::WILDCARD)
    }

    pub fn is_wildcard(&self) -> bool {
        self.uuid == Self::WILDCARD
    }

    /// Whether an event from `source` passes this identity used as a filter.
    ///
    /// A wildcard uuid matches everything. Otherwise the uuid must be equal
    /// and, if this filter names a window, the window name too.
    pub fn matches(&self, source: &Identity) -> bool {
        if self.is_wildcard() {
            return true;
        }
        if self.uuid != source.uuid {
            return false;
        }
        match &self.name {
            Some(name) => source.name.as_deref() == Some(name.as_str()),
            None => true,
        }
    }
}

impl std::fmt::Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{}/{}", self.uuid, name),
            None => write!(f, "{}", self.uuid),
        }
    }
}

/// Outbound action request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionRequest {
    pub action: String,
    pub payload: Value,
    pub correlation_id: CorrelationId,
}

impl ActionRequest {
    pub fn new(action: impl Into<String>, payload: Value, correlation_id: CorrelationId) -> Self {
        Self {
            action: action.into(),
            payload,
            correlation_id,
        }
    }
}

/// Any frame the runtime sends. Classified by [`InboundFrame::kind`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundFrame {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<CorrelationId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub event_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<Identity>,
}

/// Result of classifying an inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum FrameKind {
    /// Carries a correlation identifier.
    Reply {
        correlation_id: CorrelationId,
        outcome: std::result::Result<Value, String>,
    },
    /// Carries topic/type/source and no correlation identifier.
    Event(Event),
    /// Neither shape.
    Unrecognized,
}

impl InboundFrame {
    /// Build a success reply (used by test peers and fakes).
    pub fn reply_ok(correlation_id: CorrelationId, payload: Value) -> Self {
        Self {
            correlation_id: Some(correlation_id),
            success: Some(true),
            payload: Some(payload),
            ..Default::default()
        }
    }

    /// Build an error reply.
    pub fn reply_err(correlation_id: CorrelationId, error: impl Into<String>) -> Self {
        Self {
            correlation_id: Some(correlation_id),
            success: Some(false),
            error: Some(error.into()),
            ..Default::default()
        }
    }

    /// Build an event frame.
    pub fn event(
        topic: impl Into<String>,
        event_type: impl Into<String>,
        source: Identity,
        payload: Value,
    ) -> Self {
        Self {
            topic: Some(topic.into()),
            event_type: Some(event_type.into()),
            source: Some(source),
            payload: Some(payload),
            ..Default::default()
        }
    }

    /// Classify this frame as a reply, an event or neither.
    ///
    /// A reply without an explicit `success` flag counts as success unless
    /// it carries an `error`.
    pub fn kind(self) -> FrameKind {
        if let Some(correlation_id) = self.correlation_id {
            let succeeded = self.success.unwrap_or(self.error.is_none());
            let outcome = if succeeded {
                Ok(self.payload.unwrap_or(Value::Null))
            } else {
                Err(self
                    .error
                    .unwrap_or_else(|| "runtime reported failure without a message".to_string()))
            };
            return FrameKind::Reply {
                correlation_id,
                outcome,
            };
        }

        match (self.topic, self.event_type, self.source) {
            (Some(topic), Some(event_type), Some(source)) => FrameKind::Event(Event {
                topic,
                event_type,
                source,
                payload: self.payload.unwrap_or(Value::Null),
            }),
            _ => FrameKind::Unrecognized,
        }
    }
}

/// An unsolicited message delivered to listeners.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub topic: String,
    pub event_type: String,
    pub source: Identity,
    pub payload: Value,
}

/// Read a length-prefixed frame from an async reader.
///
/// Frame format: `[4-byte BE u32 length][payload bytes]`
///
/// Returns `None` on clean EOF (peer closed connection).
pub async fn read_frame<R: AsyncReadExt + Unpin>(reader: &mut R) -> Result<Option<Vec<u8>>> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_be_bytes(len_buf) as usize;

    if len > TransportConfig::MAX_FRAME_SIZE {
        return Err(RelayError::Validation {
            field: "ipc_frame".to_string(),
            message: format!(
                "IPC message size {} exceeds maximum {}",
                len,
                TransportConfig::MAX_FRAME_SIZE
            ),
        });
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;

    Ok(Some(payload))
}

/// Write a length-prefixed frame to an async writer.
pub async fn write_frame<W: AsyncWriteExt + Unpin>(writer: &mut W, payload: &[u8]) -> Result<()> {
    let len = u32::try_from(payload.len()).map_err(|_| RelayError::Validation {
        field: "ipc_frame".to_string(),
        message: format!("IPC message size {} does not fit a frame", payload.len()),
    })?;
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}
