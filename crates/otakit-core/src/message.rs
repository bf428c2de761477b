//! Control messages exchanged with the chunk publisher.
//!
//! Every control message is a JSON object with at least a `Message` string
//! and a `UniqueTopicName` string. The `Message` values form a closed set,
//! decoded once here into [`MessageKind`] so the session can match
//! exhaustively instead of comparing strings — a new message type is a
//! compile-visible variant, not a silently ignored branch.
//!
//! Publishers attach additional keys to their job documents and expect them
//! echoed back on replies; those ride along in [`ControlMessage::extra`].

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::wire::CHUNK_MAGIC;

/// The closed set of `Message` values. Wire strings are fixed protocol
/// constants shared with deployed publishers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageKind {
    /// Device asks whether an update is available.
    #[serde(rename = "Update Availability")]
    RequestAvailability,

    /// Publisher: no update available.
    #[serde(rename = "No Update Available")]
    NoUpdate,

    /// Publisher: an update is available on the unique topic.
    #[serde(rename = "Update Available")]
    UpdateAvailable,

    /// Device asks the publisher to send the image (job flow).
    #[serde(rename = "Request Update")]
    RequestUpdate,

    /// Device asks the publisher to send the image (direct flow).
    #[serde(rename = "Send Direct Update")]
    RequestDirectUpdate,

    /// Device reports the transfer result.
    #[serde(rename = "Success")]
    ResultSuccess,
    #[serde(rename = "Failure")]
    ResultFailure,

    /// Publisher acknowledges a reported result.
    #[serde(rename = "Result Received")]
    ResultAck,
}

/// One control message, plus whatever extra keys the peer's document had.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlMessage {
    #[serde(rename = "Message")]
    pub kind: MessageKind,

    #[serde(rename = "UniqueTopicName")]
    pub unique_topic: String,

    /// Pass-through keys from the peer's job document, echoed on replies.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ControlMessage {
    pub fn new(kind: MessageKind, unique_topic: impl Into<String>) -> Self {
        Self {
            kind,
            unique_topic: unique_topic.into(),
            extra: Map::new(),
        }
    }

    /// A reply of `kind` carrying this message's topic and extra keys.
    pub fn reply(&self, kind: MessageKind) -> Self {
        Self {
            kind,
            unique_topic: self.unique_topic.clone(),
            extra: self.extra.clone(),
        }
    }

    pub fn to_json(&self) -> Vec<u8> {
        // Serialization of string-keyed maps and strings cannot fail.
        serde_json::to_vec(self).unwrap_or_default()
    }
}

/// An inbound publish, classified.
#[derive(Debug)]
pub enum Inbound<'a> {
    /// A data chunk: header plus payload, starting with the chunk magic.
    Chunk(&'a [u8]),
    /// A decoded control message.
    Control(ControlMessage),
}

/// Classify one inbound payload.
///
/// A payload opening with the chunk magic is a data chunk; everything else
/// must parse as a control document. A payload that is not a JSON object is
/// [`ProtocolError::MalformedControlMessage`]; a well-formed document whose
/// `Message` string is not in the closed set is
/// [`ProtocolError::UnknownMessageType`].
pub fn classify(payload: &[u8]) -> Result<Inbound<'_>, ProtocolError> {
    if payload.len() >= CHUNK_MAGIC.len() && payload[..CHUNK_MAGIC.len()] == CHUNK_MAGIC {
        return Ok(Inbound::Chunk(payload));
    }
    parse_control(payload).map(Inbound::Control)
}

fn parse_control(payload: &[u8]) -> Result<ControlMessage, ProtocolError> {
    let text =
        std::str::from_utf8(payload).map_err(|_| ProtocolError::MalformedControlMessage)?;
    if !text.trim_start().starts_with('{') {
        return Err(ProtocolError::MalformedControlMessage);
    }

    let value: Value =
        serde_json::from_str(text).map_err(|_| ProtocolError::MalformedControlMessage)?;
    let object = value
        .as_object()
        .ok_or(ProtocolError::MalformedControlMessage)?;

    let kind_str = object
        .get("Message")
        .and_then(Value::as_str)
        .ok_or(ProtocolError::MalformedControlMessage)?;
    let kind: MessageKind = serde_json::from_value(Value::String(kind_str.to_owned()))
        .map_err(|_| ProtocolError::UnknownMessageType(kind_str.to_owned()))?;

    let unique_topic = object
        .get("UniqueTopicName")
        .and_then(Value::as_str)
        .ok_or(ProtocolError::MalformedControlMessage)?
        .to_owned();

    let extra: Map<String, Value> = object
        .iter()
        .filter(|(k, _)| k.as_str() != "Message" && k.as_str() != "UniqueTopicName")
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    Ok(ControlMessage {
        kind,
        unique_topic,
        extra,
    })
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    /// Not a JSON object, or missing `Message` / `UniqueTopicName`.
    #[error("malformed JSON control document")]
    MalformedControlMessage,

    /// A JSON object whose `Message` value is outside the closed set.
    #[error("unknown message type: '{0}'")]
    UnknownMessageType(String),
}

// ── Tests ─────────────────────────────────────────────────────────────────────
