//! Binary encoding for protocol messages.
//!
//! Messages are MessagePack maps keyed by field name, so decoders skip
//! fields they do not know and field order carries no meaning. On the socket
//! transports each encoded message is wrapped in a [`FramedMessage`].

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::io::Cursor;

use crate::{ControlRequest, ControlResponse, EventMessage, FrameMessage};

/// Largest framed message accepted from a socket (screenshots included)
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

/// The four record shapes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Frame,
    Event,
    Request,
    Response,
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MessageKind::Frame => "frame",
            MessageKind::Event => "event",
            MessageKind::Request => "control request",
            MessageKind::Response => "control response",
        })
    }
}

/// Malformed wire bytes for a single message
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("malformed {kind} message at byte {offset}{}: {reason}", field_suffix(.field))]
pub struct DecodeError {
    pub kind: MessageKind,
    /// Bytes consumed when decoding stopped
    pub offset: u64,
    /// Offending field, when the decoder could name it
    pub field: Option<String>,
    pub reason: String,
}

fn field_suffix(field: &Option<String>) -> String {
    field
        .as_ref()
        .map(|f| format!(" (field `{f}`)"))
        .unwrap_or_default()
}

/// A message could not be serialized
#[derive(Debug, thiserror::Error)]
#[error("failed to encode {kind} message: {source}")]
pub struct EncodeError {
    pub kind: MessageKind,
    #[source]
    pub source: rmp_serde::encode::Error,
}

/// Implemented by every record shape that travels on a channel
pub trait WireMessage: Serialize + DeserializeOwned {
    const KIND: MessageKind;

    fn encode(&self) -> Result<Vec<u8>, EncodeError> {
        encode(self)
    }

    fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        decode(bytes)
    }
}

impl WireMessage for FrameMessage {
    const KIND: MessageKind = MessageKind::Frame;
}

impl WireMessage for EventMessage {
    const KIND: MessageKind = MessageKind::Event;
}

impl WireMessage for ControlRequest {
    const KIND: MessageKind = MessageKind::Request;
}

impl WireMessage for ControlResponse {
    const KIND: MessageKind = MessageKind::Response;
}

/// Encode a message as a named-field MessagePack map
pub fn encode<M: WireMessage>(message: &M) -> Result<Vec<u8>, EncodeError> {
    rmp_serde::to_vec_named(message).map_err(|source| EncodeError {
        kind: M::KIND,
        source,
    })
}

/// Decode a message, reporting where decoding stopped on failure
pub fn decode<M: WireMessage>(bytes: &[u8]) -> Result<M, DecodeError> {
    let mut de = rmp_serde::Deserializer::new(Cursor::new(bytes));
    M::deserialize(&mut de).map_err(|e| {
        let reason = e.to_string();
        DecodeError {
            kind: M::KIND,
            offset: de.get_ref().position(),
            field: offending_field(&reason),
            reason,
        }
    })
}

/// Pull a field name out of serde's "missing field `x`" / "duplicate field `x`"
fn offending_field(reason: &str) -> Option<String> {
    let start = reason.find("field `")? + "field `".len();
    let len = reason[start..].find('`')?;
    Some(reason[start..start + len].to_string())
}

/// Any of the four record shapes
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Frame(FrameMessage),
    Event(EventMessage),
    Request(ControlRequest),
    Response(ControlResponse),
}

impl Message {
    /// Decode bytes as the given record shape
    pub fn decode_as(bytes: &[u8], kind: MessageKind) -> Result<Self, DecodeError> {
        Ok(match kind {
            MessageKind::Frame => Message::Frame(decode(bytes)?),
            MessageKind::Event => Message::Event(decode(bytes)?),
            MessageKind::Request => Message::Request(decode(bytes)?),
            MessageKind::Response => Message::Response(decode(bytes)?),
        })
    }

    pub fn kind(&self) -> MessageKind {
        match self {
            Message::Frame(_) => MessageKind::Frame,
            Message::Event(_) => MessageKind::Event,
            Message::Request(_) => MessageKind::Request,
            Message::Response(_) => MessageKind::Response,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, EncodeError> {
        match self {
            Message::Frame(m) => encode(m),
            Message::Event(m) => encode(m),
            Message::Request(m) => encode(m),
            Message::Response(m) => encode(m),
        }
    }
}

// ============================================================================
// Message Framing
// ============================================================================

/// A framed message with length prefix for reliable socket reads
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FramedMessage {
    pub data: Vec<u8>,
}

impl FramedMessage {
    /// Create a new framed message from an encodable record
    pub fn new<M: WireMessage>(msg: &M) -> Result<Self, EncodeError> {
        Ok(Self { data: encode(msg)? })
    }

    /// Wrap already-encoded bytes
    pub fn from_bytes(data: Vec<u8>) -> Self {
        Self { data }
    }

    /// Encode message with length prefix (4 bytes, big-endian)
    pub fn encode(&self) -> Vec<u8> {
        let len = self.data.len() as u32;
        let mut buf = Vec::with_capacity(4 + self.data.len());
        buf.extend_from_slice(&len.to_be_bytes());
        buf.extend_from_slice(&self.data);
        buf
    }

    /// Read the payload length from a 4-byte prefix, rejecting oversized frames
    pub fn payload_len(prefix: [u8; 4]) -> Option<usize> {
        let len = u32::from_be_bytes(prefix) as usize;
        (len <= MAX_FRAME_LEN).then_some(len)
    }
}
