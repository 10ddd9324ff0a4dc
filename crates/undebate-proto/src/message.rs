//! Frame envelope exchanged between client and server.

use rkyv::{Archive, Deserialize, Serialize};
use serde_json::Value;

use crate::framing::encode_frame;
use crate::handshake::{Handshake, HandshakeResponse};
use crate::value::Payload;
use crate::Error;

/// A single protocol frame.
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
pub enum Frame {
    /// Client greeting, first frame on a connection.
    Hello(Handshake),
    /// Server answer to [`Frame::Hello`].
    Welcome(HandshakeResponse),
    /// Client call of a socket api.
    Emit {
        /// Socket-api handle.
        event: String,
        /// Call arguments, in order.
        args: Vec<Payload>,
        /// Reply token; the server answers with exactly one [`Frame::Ack`]
        /// carrying it. `None` means no reply is wanted.
        ack: Option<u64>,
    },
    /// Server reply to an emit.
    Ack {
        /// Reply token copied from the emit.
        ack: u64,
        /// Reply arguments.
        args: Vec<Payload>,
    },
    /// Server push on a channel.
    Push {
        /// Channel name, `"{handle}:{id}"`.
        event: String,
        /// Update data.
        payload: Payload,
    },
}

impl Frame {
    /// Build an emit frame from JSON arguments.
    pub fn emit(event: impl Into<String>, args: &[Value], ack: Option<u64>) -> Result<Self, Error> {
        Ok(Frame::Emit {
            event: event.into(),
            args: Payload::encode_all(args)?,
            ack,
        })
    }

    /// Build an ack frame from JSON reply arguments.
    pub fn ack(ack: u64, args: &[Value]) -> Result<Self, Error> {
        Ok(Frame::Ack {
            ack,
            args: Payload::encode_all(args)?,
        })
    }

    /// Build a push frame for a channel.
    pub fn push(channel: impl Into<String>, payload: &Value) -> Result<Self, Error> {
        Ok(Frame::Push {
            event: channel.into(),
            payload: Payload::from_value(payload)?,
        })
    }

    /// Short name of the frame kind, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Frame::Hello(_) => "hello",
            Frame::Welcome(_) => "welcome",
            Frame::Emit { .. } => "emit",
            Frame::Ack { .. } => "ack",
            Frame::Push { .. } => "push",
        }
    }

    /// Serialize and length-prefix this frame.
    pub fn encode(&self) -> Result<Vec<u8>, Error> {
        let payload = rkyv::to_bytes::<rkyv::rancor::Error>(self)
            .map_err(|e| Error::Serialization(format!("failed to serialize frame: {}", e)))?;
        encode_frame(&payload)
    }

    /// Deserialize a frame from a payload (without the length prefix).
    pub fn decode(payload: &[u8]) -> Result<Self, Error> {
        // Copy to aligned buffer for rkyv validation
        let mut aligned: rkyv::util::AlignedVec<16> = rkyv::util::AlignedVec::new();
        aligned.extend_from_slice(payload);

        rkyv::from_bytes::<Frame, rkyv::rancor::Error>(&aligned)
            .map_err(|e| Error::InvalidMessage(format!("failed to deserialize frame: {}", e)))
    }
}
