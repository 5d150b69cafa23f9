//! The frame envelope.
//!
//! A frame is a tagged union: a [`FrameKind`] plus an optional payload.
//! The payload stays a [`RawValue`] until the receiver knows the tag and
//! asks for the matching payload type.

use crate::error::ProtoError;
use crate::kind::FrameKind;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

/// One gateway message, as sent and received on the socket.
#[derive(Debug, Serialize, Deserialize)]
pub struct Frame {
    /// Discriminant of the union.
    pub kind: FrameKind,

    /// Kind-specific payload; absent for marker frames such as
    /// `GATEWAY_HEARTBEAT`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Box<RawValue>>,
}

impl Frame {
    /// Create a frame with no payload.
    pub fn kind_only(kind: FrameKind) -> Self {
        Self {
            kind,
            payload: None,
        }
    }

    /// Create a frame carrying a serialized payload.
    pub fn new<D: Serialize>(kind: FrameKind, payload: &D) -> Result<Self, ProtoError> {
        let raw = serde_json::value::to_raw_value(payload)?;
        Ok(Self {
            kind,
            payload: Some(raw),
        })
    }

    /// Decode this frame's payload as `D`.
    ///
    /// Fails with [`ProtoError::MalformedFrame`] when the payload does not
    /// decode for this frame's tag, and [`ProtoError::MissingPayload`]
    /// when the frame has none.
    pub fn parse<D: DeserializeOwned>(&self) -> Result<D, ProtoError> {
        let raw = self
            .payload
            .as_deref()
            .ok_or(ProtoError::MissingPayload { kind: self.kind })?;
        serde_json::from_str(raw.get()).map_err(|e| {
            ProtoError::MalformedFrame(format!("{} payload: {}", self.kind, e))
        })
    }

    /// Encode this frame for transmission in a binary WebSocket message.
    pub fn encode(&self) -> Result<Vec<u8>, ProtoError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decode a received binary WebSocket message.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtoError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
