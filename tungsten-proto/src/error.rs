//! Codec error types using thiserror.

use crate::kind::FrameKind;
use thiserror::Error;

/// Errors produced while encoding or decoding gateway frames.
///
/// A malformed frame is fatal to the connection that received it; the
/// supervisor treats it as a transport failure and reconnects.
#[derive(Debug, Error)]
pub enum ProtoError {
    /// The bytes could not be decoded as a frame, or a payload could not
    /// be decoded for its tag.
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    /// A frame kind that requires a payload arrived without one.
    #[error("{kind} frame carried no payload")]
    MissingPayload {
        /// The offending frame kind.
        kind: FrameKind,
    },
}

impl From<serde_json::Error> for ProtoError {
    fn from(err: serde_json::Error) -> Self {
        ProtoError::MalformedFrame(err.to_string())
    }
}
