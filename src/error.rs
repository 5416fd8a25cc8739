//! Error types shared by the signaling client and the call coordinator.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, CallError>;

#[derive(Debug, Error)]
pub enum CallError {
    /// Camera or microphone access was refused.
    #[error("media access denied")]
    MediaAccessDenied,

    /// No camera or microphone is available.
    #[error("media device missing")]
    MediaDeviceMissing,

    /// Offer, answer or candidate could not be created or applied.
    #[error("negotiation failed: {0}")]
    NegotiationFailed(String),

    /// The peer link reported failed, disconnected or closed.
    #[error("transport disconnected")]
    TransportDisconnected,

    /// The coordinator was torn down; a new call attempt needs a new one.
    #[error("peer link is closed")]
    LinkClosed,

    #[error("unknown participant: {0}")]
    UnknownParticipant(String),

    #[error("signaling error: {0}")]
    Signaling(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("webrtc error: {0}")]
    Webrtc(#[from] webrtc::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CallError {
    pub fn negotiation(msg: impl std::fmt::Display) -> Self {
        Self::NegotiationFailed(msg.to_string())
    }

    pub fn signaling(msg: impl std::fmt::Display) -> Self {
        Self::Signaling(msg.to_string())
    }

    pub fn protocol(msg: impl std::fmt::Display) -> Self {
        Self::Protocol(msg.to_string())
    }
}

/// Category of a failed camera/microphone request, as shown to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MediaErrorKind {
    PermissionDenied,
    DeviceNotFound,
    Unknown,
}

impl MediaErrorKind {
    /// Message shown to the user when the call starts without media.
    pub fn user_message(self) -> &'static str {
        match self {
            MediaErrorKind::PermissionDenied => {
                "Camera or microphone access is denied. Allow access and rejoin the call."
            }
            MediaErrorKind::DeviceNotFound => {
                "No camera or microphone found. Make sure the devices are connected."
            }
            MediaErrorKind::Unknown => "Could not access the camera or microphone.",
        }
    }
}

/// Failure returned by a [`MediaDevices`](crate::peer::media::MediaDevices) request.
#[derive(Debug, Error)]
#[error("{kind:?}: {detail}")]
pub struct MediaError {
    pub kind: MediaErrorKind,
    pub detail: String,
}

impl MediaError {
    pub fn new(kind: MediaErrorKind, detail: impl std::fmt::Display) -> Self {
        Self {
            kind,
            detail: detail.to_string(),
        }
    }

    /// Maps an I/O failure on a capture source to a user-facing category.
    pub fn from_io(err: &std::io::Error) -> Self {
        let kind = match err.kind() {
            std::io::ErrorKind::NotFound => MediaErrorKind::DeviceNotFound,
            std::io::ErrorKind::PermissionDenied => MediaErrorKind::PermissionDenied,
            _ => MediaErrorKind::Unknown,
        };
        Self::new(kind, err)
    }
}

impl From<MediaError> for CallError {
    fn from(err: MediaError) -> Self {
        match err.kind {
            MediaErrorKind::PermissionDenied => CallError::MediaAccessDenied,
            MediaErrorKind::DeviceNotFound => CallError::MediaDeviceMissing,
            MediaErrorKind::Unknown => CallError::Io(std::io::Error::other(err.detail)),
        }
    }
}
