use serde::{Deserialize, Serialize};

use crate::error::MediaErrorKind;

/// Offer or answer, in the browser's `{type, sdp}` JSON shape.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: SdpKind,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Answer,
            sdp: sdp.into(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    Offer,
    Pranswer,
    Answer,
    Rollback,
}

/// ICE candidate for the WebRTC connection, in `RTCIceCandidateInit` JSON shape
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(rename = "sdpMid", default)]
    pub sdp_mid: Option<String>,
    #[serde(rename = "sdpMLineIndex", default)]
    pub sdp_mline_index: Option<u16>,
    #[serde(
        rename = "usernameFragment",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub username_fragment: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Audio,
    Video,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Orientation {
    Portrait,
    #[default]
    Landscape,
}

impl Orientation {
    /// `None` until both dimensions are known.
    pub fn from_dimensions(width: u32, height: u32) -> Option<Self> {
        if width == 0 || height == 0 {
            return None;
        }
        Some(if height > width {
            Orientation::Portrait
        } else {
            Orientation::Landscape
        })
    }
}

/// Everything the call screen renders from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallFlags {
    pub local_video_enabled: bool,
    pub local_audio_enabled: bool,
    pub remote_video_present: bool,
    pub remote_video_enabled: bool,
    pub remote_orientation: Orientation,
    pub media_error: Option<MediaErrorKind>,
}

impl Default for CallFlags {
    fn default() -> Self {
        Self {
            local_video_enabled: false,
            local_audio_enabled: true,
            remote_video_present: false,
            remote_video_enabled: false,
            remote_orientation: Orientation::Landscape,
            media_error: None,
        }
    }
}

/// Transport-level connection state reported by a peer link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

/// Negotiation progress of one call attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkPhase {
    NoLink,
    Linking,
    Negotiating,
    Connected,
    Closed,
}

/// Transport callbacks, queued for the coordinator instead of mutating it directly.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    /// A local candidate was gathered and should be trickled to the peer.
    LocalCandidate(IceCandidate),
    TrackAdded {
        track_id: String,
        kind: TrackKind,
        muted: bool,
    },
    TrackMuted { track_id: String },
    TrackUnmuted { track_id: String },
    TrackEnded { track_id: String },
    /// Frame size of a remote video track became known or changed.
    VideoGeometry {
        track_id: String,
        width: u32,
        height: u32,
    },
    StateChanged(ConnectionState),
}
