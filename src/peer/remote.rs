//! Remote side of a call: the track aggregator and the per-track watcher
//! that turns RTP flow into mute/unmute/ended/geometry events.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::UnboundedSender;
use tokio::time::timeout;
use tracing::debug;
use webrtc::track::track_remote::TrackRemote;

use crate::peer::types::{LinkEvent, TrackKind};
use crate::utils::vp8_keyframe_dimensions;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTrack {
    pub id: String,
    pub kind: TrackKind,
    pub muted: bool,
    pub ended: bool,
}

/// Tracks announced by the remote peer during one call.
#[derive(Debug, Default)]
pub struct RemoteStream {
    tracks: Vec<RemoteTrack>,
    video_size: Option<(u32, u32)>,
}

impl RemoteStream {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds the track unless one with the same id is already present.
    pub fn add(&mut self, id: &str, kind: TrackKind, muted: bool) -> bool {
        if self.get(id).is_some() {
            return false;
        }
        self.tracks.push(RemoteTrack {
            id: id.to_owned(),
            kind,
            muted,
            ended: false,
        });
        true
    }

    pub fn get(&self, id: &str) -> Option<&RemoteTrack> {
        self.tracks.iter().find(|t| t.id == id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut RemoteTrack> {
        self.tracks.iter_mut().find(|t| t.id == id)
    }

    pub fn tracks(&self) -> &[RemoteTrack] {
        &self.tracks
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn video_size(&self) -> Option<(u32, u32)> {
        self.video_size
    }

    pub fn set_video_size(&mut self, width: u32, height: u32) {
        self.video_size = Some((width, height));
    }

    pub fn clear(&mut self) {
        self.tracks.clear();
        self.video_size = None;
    }
}

/// Reads `track` until it ends, reporting state changes on `events`.
///
/// A track starts muted, unmutes on its first packet, and mutes again after
/// `mute_after` without packets.
pub async fn watch_remote_track(
    track: Arc<TrackRemote>,
    kind: TrackKind,
    mute_after: Duration,
    events: UnboundedSender<LinkEvent>,
) {
    let track_id = track.id().to_string();
    let mut muted = true;
    let mut size: Option<(u32, u32)> = None;

    loop {
        match timeout(mute_after, track.read_rtp()).await {
            Err(_) => {
                if !muted {
                    muted = true;
                    let _ = events.send(LinkEvent::TrackMuted {
                        track_id: track_id.clone(),
                    });
                }
            }
            Ok(Ok((packet, _))) => {
                if muted {
                    muted = false;
                    let _ = events.send(LinkEvent::TrackUnmuted {
                        track_id: track_id.clone(),
                    });
                }
                if kind == TrackKind::Video {
                    if let Some(dims) = vp8_keyframe_dimensions(&packet.payload) {
                        if size != Some(dims) {
                            size = Some(dims);
                            let _ = events.send(LinkEvent::VideoGeometry {
                                track_id: track_id.clone(),
                                width: dims.0,
                                height: dims.1,
                            });
                        }
                    }
                }
            }
            Ok(Err(e)) => {
                debug!("Remote track {track_id} ended: {e}");
                let _ = events.send(LinkEvent::TrackEnded { track_id });
                break;
            }
        }
    }
}
