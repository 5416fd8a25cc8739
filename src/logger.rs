use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use crate::peer::types::{CallFlags, IceCandidate};

/// Installs the global fmt subscriber. `RUST_LOG` overrides the build default.
pub fn init() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(crate::config::DEFAULT_LOG_FILTER));

    // A second init (tests, embedding) keeps the first subscriber.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

/// Trickle-ICE candidate as it is discovered or received
pub fn dump_candidate(label: &str, cand: &IceCandidate) {
    debug!(
        "Trickle {label}: candidate={} sdp_mid={:?} sdp_mline_index={:?} username_fragment={:?}",
        cand.candidate, cand.sdp_mid, cand.sdp_mline_index, cand.username_fragment
    );
}

/// One line per flag change, in place of the browser's overlays.
pub fn log_flags(prev: &CallFlags, next: &CallFlags) {
    if prev.local_video_enabled != next.local_video_enabled {
        info!(
            "Your camera is {}",
            if next.local_video_enabled { "on" } else { "off" }
        );
    }
    if prev.local_audio_enabled != next.local_audio_enabled {
        info!(
            "Your microphone is {}",
            if next.local_audio_enabled { "on" } else { "muted" }
        );
    }
    if prev.remote_video_present != next.remote_video_present {
        if next.remote_video_present {
            info!("Remote video arrived");
        } else {
            info!("Waiting for the other participant...");
        }
    }
    if next.remote_video_present && prev.remote_video_enabled != next.remote_video_enabled {
        info!(
            "Remote camera is {}",
            if next.remote_video_enabled { "on" } else { "off" }
        );
    }
    if prev.remote_orientation != next.remote_orientation {
        info!("Remote video orientation: {:?}", next.remote_orientation);
    }
    if prev.media_error != next.media_error {
        if let Some(kind) = next.media_error {
            tracing::error!("{}", kind.user_message());
        }
    }
}
