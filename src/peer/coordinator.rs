//! Per-call negotiation state.
//!
//! A [`NegotiationCoordinator`] owns everything one call attempt needs: the
//! local media, the remote track aggregator, at most one peer link, and the
//! UI flags. All mutation goes through `&mut self`, so the driver processes
//! one signaling message or link event at a time and `ensure_peer_link`
//! cannot race itself. Transport callbacks arrive as [`LinkEvent`]s on an
//! internal queue; [`NegotiationCoordinator::next_wake`] hands them to the
//! driver together with the completion of an in-flight media request.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::{ROOM_ID, STUN_SERVERS};
use crate::error::{CallError, MediaError, MediaErrorKind, Result};
use crate::logger::dump_candidate;
use crate::peer::connection::{PeerLink, PeerLinkFactory};
use crate::peer::ice::{analyze_candidates, CandidateStats, PendingCandidates};
use crate::peer::media::{LocalMedia, MediaConstraints, MediaDevices};
use crate::peer::remote::RemoteStream;
use crate::peer::state::FlagState;
use crate::peer::types::{
    CallFlags, ConnectionState, IceCandidate, LinkEvent, LinkPhase, Orientation,
    SessionDescription, TrackKind,
};
use crate::session::Participant;
use crate::signaling::{OutboundSignal, SignalSink};

/// Something the driver should hand back to the coordinator.
#[derive(Debug)]
pub enum Wake {
    Link(LinkEvent),
    Media(std::result::Result<LocalMedia, MediaError>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MediaReadiness {
    NotRequested,
    Pending,
    Settled,
}

pub struct NegotiationCoordinator {
    identity: Participant,
    signaling: Arc<dyn SignalSink>,
    factory: Arc<dyn PeerLinkFactory>,
    devices: Arc<dyn MediaDevices>,

    phase: LinkPhase,
    link: Option<Box<dyn PeerLink>>,
    events_tx: mpsc::UnboundedSender<LinkEvent>,
    events_rx: mpsc::UnboundedReceiver<LinkEvent>,

    local: Option<LocalMedia>,
    media: MediaReadiness,
    media_task: Option<JoinHandle<std::result::Result<LocalMedia, MediaError>>>,

    remote: RemoteStream,
    pending_candidates: PendingCandidates,
    candidate_stats: CandidateStats,

    initiator: bool,
    offer_pending: bool,
    /// Remote offer held back until local media settles.
    parked_offer: Option<SessionDescription>,
    flags: FlagState,
}

impl NegotiationCoordinator {
    pub fn new(
        identity: Participant,
        signaling: Arc<dyn SignalSink>,
        factory: Arc<dyn PeerLinkFactory>,
        devices: Arc<dyn MediaDevices>,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            identity,
            signaling,
            factory,
            devices,
            phase: LinkPhase::NoLink,
            link: None,
            events_tx,
            events_rx,
            local: None,
            media: MediaReadiness::NotRequested,
            media_task: None,
            remote: RemoteStream::new(),
            pending_candidates: PendingCandidates::default(),
            candidate_stats: CandidateStats::default(),
            initiator: false,
            offer_pending: false,
            parked_offer: None,
            flags: FlagState::new(),
        }
    }

    pub fn phase(&self) -> LinkPhase {
        self.phase
    }

    pub fn flags(&self) -> CallFlags {
        self.flags.get()
    }

    pub fn subscribe(&self) -> watch::Receiver<CallFlags> {
        self.flags.subscribe()
    }

    pub fn is_initiator(&self) -> bool {
        self.initiator
    }

    pub fn has_link(&self) -> bool {
        self.link.is_some()
    }

    pub fn local_media(&self) -> Option<&LocalMedia> {
        self.local.as_ref()
    }

    pub fn remote(&self) -> &RemoteStream {
        &self.remote
    }

    fn is_closed(&self) -> bool {
        self.phase == LinkPhase::Closed
    }

    /// The current link, unless there is none or it is closed. Takes the
    /// fields rather than `&self` so callers can still touch the others.
    fn open_link(link: &Option<Box<dyn PeerLink>>, phase: LinkPhase) -> Option<&dyn PeerLink> {
        if phase == LinkPhase::Closed {
            return None;
        }
        link.as_deref().filter(|link| !link.is_closed())
    }

    // ========== LOCAL MEDIA ==========

    /// Requests camera and microphone and waits for the answer.
    pub async fn acquire_local_media(&mut self) {
        if self.media != MediaReadiness::NotRequested || self.is_closed() {
            return;
        }
        self.media = MediaReadiness::Pending;
        let result = self
            .devices
            .get_user_media(MediaConstraints::default())
            .await;
        self.install_local_media(result).await;
    }

    /// Starts the camera/microphone request in the background. Completion is
    /// reported by [`Self::next_wake`] as [`Wake::Media`].
    pub fn start_local_media(&mut self) {
        if self.media != MediaReadiness::NotRequested || self.is_closed() {
            return;
        }
        self.media = MediaReadiness::Pending;
        let devices = self.devices.clone();
        self.media_task = Some(tokio::spawn(async move {
            devices.get_user_media(MediaConstraints::default()).await
        }));
    }

    /// Settles the media request: stores the tracks and attaches them to an
    /// existing link, or records the failure for the user. Either way a
    /// deferred offer or a parked answer goes out now.
    pub async fn install_local_media(
        &mut self,
        result: std::result::Result<LocalMedia, MediaError>,
    ) {
        if self.is_closed() {
            if let Ok(mut media) = result {
                media.stop();
            }
            return;
        }
        self.media = MediaReadiness::Settled;

        match result {
            Ok(media) => {
                let flags = self.flags.get();
                if let Some(video) = media.video_track() {
                    video.set_enabled(flags.local_video_enabled);
                }
                if let Some(audio) = media.audio_track() {
                    audio.set_enabled(flags.local_audio_enabled);
                }
                info!("Local media ready: {} track(s)", media.tracks().len());
                self.local = Some(media);
                self.attach_local_tracks().await;
            }
            Err(e) => {
                let kind = e.kind;
                let detail = e.detail.clone();
                error!("Camera/microphone unavailable ({}): {detail}", CallError::from(e));
                self.flags.update(|f| f.media_error = Some(kind));
            }
        }

        if self.offer_pending {
            self.offer_pending = false;
            self.create_offer().await;
        }
        if let Some(offer) = self.parked_offer.take() {
            self.answer_offer(offer).await;
        }
    }

    async fn attach_local_tracks(&mut self) {
        let (Some(link), Some(local)) = (
            Self::open_link(&self.link, self.phase),
            self.local.as_ref(),
        ) else {
            return;
        };
        let attached = link.sender_track_ids().await;
        for track in local.tracks() {
            if attached.iter().any(|id| id == track.id()) {
                continue;
            }
            match link.add_track(track).await {
                Ok(()) => debug!(
                    "Attached local {:?} track {} (stream {})",
                    track.kind(),
                    track.id(),
                    track.stream_id()
                ),
                Err(e) => warn!("Failed to attach local track {}: {e}", track.id()),
            }
        }
    }

    // ========== PEER LINK ==========

    /// Returns with a link in place, creating it on first use.
    pub async fn ensure_peer_link(&mut self) -> Result<()> {
        if self.is_closed() {
            return Err(CallError::LinkClosed);
        }
        if self.link.is_some() {
            return Ok(());
        }

        self.phase = LinkPhase::Linking;
        let link = match self
            .factory
            .create(&STUN_SERVERS, self.events_tx.clone())
            .await
        {
            Ok(link) => link,
            Err(e) => {
                self.phase = LinkPhase::NoLink;
                return Err(e);
            }
        };
        info!("Peer link created ({})", self.identity);
        self.link = Some(link);
        self.attach_local_tracks().await;
        Ok(())
    }

    /// Creates, applies and relays an offer. Errors are logged, not retried.
    pub async fn create_offer(&mut self) {
        let Some(link) = Self::open_link(&self.link, self.phase) else {
            debug!("No open peer link, not creating an offer");
            return;
        };
        let result: Result<SessionDescription> = async {
            let offer = link.create_offer().await?;
            link.set_local_description(offer.clone()).await?;
            Ok(link.local_description().await.unwrap_or(offer))
        }
        .await;

        match result {
            Ok(offer) => {
                self.phase = LinkPhase::Negotiating;
                self.relay(OutboundSignal::Offer {
                    username: self.identity.to_string(),
                    offer,
                    room_id: ROOM_ID.to_owned(),
                });
            }
            Err(e) => error!("Failed to create offer: {e}"),
        }
    }

    pub async fn handle_remote_offer(&mut self, offer: SessionDescription) {
        if let Err(e) = self.ensure_peer_link().await {
            warn!("Ignoring remote offer: {e}");
            return;
        }
        if Self::open_link(&self.link, self.phase).is_none() {
            debug!("Peer link closed, ignoring remote offer");
            return;
        }
        self.phase = LinkPhase::Negotiating;

        // Answering now would go out without our tracks
        if self.media == MediaReadiness::Pending {
            debug!("Local media still pending, parking remote offer");
            self.parked_offer = Some(offer);
            return;
        }
        self.answer_offer(offer).await;
    }

    async fn answer_offer(&mut self, offer: SessionDescription) {
        let Some(link) = Self::open_link(&self.link, self.phase) else {
            debug!("Peer link closed, dropping remote offer");
            return;
        };

        if let Err(e) = link.set_remote_description(offer).await {
            error!("Failed to apply remote offer: {e}");
            return;
        }
        self.pending_candidates.flush(link).await;

        let result: Result<SessionDescription> = async {
            let answer = link.create_answer().await?;
            link.set_local_description(answer.clone()).await?;
            Ok(link.local_description().await.unwrap_or(answer))
        }
        .await;

        match result {
            Ok(answer) => self.relay(OutboundSignal::Answer {
                username: self.identity.to_string(),
                answer,
                room_id: ROOM_ID.to_owned(),
            }),
            Err(e) => error!("Failed to answer remote offer: {e}"),
        }
    }

    pub async fn handle_remote_answer(&mut self, answer: SessionDescription) {
        let Some(link) = Self::open_link(&self.link, self.phase) else {
            debug!("No open peer link, ignoring answer");
            return;
        };
        if link.remote_description().await.as_ref() == Some(&answer) {
            debug!("Duplicate answer ignored");
            return;
        }
        if let Err(e) = link.set_remote_description(answer).await {
            error!("Failed to apply remote answer: {e}");
            return;
        }
        self.pending_candidates.flush(link).await;
    }

    pub async fn handle_remote_ice_candidate(&mut self, candidate: IceCandidate) {
        let Some(link) = Self::open_link(&self.link, self.phase) else {
            return;
        };
        dump_candidate("REMOTE", &candidate);
        if link.remote_description().await.is_none() {
            debug!("Remote description not set yet, queuing candidate");
            self.pending_candidates.push(candidate);
            return;
        }
        if let Err(e) = link.add_ice_candidate(candidate).await {
            warn!("Failed to add ICE candidate: {e}");
        }
    }

    // ========== CALL LIFECYCLE ==========

    pub fn handle_call_waiting(&mut self, is_initiator: bool) {
        self.initiator = is_initiator;
    }

    /// Both participants are in the room: build the link and, on the
    /// initiator side, offer once local media has settled.
    pub async fn handle_call_started(&mut self, is_initiator: bool) {
        self.initiator = is_initiator;
        if self.link.is_some()
            && matches!(self.phase, LinkPhase::Negotiating | LinkPhase::Connected)
        {
            debug!("Call already negotiating, ignoring repeated call start");
            return;
        }
        self.flags.clear_remote_video();

        if let Err(e) = self.ensure_peer_link().await {
            warn!("Cannot start call: {e}");
            return;
        }
        if !self.initiator {
            return;
        }
        if self.media == MediaReadiness::Pending {
            debug!("Local media still pending, deferring offer");
            self.offer_pending = true;
        } else {
            self.create_offer().await;
        }
    }

    // ========== LOCAL CONTROLS ==========

    /// Flips the camera. Returns the new state, or `None` without a video track.
    pub fn toggle_local_video(&mut self) -> Option<bool> {
        self.toggle(TrackKind::Video)
    }

    /// Flips the microphone. Returns the new state, or `None` without an audio track.
    pub fn toggle_local_audio(&mut self) -> Option<bool> {
        self.toggle(TrackKind::Audio)
    }

    fn toggle(&mut self, kind: TrackKind) -> Option<bool> {
        let local = self.local.as_ref()?;
        let track = match kind {
            TrackKind::Video => local.video_track()?,
            TrackKind::Audio => local.audio_track()?,
        };
        let flags = self.flags.get();
        let next = match kind {
            TrackKind::Video => !flags.local_video_enabled,
            TrackKind::Audio => !flags.local_audio_enabled,
        };
        track.set_enabled(next);
        self.flags.update(|f| match kind {
            TrackKind::Video => f.local_video_enabled = next,
            TrackKind::Audio => f.local_audio_enabled = next,
        });
        Some(next)
    }

    // ========== EVENTS ==========

    /// Waits for the next link event or media completion. Cancel safe.
    /// Returns `None` once the coordinator has been torn down.
    pub async fn next_wake(&mut self) -> Option<Wake> {
        if self.is_closed() {
            return None;
        }
        let media_pending = self.media_task.is_some();
        let media_task = &mut self.media_task;
        let events_rx = &mut self.events_rx;
        let wake = tokio::select! {
            joined = async { media_task.as_mut()?.await.ok() }, if media_pending => {
                Wake::Media(joined.unwrap_or_else(|| {
                    Err(MediaError::new(MediaErrorKind::Unknown, "media request aborted"))
                }))
            }
            event = events_rx.recv() => Wake::Link(event?),
        };
        if matches!(wake, Wake::Media(_)) {
            self.media_task = None;
        }
        Some(wake)
    }

    pub async fn handle_wake(&mut self, wake: Wake) {
        match wake {
            Wake::Link(event) => self.handle_link_event(event).await,
            Wake::Media(result) => self.install_local_media(result).await,
        }
    }

    pub async fn handle_link_event(&mut self, event: LinkEvent) {
        if self.is_closed() {
            return;
        }
        match event {
            LinkEvent::LocalCandidate(candidate) => {
                dump_candidate("LOCAL", &candidate);
                self.candidate_stats.record(&candidate);
                self.relay(OutboundSignal::IceCandidate {
                    username: self.identity.to_string(),
                    candidate,
                    room_id: ROOM_ID.to_owned(),
                });
            }
            LinkEvent::TrackAdded {
                track_id,
                kind,
                muted,
            } => {
                self.remote.add(&track_id, kind, muted);
                self.phase = LinkPhase::Connected;
                if kind == TrackKind::Video {
                    self.flags.update(|f| {
                        f.remote_video_present = true;
                        f.remote_video_enabled = !muted;
                    });
                    self.recompute_orientation();
                }
            }
            LinkEvent::TrackMuted { track_id } => {
                if self.set_remote_muted(&track_id, true) == Some(TrackKind::Video) {
                    self.flags.update(|f| f.remote_video_enabled = false);
                }
            }
            LinkEvent::TrackUnmuted { track_id } => {
                if self.set_remote_muted(&track_id, false) == Some(TrackKind::Video) {
                    self.flags.update(|f| f.remote_video_enabled = true);
                    self.recompute_orientation();
                }
            }
            LinkEvent::TrackEnded { track_id } => {
                let kind = self.remote.get_mut(&track_id).map(|t| {
                    t.ended = true;
                    t.kind
                });
                if kind == Some(TrackKind::Video) {
                    self.flags.clear_remote_video();
                }
            }
            LinkEvent::VideoGeometry {
                track_id,
                width,
                height,
            } => {
                debug!("Remote video {track_id} is {width}x{height}");
                self.remote.set_video_size(width, height);
                self.recompute_orientation();
            }
            LinkEvent::StateChanged(state) => self.handle_connection_state(state).await,
        }
    }

    fn set_remote_muted(&mut self, track_id: &str, muted: bool) -> Option<TrackKind> {
        let track = self.remote.get_mut(track_id)?;
        track.muted = muted;
        Some(track.kind)
    }

    fn recompute_orientation(&mut self) {
        let Some(orientation) = self
            .remote
            .video_size()
            .and_then(|(w, h)| Orientation::from_dimensions(w, h))
        else {
            return;
        };
        self.flags.update(|f| f.remote_orientation = orientation);
    }

    async fn handle_connection_state(&mut self, state: ConnectionState) {
        info!("RTC state: {state:?}");
        match state {
            ConnectionState::Connected => {
                self.phase = LinkPhase::Connected;
                analyze_candidates(&self.candidate_stats);
            }
            ConnectionState::Disconnected => {
                warn!("{}", CallError::TransportDisconnected);
                self.flags.clear_remote_video();
            }
            ConnectionState::Failed | ConnectionState::Closed => {
                warn!("{} ({state:?})", CallError::TransportDisconnected);
                self.flags.clear_remote_video();
                // The link cannot recover; the call stays open until left
                self.release().await;
            }
            ConnectionState::New | ConnectionState::Connecting => {}
        }
    }

    fn relay(&self, message: OutboundSignal) {
        if let Err(e) = self.signaling.emit(message) {
            warn!("Failed to relay signaling message: {e}");
        }
    }

    // ========== TEARDOWN ==========

    /// Releases everything this call attempt holds. Safe to call repeatedly.
    pub async fn teardown(&mut self) {
        self.release().await;
        self.flags.reset();
    }

    /// Stops media, closes the link and the event queue. Leaves the flags
    /// as they are.
    async fn release(&mut self) {
        if let Some(task) = self.media_task.take() {
            task.abort();
        }
        if let Some(mut local) = self.local.take() {
            local.stop();
        }
        self.remote.clear();
        self.pending_candidates.clear();
        self.offer_pending = false;
        self.parked_offer = None;

        if let Some(link) = self.link.take() {
            link.detach_handlers().await;
            if let Err(e) = link.close().await {
                warn!("Error while closing peer link: {e}");
            }
            info!("Peer link closed ({})", self.identity);
        }
        self.events_rx.close();
        while self.events_rx.try_recv().is_ok() {}

        self.phase = LinkPhase::Closed;
    }
}
