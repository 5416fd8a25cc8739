use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::{APIBuilder, API};
use webrtc::ice_transport::ice_candidate::RTCIceCandidate;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::policy::bundle_policy::RTCBundlePolicy;
use webrtc::peer_connection::policy::rtcp_mux_policy::RTCRtcpMuxPolicy;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::signaling_state::RTCSignalingState;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::track::track_remote::TrackRemote;

use crate::config::REMOTE_MUTE_AFTER;
use crate::error::{CallError, Result};
use crate::peer::media::LocalTrack;
use crate::peer::remote::watch_remote_track;
use crate::peer::types::{
    ConnectionState, IceCandidate, LinkEvent, SdpKind, SessionDescription, TrackKind,
};

/// One negotiated point-to-point media session.
///
/// Implementations report transport callbacks as [`LinkEvent`]s on the
/// sender handed to [`PeerLinkFactory::create`]; they never call back into
/// the coordinator.
#[async_trait]
pub trait PeerLink: Send + Sync {
    async fn create_offer(&self) -> Result<SessionDescription>;
    async fn create_answer(&self) -> Result<SessionDescription>;
    async fn set_local_description(&self, desc: SessionDescription) -> Result<()>;
    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()>;
    async fn local_description(&self) -> Option<SessionDescription>;
    async fn remote_description(&self) -> Option<SessionDescription>;
    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()>;
    async fn add_track(&self, track: &LocalTrack) -> Result<()>;
    /// Ids of local tracks already attached to a sender.
    async fn sender_track_ids(&self) -> Vec<String>;
    fn is_closed(&self) -> bool;
    /// Stops all event reporting. Called before [`PeerLink::close`].
    async fn detach_handlers(&self);
    async fn close(&self) -> Result<()>;
}

#[async_trait]
pub trait PeerLinkFactory: Send + Sync {
    async fn create(
        &self,
        ice_servers: &[&str],
        events: UnboundedSender<LinkEvent>,
    ) -> Result<Box<dyn PeerLink>>;
}

/// Builds [`RtcPeerLink`]s on the `webrtc` stack with default codecs and
/// interceptors.
pub struct RtcLinkFactory {
    api: API,
}

impl RtcLinkFactory {
    pub fn new() -> Result<Self> {
        let mut media = MediaEngine::default();
        media.register_default_codecs()?;
        let registry = register_default_interceptors(Registry::new(), &mut media)?;
        let api = APIBuilder::new()
            .with_media_engine(media)
            .with_interceptor_registry(registry)
            .build();
        Ok(Self { api })
    }
}

/// Creates the configuration for a peer connection
fn rtc_config(ice_servers: &[&str]) -> RTCConfiguration {
    RTCConfiguration {
        ice_servers: vec![RTCIceServer {
            urls: ice_servers.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }],
        bundle_policy: RTCBundlePolicy::MaxBundle,
        rtcp_mux_policy: RTCRtcpMuxPolicy::Require,
        ..Default::default()
    }
}

#[async_trait]
impl PeerLinkFactory for RtcLinkFactory {
    async fn create(
        &self,
        ice_servers: &[&str],
        events: UnboundedSender<LinkEvent>,
    ) -> Result<Box<dyn PeerLink>> {
        let pc = Arc::new(self.api.new_peer_connection(rtc_config(ice_servers)).await?);
        let link = RtcPeerLink {
            pc,
            tasks: Arc::new(Mutex::new(Vec::new())),
        };
        link.attach_handlers(events);
        Ok(Box::new(link))
    }
}

pub struct RtcPeerLink {
    pc: Arc<RTCPeerConnection>,
    /// Remote track watchers and RTCP readers, aborted on detach.
    tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl RtcPeerLink {
    fn attach_handlers(&self, events: UnboundedSender<LinkEvent>) {
        let ice_tx = events.clone();
        self.pc
            .on_ice_candidate(Box::new(move |cand: Option<RTCIceCandidate>| {
                // None marks the end of gathering; browsers don't relay it either
                if let Some(init) = cand.and_then(|c| c.to_json().ok()) {
                    let _ = ice_tx.send(LinkEvent::LocalCandidate(init.into()));
                }
                Box::pin(async {})
            }));

        let track_tx = events.clone();
        let tasks = self.tasks.clone();
        self.pc.on_track(Box::new(move |track: Arc<TrackRemote>, _, _| {
            let events = track_tx.clone();
            let tasks = tasks.clone();
            Box::pin(async move {
                let kind = match track.kind() {
                    RTPCodecType::Video => TrackKind::Video,
                    RTPCodecType::Audio => TrackKind::Audio,
                    _ => return,
                };
                info!(
                    "Remote {:?} track {} (stream {})",
                    kind,
                    track.id(),
                    track.stream_id()
                );
                let _ = events.send(LinkEvent::TrackAdded {
                    track_id: track.id().to_string(),
                    kind,
                    muted: true,
                });
                let watcher =
                    tokio::spawn(watch_remote_track(track, kind, REMOTE_MUTE_AFTER, events));
                tasks.lock().await.push(watcher);
            })
        }));

        self.pc.on_peer_connection_state_change(Box::new(
            move |st: RTCPeerConnectionState| {
                debug!("Peer connection state changed to: {st}");
                if let Some(state) = map_state(st) {
                    let _ = events.send(LinkEvent::StateChanged(state));
                }
                Box::pin(async {})
            },
        ));
    }
}

fn map_state(st: RTCPeerConnectionState) -> Option<ConnectionState> {
    Some(match st {
        RTCPeerConnectionState::New => ConnectionState::New,
        RTCPeerConnectionState::Connecting => ConnectionState::Connecting,
        RTCPeerConnectionState::Connected => ConnectionState::Connected,
        RTCPeerConnectionState::Disconnected => ConnectionState::Disconnected,
        RTCPeerConnectionState::Failed => ConnectionState::Failed,
        RTCPeerConnectionState::Closed => ConnectionState::Closed,
        _ => return None,
    })
}

impl TryFrom<SessionDescription> for RTCSessionDescription {
    type Error = CallError;

    fn try_from(desc: SessionDescription) -> Result<Self> {
        Ok(match desc.kind {
            SdpKind::Offer => RTCSessionDescription::offer(desc.sdp)?,
            SdpKind::Answer => RTCSessionDescription::answer(desc.sdp)?,
            SdpKind::Pranswer => RTCSessionDescription::pranswer(desc.sdp)?,
            SdpKind::Rollback => {
                return Err(CallError::negotiation("rollback is not supported"));
            }
        })
    }
}

impl TryFrom<RTCSessionDescription> for SessionDescription {
    type Error = CallError;

    fn try_from(desc: RTCSessionDescription) -> Result<Self> {
        let kind = match desc.sdp_type {
            RTCSdpType::Offer => SdpKind::Offer,
            RTCSdpType::Answer => SdpKind::Answer,
            RTCSdpType::Pranswer => SdpKind::Pranswer,
            RTCSdpType::Rollback => SdpKind::Rollback,
            other => {
                return Err(CallError::negotiation(format!(
                    "unexpected sdp type {other}"
                )))
            }
        };
        Ok(SessionDescription {
            kind,
            sdp: desc.sdp,
        })
    }
}

#[async_trait]
impl PeerLink for RtcPeerLink {
    async fn create_offer(&self) -> Result<SessionDescription> {
        self.pc.create_offer(None).await?.try_into()
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        self.pc.create_answer(None).await?.try_into()
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<()> {
        Ok(self.pc.set_local_description(desc.try_into()?).await?)
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()> {
        Ok(self.pc.set_remote_description(desc.try_into()?).await?)
    }

    async fn local_description(&self) -> Option<SessionDescription> {
        self.pc
            .local_description()
            .await
            .and_then(|d| d.try_into().ok())
    }

    async fn remote_description(&self) -> Option<SessionDescription> {
        self.pc
            .remote_description()
            .await
            .and_then(|d| d.try_into().ok())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        Ok(self.pc.add_ice_candidate(candidate.into()).await?)
    }

    async fn add_track(&self, track: &LocalTrack) -> Result<()> {
        let sender = self.pc.add_track(track.rtc_track()).await?;
        // RTCP has to be drained for the interceptors (NACK, reports) to work
        let reader = tokio::spawn(async move {
            let mut buf = vec![0u8; 1500];
            while sender.read(&mut buf).await.is_ok() {}
        });
        self.tasks.lock().await.push(reader);
        Ok(())
    }

    async fn sender_track_ids(&self) -> Vec<String> {
        let mut ids = Vec::new();
        for sender in self.pc.get_senders().await {
            if let Some(track) = sender.track().await {
                ids.push(track.id().to_owned());
            }
        }
        ids
    }

    fn is_closed(&self) -> bool {
        self.pc.connection_state() == RTCPeerConnectionState::Closed
            || self.pc.signaling_state() == RTCSignalingState::Closed
    }

    async fn detach_handlers(&self) {
        self.pc
            .on_ice_candidate(Box::new(|_: Option<RTCIceCandidate>| Box::pin(async {})));
        self.pc
            .on_track(Box::new(|_: Arc<TrackRemote>, _, _| Box::pin(async {})));
        self.pc
            .on_peer_connection_state_change(Box::new(|_: RTCPeerConnectionState| {
                Box::pin(async {})
            }));
        for task in self.tasks.lock().await.drain(..) {
            task.abort();
        }
    }

    async fn close(&self) -> Result<()> {
        Ok(self.pc.close().await?)
    }
}
