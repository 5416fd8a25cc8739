//! In-memory fakes for the coordinator's collaborators.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use duocall::error::{CallError, MediaError, MediaErrorKind, Result};
use duocall::peer::coordinator::NegotiationCoordinator;
use duocall::peer::media::{LocalMedia, LocalTrack, MediaConstraints, MediaDevices};
use duocall::peer::types::{IceCandidate, LinkEvent, SessionDescription, TrackKind};
use duocall::peer::{PeerLink, PeerLinkFactory};
use duocall::session::Participant;
use duocall::signaling::{OutboundSignal, SignalSink};
use tokio::sync::mpsc;

/// Everything a [`MockLink`] was asked to do.
#[derive(Debug, Default)]
pub struct LinkLog {
    pub offers_created: usize,
    pub answers_created: usize,
    /// Local tracks attached when the last answer was created.
    pub tracks_at_answer: Option<usize>,
    pub local: Option<SessionDescription>,
    pub remote: Option<SessionDescription>,
    pub remote_sets: usize,
    pub candidates: Vec<IceCandidate>,
    pub tracks: Vec<String>,
    pub detached: bool,
    pub closed: bool,
}

pub struct MockLink {
    label: &'static str,
    log: Arc<Mutex<LinkLog>>,
}

#[async_trait]
impl PeerLink for MockLink {
    async fn create_offer(&self) -> Result<SessionDescription> {
        let mut log = self.log.lock().unwrap();
        log.offers_created += 1;
        Ok(SessionDescription::offer(format!(
            "{}-offer-{}",
            self.label, log.offers_created
        )))
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        let mut log = self.log.lock().unwrap();
        if log.remote.is_none() {
            return Err(CallError::negotiation("no remote offer"));
        }
        log.answers_created += 1;
        log.tracks_at_answer = Some(log.tracks.len());
        Ok(SessionDescription::answer(format!(
            "{}-answer-{}",
            self.label, log.answers_created
        )))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<()> {
        self.log.lock().unwrap().local = Some(desc);
        Ok(())
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()> {
        let mut log = self.log.lock().unwrap();
        if log.closed {
            return Err(CallError::LinkClosed);
        }
        log.remote = Some(desc);
        log.remote_sets += 1;
        Ok(())
    }

    async fn local_description(&self) -> Option<SessionDescription> {
        self.log.lock().unwrap().local.clone()
    }

    async fn remote_description(&self) -> Option<SessionDescription> {
        self.log.lock().unwrap().remote.clone()
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        let mut log = self.log.lock().unwrap();
        if log.remote.is_none() {
            return Err(CallError::negotiation("remote description not set"));
        }
        log.candidates.push(candidate);
        Ok(())
    }

    async fn add_track(&self, track: &LocalTrack) -> Result<()> {
        self.log.lock().unwrap().tracks.push(track.id().to_owned());
        Ok(())
    }

    async fn sender_track_ids(&self) -> Vec<String> {
        self.log.lock().unwrap().tracks.clone()
    }

    fn is_closed(&self) -> bool {
        self.log.lock().unwrap().closed
    }

    async fn detach_handlers(&self) {
        self.log.lock().unwrap().detached = true;
    }

    async fn close(&self) -> Result<()> {
        self.log.lock().unwrap().closed = true;
        Ok(())
    }
}

/// Hands out [`MockLink`]s and keeps their logs and event senders.
pub struct MockFactory {
    label: &'static str,
    links: Mutex<Vec<Arc<Mutex<LinkLog>>>>,
    events: Mutex<Option<mpsc::UnboundedSender<LinkEvent>>>,
}

impl MockFactory {
    pub fn new(label: &'static str) -> Arc<Self> {
        Arc::new(Self {
            label,
            links: Mutex::new(Vec::new()),
            events: Mutex::new(None),
        })
    }

    pub fn link_count(&self) -> usize {
        self.links.lock().unwrap().len()
    }

    /// Log of the most recently created link.
    pub fn log(&self) -> Arc<Mutex<LinkLog>> {
        self.links
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("no link created yet")
    }

    /// Plays a transport callback into the coordinator's queue.
    pub fn fire(&self, event: LinkEvent) -> bool {
        match self.events.lock().unwrap().as_ref() {
            Some(tx) => tx.send(event).is_ok(),
            None => false,
        }
    }
}

#[async_trait]
impl PeerLinkFactory for MockFactory {
    async fn create(
        &self,
        ice_servers: &[&str],
        events: mpsc::UnboundedSender<LinkEvent>,
    ) -> Result<Box<dyn PeerLink>> {
        assert!(!ice_servers.is_empty());
        let log = Arc::new(Mutex::new(LinkLog::default()));
        self.links.lock().unwrap().push(log.clone());
        *self.events.lock().unwrap() = Some(events);
        Ok(Box::new(MockLink {
            label: self.label,
            log,
        }))
    }
}

/// Grants a camera and microphone, or refuses like a denied permission prompt.
pub struct MockDevices {
    deny: bool,
    delay: Option<Duration>,
}

impl MockDevices {
    pub fn granting() -> Arc<Self> {
        Arc::new(Self {
            deny: false,
            delay: None,
        })
    }

    pub fn denying() -> Arc<Self> {
        Arc::new(Self {
            deny: true,
            delay: None,
        })
    }

    /// Grants after `delay`, like a user taking a while on the prompt.
    pub fn slow(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            deny: false,
            delay: Some(delay),
        })
    }
}

#[async_trait]
impl MediaDevices for MockDevices {
    async fn get_user_media(
        &self,
        constraints: MediaConstraints,
    ) -> std::result::Result<LocalMedia, MediaError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.deny {
            return Err(MediaError::new(
                MediaErrorKind::PermissionDenied,
                "user dismissed the prompt",
            ));
        }
        let mut tracks = Vec::new();
        if constraints.video {
            tracks.push(LocalTrack::new(TrackKind::Video, "local"));
        }
        if constraints.audio {
            tracks.push(LocalTrack::new(TrackKind::Audio, "local"));
        }
        Ok(LocalMedia::new(tracks))
    }
}

#[derive(Default)]
pub struct RecordingSink {
    sent: Mutex<Vec<OutboundSignal>>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn sent(&self) -> Vec<OutboundSignal> {
        self.sent.lock().unwrap().clone()
    }

    /// Drains what was sent so far.
    pub fn take(&self) -> Vec<OutboundSignal> {
        std::mem::take(&mut *self.sent.lock().unwrap())
    }

    pub fn count(&self, event: &str) -> usize {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.event_name() == event)
            .count()
    }
}

impl SignalSink for RecordingSink {
    fn emit(&self, message: OutboundSignal) -> Result<()> {
        self.sent.lock().unwrap().push(message);
        Ok(())
    }
}

pub struct Harness {
    pub call: NegotiationCoordinator,
    pub factory: Arc<MockFactory>,
    pub sink: Arc<RecordingSink>,
}

pub fn harness(identity: Participant, devices: Arc<MockDevices>) -> Harness {
    let factory = MockFactory::new(identity.name());
    let sink = RecordingSink::new();
    let call = NegotiationCoordinator::new(identity, sink.clone(), factory.clone(), devices);
    Harness {
        call,
        factory,
        sink,
    }
}

impl Harness {
    /// Fires `event` and lets the coordinator process it.
    pub async fn deliver(&mut self, event: LinkEvent) {
        assert!(self.factory.fire(event), "no link to fire on");
        let wake = self.call.next_wake().await.expect("coordinator closed");
        self.call.handle_wake(wake).await;
    }
}

pub fn candidate(n: u16) -> IceCandidate {
    IceCandidate {
        candidate: format!("candidate:{n} 1 udp 2122260223 10.0.0.{n} 5000 typ host"),
        sdp_mid: Some("0".into()),
        sdp_mline_index: Some(0),
        username_fragment: None,
    }
}
