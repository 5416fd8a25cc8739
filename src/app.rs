//! Dashboard driver: owns the session and the current call, and feeds them
//! signaling events, user commands and link events one at a time.

use std::str::FromStr;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::config::ROOM_ID;
use crate::error::Result;
use crate::logger::log_flags;
use crate::peer::connection::PeerLinkFactory;
use crate::peer::coordinator::{NegotiationCoordinator, Wake};
use crate::peer::media::MediaDevices;
use crate::peer::types::{CallFlags, LinkPhase};
use crate::session::{CallStatus, Participant, Session};
use crate::signaling::{ChannelEvent, InboundSignal, OutboundSignal, SignalSink};

const DEFAULT_LEFT_MESSAGE: &str = "the other participant left the call";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Join,
    Leave,
    ToggleVideo,
    ToggleAudio,
    Status,
    Quit,
}

impl FromStr for Command {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "j" | "join" => Ok(Command::Join),
            "l" | "leave" => Ok(Command::Leave),
            "v" | "video" => Ok(Command::ToggleVideo),
            "a" | "audio" => Ok(Command::ToggleAudio),
            "s" | "status" => Ok(Command::Status),
            "q" | "quit" | "exit" => Ok(Command::Quit),
            other => Err(format!(
                "unknown command '{other}' (join, leave, video, audio, status, quit)"
            )),
        }
    }
}

pub struct App {
    session: Session,
    signaling: Arc<dyn SignalSink>,
    factory: Arc<dyn PeerLinkFactory>,
    devices: Arc<dyn MediaDevices>,
    call: Option<NegotiationCoordinator>,
    seen_flags: CallFlags,
    auto_join: bool,
    notice: Option<String>,
}

impl App {
    pub fn new(
        identity: Participant,
        signaling: Arc<dyn SignalSink>,
        factory: Arc<dyn PeerLinkFactory>,
        devices: Arc<dyn MediaDevices>,
    ) -> Self {
        Self {
            session: Session::new(identity),
            signaling,
            factory,
            devices,
            call: None,
            seen_flags: CallFlags::default(),
            auto_join: false,
            notice: None,
        }
    }

    /// Join the call room as soon as the channel is up.
    pub fn with_auto_join(mut self, auto_join: bool) -> Self {
        self.auto_join = auto_join;
        self
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn call(&self) -> Option<&NegotiationCoordinator> {
        self.call.as_ref()
    }

    pub fn call_mut(&mut self) -> Option<&mut NegotiationCoordinator> {
        self.call.as_mut()
    }

    /// Last message meant for the user, e.g. why the call ended.
    pub fn notice(&self) -> Option<&str> {
        self.notice.as_deref()
    }

    pub fn status_line(&self) -> String {
        let mut line = self.session.header();
        line.push_str(if self.session.connected {
            " [online]"
        } else {
            " [offline]"
        });
        if !self.session.in_call() {
            let presence = if self.session.other_online {
                "online"
            } else {
                "not seen yet"
            };
            line.push_str(&format!(" {} is {presence}", self.session.other));
        }
        if let Some(call) = &self.call {
            let flags = call.flags();
            line.push_str(&format!(
                " | camera {} | mic {} | remote video {} ({:?})",
                on_off(flags.local_video_enabled),
                on_off(flags.local_audio_enabled),
                on_off(flags.remote_video_present && flags.remote_video_enabled),
                flags.remote_orientation,
            ));
            if let Some(kind) = flags.media_error {
                line.push_str(" | ");
                line.push_str(kind.user_message());
            }
        }
        line
    }

    /// Runs until the user quits or the signaling channel is gone for good.
    pub async fn run(
        mut self,
        mut channel: mpsc::UnboundedReceiver<ChannelEvent>,
        mut commands: mpsc::UnboundedReceiver<Command>,
    ) -> Result<()> {
        loop {
            tokio::select! {
                event = channel.recv() => match event {
                    Some(ChannelEvent::Closed) | None => {
                        warn!("Signaling channel closed");
                        break;
                    }
                    Some(event) => self.handle_channel_event(event).await,
                },
                command = commands.recv() => match command {
                    Some(Command::Quit) | None => break,
                    Some(command) => self.handle_command(command).await,
                },
                wake = wake_of(&mut self.call) => {
                    if let Some(call) = self.call.as_mut() {
                        call.handle_wake(wake).await;
                    }
                }
            }
            self.report_flags();
        }
        self.shutdown().await;
        Ok(())
    }

    pub async fn handle_channel_event(&mut self, event: ChannelEvent) {
        match event {
            ChannelEvent::Connected => {
                info!("Signaling connected");
                self.session.connected = true;
                self.emit(OutboundSignal::UserLogin {
                    username: self.session.identity.to_string(),
                });
                if self.auto_join && self.session.can_join() {
                    self.auto_join = false;
                    self.join().await;
                }
            }
            ChannelEvent::Disconnected => {
                warn!("Signaling disconnected");
                self.session.connected = false;
            }
            ChannelEvent::Closed => {
                self.session.connected = false;
            }
            ChannelEvent::Signal(signal) => self.handle_signal(signal).await,
        }
    }

    pub async fn handle_signal(&mut self, signal: InboundSignal) {
        if signal.sender() == Some(self.session.identity.name()) {
            debug!("Ignoring own negotiation message");
            return;
        }

        match signal {
            InboundSignal::LoginSuccess(_) => info!("Logged in as {}", self.session.identity),
            InboundSignal::UserOnline { username } => {
                if username == self.session.other.name() {
                    info!("{username} is online");
                    self.session.other_online = true;
                }
            }
            InboundSignal::CallWaiting { is_initiator } => {
                self.session.status = CallStatus::Waiting;
                self.open_call()
                    .await
                    .handle_call_waiting(is_initiator.unwrap_or(false));
            }
            InboundSignal::CallStarted { is_initiator } => {
                self.session.status = CallStatus::Active;
                info!("Call started with {}", self.session.other);
                self.open_call()
                    .await
                    .handle_call_started(is_initiator.unwrap_or(false))
                    .await;
            }
            InboundSignal::UserLeftCall { message } => {
                let message = message.unwrap_or_else(|| DEFAULT_LEFT_MESSAGE.to_owned());
                info!("{message}");
                self.notice = Some(message);
                self.end_call().await;
            }
            InboundSignal::Offer { offer, .. } => match self.call.as_mut() {
                Some(call) => call.handle_remote_offer(offer).await,
                None => debug!("Not in a call, dropping offer"),
            },
            InboundSignal::Answer { answer, .. } => match self.call.as_mut() {
                Some(call) => call.handle_remote_answer(answer).await,
                None => debug!("Not in a call, dropping answer"),
            },
            InboundSignal::IceCandidate { candidate, .. } => match self.call.as_mut() {
                Some(call) => call.handle_remote_ice_candidate(candidate).await,
                None => debug!("Not in a call, dropping candidate"),
            },
            InboundSignal::Error(payload) => error!("Server error: {payload}"),
        }
    }

    pub async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Join => self.join().await,
            Command::Leave => self.leave().await,
            Command::ToggleVideo => match self.call.as_mut().and_then(|c| c.toggle_local_video()) {
                Some(enabled) => info!("Camera {}", on_off(enabled)),
                None => warn!("No camera track to toggle"),
            },
            Command::ToggleAudio => match self.call.as_mut().and_then(|c| c.toggle_local_audio()) {
                Some(enabled) => info!("Microphone {}", on_off(enabled)),
                None => warn!("No microphone track to toggle"),
            },
            Command::Status => println!("{}", self.status_line()),
            Command::Quit => {}
        }
    }

    async fn join(&mut self) {
        if !self.session.can_join() {
            warn!("Cannot join: not connected or already in a call");
            return;
        }
        self.notice = None;
        self.session.status = CallStatus::Waiting;
        self.open_call().await;
        self.emit(OutboundSignal::JoinCall {
            username: self.session.identity.to_string(),
        });
    }

    async fn leave(&mut self) {
        if !self.session.in_call() && self.call.is_none() {
            return;
        }
        self.emit(OutboundSignal::LeaveCall {
            username: self.session.identity.to_string(),
            room_id: ROOM_ID.to_owned(),
        });
        self.end_call().await;
    }

    /// The current call room, opened (with media requested) if needed. A
    /// coordinator whose link already closed is replaced.
    async fn open_call(&mut self) -> &mut NegotiationCoordinator {
        if self.call.as_ref().map(|c| c.phase()) == Some(LinkPhase::Closed) {
            if let Some(mut stale) = self.call.take() {
                stale.teardown().await;
            }
            self.report_reset();
        }
        let call = self.call.get_or_insert_with(|| {
            info!("Opening call room");
            NegotiationCoordinator::new(
                self.session.identity,
                self.signaling.clone(),
                self.factory.clone(),
                self.devices.clone(),
            )
        });
        call.start_local_media();
        call
    }

    async fn end_call(&mut self) {
        if let Some(mut call) = self.call.take() {
            call.teardown().await;
        }
        self.session.status = CallStatus::Idle;
        self.report_reset();
    }

    async fn shutdown(&mut self) {
        if self.session.in_call() && self.session.connected {
            self.emit(OutboundSignal::LeaveCall {
                username: self.session.identity.to_string(),
                room_id: ROOM_ID.to_owned(),
            });
        }
        if let Some(mut call) = self.call.take() {
            call.teardown().await;
        }
        info!("Bye");
    }

    fn report_flags(&mut self) {
        let Some(call) = &self.call else {
            return;
        };
        let now = call.flags();
        if now != self.seen_flags {
            log_flags(&self.seen_flags, &now);
            self.seen_flags = now;
        }
    }

    fn report_reset(&mut self) {
        let reset = CallFlags::default();
        if self.seen_flags != reset {
            log_flags(&self.seen_flags, &reset);
            self.seen_flags = reset;
        }
    }

    fn emit(&self, message: OutboundSignal) {
        if let Err(e) = self.signaling.emit(message) {
            warn!("Failed to send signaling message: {e}");
        }
    }
}

/// Next wake of the current call; never resolves without one.
async fn wake_of(call: &mut Option<NegotiationCoordinator>) -> Wake {
    if let Some(call) = call {
        if let Some(wake) = call.next_wake().await {
            return wake;
        }
    }
    std::future::pending().await
}

fn on_off(on: bool) -> &'static str {
    if on {
        "on"
    } else {
        "off"
    }
}
