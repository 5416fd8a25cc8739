// Application configuration.
// Logging defaults differ between debug and release builds; RUST_LOG always wins.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

#[cfg(debug_assertions)]
pub const DEFAULT_LOG_FILTER: &str = "duocall=debug,info";

#[cfg(not(debug_assertions))]
pub const DEFAULT_LOG_FILTER: &str = "duocall=info,warn";

/// Signaling backend used when neither `--server` nor `DUOCALL_SOCKET_URL` is set.
pub const DEFAULT_SOCKET_URL: &str = "https://nickly24-alyonaback-e4c2.twc1.net";

/// The only two identities allowed past login.
pub const ALLOWED_USERS: [&str; 2] = ["alyona", "kolia"];

/// Logical room every negotiation message is tagged with.
pub const ROOM_ID: &str = "call_room";

/// Public STUN endpoints; no TURN is configured.
pub const STUN_SERVERS: [&str; 2] = [
    "stun:stun.l.google.com:19302",
    "stun:stun1.l.google.com:19302",
];

/// A remote track without packets for this long is reported muted.
pub const REMOTE_MUTE_AFTER: Duration = Duration::from_millis(1500);

/// Command line of the `duocall` binary.
#[derive(Debug, Clone, Parser)]
#[command(name = "duocall", version, about = "Two-person WebRTC video call client")]
pub struct Args {
    /// Who you are: one of `alyona` or `kolia`.
    #[arg(long, short, env = "DUOCALL_USER")]
    pub user: String,

    /// Signaling server base URL (http, https, ws or wss).
    #[arg(long, env = "DUOCALL_SOCKET_URL", default_value = DEFAULT_SOCKET_URL)]
    pub server: String,

    /// IVF (VP8) file used as the camera.
    #[arg(long, env = "DUOCALL_VIDEO")]
    pub video: Option<PathBuf>,

    /// Ogg/Opus file used as the microphone.
    #[arg(long, env = "DUOCALL_AUDIO")]
    pub audio: Option<PathBuf>,

    /// Join the call as soon as the signaling channel is up.
    #[arg(long)]
    pub join: bool,
}
