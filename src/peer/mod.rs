pub mod connection;
pub mod coordinator;
pub mod ice;
pub mod media;
pub mod remote;
pub mod state;
pub mod types;

pub use connection::{PeerLink, PeerLinkFactory, RtcLinkFactory};
pub use coordinator::{NegotiationCoordinator, Wake};
pub use media::{FileDevices, LocalMedia, LocalTrack, MediaConstraints, MediaDevices};
pub use types::{CallFlags, IceCandidate, LinkEvent, LinkPhase, SessionDescription, TrackKind};
