use std::fmt;
use std::str::FromStr;

use crate::error::CallError;

/// One of the two people allowed to use the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Participant {
    Alyona,
    Kolia,
}

impl Participant {
    pub fn name(self) -> &'static str {
        match self {
            Participant::Alyona => "alyona",
            Participant::Kolia => "kolia",
        }
    }

    /// The other person of the pair.
    pub fn other(self) -> Participant {
        match self {
            Participant::Alyona => Participant::Kolia,
            Participant::Kolia => Participant::Alyona,
        }
    }
}

impl fmt::Display for Participant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Participant {
    type Err = CallError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "alyona" => Ok(Participant::Alyona),
            "kolia" => Ok(Participant::Kolia),
            other => Err(CallError::UnknownParticipant(other.to_owned())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CallStatus {
    #[default]
    Idle,
    Waiting,
    Active,
}

/// Dashboard-level view of the session: who we are, whether the signaling
/// channel is up, and where the call stands.
#[derive(Debug, Clone)]
pub struct Session {
    pub identity: Participant,
    pub other: Participant,
    pub connected: bool,
    pub other_online: bool,
    pub status: CallStatus,
}

impl Session {
    pub fn new(identity: Participant) -> Self {
        Self {
            identity,
            other: identity.other(),
            connected: false,
            other_online: false,
            status: CallStatus::Idle,
        }
    }

    pub fn in_call(&self) -> bool {
        self.status != CallStatus::Idle
    }

    /// Joining requires a live signaling channel.
    pub fn can_join(&self) -> bool {
        self.connected && !self.in_call()
    }

    pub fn header(&self) -> String {
        match self.status {
            CallStatus::Idle => format!("Hi, {}!", self.identity),
            CallStatus::Waiting => format!("Waiting for {} to connect", self.other),
            CallStatus::Active => format!("In a call with {}", self.other),
        }
    }
}
