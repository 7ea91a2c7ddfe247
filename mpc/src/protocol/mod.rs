mod message;
pub use message::{MessageKind, ProtocolMessage, PARTIAL_ROUND, SHARE_ROUND};

mod participant;
pub use participant::{Participant, ParticipantState, PrivatePoint};

use std::fmt;

use crate::group::GroupError;
use crate::transport::TransportError;

/// Protocol-level error. Any of these is fatal to the participant.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProtocolError {
    Group(GroupError),
    Transport(TransportError),
    Violation(&'static str),
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Group(err) => err.fmt(f),
            Self::Transport(err) => err.fmt(f),
            Self::Violation(msg) => write!(f, "Protocol violation: {}", msg),
        }
    }
}

impl std::error::Error for ProtocolError {}

impl From<GroupError> for ProtocolError {
    fn from(err: GroupError) -> Self {
        ProtocolError::Group(err)
    }
}

impl From<TransportError> for ProtocolError {
    fn from(err: TransportError) -> Self {
        ProtocolError::Transport(err)
    }
}

impl ProtocolError {
    /// Short tag used in run records.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Group(err) => err.kind(),
            Self::Transport(TransportError::Closed) => "BusClosed",
            Self::Transport(TransportError::Frame(_)) => "ProtocolViolation",
            Self::Transport(_) => "PeerUnreachable",
            Self::Violation(_) => "ProtocolViolation",
        }
    }
}
