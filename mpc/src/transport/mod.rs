mod multiparty;
mod shaper;

pub use multiparty::{connect_full_mesh, MultipartyTransport};
pub use shaper::{shaped_pipe, NetworkProfile, PipeClosed, ShapedReceiver, ShapedSender};

use std::{fmt, io};

use bytes::BytesMut;

/// Error type for the message bus.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportError {
    /// The peer's link is gone; the frame was not accepted.
    PeerUnreachable(usize),
    /// The peer's link closed while a receive was pending.
    Recv(usize),
    /// The peer delivered a malformed frame.
    Frame(usize),
    /// The bus was shut down.
    Closed,
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::PeerUnreachable(id) => write!(f, "Peer {} is unreachable", id),
            Self::Recv(id) => write!(f, "Link to peer {} closed while receiving", id),
            Self::Frame(id) => write!(f, "Malformed frame from peer {}", id),
            Self::Closed => write!(f, "Message bus closed"),
        }
    }
}

impl std::error::Error for TransportError {}

/// Payload encoding for messages carried by the bus. The transport frames
/// payloads with a length prefix and never interprets them.
pub trait Wire: Sized {
    fn encode(&self, dst: &mut BytesMut);
    fn decode(src: &[u8]) -> io::Result<Self>;
}
