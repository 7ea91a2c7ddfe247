use std::io;

use bytes::{BufMut, BytesMut};

use crate::transport::Wire;

/// Round tag carried by SHARE messages.
pub const SHARE_ROUND: u8 = 1;
/// Round tag carried by PARTIAL messages.
pub const PARTIAL_ROUND: u8 = 2;

/// Kind of protocol message.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MessageKind {
    Share = 1,
    Partial = 2,
}

impl MessageKind {
    fn from_wire(raw: u8) -> Option<Self> {
        match raw {
            1 => Some(Self::Share),
            2 => Some(Self::Partial),
            _ => None,
        }
    }
}

/// Message exchanged between participants.
///
/// Wire layout (inside the transport's length-prefixed frame): kind byte,
/// round byte, big-endian u16 sender ID, then the scalar as big-endian bytes
/// of the group's fixed scalar width.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProtocolMessage {
    pub kind: MessageKind,
    pub round: u8,
    pub sender: u16,
    pub value: Vec<u8>,
}

impl ProtocolMessage {
    /// Round-1 additive share addressed to one peer.
    pub fn share(sender: u16, value: Vec<u8>) -> Self {
        ProtocolMessage {
            kind: MessageKind::Share,
            round: SHARE_ROUND,
            sender,
            value,
        }
    }

    /// Round-2 Lagrange-weighted partial, broadcast to all peers.
    pub fn partial(sender: u16, value: Vec<u8>) -> Self {
        ProtocolMessage {
            kind: MessageKind::Partial,
            round: PARTIAL_ROUND,
            sender,
            value,
        }
    }
}

impl Wire for ProtocolMessage {
    fn encode(&self, dst: &mut BytesMut) {
        dst.put_u8(self.kind as u8);
        dst.put_u8(self.round);
        dst.put_u16(self.sender);
        dst.put_slice(&self.value);
    }

    fn decode(src: &[u8]) -> io::Result<Self> {
        if src.len() < 4 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "message header truncated",
            ));
        }
        let kind = MessageKind::from_wire(src[0])
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "unknown message kind"))?;
        Ok(ProtocolMessage {
            kind,
            round: src[1],
            sender: u16::from_be_bytes([src[2], src[3]]),
            value: src[4..].to_vec(),
        })
    }
}
