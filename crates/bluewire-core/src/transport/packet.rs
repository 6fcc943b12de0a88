//! HCI packets
//!
//! A reassembled wire unit: the discriminator-tagged envelope exactly as it
//! arrived, plus the consumer-side read cursor used for partial draining.

use serde::{Deserialize, Serialize};

use super::pool::PoolPermit;

/// HCI transport-layer packet kinds (H4 discriminator values).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PacketKind {
    /// HCI command, host to controller (0x01)
    Command,
    /// ACL data, bidirectional (0x02)
    AclData,
    /// SCO data, bidirectional (0x03)
    ScoData,
    /// HCI event, controller to host (0x04)
    Event,
    /// Loopback-mode traffic (0xFF)
    Loopback,
}

impl PacketKind {
    /// Classify a discriminator byte. `None` for values outside the H4 set.
    pub fn from_discriminator(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(PacketKind::Command),
            0x02 => Some(PacketKind::AclData),
            0x03 => Some(PacketKind::ScoData),
            0x04 => Some(PacketKind::Event),
            0xFF => Some(PacketKind::Loopback),
            _ => None,
        }
    }

    /// The wire discriminator byte for this kind.
    pub fn discriminator(&self) -> u8 {
        match self {
            PacketKind::Command => 0x01,
            PacketKind::AclData => 0x02,
            PacketKind::ScoData => 0x03,
            PacketKind::Event => 0x04,
            PacketKind::Loopback => 0xFF,
        }
    }
}

/// A complete reassembled packet awaiting consumption.
///
/// The payload is the full output envelope (discriminator and sub-header
/// included). `cursor + remaining() == payload.len()` always holds; a packet
/// whose remaining count reaches zero is dropped by its owner and never
/// requeued.
#[derive(Debug)]
pub struct HciPacket {
    kind: PacketKind,
    payload: Vec<u8>,
    cursor: usize,
    _permit: Option<PoolPermit>,
}

impl HciPacket {
    /// Create a packet from an already-assembled envelope.
    pub fn new(kind: PacketKind, payload: Vec<u8>) -> Self {
        Self {
            kind,
            payload,
            cursor: 0,
            _permit: None,
        }
    }

    /// Create a packet carrying a pool permit; the permit returns to its
    /// pool when the packet is dropped.
    pub(crate) fn with_permit(kind: PacketKind, payload: Vec<u8>, permit: PoolPermit) -> Self {
        Self {
            kind,
            payload,
            cursor: 0,
            _permit: Some(permit),
        }
    }

    /// The packet's wire-format kind.
    pub fn kind(&self) -> PacketKind {
        self.kind
    }

    /// The full envelope as read off the wire.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Bytes not yet consumed by partial reads.
    pub fn remaining(&self) -> usize {
        self.payload.len() - self.cursor
    }

    /// Whether every byte has been consumed.
    pub fn is_exhausted(&self) -> bool {
        self.cursor == self.payload.len()
    }

    /// Copy unconsumed bytes into `out`, advancing the read cursor. Returns
    /// the number of bytes copied: `min(remaining, out.len())`.
    pub fn copy_into(&mut self, out: &mut [u8]) -> usize {
        let n = self.remaining().min(out.len());
        out[..n].copy_from_slice(&self.payload[self.cursor..self.cursor + n]);
        self.cursor += n;
        n
    }
}
