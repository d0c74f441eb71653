//! Datagram format of the UDP echo transport.
//!
//! # Packet Format
//!
//! ```text
//! ┌──────────────┬──────────┬──────────────┬──────────────┬──────────────┐
//! │    Magic     │   Kind   │  Client ID   │  Sequence    │   Payload    │
//! │   (4 bytes)  │ (1 byte) │  (4 bytes)   │  (8 bytes)   │  (variable)  │
//! └──────────────┴──────────┴──────────────┴──────────────┴──────────────┘
//! ```
//!
//! - **Magic**: 0x4E424531 ("NBE1" in ASCII) - identifies benchmark datagrams
//! - **Kind**: connect, accept, message or disconnect
//! - **Client ID**: sender (or addressee, for accept) of the datagram, big-endian
//! - **Sequence**: per-client message counter, big-endian
//! - **Payload**: message bytes, only present for messages
//!
//! # Examples
//!
//! ```
//! use netbench::transports::datagram::{create_packet, parse_packet, PacketKind};
//!
//! let packet = create_packet(PacketKind::Message, 3, 42, &[7u8; 32]);
//! let (header, payload) = parse_packet(&packet).expect("Invalid packet");
//! assert_eq!(header.kind, PacketKind::Message);
//! assert_eq!(header.client_id, 3);
//! assert_eq!(payload.len(), 32);
//! ```

const NETBENCH_MAGIC: u32 = 0x4E424531; // "NBE1" in ASCII

/// Purpose of a datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketKind {
    /// Client asks the server to accept it
    Connect,
    /// Server confirms a connect
    Accept,
    /// Echo request or reply
    Message,
    /// Client leaves
    Disconnect,
}

impl PacketKind {
    fn to_byte(self) -> u8 {
        match self {
            PacketKind::Connect => 1,
            PacketKind::Accept => 2,
            PacketKind::Message => 3,
            PacketKind::Disconnect => 4,
        }
    }

    fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(PacketKind::Connect),
            2 => Some(PacketKind::Accept),
            3 => Some(PacketKind::Message),
            4 => Some(PacketKind::Disconnect),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub kind: PacketKind,
    pub client_id: u32,
    pub sequence: u64,
}

impl PacketHeader {
    /// Size of the header in bytes
    pub const SIZE: usize = 17; // 4 (magic) + 1 (kind) + 4 (client) + 8 (sequence)

    pub fn new(kind: PacketKind, client_id: u32, sequence: u64) -> Self {
        Self {
            kind,
            client_id,
            sequence,
        }
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0u8; Self::SIZE];
        bytes[0..4].copy_from_slice(&NETBENCH_MAGIC.to_be_bytes());
        bytes[4] = self.kind.to_byte();
        bytes[5..9].copy_from_slice(&self.client_id.to_be_bytes());
        bytes[9..17].copy_from_slice(&self.sequence.to_be_bytes());
        bytes
    }

    /// Returns `None` for short buffers, foreign magic or unknown kinds.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < Self::SIZE {
            return None;
        }

        let magic = u32::from_be_bytes(bytes[0..4].try_into().ok()?);
        if magic != NETBENCH_MAGIC {
            return None;
        }

        let kind = PacketKind::from_byte(bytes[4])?;
        let client_id = u32::from_be_bytes(bytes[5..9].try_into().ok()?);
        let sequence = u64::from_be_bytes(bytes[9..17].try_into().ok()?);

        Some(Self {
            kind,
            client_id,
            sequence,
        })
    }
}

/// Builds a datagram from a header and payload.
pub fn create_packet(kind: PacketKind, client_id: u32, sequence: u64, payload: &[u8]) -> Vec<u8> {
    let header = PacketHeader::new(kind, client_id, sequence);
    let mut packet = Vec::with_capacity(PacketHeader::SIZE + payload.len());
    packet.extend_from_slice(&header.to_bytes());
    packet.extend_from_slice(payload);
    packet
}

/// Splits a datagram into header and payload.
pub fn parse_packet(packet: &[u8]) -> Option<(PacketHeader, &[u8])> {
    let header = PacketHeader::from_bytes(packet)?;
    Some((header, &packet[PacketHeader::SIZE..]))
}
