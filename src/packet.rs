//! Wire packet framing.
//!
//! Every datagram is an 8-byte header (version, type, seqno, all network
//! byte order) followed by an opaque payload. There is no length field: the
//! payload length is the UDP datagram length minus the header size, handed
//! to us by the socket read.

use std::net::Ipv4Addr;

pub const VERSION: u16 = 1;
pub const MAX_PAYLOAD: usize = 1000;
pub const HEADER_LEN: usize = 8;

pub const MAX_RETRANS: u32 = 5;
pub const TIMEOUT_MS: u64 = 2000;
pub const WINDOW: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Peer {
    pub ip: Ipv4Addr,
    pub port: u16,
}

impl Peer {
    pub fn new(ip: Ipv4Addr, port: u16) -> Self {
        Peer { ip, port }
    }
}

impl std::fmt::Display for Peer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
    Data,
    Ack,
    Syn,
    Fin,
    /// Decoded but not one of the four known types. Dispatch drops these
    /// silently (see dispatcher).
    Unknown(u16),
}

impl PacketType {
    fn from_wire(v: u16) -> Self {
        match v {
            1 => PacketType::Data,
            2 => PacketType::Ack,
            4 => PacketType::Syn,
            5 => PacketType::Fin,
            other => PacketType::Unknown(other),
        }
    }

    fn to_wire(self) -> u16 {
        match self {
            PacketType::Data => 1,
            PacketType::Ack => 2,
            PacketType::Syn => 4,
            PacketType::Fin => 5,
            PacketType::Unknown(v) => v,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub kind: PacketType,
    pub seqno: u32,
    pub payload: Vec<u8>,
}

impl Packet {
    pub fn syn(seqno: u32) -> Self {
        Packet { kind: PacketType::Syn, seqno, payload: Vec::new() }
    }

    pub fn ack(seqno: u32) -> Self {
        Packet { kind: PacketType::Ack, seqno, payload: Vec::new() }
    }

    pub fn fin(seqno: u32) -> Self {
        Packet { kind: PacketType::Fin, seqno, payload: Vec::new() }
    }

    pub fn data(seqno: u32, payload: Vec<u8>) -> Self {
        Packet { kind: PacketType::Data, seqno, payload }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_LEN + self.payload.len());
        buf.extend_from_slice(&VERSION.to_be_bytes());
        buf.extend_from_slice(&self.kind.to_wire().to_be_bytes());
        buf.extend_from_slice(&self.seqno.to_be_bytes());
        buf.extend_from_slice(&self.payload);
        buf
    }

    /// Decode a raw datagram. Rejects undersized packets and packets whose
    /// version does not match; unknown types decode fine and are left for
    /// the dispatcher to silently drop.
    pub fn decode(bytes: &[u8]) -> Option<Packet> {
        if bytes.len() < HEADER_LEN {
            return None;
        }

        let version = u16::from_be_bytes([bytes[0], bytes[1]]);
        if version != VERSION {
            return None;
        }

        let kind = PacketType::from_wire(u16::from_be_bytes([bytes[2], bytes[3]]));
        let seqno = u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        let payload = bytes[HEADER_LEN..].to_vec();

        Some(Packet { kind, seqno, payload })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_data() {
        let p = Packet::data(42, b"hello".to_vec());
        let encoded = p.encode();
        assert_eq!(encoded.len(), HEADER_LEN + 5);
        let decoded = Packet::decode(&encoded).unwrap();
        assert_eq!(decoded, p);
    }

    #[test]
    fn roundtrip_control_packets() {
        for p in [Packet::syn(1), Packet::ack(2), Packet::fin(3)] {
            let decoded = Packet::decode(&p.encode()).unwrap();
            assert_eq!(decoded, p);
        }
    }

    #[test]
    fn rejects_undersized() {
        assert!(Packet::decode(&[0, 1, 0, 2, 0]).is_none());
        assert!(Packet::decode(&[]).is_none());
    }

    #[test]
    fn rejects_wrong_version() {
        let mut encoded = Packet::syn(1).encode();
        encoded[1] = 2; // version low byte -> version 2
        assert!(Packet::decode(&encoded).is_none());
    }

    #[test]
    fn unknown_type_decodes_but_is_tagged() {
        let mut encoded = Packet::syn(1).encode();
        encoded[2] = 0;
        encoded[3] = 99;
        let decoded = Packet::decode(&encoded).unwrap();
        assert_eq!(decoded.kind, PacketType::Unknown(99));
    }

    #[test]
    fn header_is_network_byte_order() {
        let p = Packet::data(0x0102_0304, vec![0xAA]);
        let encoded = p.encode();
        assert_eq!(&encoded[0..2], &VERSION.to_be_bytes());
        assert_eq!(&encoded[4..8], &0x0102_0304u32.to_be_bytes());
    }
}
