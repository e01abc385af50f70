//! Wire message types for the p2p commands.
//!
//! Field names are the wire contract; the `Storable` impls spell out each
//! record's shape explicitly, in declaration order, and reject anything
//! the shape does not declare.

use std::fmt;
use std::net::Ipv4Addr;

use flakenet_storage::{
    section_array, sections_to_array, Result, Section, SectionReader, Storable, Value,
};

/// Command ids live in the 1000+ pool.
pub const COMMAND_HANDSHAKE: u32 = 1001;
pub const COMMAND_TIMED_SYNC: u32 = 1002;
pub const COMMAND_PING: u32 = 1003;
pub const COMMAND_SUPPORT_FLAGS: u32 = 1007;

/// The only address kind on the wire. IPv6 is deliberately unsupported;
/// the binary layout is preserved rather than extended.
pub const ADDRESS_KIND_IPV4: u8 = 1;

pub const PING_OK_STATUS: &str = "OK";

/// IPv4 endpoint plus the address-kind tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeAddress {
    /// Host-order IPv4 (first octet in the high byte).
    pub ip: u32,
    pub port: u16,
    pub kind: u8,
}

impl Default for NodeAddress {
    fn default() -> Self {
        Self {
            ip: 0,
            port: 0,
            kind: ADDRESS_KIND_IPV4,
        }
    }
}

impl NodeAddress {
    pub fn new(ip: Ipv4Addr, port: u16) -> Self {
        Self {
            ip: u32::from(ip),
            port,
            kind: ADDRESS_KIND_IPV4,
        }
    }

    pub fn ipv4(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.ip)
    }
}

impl fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ipv4(), self.port)
    }
}

impl Storable for NodeAddress {
    fn to_section(&self) -> Section {
        let mut endpoint = Section::new();
        endpoint.insert("m_ip", Value::U32(self.ip));
        endpoint.insert("m_port", Value::U16(self.port));

        let mut s = Section::new();
        s.insert("addr", Value::Object(endpoint));
        s.insert("type", Value::U8(self.kind));
        s
    }

    fn from_section(section: Section) -> Result<Self> {
        let mut r = SectionReader::new(section);
        let mut endpoint = SectionReader::new(r.take("addr")?.into_section()?);
        let out = Self {
            ip: endpoint.take("m_ip")?.as_u32()?,
            port: endpoint.take("m_port")?.as_u16()?,
            kind: r.take("type")?.as_u8()?,
        };
        endpoint.finish()?;
        r.finish()?;
        Ok(out)
    }
}

/// A gossiped peer: address, id, and when its advertiser last saw it.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PeerListEntry {
    pub address: NodeAddress,
    pub id: u64,
    pub last_seen: i64,
}

impl Storable for PeerListEntry {
    fn to_section(&self) -> Section {
        let mut s = Section::new();
        s.insert("adr", Value::Object(self.address.to_section()));
        s.insert("id", Value::U64(self.id));
        s.insert("last_seen", Value::I64(self.last_seen));
        s
    }

    fn from_section(section: Section) -> Result<Self> {
        let mut r = SectionReader::new(section);
        let out = Self {
            address: NodeAddress::from_section(r.take("adr")?.into_section()?)?,
            id: r.take("id")?.as_u64()?,
            last_seen: r.take("last_seen")?.as_i64()?,
        };
        r.finish()?;
        Ok(out)
    }
}

/// Anchor-tier record: first-seen instead of last-seen.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct AnchorPeerListEntry {
    pub address: NodeAddress,
    pub id: u64,
    pub first_seen: i64,
}

impl Storable for AnchorPeerListEntry {
    fn to_section(&self) -> Section {
        let mut s = Section::new();
        s.insert("adr", Value::Object(self.address.to_section()));
        s.insert("id", Value::U64(self.id));
        s.insert("first_seen", Value::I64(self.first_seen));
        s
    }

    fn from_section(section: Section) -> Result<Self> {
        let mut r = SectionReader::new(section);
        let out = Self {
            address: NodeAddress::from_section(r.take("adr")?.into_section()?)?,
            id: r.take("id")?.as_u64()?,
            first_seen: r.take("first_seen")?.as_i64()?,
        };
        r.finish()?;
        Ok(out)
    }
}

/// Identity a node presents during handshakes.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BasicNodeData {
    pub local_time: u64,
    pub my_port: u32,
    pub network_id: String,
    pub peer_id: u64,
}

impl Storable for BasicNodeData {
    fn to_section(&self) -> Section {
        let mut s = Section::new();
        s.insert("local_time", Value::U64(self.local_time));
        s.insert("my_port", Value::U32(self.my_port));
        s.insert("network_id", Value::text(&self.network_id));
        s.insert("peer_id", Value::U64(self.peer_id));
        s
    }

    fn from_section(section: Section) -> Result<Self> {
        let mut r = SectionReader::new(section);
        let out = Self {
            local_time: r.take("local_time")?.as_u64()?,
            my_port: r.take("my_port")?.as_u32()?,
            network_id: r.take("network_id")?.into_string()?,
            peer_id: r.take("peer_id")?.as_u64()?,
        };
        r.finish()?;
        Ok(out)
    }
}

/// Chain position a node advertises. `top_id` is 32 raw hash bytes
/// carried in a wire string.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CoreSyncData {
    pub cumulative_difficulty: u64,
    pub current_height: u64,
    pub top_id: Vec<u8>,
    pub top_version: u8,
}

impl Storable for CoreSyncData {
    fn to_section(&self) -> Section {
        let mut s = Section::new();
        s.insert(
            "cumulative_difficulty",
            Value::U64(self.cumulative_difficulty),
        );
        s.insert("current_height", Value::U64(self.current_height));
        s.insert("top_id", Value::String(self.top_id.clone()));
        s.insert("top_version", Value::U8(self.top_version));
        s
    }

    fn from_section(section: Section) -> Result<Self> {
        let mut r = SectionReader::new(section);
        let out = Self {
            cumulative_difficulty: r.take("cumulative_difficulty")?.as_u64()?,
            current_height: r.take("current_height")?.as_u64()?,
            top_id: r.take("top_id")?.into_bytes()?,
            top_version: r.take("top_version")?.as_u8()?,
        };
        r.finish()?;
        Ok(out)
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct HandshakeRequest {
    pub node_data: BasicNodeData,
    pub payload_data: CoreSyncData,
}

impl Storable for HandshakeRequest {
    fn to_section(&self) -> Section {
        let mut s = Section::new();
        s.insert("node_data", Value::Object(self.node_data.to_section()));
        s.insert("payload_data", Value::Object(self.payload_data.to_section()));
        s
    }

    fn from_section(section: Section) -> Result<Self> {
        let mut r = SectionReader::new(section);
        let out = Self {
            node_data: BasicNodeData::from_section(r.take("node_data")?.into_section()?)?,
            payload_data: CoreSyncData::from_section(r.take("payload_data")?.into_section()?)?,
        };
        r.finish()?;
        Ok(out)
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct HandshakeResponse {
    /// Legacy peer-list field; deprecated, always an empty string.
    pub deprecated_peerlist: String,
    pub peers: Vec<PeerListEntry>,
    pub node_data: BasicNodeData,
    pub payload_data: CoreSyncData,
}

impl Storable for HandshakeResponse {
    fn to_section(&self) -> Section {
        let mut s = Section::new();
        s.insert("local_peerlist", Value::text(&self.deprecated_peerlist));
        s.insert("local_peerlist_new", sections_to_array(&self.peers));
        s.insert("node_data", Value::Object(self.node_data.to_section()));
        s.insert("payload_data", Value::Object(self.payload_data.to_section()));
        s
    }

    fn from_section(section: Section) -> Result<Self> {
        let mut r = SectionReader::new(section);
        let out = Self {
            deprecated_peerlist: r.take("local_peerlist")?.into_string()?,
            peers: section_array(r.take("local_peerlist_new")?)?,
            node_data: BasicNodeData::from_section(r.take("node_data")?.into_section()?)?,
            payload_data: CoreSyncData::from_section(r.take("payload_data")?.into_section()?)?,
        };
        r.finish()?;
        Ok(out)
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct TimedSyncRequest {
    pub payload_data: CoreSyncData,
}

impl Storable for TimedSyncRequest {
    fn to_section(&self) -> Section {
        let mut s = Section::new();
        s.insert("payload_data", Value::Object(self.payload_data.to_section()));
        s
    }

    fn from_section(section: Section) -> Result<Self> {
        let mut r = SectionReader::new(section);
        let out = Self {
            payload_data: CoreSyncData::from_section(r.take("payload_data")?.into_section()?)?,
        };
        r.finish()?;
        Ok(out)
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct TimedSyncResponse {
    pub local_time: u64,
    pub payload_data: CoreSyncData,
    /// Legacy peer-list field; deprecated, always an empty string.
    pub deprecated_peerlist: String,
    pub peers: Vec<PeerListEntry>,
}

impl Storable for TimedSyncResponse {
    fn to_section(&self) -> Section {
        let mut s = Section::new();
        s.insert("local_time", Value::U64(self.local_time));
        s.insert("payload_data", Value::Object(self.payload_data.to_section()));
        s.insert("local_peerlist", Value::text(&self.deprecated_peerlist));
        s.insert("local_peerlist_new", sections_to_array(&self.peers));
        s
    }

    fn from_section(section: Section) -> Result<Self> {
        let mut r = SectionReader::new(section);
        let out = Self {
            local_time: r.take("local_time")?.as_u64()?,
            payload_data: CoreSyncData::from_section(r.take("payload_data")?.into_section()?)?,
            deprecated_peerlist: r.take("local_peerlist")?.into_string()?,
            peers: section_array(r.take("local_peerlist_new")?)?,
        };
        r.finish()?;
        Ok(out)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PingRequest;

impl Storable for PingRequest {
    fn to_section(&self) -> Section {
        Section::new()
    }

    fn from_section(section: Section) -> Result<Self> {
        SectionReader::new(section).finish()?;
        Ok(PingRequest)
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct PingResponse {
    pub status: String,
    pub peer_id: u64,
}

impl Storable for PingResponse {
    fn to_section(&self) -> Section {
        let mut s = Section::new();
        s.insert("status", Value::text(&self.status));
        s.insert("peer_id", Value::U64(self.peer_id));
        s
    }

    fn from_section(section: Section) -> Result<Self> {
        let mut r = SectionReader::new(section);
        let out = Self {
            status: r.take("status")?.into_string()?,
            peer_id: r.take("peer_id")?.as_u64()?,
        };
        r.finish()?;
        Ok(out)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SupportFlagsRequest;

impl Storable for SupportFlagsRequest {
    fn to_section(&self) -> Section {
        Section::new()
    }

    fn from_section(section: Section) -> Result<Self> {
        SectionReader::new(section).finish()?;
        Ok(SupportFlagsRequest)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SupportFlagsResponse {
    pub support_flags: u32,
}

impl Storable for SupportFlagsResponse {
    fn to_section(&self) -> Section {
        let mut s = Section::new();
        s.insert("support_flags", Value::U32(self.support_flags));
        s
    }

    fn from_section(section: Section) -> Result<Self> {
        let mut r = SectionReader::new(section);
        let out = Self {
            support_flags: r.take("support_flags")?.as_u32()?,
        };
        r.finish()?;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flakenet_storage::{from_bytes, to_bytes};

    fn entry(a: u8, b: u8, c: u8, d: u8, port: u16, last_seen: i64) -> PeerListEntry {
        PeerListEntry {
            address: NodeAddress::new(Ipv4Addr::new(a, b, c, d), port),
            id: u64::from(a) << 8 | u64::from(d),
            last_seen,
        }
    }

    #[test]
    fn test_address_display() {
        let address = NodeAddress::new(Ipv4Addr::new(188, 35, 187, 49), 12560);
        assert_eq!(address.to_string(), "188.35.187.49:12560");
        assert_eq!(address.ipv4(), Ipv4Addr::new(188, 35, 187, 49));
    }

    #[test]
    fn test_handshake_response_roundtrip() {
        let response = HandshakeResponse {
            deprecated_peerlist: String::new(),
            peers: vec![
                entry(188, 35, 187, 49, 12560, 1_700_000_000),
                entry(54, 244, 21, 125, 12560, 1_700_000_500),
            ],
            node_data: BasicNodeData {
                local_time: 1_700_000_600,
                my_port: 12560,
                network_id: "rnowflakenetwork".into(),
                peer_id: 0xdead_beef,
            },
            payload_data: CoreSyncData {
                cumulative_difficulty: 42,
                current_height: 1000,
                top_id: vec![0xab; 32],
                top_version: 7,
            },
        };
        let bytes = to_bytes(&response).unwrap();
        let back: HandshakeResponse = from_bytes(&bytes).unwrap();
        assert_eq!(back, response);
    }

    #[test]
    fn test_top_id_survives_raw_hash_bytes() {
        // top_id is not UTF-8; it must round-trip untouched.
        let sync = CoreSyncData {
            top_id: (0..32u8).map(|b| b.wrapping_mul(0xfb)).collect(),
            ..Default::default()
        };
        let bytes = to_bytes(&sync).unwrap();
        let back: CoreSyncData = from_bytes(&bytes).unwrap();
        assert_eq!(back.top_id, sync.top_id);
    }

    #[test]
    fn test_empty_request_shapes() {
        let bytes = to_bytes(&PingRequest).unwrap();
        let _: PingRequest = from_bytes(&bytes).unwrap();
        let bytes = to_bytes(&SupportFlagsRequest).unwrap();
        let _: SupportFlagsRequest = from_bytes(&bytes).unwrap();
    }

    #[test]
    fn test_timed_sync_roundtrip_with_empty_peerlist() {
        let response = TimedSyncResponse {
            local_time: 77,
            ..Default::default()
        };
        let bytes = to_bytes(&response).unwrap();
        let back: TimedSyncResponse = from_bytes(&bytes).unwrap();
        assert_eq!(back, response);
    }
}
