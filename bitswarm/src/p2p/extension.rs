// BEP 10 extension protocol handshake plus the one extension we act on
// today: ut_pex (BEP 11). The ids below are the ones *we* assign in our
// own handshake; a peer addresses a message to us with whichever of these
// ids we advertised for that extension's name.
use std::{collections::HashMap, net::SocketAddr};

use serde_derive::{Deserialize, Serialize};

pub const UT_PEX: &str = "ut_pex";
pub const UT_PEX_LOCAL_ID: u8 = 1;

// BEP 9 metadata exchange, used to fetch a torrent's info dict over the
// wire for magnet links that only carry an info hash.
pub const UT_METADATA: &str = "ut_metadata";
pub const UT_METADATA_LOCAL_ID: u8 = 2;
pub const METADATA_PIECE_LEN: usize = 16 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ExtendedHandshake {
    pub m: HashMap<String, u8>,
    #[serde(rename = "metadata_size", skip_serializing_if = "Option::is_none")]
    pub metadata_size: Option<u64>,
    #[serde(rename = "v", skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl ExtendedHandshake {
    // `metadata_size` is only known once we already have the info dict, so
    // we advertise it to peers when seeding but send `None` while we are
    // ourselves still fetching it over ut_metadata.
    pub fn ours(metadata_size: Option<u64>) -> Self {
        let mut m = HashMap::new();
        m.insert(UT_PEX.to_string(), UT_PEX_LOCAL_ID);
        m.insert(UT_METADATA.to_string(), UT_METADATA_LOCAL_ID);
        Self { m, metadata_size, version: Some("bitswarm".to_string()) }
    }

    pub fn encode(&self) -> Result<Vec<u8>, bencode::Error> {
        bencode::to_bytes(self)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, bencode::Error> {
        bencode::from_bytes(bytes)
    }
}

// ut_pex payload: "added"/"added6" are compact peer strings, "added.f" is a
// flag byte per peer we don't act on, "dropped"/"dropped6" peers a peer has
// lost. We only decode the additions; BEP 11 leaves interpreting flags and
// acting on drops optional.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PexMessage {
    #[serde(rename = "added", with = "serde_bytes", skip_serializing_if = "Vec::is_empty", default)]
    pub added: Vec<u8>,
    #[serde(rename = "added.f", with = "serde_bytes", skip_serializing_if = "Vec::is_empty", default)]
    pub added_f: Vec<u8>,
    #[serde(rename = "dropped", with = "serde_bytes", skip_serializing_if = "Vec::is_empty", default)]
    pub dropped: Vec<u8>,
}

impl PexMessage {
    pub fn decode(bytes: &[u8]) -> Result<Self, bencode::Error> {
        bencode::from_bytes(bytes)
    }

    pub fn added_peers(&self) -> Vec<SocketAddr> {
        decode_compact_peers(&self.added)
    }
}

fn decode_compact_peers(bytes: &[u8]) -> Vec<SocketAddr> {
    bytes
        .chunks_exact(6)
        .map(|chunk| {
            let ip = std::net::Ipv4Addr::new(chunk[0], chunk[1], chunk[2], chunk[3]);
            let port = u16::from_be_bytes([chunk[4], chunk[5]]);
            SocketAddr::new(ip.into(), port)
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataMsgType {
    Request,
    Data,
    Reject,
}

impl MetadataMsgType {
    fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::Request),
            1 => Some(Self::Data),
            2 => Some(Self::Reject),
            _ => None,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            Self::Request => 0,
            Self::Data => 1,
            Self::Reject => 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct MetadataDict {
    msg_type: u8,
    piece: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    total_size: Option<u64>,
}

// ut_metadata (BEP 9) message: a bencoded dict of `{msg_type, piece,
// total_size?}` optionally followed by the raw bytes of the piece itself
// (`Data` only — the dict carries no length for them, so the boundary has
// to be found by scanning the bencoding).
#[derive(Debug, Clone)]
pub struct MetadataMessage {
    pub kind: MetadataMsgType,
    pub piece: u32,
}

impl MetadataMessage {
    pub fn request(piece: u32) -> Self {
        Self { kind: MetadataMsgType::Request, piece }
    }

    pub fn data(piece: u32) -> Self {
        Self { kind: MetadataMsgType::Data, piece }
    }

    pub fn reject(piece: u32) -> Self {
        Self { kind: MetadataMsgType::Reject, piece }
    }

    pub fn encode(&self) -> Result<Vec<u8>, bencode::Error> {
        bencode::to_bytes(&MetadataDict {
            msg_type: self.kind.as_u8(),
            piece: self.piece,
            total_size: None,
        })
    }

    // Splits a received ut_metadata extended payload into the message and
    // whatever trailing bytes follow the dict (the piece data, for `Data`).
    pub fn decode(payload: &[u8]) -> Result<(Self, &[u8]), bencode::Error> {
        let (dict_bytes, rest) = split_bencode_dict(payload)
            .ok_or_else(|| bencode::Error::Custom("truncated ut_metadata message".into()))?;
        let dict: MetadataDict = bencode::from_bytes(dict_bytes)?;
        let kind = MetadataMsgType::from_u8(dict.msg_type)
            .ok_or_else(|| bencode::Error::Custom(format!("unknown ut_metadata msg_type {}", dict.msg_type)))?;
        Ok((Self { kind, piece: dict.piece }, rest))
    }
}

// The peer's extended handshake arrives as `Extended { id: 0, .. }`; this
// reads its `metadata_size` and `m["ut_metadata"]` entries.
pub fn metadata_handshake_info(payload: &[u8]) -> Result<(u8, Option<u64>), bencode::Error> {
    let hs = ExtendedHandshake::decode(payload)?;
    let id = hs
        .m
        .get(UT_METADATA)
        .copied()
        .ok_or_else(|| bencode::Error::Custom("peer did not advertise ut_metadata".into()))?;
    Ok((id, hs.metadata_size))
}

// Scans a single bencoded value (string/int/list/dict) and returns its
// length in bytes, without fully deserializing it. Used to find where a
// ut_metadata dict ends and the trailing raw piece bytes begin.
fn bencode_value_len(buf: &[u8]) -> Option<usize> {
    match *buf.first()? {
        b'i' => {
            let end = buf.iter().position(|&b| b == b'e')?;
            Some(end + 1)
        }
        b'l' | b'd' => {
            let mut pos = 1;
            loop {
                if *buf.get(pos)? == b'e' {
                    return Some(pos + 1);
                }
                pos += bencode_value_len(&buf[pos..])?;
            }
        }
        b'0'..=b'9' => {
            let colon = buf.iter().position(|&b| b == b':')?;
            let len: usize = std::str::from_utf8(&buf[..colon]).ok()?.parse().ok()?;
            Some(colon + 1 + len)
        }
        _ => None,
    }
}

fn split_bencode_dict(buf: &[u8]) -> Option<(&[u8], &[u8])> {
    let len = bencode_value_len(buf)?;
    Some((&buf[..len], &buf[len..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extended_handshake_roundtrip() {
        let hs = ExtendedHandshake::ours(Some(1024));
        let bytes = hs.encode().unwrap();
        let decoded = ExtendedHandshake::decode(&bytes).unwrap();
        assert_eq!(decoded.m.get(UT_PEX), Some(&UT_PEX_LOCAL_ID));
    }

    #[test]
    fn test_metadata_handshake_advertises_both_extensions() {
        let hs = ExtendedHandshake::ours(Some(4096));
        assert_eq!(hs.m.get(UT_METADATA), Some(&UT_METADATA_LOCAL_ID));
        assert_eq!(hs.metadata_size, Some(4096));
    }

    #[test]
    fn test_metadata_message_request_roundtrip() {
        let msg = MetadataMessage::request(3);
        let bytes = msg.encode().unwrap();
        let (decoded, rest) = MetadataMessage::decode(&bytes).unwrap();
        assert_eq!(decoded.kind, MetadataMsgType::Request);
        assert_eq!(decoded.piece, 3);
        assert!(rest.is_empty());
    }

    #[test]
    fn test_metadata_message_data_splits_trailing_piece_bytes() {
        let dict = MetadataDict { msg_type: MetadataMsgType::Data.as_u8(), piece: 0, total_size: Some(32) };
        let mut payload = bencode::to_bytes(&dict).unwrap();
        let piece_bytes = vec![0xAB; 16 * 1024];
        payload.extend_from_slice(&piece_bytes);

        let (decoded, rest) = MetadataMessage::decode(&payload).unwrap();
        assert_eq!(decoded.kind, MetadataMsgType::Data);
        assert_eq!(decoded.piece, 0);
        assert_eq!(rest, &piece_bytes[..]);
    }

    #[test]
    fn test_metadata_message_reject() {
        let msg = MetadataMessage::reject(7);
        let bytes = msg.encode().unwrap();
        let (decoded, rest) = MetadataMessage::decode(&bytes).unwrap();
        assert_eq!(decoded.kind, MetadataMsgType::Reject);
        assert_eq!(decoded.piece, 7);
        assert!(rest.is_empty());
    }

    #[test]
    fn test_split_bencode_dict_on_nested_value() {
        let dict = MetadataDict { msg_type: 1, piece: 2, total_size: Some(99) };
        let mut buf = bencode::to_bytes(&dict).unwrap();
        let trailer = b"trailing-bytes";
        buf.extend_from_slice(trailer);
        let (dict_bytes, rest) = split_bencode_dict(&buf).unwrap();
        assert_eq!(rest, trailer);
        let redecoded: MetadataDict = bencode::from_bytes(dict_bytes).unwrap();
        assert_eq!(redecoded.piece, 2);
    }

    #[test]
    fn test_metadata_handshake_info_reads_peer_m_entry() {
        let hs = ExtendedHandshake::ours(Some(2048));
        let bytes = hs.encode().unwrap();
        let (id, size) = metadata_handshake_info(&bytes).unwrap();
        assert_eq!(id, UT_METADATA_LOCAL_ID);
        assert_eq!(size, Some(2048));
    }

    #[test]
    fn test_pex_decode_added_peers() {
        let mut added = Vec::new();
        added.extend_from_slice(&[127, 0, 0, 1]);
        added.extend_from_slice(&6881u16.to_be_bytes());
        let msg = PexMessage { added, added_f: vec![0], dropped: Vec::new() };
        let bytes = bencode::to_bytes(&msg).unwrap();
        let decoded = PexMessage::decode(&bytes).unwrap();
        assert_eq!(
            decoded.added_peers(),
            vec![SocketAddr::from(([127, 0, 0, 1], 6881))]
        );
    }
}
