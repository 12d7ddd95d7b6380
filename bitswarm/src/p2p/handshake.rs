use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use super::PeerError;

pub const PROTOCOL: [u8; 19] = *b"BitTorrent protocol";

// Reserved-byte bits we set or inspect. Byte indices count from the first
// reserved byte (index 0) as sent on the wire.
const RESERVED_DHT_BIT: (usize, u8) = (7, 0x01); // BEP 5
const RESERVED_FAST_BIT: (usize, u8) = (7, 0x04); // BEP 6
const RESERVED_EXTENDED_BIT: (usize, u8) = (5, 0x10); // BEP 10

#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Handshake {
    pub protocol: [u8; 19],
    pub reserved: [u8; 8],
    pub info_hash: [u8; 20],
    pub peer_id: [u8; 20],
}

impl Handshake {
    pub fn new(info_hash: [u8; 20], peer_id: [u8; 20]) -> Self {
        let mut reserved = [0; 8];
        reserved[RESERVED_DHT_BIT.0] |= RESERVED_DHT_BIT.1;
        reserved[RESERVED_FAST_BIT.0] |= RESERVED_FAST_BIT.1;
        reserved[RESERVED_EXTENDED_BIT.0] |= RESERVED_EXTENDED_BIT.1;
        Self {
            protocol: PROTOCOL,
            reserved,
            info_hash,
            peer_id,
        }
    }

    pub fn supports_dht(&self) -> bool {
        self.reserved[RESERVED_DHT_BIT.0] & RESERVED_DHT_BIT.1 != 0
    }

    pub fn supports_fast(&self) -> bool {
        self.reserved[RESERVED_FAST_BIT.0] & RESERVED_FAST_BIT.1 != 0
    }

    pub fn supports_extended(&self) -> bool {
        self.reserved[RESERVED_EXTENDED_BIT.0] & RESERVED_EXTENDED_BIT.1 != 0
    }
}

pub struct HandshakeCodec;

impl Encoder<Handshake> for HandshakeCodec {
    type Error = PeerError;

    fn encode(&mut self, item: Handshake, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.put_u8(19);
        dst.extend_from_slice(&item.protocol);
        dst.extend_from_slice(&item.reserved);
        dst.extend_from_slice(&item.info_hash);
        dst.extend_from_slice(&item.peer_id);
        debug_assert_eq!(dst.len(), 68, "encoded handshake length is not 68 bytes");
        Ok(())
    }
}

impl Decoder for HandshakeCodec {
    type Item = Handshake;
    type Error = PeerError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.is_empty() {
            return Ok(None);
        }

        let mut peeker = std::io::Cursor::new(&src[..]);
        let protocol_len = peeker.get_u8();
        if protocol_len != 19 {
            return Err(PeerError::IncorrectProtocol);
        }

        if src.remaining() > 67 {
            src.advance(1);
        } else {
            return Ok(None);
        }

        let mut protocol = [0; 19];
        src.copy_to_slice(&mut protocol);

        let mut reserved = [0; 8];
        src.copy_to_slice(&mut reserved);

        let mut info_hash = [0; 20];
        src.copy_to_slice(&mut info_hash);

        let mut peer_id = [0; 20];
        src.copy_to_slice(&mut peer_id);

        Ok(Some(Handshake {
            protocol,
            reserved,
            info_hash,
            peer_id,
        }))
    }
}

impl std::fmt::Debug for Handshake {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handshake")
            .field("protocol", &String::from_utf8_lossy(&self.protocol))
            .field("reserved", &self.reserved)
            .field("info_hash", &hex::encode(self.info_hash))
            .field("peer_id", &String::from_utf8_lossy(&self.peer_id))
            .finish()
    }
}

// Seam for message stream encryption (BEP MSE / "obfuscation"). `bitter`
// never implemented this; we keep the negotiation policy (try encrypted,
// fall back to plaintext, unless forced either way by config) at the
// session layer and leave the actual crypto handshake as a trait so a
// concrete implementation can be dropped in without touching session code.
pub trait Encrypter: Send + Sync {
    fn wrap(
        &self,
        stream: tokio::net::TcpStream,
    ) -> std::pin::Pin<
        Box<dyn std::future::Future<Output = std::io::Result<tokio::net::TcpStream>> + Send>,
    >;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handshake_decoding() {
        let mut src = BytesMut::new();
        src.put_u8(19);
        src.extend_from_slice(b"BitTorrent protocol");
        src.extend_from_slice(&[0; 8]);
        src.extend_from_slice(&[0; 20]);
        src.extend_from_slice(&[0; 20]);

        let mut decoder = HandshakeCodec;
        let handshake = decoder.decode(&mut src).unwrap().unwrap();
        assert_eq!(handshake.protocol, *b"BitTorrent protocol");
        assert_eq!(handshake.reserved, [0; 8]);
        assert_eq!(handshake.info_hash, [0; 20]);
        assert_eq!(handshake.peer_id, [0; 20]);
    }

    #[test]
    fn test_handshake_decoding_with_incomplete_data() {
        let mut src = BytesMut::new();
        src.put_u8(19);
        src.extend_from_slice(b"BitTorrent protocol");
        let mut decoder = HandshakeCodec;
        let handshake = decoder.decode(&mut src);
        assert!(handshake.unwrap().is_none());
    }

    #[test]
    fn test_handshake_decoding_with_invalid_protocol_len() {
        let mut src = BytesMut::new();
        src.put_u8(20);
        src.extend_from_slice(b"Invalid protocol");
        src.extend_from_slice(&[0; 8]);
        src.extend_from_slice(&[0; 20]);
        src.extend_from_slice(&[0; 20]);

        let mut decoder = HandshakeCodec;
        let handshake = decoder.decode(&mut src);
        assert!(handshake.is_err());
    }

    #[test]
    fn test_handshake_decoding_with_extra_data() {
        let mut src = BytesMut::new();
        src.put_u8(19);
        src.extend_from_slice(b"BitTorrent protocol");
        src.extend_from_slice(&[0; 8]);
        src.extend_from_slice(&[0; 20]);
        src.extend_from_slice(&[0; 20]);
        src.extend_from_slice(&[0; 10]);

        let mut decoder = HandshakeCodec;
        let handshake = decoder.decode(&mut src);
        assert!(handshake.unwrap().is_some());
    }

    #[test]
    fn test_handshake_reserved_bits() {
        let hs = Handshake::new([1; 20], [2; 20]);
        assert!(hs.supports_dht());
        assert!(hs.supports_fast());
        assert!(hs.supports_extended());
    }
}
