use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::{
    block::{Block, BlockData, BlockRequest},
    Bitfield,
};

use super::PeerError;

// BEP 3 core messages plus the BEP 6 (fast extension) and BEP 10 (extension
// protocol) messages needed for allowed-fast piece picking, reject
// notifications, and ut_metadata/ut_pex. Unknown extended message ids are
// not decoded further here: `Extended` carries the raw payload and the
// session dispatches on `extended_id` using the mapping learned from the
// peer's handshake.
#[cfg_attr(test, derive(Debug, Clone, PartialEq, Eq))]
pub enum Message {
    KeepAlive,
    Choke,
    Unchoke,
    Interested,
    NotInterested,
    Have { idx: u32 },
    Bitfield(Bitfield),
    Request(BlockRequest),
    Block(Block),
    Cancel(BlockRequest),
    Port { port: u32 },

    // BEP 6 fast extension.
    HaveAll,
    HaveNone,
    Suggest { idx: u32 },
    Reject(BlockRequest),
    AllowedFast { idx: u32 },

    // BEP 10 extension protocol. `id` is the local extended message id
    // assigned during the handshake; `payload` is the bencoded body.
    Extended { id: u8, payload: Vec<u8> },
}

pub struct MessageCodec;

impl Encoder<Message> for MessageCodec {
    type Error = PeerError;

    fn encode(&mut self, msg: Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        match msg {
            Message::KeepAlive => dst.put_u32(0),

            Message::Choke => {
                dst.put_u32(1);
                dst.put_u8(0);
            }
            Message::Unchoke => {
                dst.put_u32(1);
                dst.put_u8(1);
            }
            Message::Interested => {
                dst.put_u32(1);
                dst.put_u8(2);
            }
            Message::NotInterested => {
                dst.put_u32(1);
                dst.put_u8(3);
            }

            // have: <len=0005><id=4><piece index>
            Message::Have { idx } => {
                dst.put_u32(5);
                dst.put_u8(4);
                dst.put_u32(idx);
            }

            // bitfield: <len=0001+X><id=5><bitfield>
            Message::Bitfield(bitfield) => {
                let raw = bitfield.as_raw_slice();
                dst.put_u32(1 + raw.len() as u32);
                dst.put_u8(5);
                dst.extend_from_slice(raw);
            }

            // request: <len=0013><id=6><index><begin><length>
            Message::Request(block) => {
                dst.put_u32(13);
                dst.put_u8(6);
                dst.put_u32(block.piece_idx as u32);
                dst.put_u32(block.offset as u32);
                dst.put_u32(block.len as u32);
            }

            // piece: <len=0009+X><id=7><index><begin><block>
            Message::Block(block) => {
                dst.put_u32(9 + block.data.len() as u32);
                dst.put_u8(7);
                dst.put_u32(block.piece_idx as u32);
                dst.put_u32(block.offset as u32);
                dst.extend_from_slice(&block.data);
            }

            // cancel: <len=0013><id=8><index><begin><length>
            Message::Cancel(block) => {
                dst.put_u32(13);
                dst.put_u8(8);
                dst.put_u32(block.piece_idx as u32);
                dst.put_u32(block.offset as u32);
                dst.put_u32(block.len as u32);
            }

            // port: <len=0003><id=9><listen-port>
            Message::Port { port } => {
                dst.put_u32(3);
                dst.put_u8(9);
                dst.put_u32(port);
            }

            // have all/none: <len=0001><id=14/15>
            Message::HaveAll => {
                dst.put_u32(1);
                dst.put_u8(14);
            }
            Message::HaveNone => {
                dst.put_u32(1);
                dst.put_u8(15);
            }

            // suggest piece: <len=0005><id=13><piece index>
            Message::Suggest { idx } => {
                dst.put_u32(5);
                dst.put_u8(13);
                dst.put_u32(idx);
            }

            // reject request: <len=0013><id=16><index><begin><length>
            Message::Reject(block) => {
                dst.put_u32(13);
                dst.put_u8(16);
                dst.put_u32(block.piece_idx as u32);
                dst.put_u32(block.offset as u32);
                dst.put_u32(block.len as u32);
            }

            // allowed fast: <len=0005><id=17><piece index>
            Message::AllowedFast { idx } => {
                dst.put_u32(5);
                dst.put_u8(17);
                dst.put_u32(idx);
            }

            // extended: <len=0002+X><id=20><extended id><payload>
            Message::Extended { id, payload } => {
                dst.put_u32(2 + payload.len() as u32);
                dst.put_u8(20);
                dst.put_u8(id);
                dst.extend_from_slice(&payload);
            }
        }

        Ok(())
    }
}

impl Decoder for MessageCodec {
    type Item = Message;
    type Error = PeerError;

    fn decode(&mut self, src: &mut bytes::BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.remaining() < 4 {
            return Ok(None);
        }

        let mut peeker = std::io::Cursor::new(&src);
        let msg_len: usize = peeker.get_u32() as usize;
        peeker.set_position(0);

        if src.remaining() >= 4 + msg_len {
            src.advance(4);
            if msg_len == 0 {
                return Ok(Some(Message::KeepAlive));
            }
        } else {
            return Ok(None);
        }

        let msg = match src.get_u8() {
            0 => Message::Choke,
            1 => Message::Unchoke,
            2 => Message::Interested,
            3 => Message::NotInterested,
            4 => Message::Have { idx: src.get_u32() },
            5 => {
                let mut bitfield = vec![0; msg_len - 1];
                src.copy_to_slice(&mut bitfield);
                Message::Bitfield(Bitfield::from_vec(bitfield))
            }
            6 => {
                let piece_idx = src.get_u32() as usize;
                let offset = src.get_u32() as usize;
                let len = src.get_u32() as usize;
                Message::Request(BlockRequest { piece_idx, offset, len })
            }
            7 => {
                let piece_idx = src.get_u32() as usize;
                let offset = src.get_u32() as usize;
                let mut data = vec![0; msg_len - 9];
                src.copy_to_slice(&mut data);
                Message::Block(Block {
                    piece_idx,
                    offset,
                    data: BlockData::Owned(data),
                })
            }
            8 => {
                let piece_idx = src.get_u32() as usize;
                let offset = src.get_u32() as usize;
                let len = src.get_u32() as usize;
                Message::Cancel(BlockRequest { piece_idx, offset, len })
            }
            9 => Message::Port { port: src.get_u32() },
            13 => Message::Suggest { idx: src.get_u32() },
            14 => Message::HaveAll,
            15 => Message::HaveNone,
            16 => {
                let piece_idx = src.get_u32() as usize;
                let offset = src.get_u32() as usize;
                let len = src.get_u32() as usize;
                Message::Reject(BlockRequest { piece_idx, offset, len })
            }
            17 => Message::AllowedFast { idx: src.get_u32() },
            20 => {
                let id = src.get_u8();
                let mut payload = vec![0; msg_len - 2];
                src.copy_to_slice(&mut payload);
                Message::Extended { id, payload }
            }
            id => {
                tracing::warn!("invalid message id: {}", id);
                return Err(PeerError::InvalidMessageId(id));
            }
        };

        Ok(Some(msg))
    }
}

impl std::fmt::Display for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Message::KeepAlive => write!(f, "keep alive"),
            Message::Choke => write!(f, "choke"),
            Message::Unchoke => write!(f, "unchoke"),
            Message::Interested => write!(f, "interested"),
            Message::NotInterested => write!(f, "not interested"),
            Message::Have { idx } => write!(f, "have piece idx: {}", idx),
            Message::Bitfield(bf) => write!(f, "bitfield with {} pieces", bf.count_ones()),
            Message::Request(block) => write!(
                f,
                "request for block {{ piece idx: {}, offset {}, length: {} }}",
                block.piece_idx, block.offset, block.len,
            ),
            Message::Block(block) => write!(
                f,
                "block data {{ piece idx: {}, offset: {}, length: {} }}",
                block.piece_idx,
                block.offset,
                block.data.len(),
            ),
            Message::Cancel(block) => write!(
                f,
                "cancel for block {{ piece idx: {}, offset: {}, length: {} }}",
                block.piece_idx, block.offset, block.len
            ),
            Message::Port { port } => write!(f, "port {}", port),
            Message::HaveAll => write!(f, "have all"),
            Message::HaveNone => write!(f, "have none"),
            Message::Suggest { idx } => write!(f, "suggest piece idx: {}", idx),
            Message::Reject(block) => write!(
                f,
                "reject for block {{ piece idx: {}, offset: {}, length: {} }}",
                block.piece_idx, block.offset, block.len
            ),
            Message::AllowedFast { idx } => write!(f, "allowed fast piece idx: {}", idx),
            Message::Extended { id, payload } => {
                write!(f, "extended id: {}, {} bytes", id, payload.len())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitvec::prelude::*;
    use bytes::BytesMut;

    #[test]
    fn test_msg_stream() {
        let mut out_buf = BytesMut::new();
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&[0, 0, 0, 0]);
        buf.extend_from_slice(&[0, 0, 0, 1, 0]);
        buf.extend_from_slice(&[0, 0, 0, 1, 1]);
        buf.extend_from_slice(&[0, 0, 0, 1, 2]);
        buf.extend_from_slice(&[0, 0, 0, 1, 3]);
        buf.extend_from_slice(&[0, 0, 0, 5, 4, 0, 0, 0, 0xb]);
        buf.extend_from_slice(&[0, 0, 0, 4, 5, 0x1, 0x2, 0x3]);
        buf.extend_from_slice(&[0, 0, 0, 0xd, 0x6, 0, 0, 0, 0xb, 0, 0x13, 0x40, 0, 0, 0, 0x40, 0]);
        buf.extend_from_slice(&[0, 0, 0, 12, 0x7, 0, 0, 0, 0xb, 0, 0x13, 0x40, 0, 0x1, 0x2, 0x3]);

        let expected = [
            Message::KeepAlive,
            Message::Choke,
            Message::Unchoke,
            Message::Interested,
            Message::NotInterested,
            Message::Have { idx: 0xb },
            Message::Bitfield(BitVec::<u8, Msb0>::from_slice(&[0x1, 0x2, 0x3])),
            Message::Request(BlockRequest { piece_idx: 0xb, offset: 0x134000, len: 0x4000 }),
            Message::Block(Block {
                piece_idx: 0xb,
                offset: 0x134000,
                data: BlockData::Owned(vec![0x1, 0x2, 0x3]),
            }),
        ];
        let expected_buf = buf.clone();

        for msg in expected.into_iter() {
            MessageCodec.encode(msg.clone(), &mut out_buf).unwrap();
            let decoded = MessageCodec.decode(&mut buf).unwrap().unwrap();
            assert_eq!(decoded, msg, "decoded message does not match expected");
        }

        assert_eq!(out_buf, expected_buf, "encoded stream does not match expected");
    }

    #[test]
    fn test_msg_decode_chunked() {
        let mut buf = BytesMut::new();

        buf.extend_from_slice(&[0, 0, 0]);
        let decoded = MessageCodec.decode(&mut buf).unwrap();
        assert_eq!(decoded, None);
        buf.extend_from_slice(&[1, 2]);
        let decoded = MessageCodec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, Message::Interested);

        buf.extend_from_slice(&[0, 0, 0, 12, 0x7, 0, 0, 0, 0xb, 0, 0x13, 0x40, 0, 0x1]);
        let decoded = MessageCodec.decode(&mut buf).unwrap();
        assert_eq!(decoded, None);
        buf.extend_from_slice(&[0x2, 0x3]);
        let decoded = MessageCodec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(
            decoded,
            Message::Block(Block {
                piece_idx: 0xb,
                offset: 0x134000,
                data: BlockData::Owned(vec![0x1, 0x2, 0x3]),
            })
        );
    }

    #[test]
    fn test_msg_decode_empty() {
        let mut src = BytesMut::new();
        let mut codec = MessageCodec;
        let message = codec.decode(&mut src).unwrap();
        assert_eq!(message, None);
    }

    #[test]
    fn test_msg_decode_incomplete_message() {
        let mut src = BytesMut::from(&[0u8, 1, 2][..]);
        let mut codec = MessageCodec;
        let message = codec.decode(&mut src).unwrap();
        assert_eq!(message, None);
    }

    #[test]
    fn test_msg_decode_invalid_id() {
        let mut src = BytesMut::from(&[0u8, 0, 0, 1, 255][..]);
        let mut codec = MessageCodec;
        let result = codec.decode(&mut src);
        match result {
            Ok(_) => panic!("Expected an error, but got Ok(_)"),
            Err(e) => match e {
                PeerError::InvalidMessageId(id) => assert_eq!(id, 255),
                _ => panic!("Expected PeerError::InvalidMessageId, but got a different error"),
            },
        }
    }

    #[test]
    fn test_msg_fast_extension_roundtrip() {
        let mut buf = BytesMut::new();
        let msgs = [
            Message::HaveAll,
            Message::HaveNone,
            Message::Suggest { idx: 4 },
            Message::AllowedFast { idx: 9 },
            Message::Reject(BlockRequest { piece_idx: 2, offset: 0, len: 16384 }),
        ];
        for msg in msgs {
            MessageCodec.encode(msg.clone(), &mut buf).unwrap();
            let decoded = MessageCodec.decode(&mut buf).unwrap().unwrap();
            assert_eq!(decoded, msg);
        }
    }

    #[test]
    fn test_msg_extended_roundtrip() {
        let mut buf = BytesMut::new();
        let msg = Message::Extended { id: 1, payload: vec![b'd', b'e'] };
        MessageCodec.encode(msg.clone(), &mut buf).unwrap();
        let decoded = MessageCodec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, msg);
    }
}
