// BEP 9 (ut_metadata): fetches a torrent's info dict from a single peer
// given only its info hash, the way a magnet link is resolved into a full
// `MetaInfo` before a `Torrent` is ever spawned. Deliberately standalone
// from `p2p::PeerSession` — it only needs a handshake and the extension
// protocol, not the full per-torrent wire state machine (picker, disk,
// choke), so it talks the wire protocol directly.
use std::net::SocketAddr;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use sha1::Digest;
use tokio::{net::TcpStream, time};
use tokio_util::codec::Framed;

use crate::{
    config::Config,
    p2p::{extension::*, handshake::*, message::*},
};

#[derive(thiserror::Error, Debug)]
pub enum InfoDownloaderError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("peer error: {0}")]
    Peer(String),

    #[error("bencode error: {0}")]
    Bencode(#[from] bencode::Error),

    #[error("peer did not advertise the extension protocol")]
    NoExtensionSupport,

    #[error("peer does not support ut_metadata")]
    NoMetadataSupport,

    #[error("peer rejected metadata piece {0}")]
    Rejected(u32),

    #[error("advertised metadata size {0} exceeds configured maximum")]
    TooLarge(u64),

    #[error("peer did not respond in time")]
    Timeout,

    #[error("downloaded info dict does not match the requested info hash")]
    HashMismatch,
}

type Result<T> = std::result::Result<T, InfoDownloaderError>;

// Connects to `address`, performs the BT handshake and BEP 10 extended
// handshake, then requests every ut_metadata piece sequentially and
// verifies the reassembled dict's SHA1 against `info_hash`. Returns the
// raw bencoded info dict bytes (not yet deserialized, so the caller can
// both hash and decode the exact bytes received).
pub async fn download(
    address: SocketAddr,
    info_hash: [u8; 20],
    client_id: [u8; 20],
    config: &Config,
) -> Result<Vec<u8>> {
    let stream = time::timeout(config.peer_connect_timeout, TcpStream::connect(address))
        .await
        .map_err(|_| InfoDownloaderError::Timeout)??;

    let mut handshake_io = Framed::new(stream, HandshakeCodec);
    let ours = Handshake::new(info_hash, client_id);
    handshake_io
        .send(ours)
        .await
        .map_err(|e| InfoDownloaderError::Peer(e.to_string()))?;

    let theirs = time::timeout(config.peer_handshake_timeout, handshake_io.next())
        .await
        .map_err(|_| InfoDownloaderError::Timeout)?
        .ok_or_else(|| InfoDownloaderError::Peer("connection closed during handshake".into()))?
        .map_err(|e| InfoDownloaderError::Peer(e.to_string()))?;

    if theirs.protocol != PROTOCOL || theirs.info_hash != info_hash {
        return Err(InfoDownloaderError::Peer("handshake mismatch".into()));
    }
    if !theirs.supports_extended() {
        return Err(InfoDownloaderError::NoExtensionSupport);
    }

    let mut io = Framed::new(handshake_io.into_inner(), MessageCodec);

    let our_handshake = ExtendedHandshake::ours(None).encode()?;
    io.send(Message::Extended { id: 0, payload: our_handshake })
        .await
        .map_err(|e| InfoDownloaderError::Peer(e.to_string()))?;

    let (peer_metadata_id, metadata_size) = negotiate(&mut io, config).await?;
    let metadata_size = metadata_size.ok_or(InfoDownloaderError::NoMetadataSupport)?;
    if metadata_size > config.max_metadata_size as u64 {
        return Err(InfoDownloaderError::TooLarge(metadata_size));
    }

    let num_pieces = (metadata_size as usize + METADATA_PIECE_LEN - 1) / METADATA_PIECE_LEN;
    let mut buf = vec![0u8; metadata_size as usize];

    for piece in 0..num_pieces as u32 {
        let request = MetadataMessage::request(piece).encode()?;
        io.send(Message::Extended { id: peer_metadata_id, payload: request })
            .await
            .map_err(|e| InfoDownloaderError::Peer(e.to_string()))?;

        let payload = recv_extended(&mut io, config).await?;
        let (msg, data) = MetadataMessage::decode(&payload)?;
        match msg.kind {
            MetadataMsgType::Reject => return Err(InfoDownloaderError::Rejected(msg.piece)),
            MetadataMsgType::Data => {
                let start = msg.piece as usize * METADATA_PIECE_LEN;
                let end = (start + data.len()).min(buf.len());
                if start >= buf.len() {
                    return Err(InfoDownloaderError::Peer("piece index out of range".into()));
                }
                buf[start..end].copy_from_slice(&data[..end - start]);
            }
            MetadataMsgType::Request => {
                // Peers don't request metadata from us mid-download; ignore.
            }
        }
    }

    let mut hasher = sha1::Sha1::new();
    hasher.update(&buf);
    let digest: [u8; 20] = hasher.finalize().into();
    if digest != info_hash {
        return Err(InfoDownloaderError::HashMismatch);
    }

    Ok(buf)
}

// Reads messages until the peer's extended handshake (id 0) arrives,
// ignoring any BT-core traffic (bitfield/have/etc.) a well-behaved seed
// may still send first.
async fn negotiate(
    io: &mut Framed<TcpStream, MessageCodec>,
    config: &Config,
) -> Result<(u8, Option<u64>)> {
    loop {
        let msg = time::timeout(config.peer_handshake_timeout, io.next())
            .await
            .map_err(|_| InfoDownloaderError::Timeout)?
            .ok_or_else(|| InfoDownloaderError::Peer("connection closed before extended handshake".into()))?
            .map_err(|e| InfoDownloaderError::Peer(e.to_string()))?;

        if let Message::Extended { id: 0, payload } = msg {
            return Ok(metadata_handshake_info(&payload)?);
        }
        // Anything else pre-negotiation (bitfield, have, keepalive) is
        // irrelevant to metadata fetching.
    }
}

async fn recv_extended(io: &mut Framed<TcpStream, MessageCodec>, config: &Config) -> Result<Bytes> {
    loop {
        let msg = time::timeout(config.request_timeout, io.next())
            .await
            .map_err(|_| InfoDownloaderError::Timeout)?
            .ok_or_else(|| InfoDownloaderError::Peer("connection closed mid-transfer".into()))?
            .map_err(|e| InfoDownloaderError::Peer(e.to_string()))?;

        if let Message::Extended { payload, .. } = msg {
            return Ok(Bytes::from(payload));
        }
    }
}
