use std::{net::SocketAddr, sync::Arc};

use tokio::{sync::mpsc, task::JoinHandle};
use tracing::Instrument;

use crate::{block::Block, torrent::TorrentContext};

pub(crate) mod extension;
pub(crate) mod handshake;
pub(crate) mod message;
mod session;
pub mod state;

pub use handshake::Encrypter;
pub use session::PeerSession;
pub use state::PeerSource;
use state::SessionState;

type Result<T> = std::result::Result<T, PeerError>;
type PeerRx = mpsc::UnboundedReceiver<PeerCommand>;
pub type PeerTx = mpsc::UnboundedSender<PeerCommand>;

#[derive(thiserror::Error, Debug)]
pub enum PeerError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("handshake provided incorrect protocol")]
    IncorrectProtocol,

    #[error("handshake provided incorrect info-hash")]
    IncorrectInfoHash,

    #[error("no handshake recieved")]
    NoHandshake,

    #[error("invalid message ID: {0}")]
    InvalidMessageId(u8),

    #[error("bitfield sent before handshake")]
    UnexpectedBitfield,

    #[error("invalid message payload")]
    InvalidMessage,

    #[error("connection timeout")]
    Timeout,

    #[error("channel to torrent loop closed")]
    ChannelClosed,
}

impl<T> From<mpsc::error::SendError<T>> for PeerError {
    fn from(_: mpsc::error::SendError<T>) -> Self {
        PeerError::ChannelClosed
    }
}

// Commands that can be sent to a peer.
pub enum PeerCommand {
    // Tell the peer we got a piece (piece idx).
    PieceWritten(usize),

    // Block read from disk.
    BlockRead(Block),

    // Unchoker decided to start/stop serving this peer.
    Choke,
    Unchoke,

    Shutdown,
}

#[derive(Debug)]
pub struct PeerHandle {
    // Sends commands to the torrent.
    pub peer_tx: PeerTx,

    // Handle to the peer session.
    pub session_handle: JoinHandle<()>,

    // Tracks the state of the peer session.
    pub state: SessionState,

    // Where this peer's address was learned from.
    pub source: PeerSource,

    // Set once the handshake completes; used to reject a second connection
    // claiming an already-connected peer ID.
    pub id: Option<[u8; 20]>,
}

impl PeerHandle {
    pub fn start_session(
        address: SocketAddr,
        ctx: Arc<TorrentContext>,
        socket: Option<tokio::net::TcpStream>,
        source: PeerSource,
    ) -> Self {
        let (mut session, peer_tx) = PeerSession::new(address, ctx);
        let session_handle = tokio::spawn(
            async move {
                if let Err(e) = session.start_session(socket).await {
                    tracing::error!("session error: {}", e);
                }
                session.disconnect().await;
            }
            .instrument(tracing::info_span!("peer", addr = %address)),
        );

        PeerHandle {
            peer_tx,
            session_handle,
            state: SessionState::default(),
            source,
            id: None,
        }
    }
}
