use std::net::SocketAddr;

use tokio::sync::mpsc;

use crate::{stats::TorrentStats, TorrentID};

// Events the client surfaces to whatever embeds it (a CLI, a TUI, a daemon
// control socket). One channel is shared across every torrent the client
// manages; each notification carries its own torrent id.
#[derive(Debug, Clone)]
pub enum Notification {
    Listening(SocketAddr),
    TorrentAdded(TorrentID),
    TorrentRemoved(TorrentID),
    TorrentComplete(TorrentID),
    TorrentStats(TorrentID, Box<TorrentStats>),
    TorrentError(TorrentID, String),
    Shutdown,
}

pub type UserTx = mpsc::UnboundedSender<Notification>;
pub type UserRx = mpsc::UnboundedReceiver<Notification>;

pub fn channel() -> (UserTx, UserRx) {
    mpsc::unbounded_channel()
}
