use std::collections::HashMap;

use tokio::sync::mpsc;

use crate::{
    config::{ClientConfig, Config},
    disk::{spawn_disk, DiskCommand, DiskTx},
    event::{Notification, UserTx},
    magnet,
    metainfo::{MagnetLink, MetaInfo},
    storage::StoreInfo,
    torrent::{TorrentCommand, TorrentHandle, TorrentParams},
    ID,
};

#[derive(thiserror::Error, Debug)]
pub enum ClientError {
    #[error("client channel closed")]
    ClientDropped,

    #[error("disk task gone")]
    DiskGone,
}

impl<T> From<mpsc::error::SendError<T>> for ClientError {
    fn from(_: mpsc::error::SendError<T>) -> Self {
        ClientError::DiskGone
    }
}

pub enum ClientCommand {
    NewTorrent(MetaInfo),
    // A magnet URI whose info dict isn't known yet; resolved via ut_metadata
    // (BEP 9) in the background, then re-enqueued as `NewTorrent`.
    NewMagnet(String),
    RemoveTorrent(ID),
    Shutdown,
}

pub type Result<T> = std::result::Result<T, ClientError>;
pub type ClientRx = mpsc::UnboundedReceiver<ClientCommand>;
pub type ClientTx = mpsc::UnboundedSender<ClientCommand>;

// Owns the set of active torrents and the single shared disk actor. Exists
// mainly to turn "add a torrent" into a one-line client API; all the real
// work happens inside each torrent's own loop.
pub struct Client {
    client_rx: ClientRx,
    // Kept so a resolved magnet link can be re-enqueued as `NewTorrent`
    // from the background task that resolved it.
    client_tx: ClientTx,
    torrents: HashMap<ID, TorrentHandle>,
    user_tx: UserTx,
    config: std::sync::Arc<Config>,
    client_id: [u8; 20],
    // Next listening port to hand to a new torrent.
    next_port: u16,
}

impl Client {
    pub fn new(config: Config, client_config: ClientConfig, user_tx: UserTx) -> (Self, ClientTx) {
        let (client_tx, client_rx) = mpsc::unbounded_channel();
        let next_port = config.port_begin;

        (
            Client {
                torrents: HashMap::new(),
                client_rx,
                client_tx: client_tx.clone(),
                user_tx,
                config: std::sync::Arc::new(config),
                client_id: client_config.client_id,
                next_port,
            },
            client_tx,
        )
    }

    pub async fn run(&mut self) -> Result<()> {
        let (_disk_handle, disk_tx) = spawn_disk();

        while let Some(cmd) = self.client_rx.recv().await {
            match cmd {
                ClientCommand::NewTorrent(metainfo) => self.new_torrent(metainfo, &disk_tx)?,

                ClientCommand::NewMagnet(uri) => self.new_magnet(uri),

                ClientCommand::RemoveTorrent(id) => {
                    if let Some(torrent) = self.torrents.remove(&id) {
                        torrent.torrent_tx.send(TorrentCommand::Close).ok();
                        disk_tx.send(DiskCommand::RemoveTorrent(id))?;
                    } else {
                        tracing::warn!("attempted to remove non-existent torrent: {}", hex::encode(id));
                    }
                }

                ClientCommand::Shutdown => {
                    self.shutdown().await;
                    return Ok(());
                }
            }
        }

        Ok(())
    }

    // Parses the magnet URI and spawns a background task to resolve it to a
    // full `MetaInfo` over ut_metadata; on success the task re-enqueues
    // itself as `NewTorrent`, on failure it surfaces a `TorrentError`
    // notification keyed by the info hash (no torrent id exists yet).
    fn new_magnet(&mut self, uri: String) {
        let link = match MagnetLink::parse(&uri) {
            Ok(link) => link,
            Err(e) => {
                tracing::warn!("invalid magnet link: {}", e);
                self.user_tx
                    .send(Notification::TorrentError([0; 20], e.to_string()))
                    .ok();
                return;
            }
        };

        let info_hash = link.info_hash;
        let client_id = self.client_id;
        let config = self.config.clone();
        let client_tx = self.client_tx.clone();
        let user_tx = self.user_tx.clone();

        tokio::spawn(async move {
            match magnet::resolve(link, client_id, config).await {
                Ok(metainfo) => {
                    client_tx.send(ClientCommand::NewTorrent(metainfo)).ok();
                }
                Err(e) => {
                    tracing::error!("failed to resolve magnet link: {}", e);
                    user_tx
                        .send(Notification::TorrentError(info_hash, e.to_string()))
                        .ok();
                }
            }
        });
    }

    fn new_torrent(&mut self, metainfo: MetaInfo, disk_tx: &DiskTx) -> Result<()> {
        let info_hash = metainfo.info_hash();
        let info = StoreInfo::new(&metainfo, self.config.data_dir.clone());
        let piece_hashes = metainfo.piece_hashes();

        let handle = TorrentHandle::spawn(TorrentParams {
            info,
            info_hash,
            client_id: self.client_id,
            piece_hashes,
            trackers: metainfo.trackers(),
            webseeds: metainfo.webseed_urls(),
            config: self.config.clone(),
            disk_tx: disk_tx.clone(),
            user_tx: self.user_tx.clone(),
            listen_port: self.next_port,
        });

        self.next_port = if self.next_port >= self.config.port_end {
            self.config.port_begin
        } else {
            self.next_port + 1
        };

        self.torrents.insert(info_hash, handle);
        Ok(())
    }

    async fn shutdown(&mut self) {
        for torrent in self.torrents.values() {
            torrent.torrent_tx.send(TorrentCommand::Close).ok();
        }
        for (id, torrent) in self.torrents.drain() {
            if let Err(e) = torrent.handle.await {
                tracing::error!("torrent {} panicked: {}", hex::encode(id), e);
            }
        }
    }
}
