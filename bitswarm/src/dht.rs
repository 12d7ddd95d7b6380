use std::net::SocketAddr;

use async_trait::async_trait;
use thiserror::Error;

use crate::TorrentID;

#[derive(Debug, Error)]
pub enum DhtError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("dht node not running")]
    NotRunning,
}

// External seam onto a DHT implementation (BEP 5). A torrent only ever
// needs to announce itself and ask for peers; routing table maintenance,
// bootstrap, and the full krpc surface live on whatever concrete node is
// plugged in here.
#[async_trait]
pub trait DhtNode: Send + Sync {
    async fn announce(&self, info_hash: TorrentID, port: u16) -> Result<(), DhtError>;
    async fn get_peers(&self, info_hash: TorrentID) -> Result<Vec<SocketAddr>, DhtError>;
}

// No-op node used when DHT is disabled in config, so the torrent loop
// doesn't need an `Option<Arc<dyn DhtNode>>` and a branch at every call site.
pub struct NullDhtNode;

#[async_trait]
impl DhtNode for NullDhtNode {
    async fn announce(&self, _info_hash: TorrentID, _port: u16) -> Result<(), DhtError> {
        Ok(())
    }

    async fn get_peers(&self, _info_hash: TorrentID) -> Result<Vec<SocketAddr>, DhtError> {
        Ok(Vec::new())
    }
}
