// Resolves a magnet link into a full `MetaInfo` by announcing to whatever
// trackers the link carries, then racing ut_metadata downloads (BEP 9)
// against the returned peers until one produces a verified info dict.
// Lives at the client layer, ahead of `Torrent`: once resolved, the result
// is just another `MetaInfo` handed to `Client::new_torrent` as normal.
use std::{net::SocketAddr, sync::Arc};

use futures::stream::{self, StreamExt};

use crate::{
    config::Config,
    info_downloader,
    metainfo::{Info, MagnetLink, MetaInfo},
    tracker::{AnnounceParams, Event, HttpTracker, Tracker, UdpTracker},
};

#[derive(thiserror::Error, Debug)]
pub enum MagnetError {
    #[error("magnet link has no trackers to announce to")]
    NoTrackers,

    #[error("none of the announced trackers returned any peers")]
    NoPeers,

    #[error("no peer among {0} candidates served a valid info dict")]
    AllPeersFailed(usize),

    #[error("downloaded info dict failed to decode: {0}")]
    InvalidInfo(#[from] bencode::Error),
}

type Result<T> = std::result::Result<T, MagnetError>;

// Full resolution: discover peers via the link's trackers, then fetch and
// verify the info dict from them, returning a ready-to-spawn `MetaInfo`.
pub async fn resolve(link: MagnetLink, client_id: [u8; 20], config: Arc<Config>) -> Result<MetaInfo> {
    let info_hash = link.info_hash;
    let peers = discover_peers(&link, client_id, &config).await?;
    if peers.is_empty() {
        return Err(MagnetError::NoPeers);
    }

    let candidates = peers.len();
    let parallelism = config.parallel_metadata_downloads.max(1);
    let mut attempts = stream::iter(peers)
        .map(|addr| {
            let config = config.clone();
            async move { info_downloader::download(addr, info_hash, client_id, &config).await }
        })
        .buffer_unordered(parallelism);

    while let Some(attempt) = attempts.next().await {
        match attempt {
            Ok(raw_info) => {
                let info: Info = bencode::decode_bytes(&raw_info)?;
                return Ok(MetaInfo::from_magnet(link, info));
            }
            Err(e) => {
                tracing::debug!("metadata peer failed: {}", e);
            }
        }
    }

    Err(MagnetError::AllPeersFailed(candidates))
}

// Announces to every tracker carried by the magnet link and returns the
// union of peers they report. Magnet links with no trackers can't be
// resolved this way; discovering peers purely via DHT is out of scope
// without a KRPC implementation (see `dht`).
async fn discover_peers(
    link: &MagnetLink,
    client_id: [u8; 20],
    config: &Config,
) -> Result<Vec<SocketAddr>> {
    if link.trackers.is_empty() {
        return Err(MagnetError::NoTrackers);
    }

    let params = AnnounceParams {
        info_hash: link.info_hash,
        client_id,
        port: config.port_begin,
        uploaded: 0,
        downloaded: 0,
        left: u64::MAX,
        event: Some(Event::Started),
        num_want: Some(config.tracker_num_want as usize),
    };

    let mut peers = Vec::new();
    for url in &link.trackers {
        let mut tracker: Box<dyn Tracker> = match url.scheme() {
            "http" | "https" => Box::new(HttpTracker::new(url.clone())),
            "udp" => Box::new(UdpTracker::new(url.clone()).await),
            _ => {
                tracing::warn!("unsupported tracker scheme in magnet link: {}", url.scheme());
                continue;
            }
        };

        match tracker.announce(params).await {
            Ok(mut found) => peers.append(&mut found),
            Err(e) => tracing::warn!("magnet tracker announce failed ({}): {}", url, e),
        }
    }

    peers.sort_unstable();
    peers.dedup();
    Ok(peers)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn discover_peers_rejects_trackerless_magnet() {
        let link = MagnetLink {
            info_hash: [0; 20],
            display_name: None,
            trackers: Vec::new(),
        };
        let config = Config::default();
        let result = discover_peers(&link, [1; 20], &config).await;
        assert!(matches!(result, Err(MagnetError::NoTrackers)));
    }
}
