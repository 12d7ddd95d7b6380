use std::path::Path;

use bitswarm::{Client, ClientConfig, Config, MetaInfo, Notification};

const DEFAULT_TORRENT: &str = "tests/test_torrents/test_multi.torrent";

#[tokio::main]
async fn main() {
    let format = tracing_subscriber::fmt::format();
    let sub = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .event_format(format)
        .finish();
    tracing::subscriber::set_global_default(sub).unwrap();

    let source = std::env::args().nth(1).unwrap_or_else(|| DEFAULT_TORRENT.to_string());

    let (user_tx, mut user_rx) = bitswarm::event::channel();
    let (mut client, client_tx) = Client::new(Config::default(), ClientConfig::default(), user_tx);

    tokio::spawn(async move {
        while let Some(notification) = user_rx.recv().await {
            match notification {
                Notification::TorrentComplete(id) => {
                    tracing::info!("torrent {} complete", hex::encode(id));
                }
                Notification::TorrentError(id, err) => {
                    tracing::error!("torrent {} error: {}", hex::encode(id), err);
                }
                other => tracing::debug!("{:?}", other),
            }
        }
    });

    if source.starts_with("magnet:") {
        client_tx
            .send(bitswarm::ClientCommand::NewMagnet(source))
            .expect("client task gone");
    } else {
        let metainfo = MetaInfo::new(Path::new(&source)).expect("failed to parse torrent file");
        client_tx
            .send(bitswarm::ClientCommand::NewTorrent(metainfo))
            .expect("client task gone");
    }

    if let Err(e) = client.run().await {
        tracing::error!("client error: {}", e);
    }
}
