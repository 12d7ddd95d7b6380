use std::{
    net::{Ipv4Addr, SocketAddr},
    path::PathBuf,
    time::Duration,
};

// Per-torrent knobs. Shared across torrents via `Config`, but kept as its
// own struct so a torrent could one day be added with overrides.
#[derive(Debug, Clone)]
pub struct TorrentConfig {
    pub output_dir: PathBuf,

    pub listen_address: SocketAddr,

    pub min_max_peers: (u32, u32),
}

impl Default for TorrentConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("downloads"),
            listen_address: SocketAddr::new(Ipv4Addr::UNSPECIFIED.into(), 6881),
            min_max_peers: (5, 100),
        }
    }
}

pub struct ClientConfig {
    pub client_id: [u8; 20],
}

const DEFAULT_CLIENT_ID: [u8; 20] = *b"-RS0133-73b3b0b0b0b0";

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            client_id: DEFAULT_CLIENT_ID,
        }
    }
}

// Full set of tunables governing swarm behaviour: session-wide paths,
// tracker/DHT/peer-wire timeouts and limits, the piece read cache, and
// encryption policy. Mirrors the shape of a mature torrent client's
// session config rather than exposing only what the core loop strictly
// needs, so callers get one place to reach for every knob.
#[derive(Debug, Clone)]
pub struct Config {
    // Where resume state (bitfields, stats) is persisted.
    pub resume_db_path: PathBuf,
    // Root directory new torrents download into by default.
    pub data_dir: PathBuf,
    // Listening port range; a torrent's listener picks the first free port.
    pub port_begin: u16,
    pub port_end: u16,

    pub pex_enabled: bool,
    pub resume_write_interval: Duration,

    pub torrent_add_http_timeout: Duration,
    pub max_metadata_size: usize,
    pub max_torrent_size: usize,
    pub dns_resolve_timeout: Duration,

    pub dht_enabled: bool,
    pub dht_host: Ipv4Addr,
    pub dht_port: u16,
    pub dht_announce_interval: Duration,
    pub dht_min_announce_interval: Duration,
    pub dht_bootstrap_nodes: Vec<String>,

    pub tracker_num_want: u32,
    pub tracker_stop_timeout: Duration,
    pub tracker_min_announce_interval: Duration,
    pub tracker_http_timeout: Duration,
    pub tracker_http_max_response_size: usize,

    pub unchoked_peers: usize,
    pub optimistic_unchoked_peers: usize,
    pub max_requests_in: u32,
    pub max_requests_out: u32,
    pub default_requests_out: u32,
    pub request_timeout: Duration,
    pub endgame_max_duplicate_downloads: u32,
    pub max_peer_dial: usize,
    pub max_peer_accept: usize,
    pub max_active_piece_bytes: u64,
    pub parallel_metadata_downloads: usize,
    pub peer_connect_timeout: Duration,
    pub peer_handshake_timeout: Duration,
    pub piece_read_timeout: Duration,
    pub max_peer_addresses: usize,

    pub piece_read_size: u64,
    pub piece_cache_size: u64,
    pub piece_cache_ttl: Duration,
    pub parallel_reads: usize,

    // When dialing out, attempt an encrypted (MSE) handshake first and
    // fall back to plaintext on failure, unless disabled/forced below.
    pub disable_outgoing_encryption: bool,
    pub force_outgoing_encryption: bool,
    pub force_incoming_encryption: bool,

    pub webseed_dial_timeout: Duration,
    pub webseed_tls_handshake_timeout: Duration,
    pub webseed_response_header_timeout: Duration,
    pub webseed_response_body_read_timeout: Duration,
    pub webseed_retry_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            resume_db_path: PathBuf::from("session.db"),
            data_dir: PathBuf::from("downloads"),
            port_begin: 50000,
            port_end: 60000,
            pex_enabled: true,
            resume_write_interval: Duration::from_secs(30),

            torrent_add_http_timeout: Duration::from_secs(30),
            max_metadata_size: 10 * 1024 * 1024,
            max_torrent_size: 10 * 1024 * 1024,
            dns_resolve_timeout: Duration::from_secs(5),

            dht_enabled: true,
            dht_host: Ipv4Addr::UNSPECIFIED,
            dht_port: 7246,
            dht_announce_interval: Duration::from_secs(30 * 60),
            dht_min_announce_interval: Duration::from_secs(60),
            dht_bootstrap_nodes: vec![
                "router.bittorrent.com:6881".into(),
                "dht.transmissionbt.com:6881".into(),
                "router.utorrent.com:6881".into(),
                "dht.libtorrent.org:25401".into(),
                "dht.aelitis.com:6881".into(),
            ],

            tracker_num_want: 200,
            tracker_stop_timeout: Duration::from_secs(5),
            tracker_min_announce_interval: Duration::from_secs(60),
            tracker_http_timeout: Duration::from_secs(10),
            tracker_http_max_response_size: 2 * 1024 * 1024,

            unchoked_peers: 3,
            optimistic_unchoked_peers: 1,
            max_requests_in: 250,
            max_requests_out: 250,
            default_requests_out: 50,
            request_timeout: Duration::from_secs(20),
            endgame_max_duplicate_downloads: 20,
            max_peer_dial: 80,
            max_peer_accept: 20,
            max_active_piece_bytes: 1024 * 1024 * 1024,
            parallel_metadata_downloads: 2,
            peer_connect_timeout: Duration::from_secs(5),
            peer_handshake_timeout: Duration::from_secs(10),
            piece_read_timeout: Duration::from_secs(30),
            max_peer_addresses: 2000,

            piece_read_size: 256 * 1024,
            piece_cache_size: 256 * 1024 * 1024,
            piece_cache_ttl: Duration::from_secs(5 * 60),
            parallel_reads: 1,

            disable_outgoing_encryption: false,
            force_outgoing_encryption: false,
            force_incoming_encryption: false,

            webseed_dial_timeout: Duration::from_secs(10),
            webseed_tls_handshake_timeout: Duration::from_secs(10),
            webseed_response_header_timeout: Duration::from_secs(10),
            webseed_response_body_read_timeout: Duration::from_secs(10),
            webseed_retry_interval: Duration::from_secs(60),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_sane_ordering() {
        let cfg = Config::default();
        assert!(cfg.port_begin < cfg.port_end);
        assert!(cfg.max_requests_out <= cfg.max_requests_in);
        assert!(cfg.default_requests_out <= cfg.max_requests_out);
        assert!(!cfg.dht_bootstrap_nodes.is_empty());
    }
}
