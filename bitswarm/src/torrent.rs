use std::{
    collections::{HashMap, HashSet},
    net::{Ipv4Addr, SocketAddr},
    sync::Arc,
    time::{Duration, Instant},
};

use tokio::{
    net::TcpListener,
    sync::{mpsc, oneshot},
    task::JoinHandle,
    time,
};
use url::Url;

use crate::{
    config::Config,
    dht::{DhtNode, NullDhtNode},
    disk::{AllocationError, DiskCommand, DiskTx},
    event::{Notification, UserTx},
    p2p::{state::SessionState, PeerCommand, PeerHandle, PeerSource},
    picker::Picker,
    resume::{FileResumer, ResumeData, Resumer},
    stats::{PeerStats, PieceStats, ThroughputStats, TorrentStats},
    storage::StoreInfo,
    tracker::{AnnounceParams, Event, TrackersHandle},
    unchoke::{ChokeDecision, Unchoker},
    webseed::{self, WebseedSource},
    TorrentID,
};

const UNCHOKE_INTERVAL: Duration = Duration::from_secs(10);
const DIAL_INTERVAL: Duration = Duration::from_secs(5);
// How often we wake each tracker to re-check whether its own announce
// interval has elapsed; the tracker itself decides whether a request is
// actually due (`Tracker::should_announce`/`can_announce`).
const ANNOUNCE_TICK_INTERVAL: Duration = Duration::from_secs(60);
// Smallest contiguous gap worth handing to a webseed rather than leaving it
// to peers; below this the HTTP round-trip overhead dominates.
const WEBSEED_MIN_RANGE: usize = 4;

#[derive(Debug, thiserror::Error)]
pub enum TorrentError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("disk allocation failed: {0}")]
    Allocation(#[from] AllocationError),

    #[error("disk task is gone")]
    DiskGone,

    #[error("channel closed")]
    ChannelClosed,
}

impl<T> From<mpsc::error::SendError<T>> for TorrentError {
    fn from(_: mpsc::error::SendError<T>) -> Self {
        TorrentError::ChannelClosed
    }
}

pub type Result<T> = std::result::Result<T, TorrentError>;
pub type TorrentTx = mpsc::UnboundedSender<TorrentCommand>;
pub type TorrentRx = mpsc::UnboundedReceiver<TorrentCommand>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TorrentState {
    #[default]
    Allocating,
    Checking,
    Downloading,
    Seeding,
    Stopped,
    Error,
}

// Commands the torrent loop multiplexes over. External commands mirror what
// a client controller issues; the rest are events produced by peer
// sessions, the disk actor, trackers, DHT, and webseed downloaders feeding
// back into the same single-writer loop.
pub enum TorrentCommand {
    Start,
    Stop,
    Close,
    Stats(oneshot::Sender<TorrentStats>),
    AddPeers(Vec<SocketAddr>),
    AddTrackers(Vec<Vec<Url>>),
    NotifyError(UserTx),
    NotifyListen(oneshot::Sender<SocketAddr>),

    PeerConnected { address: SocketAddr, id: [u8; 20] },
    PeerState { address: SocketAddr, state: SessionState },
    PieceWritten { idx: usize, valid: bool },
    Peers(Vec<SocketAddr>),
    DhtPeers(Vec<SocketAddr>),
    WebseedResult {
        source_idx: usize,
        begin: usize,
        end: usize,
        outcome: std::result::Result<(), String>,
    },
    // A peer's piece picker claimed the tail of an active webseed range
    // (§4.4 step 1a); truncate that source's run to match.
    WebseedStolen(usize),
}

// Everything a peer session or webseed task needs that doesn't change for
// the lifetime of the torrent. Handed out as an `Arc` rather than threaded
// through every call as individual arguments.
pub struct TorrentContext {
    pub id: TorrentID,
    pub info_hash: [u8; 20],
    pub client_id: [u8; 20],
    pub config: Arc<Config>,
    pub picker: Picker,
    pub torrent_tx: TorrentTx,
    pub disk_tx: DiskTx,
    pub info: StoreInfo,
}

pub struct TorrentParams {
    pub info: StoreInfo,
    pub info_hash: [u8; 20],
    pub client_id: [u8; 20],
    pub piece_hashes: Vec<[u8; 20]>,
    pub trackers: Vec<Vec<Url>>,
    pub webseeds: Vec<Url>,
    pub config: Arc<Config>,
    pub disk_tx: DiskTx,
    pub user_tx: UserTx,
    pub listen_port: u16,
}

pub struct TorrentHandle {
    pub torrent_tx: TorrentTx,
    pub handle: JoinHandle<()>,
}

impl TorrentHandle {
    // Spawns the torrent's task: allocates on disk, builds the loop, and
    // runs it to completion. Failures before the loop even starts (a bad
    // disk allocation) are reported through the same `UserTx` a running
    // torrent would use, rather than panicking the client task.
    pub fn spawn(params: TorrentParams) -> Self {
        let (torrent_tx, torrent_rx) = mpsc::unbounded_channel();
        let user_tx = params.user_tx.clone();
        let info_hash = params.info_hash;
        let task_tx = torrent_tx.clone();

        let handle = tokio::spawn(async move {
            match Torrent::new(params, task_tx, torrent_rx).await {
                Ok(mut torrent) => {
                    if let Err(e) = torrent.run().await {
                        tracing::error!("torrent {} error: {}", hex::encode(info_hash), e);
                        user_tx.send(Notification::TorrentError(info_hash, e.to_string())).ok();
                    }
                }
                Err(e) => {
                    tracing::error!("torrent {} failed to start: {}", hex::encode(info_hash), e);
                    user_tx.send(Notification::TorrentError(info_hash, e.to_string())).ok();
                }
            }
        });

        TorrentHandle { torrent_tx, handle }
    }
}

// The authoritative coordinator for a single torrent: the only task that
// ever mutates piece/peer/tracker state. Everyone else - peer sessions, the
// disk actor, trackers, DHT, webseed downloaders - talks to it exclusively
// through `TorrentCommand`.
pub struct Torrent {
    ctx: Arc<TorrentContext>,

    peers: HashMap<SocketAddr, PeerHandle>,
    peer_ids: HashSet<[u8; 20]>,
    banned: HashSet<std::net::IpAddr>,
    available: Vec<SocketAddr>,

    trackers: TrackersHandle,
    dht: Arc<dyn DhtNode>,
    unchoker: Unchoker,

    webseeds: Vec<WebseedSource>,
    http: reqwest::Client,

    resumer: Arc<dyn Resumer>,

    state: TorrentState,
    start_time: Instant,
    uploaded: u64,
    downloaded: u64,
    wasted: u64,
    seeded_accum: Duration,
    seeding_since: Option<Instant>,
    tracker_urls: Vec<String>,

    listen_address: SocketAddr,
    listen_notify: Vec<oneshot::Sender<SocketAddr>>,
    error_subs: Vec<UserTx>,
    user_tx: UserTx,

    torrent_rx: TorrentRx,
    torrent_tx: TorrentTx,
}

impl Torrent {
    pub async fn new(params: TorrentParams, torrent_tx: TorrentTx, torrent_rx: TorrentRx) -> Result<Self> {
        let TorrentParams {
            info,
            info_hash,
            client_id,
            piece_hashes,
            trackers,
            webseeds,
            config,
            disk_tx,
            user_tx,
            listen_port,
        } = params;

        // Allocation and existing-file verification happen inline in the
        // disk actor (`Disk::check_existing_files`) rather than as a
        // separate progress stream of their own; for the torrent sizes this
        // client targets the one-shot cost is small enough that a
        // dedicated allocator/verifier event pair would only add
        // bookkeeping without a real benefit.
        let (alloc_tx, alloc_rx) = oneshot::channel();
        disk_tx.send(DiskCommand::NewTorrent {
            id: info_hash,
            info: info.clone(),
            piece_hashes,
            torrent_tx: torrent_tx.clone(),
            tx: alloc_tx,
        })?;
        let bitfield = alloc_rx.await.map_err(|_| TorrentError::DiskGone)??;

        let picker = Picker::new(
            info.num_pieces,
            info.piece_len,
            info.last_piece_len,
            config.endgame_max_duplicate_downloads,
        );
        picker.piece_picker.write().await.set_own_bitfield(bitfield);
        let complete = picker.is_complete().await;

        let resumer: Arc<dyn Resumer> =
            Arc::new(FileResumer::new(config.resume_db_path.clone()).map_err(TorrentError::Io)?);
        let resume_data = resumer.load(&info_hash).ok().flatten();

        // Trackers discovered since the last save (e.g. via a tracker's own
        // announce response) are folded back in as an extra tier so they
        // get tried again without needing the original .torrent file.
        let mut trackers = trackers;
        let known: HashSet<String> = trackers.iter().flatten().map(|u| u.to_string()).collect();
        let learned: Vec<Url> = resume_data
            .as_ref()
            .map(|d| d.trackers.iter())
            .into_iter()
            .flatten()
            .filter(|u| !known.contains(*u))
            .filter_map(|u| Url::parse(u).ok())
            .collect();
        if !learned.is_empty() {
            trackers.push(learned);
        }
        let tracker_urls: Vec<String> = trackers.iter().flatten().map(|u| u.to_string()).collect();

        let ctx = Arc::new(TorrentContext {
            id: info_hash,
            info_hash,
            client_id,
            config: config.clone(),
            picker,
            torrent_tx: torrent_tx.clone(),
            disk_tx,
            info,
        });

        let dht: Arc<dyn DhtNode> = Arc::new(NullDhtNode);
        let listen_address = SocketAddr::new(Ipv4Addr::UNSPECIFIED.into(), listen_port);

        let started = resume_data.as_ref().map(|d| d.started).unwrap_or(true);
        let state = match (started, complete) {
            (false, _) => TorrentState::Stopped,
            (true, true) => TorrentState::Seeding,
            (true, false) => TorrentState::Downloading,
        };

        Ok(Self {
            ctx,
            peers: HashMap::new(),
            peer_ids: HashSet::new(),
            banned: HashSet::new(),
            available: Vec::new(),
            trackers: TrackersHandle::new(trackers, config.tracker_http_timeout),
            dht,
            unchoker: Unchoker::new(config.unchoked_peers, config.optimistic_unchoked_peers),
            webseeds: webseeds.into_iter().map(WebseedSource::new).collect(),
            http: reqwest::Client::new(),
            resumer,
            state,
            start_time: Instant::now(),
            uploaded: resume_data.as_ref().map(|d| d.uploaded).unwrap_or(0),
            downloaded: resume_data.as_ref().map(|d| d.downloaded).unwrap_or(0),
            wasted: resume_data.as_ref().map(|d| d.wasted).unwrap_or(0),
            seeded_accum: resume_data
                .as_ref()
                .map(|d| Duration::from_secs(d.seeded_for))
                .unwrap_or_default(),
            seeding_since: if state == TorrentState::Seeding { Some(Instant::now()) } else { None },
            tracker_urls,
            listen_address,
            listen_notify: Vec::new(),
            error_subs: vec![user_tx.clone()],
            user_tx,
            torrent_rx,
            torrent_tx,
        })
    }

    #[tracing::instrument(skip_all, name = "torrent", fields(info_hash = %hex::encode(self.ctx.info_hash)))]
    pub async fn run(&mut self) -> Result<()> {
        let listener = TcpListener::bind(self.listen_address).await?;
        self.listen_address = listener.local_addr()?;
        tracing::info!("listening on {}", self.listen_address);

        for notify in self.listen_notify.drain(..) {
            notify.send(self.listen_address).ok();
        }

        if self.state != TorrentState::Stopped {
            self.trackers.start(self.torrent_tx.clone()).await;
            self.announce(Event::Started);
            self.spawn_dht_loop();
        }

        let mut unchoke_ticker = time::interval(UNCHOKE_INTERVAL);
        let mut dial_ticker = time::interval(DIAL_INTERVAL);
        let mut resume_ticker = time::interval(self.ctx.config.resume_write_interval);
        let mut announce_ticker = time::interval(ANNOUNCE_TICK_INTERVAL);

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    self.handle_incoming(accepted).await;
                }

                Some(cmd) = self.torrent_rx.recv() => {
                    if !self.handle_command(cmd).await? {
                        break;
                    }
                }

                _ = unchoke_ticker.tick() => {
                    self.unchoke_tick().await;
                    self.schedule_webseeds().await;
                }

                _ = dial_ticker.tick(), if self.state != TorrentState::Stopped => {
                    self.dial_peers().await;
                }

                _ = resume_ticker.tick() => {
                    self.save_resume_data();
                }

                _ = announce_ticker.tick(), if self.state != TorrentState::Stopped => {
                    self.announce_regular();
                }

                else => break,
            }
        }

        self.shutdown().await;
        Ok(())
    }

    fn spawn_dht_loop(&self) {
        if !self.ctx.config.dht_enabled {
            return;
        }
        let dht = self.dht.clone();
        let tx = self.torrent_tx.clone();
        let info_hash = self.ctx.info_hash;
        let port = self.listen_address.port();
        let interval = self.ctx.config.dht_announce_interval;

        tokio::spawn(async move {
            let mut ticker = time::interval(interval);
            loop {
                ticker.tick().await;
                if dht.announce(info_hash, port).await.is_err() {
                    continue;
                }
                match dht.get_peers(info_hash).await {
                    Ok(peers) if !peers.is_empty() => {
                        if tx.send(TorrentCommand::DhtPeers(peers)).is_err() {
                            return;
                        }
                    }
                    Ok(_) => {}
                    Err(e) => tracing::debug!("dht get_peers error: {}", e),
                }
            }
        });
    }

    // Returns `false` to break the outer loop (torrent closed).
    async fn handle_command(&mut self, cmd: TorrentCommand) -> Result<bool> {
        match cmd {
            TorrentCommand::Start => {
                if self.state == TorrentState::Stopped {
                    self.state = TorrentState::Downloading;
                    self.trackers.start(self.torrent_tx.clone()).await;
                    self.announce(Event::Started);
                }
            }

            TorrentCommand::Stop => {
                self.announce(Event::Stopped);
                self.trackers.shutdown(self.ctx.config.tracker_stop_timeout).await;
                for peer in self.peers.values() {
                    peer.peer_tx.send(PeerCommand::Shutdown).ok();
                }
                self.peers.clear();
                self.peer_ids.clear();
                self.enter_stopped();
                self.save_resume_data();
            }

            TorrentCommand::Close => return Ok(false),

            TorrentCommand::Stats(tx) => {
                tx.send(self.build_stats()).ok();
            }

            TorrentCommand::AddPeers(addrs) => {
                self.available.extend(addrs);
                self.dial_peers().await;
            }

            TorrentCommand::AddTrackers(tiers) => {
                self.tracker_urls.extend(tiers.iter().flatten().map(|u| u.to_string()));
                self.trackers.shutdown(self.ctx.config.tracker_stop_timeout).await;
                let mut handle = TrackersHandle::new(tiers, self.ctx.config.tracker_http_timeout);
                handle.start(self.torrent_tx.clone()).await;
                self.trackers = handle;
                self.announce(Event::Started);
            }

            TorrentCommand::NotifyError(tx) => self.error_subs.push(tx),

            TorrentCommand::NotifyListen(tx) => {
                tx.send(self.listen_address).ok();
            }

            TorrentCommand::PeerConnected { address, id } => {
                if !self.peer_ids.insert(id) {
                    tracing::warn!("rejecting duplicate peer id from {}", address);
                    if let Some(peer) = self.peers.remove(&address) {
                        peer.peer_tx.send(PeerCommand::Shutdown).ok();
                    }
                    return Ok(true);
                }
                if let Some(peer) = self.peers.get_mut(&address) {
                    peer.id = Some(id);
                }
            }

            TorrentCommand::PeerState { address, state } => {
                let disconnected = state.conn_state == crate::p2p::state::ConnState::Disconnected;
                if let Some(peer) = self.peers.get_mut(&address) {
                    if disconnected {
                        if let Some(id) = peer.id {
                            self.peer_ids.remove(&id);
                        }
                        self.peers.remove(&address);
                    } else {
                        peer.state = state;
                    }
                }
            }

            TorrentCommand::PieceWritten { idx, valid } => {
                self.handle_piece_written(idx, valid).await;
            }

            TorrentCommand::Peers(addrs) | TorrentCommand::DhtPeers(addrs) => {
                self.available.extend(addrs);
                self.dial_peers().await;
            }

            TorrentCommand::WebseedResult { source_idx, begin, end, outcome } => {
                self.ctx.picker.release_webseed_range(begin, end).await;
                if let Some(source) = self.webseeds.get_mut(source_idx) {
                    source.active = None;
                    if let Err(err) = outcome {
                        tracing::warn!("webseed {} failed: {}", source.url, err);
                        source.disable(err, self.ctx.config.webseed_retry_interval);
                    }
                }
            }

            TorrentCommand::WebseedStolen(idx) => {
                for source in self.webseeds.iter_mut() {
                    let owns = source
                        .active
                        .as_ref()
                        .is_some_and(|run| idx >= run.begin && idx < run.end.load(std::sync::atomic::Ordering::Relaxed));
                    if owns {
                        tracing::debug!("piece {} stolen from webseed {}", idx, source.url);
                        webseed::stop_at(source, idx);
                        break;
                    }
                }
            }
        }

        Ok(true)
    }

    async fn handle_incoming(&mut self, accepted: std::io::Result<(tokio::net::TcpStream, SocketAddr)>) {
        let (socket, address) = match accepted {
            Ok(pair) => pair,
            Err(e) => {
                tracing::warn!("accept error: {}", e);
                return;
            }
        };

        if self.state == TorrentState::Stopped {
            return;
        }
        if self.banned.contains(&address.ip()) {
            tracing::debug!("refusing banned peer {}", address);
            return;
        }
        if self.peers.len() >= self.ctx.config.max_peer_accept {
            tracing::debug!("refusing peer {}, at accept limit", address);
            return;
        }

        let handle = PeerHandle::start_session(address, self.ctx.clone(), Some(socket), PeerSource::Incoming);
        self.peers.insert(address, handle);
    }

    async fn dial_peers(&mut self) {
        if self.state == TorrentState::Stopped {
            return;
        }
        while self.peers.len() < self.ctx.config.max_peer_dial {
            let Some(address) = self.available.pop() else { break };
            if self.peers.contains_key(&address) || self.banned.contains(&address.ip()) {
                continue;
            }
            let handle = PeerHandle::start_session(address, self.ctx.clone(), None, PeerSource::Tracker);
            self.peers.insert(address, handle);
        }
    }

    async fn unchoke_tick(&mut self) {
        let snapshot: Vec<(SocketAddr, SessionState)> =
            self.peers.iter().map(|(addr, p)| (*addr, p.state)).collect();
        let seeding = self.state == TorrentState::Seeding;
        let decisions = self.unchoker.select(&snapshot, seeding);

        for (address, decision) in decisions {
            if let Some(peer) = self.peers.get(&address) {
                let cmd = match decision {
                    ChokeDecision::Unchoke => PeerCommand::Unchoke,
                    ChokeDecision::Choke => PeerCommand::Choke,
                };
                peer.peer_tx.send(cmd).ok();
            }
        }

        for peer in self.peers.values_mut() {
            peer.state.throughput.reset();
        }
    }

    // Claims the first unclaimed piece range at least `WEBSEED_MIN_RANGE`
    // long for any idle, non-disabled source and kicks off its download.
    async fn schedule_webseeds(&mut self) {
        let now = Instant::now();
        for idx in 0..self.webseeds.len() {
            if !self.webseeds[idx].is_available(now) {
                continue;
            }
            let Some((begin, end)) = self.ctx.picker.find_unclaimed_range(WEBSEED_MIN_RANGE).await else {
                break;
            };
            self.ctx.picker.reserve_for_webseed(begin, end).await;
            let run = webseed::ActiveRun::new(begin, end);
            let (end_cell, current_cell) = (run.end.clone(), run.current.clone());
            self.webseeds[idx].active = Some(run);

            let client = self.http.clone();
            let ctx = self.ctx.clone();
            let url = self.webseeds[idx].url.clone();
            let torrent_tx = self.torrent_tx.clone();
            let id = self.ctx.id;

            tokio::spawn(async move {
                let outcome = webseed::run_download(client, &ctx, id, url, begin, end_cell, current_cell)
                    .await
                    .map_err(|e| e.to_string());
                torrent_tx
                    .send(TorrentCommand::WebseedResult { source_idx: idx, begin, end, outcome })
                    .ok();
            });
        }
    }

    async fn handle_piece_written(&mut self, idx: usize, valid: bool) {
        if valid {
            self.downloaded += self.ctx.info.piece_length(idx) as u64;
            self.ctx.picker.piece_picker.write().await.received_piece(idx);
            self.ctx.picker.partial_pieces.write().await.remove(&idx);

            for peer in self.peers.values() {
                peer.peer_tx.send(PeerCommand::PieceWritten(idx)).ok();
            }

            if self.state != TorrentState::Seeding && self.ctx.picker.is_complete().await {
                tracing::info!("torrent download complete");
                self.state = TorrentState::Seeding;
                self.seeding_since = Some(Instant::now());
                self.announce(Event::Completed);
                self.user_tx.send(Notification::TorrentComplete(self.ctx.info_hash)).ok();
                self.save_resume_data();
            }
        } else {
            tracing::warn!("piece {} failed verification, re-queuing", idx);
            self.wasted += self.ctx.info.piece_length(idx) as u64;

            let requesters = self.ctx.picker.requesters(idx).await;
            if let [addr] = requesters[..] {
                tracing::warn!("banning {} for hash mismatch on piece {}", addr, idx);
                self.banned.insert(addr.ip());
                if let Some(peer) = self.peers.remove(&addr) {
                    if let Some(id) = peer.id {
                        self.peer_ids.remove(&id);
                    }
                    peer.peer_tx.send(PeerCommand::Shutdown).ok();
                }
            }

            self.ctx.picker.discard_piece(idx).await;
        }
    }

    fn announce(&self, event: Event) {
        self.send_announce(Some(event));
    }

    // Nudges each tracker task to re-check whether its own interval has
    // elapsed, without forcing an unconditional request the way a Started/
    // Completed/Stopped event would.
    fn announce_regular(&self) {
        self.send_announce(None);
    }

    fn send_announce(&self, event: Option<Event>) {
        let left = self.ctx.info.total_len.saturating_sub(self.downloaded);
        self.trackers
            .tracker_tx
            .send(Some(AnnounceParams {
                info_hash: self.ctx.info_hash,
                client_id: self.ctx.client_id,
                port: self.listen_address.port(),
                uploaded: self.uploaded,
                downloaded: self.downloaded,
                left,
                event,
                num_want: Some(self.ctx.config.tracker_num_want as usize),
            }))
            .ok();
    }

    // Folds the time spent seeding since the last accounting point into
    // `seeded_accum` and marks the torrent as not running, for resume data.
    fn enter_stopped(&mut self) {
        if let Some(since) = self.seeding_since.take() {
            self.seeded_accum += since.elapsed();
        }
        self.state = TorrentState::Stopped;
    }

    fn seeded_for_secs(&self) -> u64 {
        let mut total = self.seeded_accum;
        if let Some(since) = self.seeding_since {
            total += since.elapsed();
        }
        total.as_secs()
    }

    fn save_resume_data(&self) {
        // Best effort: a failed write here just means the next startup
        // re-verifies every piece from scratch via `check_existing_files`,
        // which is correct, just slower.
        let bitfield = match self.ctx.picker.piece_picker.try_read() {
            Ok(pp) => pp.own_bitfield().clone(),
            Err(_) => return,
        };
        let data = ResumeData {
            info_hash: self.ctx.info_hash,
            bitfield,
            uploaded: self.uploaded,
            downloaded: self.downloaded,
            wasted: self.wasted,
            seeded_for: self.seeded_for_secs(),
            started: self.state != TorrentState::Stopped,
            trackers: self.tracker_urls.clone(),
            output_dir: self.ctx.info.output_dir.clone(),
        };
        if let Err(e) = self.resumer.save(&data) {
            tracing::warn!("failed to save resume data: {}", e);
        }
    }

    fn build_stats(&self) -> TorrentStats {
        let peer_stats: Vec<PeerStats> = self
            .peers
            .iter()
            .map(|(addr, p)| PeerStats { address: *addr, state: p.state })
            .collect();

        let mut throughput = ThroughputStats::default();
        for peer in self.peers.values() {
            throughput += &peer.state.throughput;
        }

        TorrentStats {
            start_time: Some(self.start_time),
            time_elapsed: self.start_time.elapsed(),
            state: self.state,
            piece_stats: PieceStats {
                num_pieces: self.ctx.info.num_pieces as usize,
                num_pending: 0,
                num_downloaded: (self.downloaded / self.ctx.info.piece_len.max(1) as u64) as usize,
            },
            peer_stats,
            throughput,
        }
    }

    async fn shutdown(&mut self) {
        self.announce(Event::Stopped);
        for peer in self.peers.values() {
            peer.peer_tx.send(PeerCommand::Shutdown).ok();
        }
        self.trackers.shutdown(self.ctx.config.tracker_stop_timeout).await;
        self.enter_stopped();
        self.save_resume_data();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn torrent_state_defaults_to_allocating() {
        assert_eq!(TorrentState::default(), TorrentState::Allocating);
    }
}
