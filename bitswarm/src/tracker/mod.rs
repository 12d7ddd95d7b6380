use std::{net::SocketAddr, time::{Duration, Instant}};
use futures::future::join_all;
use rand::Rng;
use tokio::{task::JoinHandle, time};
use tracing::Instrument;
use url::Url;
use crate::{torrent::{TorrentCommand, TorrentTx}, ID};

mod http;
mod udp;
pub use udp::UdpTracker;
pub use http::HttpTracker;

type Result<T> = std::result::Result<T, TrackerError>;
pub type TrackerTx = tokio::sync::watch::Sender<Option<AnnounceParams>>;
pub type TrackerRx = tokio::sync::watch::Receiver<Option<AnnounceParams>>;

// In cases where the tracker doesn't give us a min interval.
const DEFAULT_MIN_ANNOUNCE_INTERVAL: u64 = 60; // seconds

// Backoff applied to a tracker that is failing to answer: doubles on every
// consecutive failure, capped, with +/-50% jitter so a tracker serving many
// clients doesn't see them all retry in lockstep.
const BACKOFF_INITIAL: Duration = Duration::from_secs(5);
const BACKOFF_MAX: Duration = Duration::from_secs(30 * 60);

fn jittered(backoff: Duration) -> Duration {
    let factor = rand::thread_rng().gen_range(0.5..1.5);
    backoff.mul_f64(factor)
}

// Coarse view of a tracker's health, mirrored into logs; `Tracker::run`'s
// default loop below is the state machine, this just names its states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerState {
    NotContacted,
    Contacting,
    Working,
    NotWorking,
}

#[derive(thiserror::Error, Debug)]
pub enum TrackerError {

    #[error("request error: {0}")]
    ReqwestError(#[from] reqwest::Error),

    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("error deserializing response: {0}")]
    BencodeError(#[from]bencode::Error),

    #[error("timeout")]
    Timeout(#[from] tokio::time::error::Elapsed),

    #[error("invalid url")]
    InvalidUrl,
    
    #[error("response error: {0}")]
    ResponseError(String),

}

pub struct TrackersHandle {

    // Bit wasteful to keep here i guess.
    urls: Vec<Url>,

    handles: Vec<JoinHandle<()>>,

    tracker_rx: TrackerRx,

    pub tracker_tx: TrackerTx,

    http_timeout: Duration,

}

impl TrackersHandle {

    pub fn new(urls: Vec<Vec<Url>>, http_timeout: Duration) -> Self {

        let (tracker_tx, tracker_rx) = tokio::sync::watch::channel(None);
        let urls = urls.into_iter().flatten().collect();

        Self {
            urls,
            tracker_rx,
            tracker_tx,
            handles: Vec::new(),
            http_timeout,
        }
    }

    pub async fn start(&mut self, torrent_tx: TorrentTx) {

        let mut handles = vec![];
        for url in self.urls.iter() {

            // Create tracker based on scheme.
            let mut tracker: Box<dyn Tracker> = match url.scheme() {
                "http" => Box::new(HttpTracker::new(url.clone(), self.http_timeout)),
                "udp"  => Box::new(UdpTracker::new(url.clone(), self.http_timeout).await),
                _ => {
                    tracing::warn!("unsupported tracker scheme: {}", url.scheme());
                    continue;
                },
            };

            let tx = torrent_tx.clone();
            let rx = self.tracker_rx.clone();
            let handle = tokio::spawn(async move {
                if let Err(e) = tracker.run(tx, rx).await {
                    tracing::error!("tracker error: {}", e);
                }
            }.instrument(tracing::info_span!("tracker", url = %url)));
            handles.push(handle);
        }

        self.handles = handles;
    }

    // Waits up to `timeout` for every tracker task to exit cleanly (having
    // sent its `stopped` announce); any still running past that are
    // aborted rather than left to straggle across a Stop/Start cycle.
    pub async fn shutdown(&mut self, timeout: Duration) {
        let handles: Vec<JoinHandle<()>> = self.handles.drain(..).collect();
        let abort_handles: Vec<_> = handles.iter().map(|h| h.abort_handle()).collect();

        if time::timeout(timeout, join_all(handles)).await.is_err() {
            tracing::warn!("tracker shutdown timed out, aborting stragglers");
            for handle in abort_handles {
                handle.abort();
            }
        }
    }
}

#[async_trait::async_trait]
pub trait Tracker: Send + Sync {

    async fn announce(&mut self, params: AnnounceParams) -> Result<Vec<SocketAddr>>;

    fn can_announce(&self, time: Instant) -> bool;

    fn should_announce(&self, time: Instant) -> bool;

    async fn run(
        &mut self,
        torrent_tx: TorrentTx,
        mut tracker_rx: TrackerRx,
    ) -> Result<()> {
        let mut state = TrackerState::NotContacted;
        let mut backoff = BACKOFF_INITIAL;

        loop {
            // A tracker that dropped out of the watch channel (replaced by
            // `AddTrackers`) would otherwise spin here forever re-reading a
            // `changed()` that can never fire again; `.ok()` above used to
            // swallow that. Treat a closed channel the same as shutdown.
            if tracker_rx.changed().await.is_err() {
                return Ok(());
            }
            let params = *tracker_rx.borrow();
            let time = Instant::now();

            let Some(params) = params else { continue };

            let stopping = params.event == Some(Event::Stopped);
            let due = params.event.is_some()
                || (params.num_want > Some(0) && self.can_announce(time))
                || self.should_announce(time);
            if !due {
                continue;
            }

            state = TrackerState::Contacting;
            match self.announce(params).await {
                Ok(peers) => {
                    state = TrackerState::Working;
                    backoff = BACKOFF_INITIAL;
                    if torrent_tx.send(TorrentCommand::Peers(peers)).is_err() {
                        return Ok(());
                    }
                }
                Err(e) => {
                    state = TrackerState::NotWorking;
                    tracing::warn!("announce failed ({:?}): {}", state, e);
                    if stopping {
                        return Ok(());
                    }
                    time::sleep(jittered(backoff)).await;
                    backoff = (backoff * 2).min(BACKOFF_MAX);
                }
            }
        }
    }

}

#[derive(Debug, Copy, Clone, Default)]
pub struct AnnounceParams {
    
    // Hash of info dict.
    pub info_hash:  ID,
    
    // Urlencoded 20-byte string used as a unique ID for the client.
    pub client_id:    ID,
    
    // Port number.
    pub port:       u16,
    
    // The total amount uploaded (since the client sent the 'started' event to the tracker) in base ten ASCII..
    pub uploaded:   u64,
    
    // The total amount downloaded (since the client sent the 'started' event to the tracker) in base ten ASCII..
    pub downloaded: u64,
    
    // The number of bytes this client still has to download in base ten ASCII. 
    // Clarification: The number of bytes needed to download to be 100% complete and get all the included files in the torrent.
    pub left:       u64,
    
    // If specified, must be one of started, completed, stopped, (or empty which is the same as not being specified). 
    // If not specified, then this request is one performed at regular intervals.
    pub event:     Option<Event>,
    
    // Number of peers that the client would like to receive from the tracker.
    pub num_want: Option<usize>,

}

#[derive(Copy, Clone, Debug, PartialEq, Default)]
pub enum Event {

    Completed,
    
    #[default]
    Started,

    Stopped,

}

impl std::fmt::Display for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Event::Completed => write!(f, "completed"),
            Event::Started => write!(f, "started"),
            Event::Stopped => write!(f, "stopped"),
        }
    }
}