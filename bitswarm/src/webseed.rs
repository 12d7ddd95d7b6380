use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use bytes::Buf;
use futures::StreamExt;
use url::Url;

use crate::{
    block::{block_len, num_blocks, Block, BlockData},
    disk::DiskCommand,
    torrent::TorrentContext,
    TorrentID,
};

#[derive(Debug, thiserror::Error)]
pub enum WebseedError {
    #[error("request error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("server does not support range requests")]
    RangeUnsupported,

    #[error("channel closed")]
    ChannelClosed,
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for WebseedError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        WebseedError::ChannelClosed
    }
}

// A single HTTP(S) URL (BEP 19) that can serve this torrent's bytes by
// range, supplementing the peer swarm. `disabled_until` implements the
// "disable on error, retry after an interval" policy from §4.8.
#[derive(Debug, Clone)]
pub struct WebseedSource {
    pub url: Url,
    pub disabled_until: Option<Instant>,
    pub last_error: Option<String>,
    pub active: Option<ActiveRun>,
}

// A reserved, in-progress `[begin, end)` piece range this source owns.
// `end` and `current` are shared with the spawned `run_download` task so a
// peer stealing the tail piece (`stop_at`) can shrink the range the
// in-flight HTTP stream is still reading towards, and so `stop_at` can tell
// whether the downloader has already read past the steal point.
#[derive(Debug, Clone)]
pub struct ActiveRun {
    pub begin: usize,
    pub end: Arc<AtomicUsize>,
    pub current: Arc<AtomicUsize>,
}

impl ActiveRun {
    pub fn new(begin: usize, end: usize) -> Self {
        Self {
            begin,
            end: Arc::new(AtomicUsize::new(end)),
            current: Arc::new(AtomicUsize::new(begin)),
        }
    }
}

impl WebseedSource {
    pub fn new(url: Url) -> Self {
        Self { url, disabled_until: None, last_error: None, active: None }
    }

    pub fn is_available(&self, now: Instant) -> bool {
        self.active.is_none() && self.disabled_until.map(|t| now >= t).unwrap_or(true)
    }

    pub fn disable(&mut self, err: impl ToString, retry_after: Duration) {
        self.last_error = Some(err.to_string());
        self.disabled_until = Some(Instant::now() + retry_after);
        self.active = None;
    }
}

// Truncates an active run to `[begin, i)`. If the downloader's read
// position has already passed `i` the run is considered finished and
// cleared entirely, matching the "already passed, just close" half of
// `WebseedStopAt` in §4.8.
pub fn stop_at(source: &mut WebseedSource, i: usize) {
    if let Some(run) = &source.active {
        if run.current.load(Ordering::Relaxed) >= i {
            source.active = None;
        } else {
            run.end.store(i, Ordering::Relaxed);
        }
    }
}

// Streams an HTTP range GET covering `[begin, end)` pieces, funneling every
// completed block through `DiskCommand::WriteBlock` exactly as a
// peer-received block would be. This means the disk actor's single-writer
// accumulate/verify logic needs no special casing for webseed-sourced data.
pub async fn run_download(
    client: reqwest::Client,
    ctx: &TorrentContext,
    id: TorrentID,
    url: Url,
    begin: usize,
    end_cell: Arc<AtomicUsize>,
    current_cell: Arc<AtomicUsize>,
) -> Result<(), WebseedError> {
    let initial_end = end_cell.load(Ordering::Relaxed);
    let start_byte = ctx.info.piece_byte_offset(begin);
    let last_piece_len = ctx.info.piece_length(initial_end - 1);
    let end_byte = ctx.info.piece_byte_offset(initial_end - 1) + last_piece_len;

    let resp = client
        .get(url.clone())
        .header(reqwest::header::RANGE, format!("bytes={}-{}", start_byte, end_byte - 1))
        .timeout(ctx.config.webseed_dial_timeout)
        .send()
        .await?
        .error_for_status()?;

    if resp.status() != reqwest::StatusCode::PARTIAL_CONTENT {
        return Err(WebseedError::RangeUnsupported);
    }

    let mut stream = resp.bytes_stream();
    let mut piece_idx = begin;
    let mut block_idx = 0usize;
    let mut leftover = bytes::BytesMut::new();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        leftover.extend_from_slice(&chunk);

        // Re-read the bound every chunk: a peer stealing the tail piece
        // (`stop_at`) can shrink it mid-stream, and this loop should stop
        // consuming pieces past the new end rather than racing it.
        let end = end_cell.load(Ordering::Relaxed);
        while piece_idx < end {
            let piece_len = ctx.info.piece_length(piece_idx);
            let want = block_len(piece_len, block_idx);
            if leftover.len() < want {
                break;
            }

            let data = leftover.split_to(want);
            ctx.disk_tx.send(DiskCommand::WriteBlock {
                id,
                block: Block {
                    piece_idx,
                    offset: block_idx * crate::BLOCK_SIZE,
                    data: BlockData::Owned(data.to_vec()),
                },
            })?;

            block_idx += 1;
            if block_idx as u32 >= num_blocks(piece_len) {
                block_idx = 0;
                piece_idx += 1;
                current_cell.store(piece_idx, Ordering::Relaxed);
            }
        }

        if piece_idx >= end {
            break;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stop_at_truncates_future_run() {
        let mut source = WebseedSource::new(Url::parse("http://example.com/file").unwrap());
        let run = ActiveRun::new(10, 20);
        run.current.store(15, Ordering::Relaxed);
        source.active = Some(run);
        stop_at(&mut source, 19);
        assert_eq!(source.active.unwrap().end.load(Ordering::Relaxed), 19);
    }

    #[test]
    fn test_stop_at_closes_if_already_passed() {
        let mut source = WebseedSource::new(Url::parse("http://example.com/file").unwrap());
        let run = ActiveRun::new(10, 20);
        run.current.store(19, Ordering::Relaxed);
        source.active = Some(run);
        stop_at(&mut source, 19);
        assert!(source.active.is_none());
    }

    #[test]
    fn test_disable_sets_retry_window() {
        let mut source = WebseedSource::new(Url::parse("http://example.com/file").unwrap());
        assert!(source.is_available(Instant::now()));
        source.disable("boom", Duration::from_secs(60));
        assert!(!source.is_available(Instant::now()));
    }
}
