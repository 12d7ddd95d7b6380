use std::{
    collections::{HashMap, HashSet},
    net::SocketAddr,
};

use tokio::sync::RwLock;

use crate::{block::BlockRequest, Bitfield};

pub mod partial_piece;
pub mod piece_picker;

use partial_piece::PartialPiece;
use piece_picker::PiecePicker;

#[derive(Debug)]
pub struct Picker {
    pub piece_picker: RwLock<PiecePicker>,
    pub partial_pieces: RwLock<HashMap<usize, RwLock<PartialPiece>>>,
    num_pieces: u32,
    piece_len: usize,
    last_piece_len: usize,
    endgame_max_duplicate: u32,
}

impl Picker {
    pub fn new(num_pieces: u32, piece_len: usize, last_piece_len: usize, endgame_max_duplicate: u32) -> Self {
        Self {
            piece_picker: RwLock::new(PiecePicker::new(num_pieces as usize)),
            partial_pieces: RwLock::new(HashMap::new()),
            num_pieces,
            piece_len,
            last_piece_len,
            endgame_max_duplicate,
        }
    }

    // Reserves pieces `[begin, end)` for exclusive webseed writing so peers
    // don't duplicate work already in flight over HTTP.
    pub async fn reserve_for_webseed(&self, begin: usize, end: usize) {
        self.piece_picker.write().await.reserve_for_webseed(begin, end);
    }

    pub async fn release_webseed_range(&self, begin: usize, end: usize) {
        self.piece_picker.write().await.release_webseed_range(begin, end);
    }

    // A peer takes over a single reserved piece from an active webseed run
    // (see torrent loop §4.4 step 1). Returns whether the steal succeeded;
    // if so the piece behaves like any other requested piece from here on.
    pub async fn steal_from_webseed(&self, peer: SocketAddr, idx: usize) -> bool {
        self.piece_picker.write().await.steal_from_webseed(peer, idx)
    }

    // A peer takes over the tail of the smallest active webseed range it
    // has (§4.4 step 1a). Exposed separately from `pick_blocks` so the
    // torrent loop can react (`webseed::stop_at`) without `Picker` needing
    // to know about `WebseedSource`/`ActiveRun` at all.
    pub async fn steal_webseed_tail(&self, peer: SocketAddr, bf: &Bitfield) -> Option<usize> {
        self.piece_picker.write().await.steal_webseed_tail(peer, bf)
    }

    // A piece failed verification; drop its partial-download bookkeeping so
    // the next pass picks it again as if it were never requested.
    pub async fn discard_piece(&self, idx: usize) {
        self.partial_pieces.write().await.remove(&idx);
        self.piece_picker.write().await.reset_piece(idx);
    }

    pub async fn handle_allowed_fast(&self, peer: SocketAddr, idx: usize) {
        self.piece_picker.write().await.handle_allowed_fast(peer, idx);
    }

    pub async fn is_allowed_fast(&self, peer: &SocketAddr, idx: usize) -> bool {
        self.piece_picker.read().await.is_allowed_fast(peer, idx)
    }

    // Like `pick_blocks` but restricted to pieces the peer has named
    // allowed-fast: usable while choked (BEP 6 §3).
    pub async fn pick_allowed_fast_blocks(
        &self,
        peer: SocketAddr,
        current_requests: &HashSet<BlockRequest>,
        target_queue_len: usize,
        bf: &Bitfield,
    ) -> Vec<BlockRequest> {
        let mut requests = vec![];
        let mut remaining = target_queue_len.saturating_sub(current_requests.len());
        if remaining == 0 {
            return requests;
        }

        for partial_piece in self.partial_pieces.write().await.values_mut() {
            if remaining == 0 {
                break;
            }
            let idx = partial_piece.read().await.idx;
            if !bf[idx] || !self.piece_picker.read().await.is_allowed_fast(&peer, idx) {
                continue;
            }
            remaining -= partial_piece
                .write()
                .await
                .pick_next_blocks(remaining, &mut requests, current_requests, false);
        }

        while remaining != 0 {
            let Some(idx) = self.piece_picker.write().await.pick_allowed_fast_piece(peer, bf) else {
                break;
            };
            let len = if idx as u32 == self.num_pieces - 1 {
                self.last_piece_len
            } else {
                self.piece_len
            };
            let mut partial_piece = PartialPiece::new(idx, len);
            remaining -= partial_piece.pick_next_blocks(remaining, &mut requests, current_requests, false);
            self.partial_pieces.write().await.insert(idx, partial_piece.into());
        }

        requests
    }

    pub async fn find_unclaimed_range(&self, min_len: usize) -> Option<(usize, usize)> {
        self.piece_picker.read().await.find_unclaimed_range(min_len)
    }

    pub async fn requesters(&self, idx: usize) -> Vec<SocketAddr> {
        self.piece_picker.read().await.requesters(idx)
    }

    // A request to `peer` for `idx` hasn't been answered within
    // `request_timeout`; mark it snubbed so stalled-piece re-request (§4.4
    // step 7) can count it, rather than treating it as still running.
    pub async fn handle_snubbed(&self, peer: SocketAddr, idx: usize) {
        self.piece_picker.write().await.handle_snubbed(peer, idx);
    }

    pub async fn is_complete(&self) -> bool {
        self.piece_picker.read().await.all()
    }

    pub async fn have(&self, idx: usize) -> bool {
        self.piece_picker.read().await.own_bitfield()[idx]
    }

    // Returns the blocks to request plus any piece indices stolen from an
    // active webseed run as a side effect, so the caller can fold the
    // latter back into `WebseedSource::active` (`webseed::stop_at`).
    pub async fn pick_blocks(
        &self,
        peer: SocketAddr,
        current_requests: &HashSet<BlockRequest>,
        target_queue_len: usize,
        bf: &Bitfield,
    ) -> (Vec<BlockRequest>, Vec<usize>) {
        let mut requests = vec![];
        let mut stolen = vec![];
        let mut remaining = target_queue_len.saturating_sub(current_requests.len());
        if remaining == 0 {
            return (vec![], vec![]);
        }

        // Continue partially downloaded pieces the peer has before starting
        // anything new; this keeps a piece's completion from being delayed
        // by always chasing freshly picked rarest pieces.
        for partial_piece in self.partial_pieces.write().await.values_mut() {
            if remaining == 0 {
                break;
            }
            if !bf[partial_piece.read().await.idx] {
                continue;
            }
            remaining -= partial_piece
                .write()
                .await
                .pick_next_blocks(remaining, &mut requests, current_requests, false);
        }

        while remaining != 0 {
            if let Some(idx) = self.piece_picker.write().await.steal_webseed_tail(peer, bf) {
                tracing::debug!("stealing piece {} from webseed", idx);
                stolen.push(idx);
                let len = if idx as u32 == self.num_pieces - 1 {
                    self.last_piece_len
                } else {
                    self.piece_len
                };
                let mut partial_piece = PartialPiece::new(idx, len);
                remaining -= partial_piece.pick_next_blocks(remaining, &mut requests, current_requests, false);
                self.partial_pieces.write().await.insert(idx, partial_piece.into());
            } else if let Some(idx) = self.piece_picker.write().await.pick_new_piece(peer, bf) {
                tracing::trace!("picked piece {}", idx);
                let len = if idx as u32 == self.num_pieces - 1 {
                    self.last_piece_len
                } else {
                    self.piece_len
                };
                let mut partial_piece = PartialPiece::new(idx, len);
                remaining -= partial_piece.pick_next_blocks(remaining, &mut requests, current_requests, false);
                self.partial_pieces.write().await.insert(idx, partial_piece.into());
            } else if let Some(idx) = self
                .piece_picker
                .write()
                .await
                .pick_stalled_piece(peer, bf, self.endgame_max_duplicate)
            {
                // Endgame: re-request blocks from a piece someone else is
                // already downloading.
                let partial_pieces = self.partial_pieces.write().await;
                if let Some(partial_piece) = partial_pieces.get(&idx) {
                    remaining -= partial_piece
                        .write()
                        .await
                        .pick_next_blocks(remaining, &mut requests, current_requests, true);
                }
                if remaining == 0 {
                    return (requests, stolen);
                }
            } else {
                break;
            }
        }
        (requests, stolen)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BLOCK_SIZE;
    use bitvec::prelude::*;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    #[tokio::test]
    async fn test_pick_blocks() {
        let picker = Picker::new(1028, 32_768, 32_768, 20);
        let bf = BitVec::repeat(true, 1028);
        picker.piece_picker.write().await.handle_bitfield(addr(1), &bf);
        let (requests_1, _) = picker.pick_blocks(addr(1), &HashSet::new(), 4, &bf).await;
        assert_eq!(requests_1.len(), 4);
        let (requests_2, _) = picker.pick_blocks(addr(1), &HashSet::new(), 4, &bf).await;
        assert_eq!(requests_2.len(), 4);
    }

    #[tokio::test]
    async fn test_pick_blocks_end_game() {
        let picker = Picker::new(2, 32_768, 32_768, 20);
        let bf = BitVec::repeat(true, 2);
        picker.piece_picker.write().await.handle_bitfield(addr(1), &bf);

        let (requests_1, _) = picker.pick_blocks(addr(1), &HashSet::new(), 4, &bf).await;
        assert_eq!(requests_1.len(), 4);

        let (requests_2, _) = picker.pick_blocks(addr(2), &HashSet::new(), 4, &bf).await;
        assert_eq!(requests_2.len(), 4);

        let mut previous_requests = HashSet::new();
        previous_requests.insert(BlockRequest { piece_idx: 0, offset: 0, len: BLOCK_SIZE });
        previous_requests.insert(BlockRequest { piece_idx: 1, offset: 0, len: BLOCK_SIZE });
        let (requests_3, _) = picker.pick_blocks(addr(2), &previous_requests, 4, &bf).await;
        assert_eq!(requests_3.len(), 2);
    }

    #[tokio::test]
    async fn test_rarest_first_prefers_less_available_piece() {
        let picker = Picker::new(2, 32_768, 32_768, 20);
        let bf = BitVec::repeat(true, 2);
        {
            let mut pp = picker.piece_picker.write().await;
            // Piece 0 seen by two peers, piece 1 by only one: piece 1 is rarer.
            pp.handle_have(addr(1), 0);
            pp.handle_have(addr(2), 0);
            pp.handle_have(addr(3), 1);
        }
        let picked = picker
            .piece_picker
            .write()
            .await
            .pick_new_piece(addr(9), &bf)
            .unwrap();
        assert_eq!(picked, 1);
    }

    #[tokio::test]
    async fn test_steal_webseed_tail_prefers_smallest_gap() {
        let picker = Picker::new(20, 32_768, 32_768, 20);
        let bf = BitVec::repeat(true, 20);
        picker.piece_picker.write().await.handle_bitfield(addr(1), &bf);

        // A large reservation [0, 10) and a small one [10, 20); the peer
        // only has the tail of the small one, so it should steal piece 19.
        picker.reserve_for_webseed(0, 10).await;
        picker.reserve_for_webseed(10, 20).await;

        let stolen = picker.steal_webseed_tail(addr(2), &bf).await;
        assert_eq!(stolen, Some(19));
        assert!(!picker.piece_picker.read().await.is_webseed_reserved(19));
        assert!(picker.piece_picker.read().await.is_webseed_reserved(9));
    }

    #[tokio::test]
    async fn test_pick_blocks_steals_from_webseed_when_reserved() {
        let picker = Picker::new(20, 32_768, 32_768, 20);
        let bf = BitVec::repeat(true, 20);
        picker.piece_picker.write().await.handle_bitfield(addr(1), &bf);
        picker.reserve_for_webseed(10, 20).await;

        let (requests, stolen) = picker.pick_blocks(addr(2), &HashSet::new(), 4, &bf).await;
        assert_eq!(stolen, vec![19]);
        assert!(requests.iter().all(|r| r.piece_idx == 19));
    }
}
