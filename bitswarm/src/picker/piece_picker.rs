use std::{collections::HashSet, net::SocketAddr};

use crate::Bitfield;

// The set of peers associated with a piece in one of four roles. Rather
// than a bare frequency counter, tracking the actual peer identities lets
// us tell a rarest piece with three uninterested/choked haves apart from
// one with three peers actively serving it, and lets "allowed fast"/snub
// bookkeeping clear cleanly on disconnect.
#[derive(Debug, Default, Clone)]
struct PeerSet {
    peers: HashSet<SocketAddr>,
}

impl PeerSet {
    fn insert(&mut self, peer: SocketAddr) -> bool {
        self.peers.insert(peer)
    }

    fn remove(&mut self, peer: &SocketAddr) -> bool {
        self.peers.remove(peer)
    }

    fn len(&self) -> usize {
        self.peers.len()
    }

    fn contains(&self, peer: &SocketAddr) -> bool {
        self.peers.contains(peer)
    }
}

#[derive(Debug, Default, Clone)]
struct PieceState {
    having: PeerSet,
    requested: PeerSet,
    snubbed: PeerSet,
    choked: PeerSet,
    // Peers that named this piece in an AllowedFast message (BEP 6): we may
    // request it from them even while choked, and a later real Choke from
    // them must not cancel those particular requests.
    allowed_fast: PeerSet,
    is_partial: bool,
}

impl PieceState {
    // Peers actively able to serve this piece to us: they have it, we've
    // requested from them, and they haven't snubbed or choked us.
    fn running_downloads(&self) -> usize {
        self.requested
            .peers
            .iter()
            .filter(|p| !self.snubbed.contains(p) && !self.choked.contains(p))
            .count()
    }

    fn stalled_downloads(&self) -> usize {
        self.requested
            .peers
            .iter()
            .filter(|p| self.snubbed.contains(p) || self.choked.contains(p))
            .count()
    }
}

#[derive(Debug)]
pub struct PiecePicker {
    pieces: Vec<PieceState>,
    have: Bitfield,
    // Pieces currently reserved for exclusive webseed writing (§4.8). Rather
    // than track a handle back to the owning source here, the picker only
    // needs to know "hands off"; the torrent loop keeps the source->range
    // mapping in its `WebseedManager`.
    webseed_reserved: Vec<bool>,
}

impl PiecePicker {
    pub fn new(num_pieces: usize) -> Self {
        let mut have = Bitfield::new();
        have.resize(num_pieces, false);
        Self {
            pieces: vec![PieceState::default(); num_pieces],
            have,
            webseed_reserved: vec![false; num_pieces],
        }
    }

    // Reserves `[begin, end)` for a webseed download; peers stop picking
    // these until released or individually stolen (`steal_from_webseed`).
    pub fn reserve_for_webseed(&mut self, begin: usize, end: usize) {
        for idx in begin..end.min(self.webseed_reserved.len()) {
            self.webseed_reserved[idx] = true;
        }
    }

    pub fn release_webseed_range(&mut self, begin: usize, end: usize) {
        for idx in begin..end.min(self.webseed_reserved.len()) {
            self.webseed_reserved[idx] = false;
        }
    }

    pub fn is_webseed_reserved(&self, idx: usize) -> bool {
        self.webseed_reserved[idx]
    }

    // A peer may steal a single reserved piece out from under a webseed
    // (e.g. it is the tail of the smallest remaining gap, or a faster
    // source). Releasing the reservation here and letting the normal
    // `pick_new_piece` pass requested it keeps the "who owns this piece"
    // bookkeeping in one place.
    pub fn steal_from_webseed(&mut self, peer: SocketAddr, idx: usize) -> bool {
        if !self.webseed_reserved[idx] || self.have[idx] {
            return false;
        }
        self.webseed_reserved[idx] = false;
        self.pieces[idx].requested.insert(peer);
        self.pieces[idx].is_partial = true;
        true
    }

    // A peer may claim the tail piece of the smallest webseed-reserved run
    // it has, converting it to an ordinary peer download (§4.4 step 1a).
    // Picking the *smallest* gap's tail first lets webseeds finish the
    // larger ranges uninterrupted while peers mop up what's nearly done.
    pub fn steal_webseed_tail(&mut self, peer: SocketAddr, bf: &Bitfield) -> Option<usize> {
        let mut best: Option<(usize, usize)> = None; // (run length, tail index)
        let mut run_start = None;
        for idx in 0..=self.webseed_reserved.len() {
            let reserved = idx < self.webseed_reserved.len() && self.webseed_reserved[idx];
            match (reserved, run_start) {
                (true, None) => run_start = Some(idx),
                (false, Some(start)) => {
                    let tail = idx - 1;
                    if bf[tail] && !self.have[tail] {
                        let len = idx - start;
                        if best.map_or(true, |(best_len, _)| len < best_len) {
                            best = Some((len, tail));
                        }
                    }
                    run_start = None;
                }
                _ => {}
            }
        }

        let (_, idx) = best?;
        self.webseed_reserved[idx] = false;
        self.pieces[idx].requested.insert(peer);
        self.pieces[idx].is_partial = true;
        Some(idx)
    }

    pub fn own_bitfield(&self) -> &Bitfield {
        &self.have
    }

    pub fn all(&self) -> bool {
        self.have.all()
    }

    pub fn set_own_bitfield(&mut self, bf: Bitfield) {
        debug_assert_eq!(bf.len(), self.have.len());
        self.have = bf;
    }

    pub fn received_piece(&mut self, idx: usize) {
        assert!(idx < self.pieces.len());
        self.have.set(idx, true);
    }

    pub fn handle_have(&mut self, peer: SocketAddr, idx: usize) -> bool {
        assert!(idx < self.pieces.len());
        self.pieces[idx].having.insert(peer);
        !self.have[idx]
    }

    pub fn handle_bitfield(&mut self, peer: SocketAddr, bf: &Bitfield) -> bool {
        debug_assert_eq!(bf.len(), self.have.len());
        let mut interested = false;
        for (i, has) in bf.iter().enumerate() {
            if *has {
                self.pieces[i].having.insert(peer);
                if !self.have[i] {
                    interested = true;
                }
            }
        }
        interested
    }

    pub fn handle_snubbed(&mut self, peer: SocketAddr, idx: usize) {
        self.pieces[idx].snubbed.insert(peer);
    }

    pub fn handle_choke(&mut self, peer: SocketAddr, idx: usize) {
        self.pieces[idx].choked.insert(peer);
    }

    pub fn handle_unchoke(&mut self, peer: SocketAddr, idx: usize) {
        self.pieces[idx].choked.remove(&peer);
    }

    pub fn handle_allowed_fast(&mut self, peer: SocketAddr, idx: usize) {
        self.pieces[idx].allowed_fast.insert(peer);
    }

    pub fn is_allowed_fast(&self, peer: &SocketAddr, idx: usize) -> bool {
        self.pieces[idx].allowed_fast.contains(peer)
    }

    // A piece failed hash verification after all its blocks arrived; undo
    // its in-flight bookkeeping so `pick_new_piece` considers it fresh again.
    // Availability (`having`) is left untouched since peers still have it.
    pub fn reset_piece(&mut self, idx: usize) {
        self.pieces[idx].requested = PeerSet::default();
        self.pieces[idx].snubbed = PeerSet::default();
        self.pieces[idx].choked = PeerSet::default();
        self.pieces[idx].is_partial = false;
    }

    pub fn handle_disconnect(&mut self, peer: SocketAddr) {
        for piece in self.pieces.iter_mut() {
            piece.having.remove(&peer);
            piece.requested.remove(&peer);
            piece.snubbed.remove(&peer);
            piece.choked.remove(&peer);
            piece.allowed_fast.remove(&peer);
        }
    }

    // Rarest-first selection among pieces `peer` has, we don't, and nobody
    // has requested yet. Ties are broken by piece index, which is as good
    // as any deterministic tiebreak without a dedicated RNG thread through
    // every call site.
    pub fn pick_new_piece(&mut self, peer: SocketAddr, bf: &Bitfield) -> Option<usize> {
        let idx = self
            .pieces
            .iter()
            .enumerate()
            .filter(|(i, p)| {
                !self.have[*i]
                    && !self.webseed_reserved[*i]
                    && bf[*i]
                    && p.requested.len() == 0
                    && p.having.len() > 0
            })
            .min_by_key(|(_, p)| p.having.len())
            .map(|(i, _)| i)?;

        self.pieces[idx].requested.insert(peer);
        self.pieces[idx].is_partial = true;
        Some(idx)
    }

    // A piece the peer marked allowed-fast: may be requested even while
    // choked (BEP 6). Prefers one not already requested from this peer;
    // doesn't require `having`/rarest-first since allowed-fast is an
    // explicit offer, not general availability.
    pub fn pick_allowed_fast_piece(&mut self, peer: SocketAddr, bf: &Bitfield) -> Option<usize> {
        let idx = self
            .pieces
            .iter()
            .enumerate()
            .filter(|(i, p)| {
                !self.have[*i]
                    && !self.webseed_reserved[*i]
                    && bf[*i]
                    && p.allowed_fast.contains(&peer)
                    && !p.requested.contains(&peer)
            })
            .min_by_key(|(_, p)| p.requested.len())
            .map(|(i, _)| i)?;

        self.pieces[idx].requested.insert(peer);
        self.pieces[idx].is_partial = true;
        Some(idx)
    }

    // Endgame: a piece already being downloaded, where this peer isn't
    // already snubbed/choked for it, preferring the one with the fewest
    // concurrent (running) requests so duplicate work is spread out.
    pub fn pick_stalled_piece(&mut self, peer: SocketAddr, bf: &Bitfield, max_duplicate: u32) -> Option<usize> {
        let idx = self
            .pieces
            .iter()
            .enumerate()
            .filter(|(i, p)| {
                !self.have[*i]
                    && !self.webseed_reserved[*i]
                    && bf[*i]
                    && p.is_partial
                    && !p.requested.contains(&peer)
                    && (p.running_downloads() as u32) < max_duplicate
            })
            .min_by_key(|(_, p)| p.stalled_downloads())
            .map(|(i, _)| i)?;

        self.pieces[idx].requested.insert(peer);
        Some(idx)
    }

    pub fn running_downloads(&self, idx: usize) -> usize {
        self.pieces[idx].running_downloads()
    }

    // Peers that had an outstanding request for this piece. Used on a
    // hash-mismatch to identify a single responsible contributor (§4.1
    // step 7: "ban the responsible peer(s) if a single contributor is
    // identifiable").
    pub fn requesters(&self, idx: usize) -> Vec<SocketAddr> {
        self.pieces[idx].requested.peers.iter().copied().collect()
    }

    // First contiguous run of at least `min_len` pieces that are neither
    // owned nor already reserved by another webseed, for the webseed
    // scheduler to claim. Doesn't consider whether any peer has requested
    // them; a peer is always free to steal a single piece out from under
    // an active reservation (`steal_from_webseed`).
    pub fn find_unclaimed_range(&self, min_len: usize) -> Option<(usize, usize)> {
        let mut run_start = None;
        for idx in 0..self.pieces.len() {
            let free = !self.have[idx] && !self.webseed_reserved[idx];
            match (free, run_start) {
                (true, None) => run_start = Some(idx),
                (false, Some(start)) => {
                    if idx - start >= min_len {
                        return Some((start, idx));
                    }
                    run_start = None;
                }
                _ => {}
            }
        }
        if let Some(start) = run_start {
            if self.pieces.len() - start >= min_len {
                return Some((start, self.pieces.len()));
            }
        }
        None
    }
}
