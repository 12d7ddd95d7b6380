use std::net::SocketAddr;

use crate::{p2p::state::SessionState, stats::TorrentStats};

// Periodic (~10s) choke/unchoke ranking, grounded on the rolling throughput
// already tracked per-peer in `SessionState`/`ThroughputStats`. Kept as a
// pure function over a peer snapshot so it is trivial to unit test without
// spinning up real sessions.
pub struct Unchoker {
    regular_slots: usize,
    optimistic_slots: usize,
    // Peer chosen last round for the optimistic slot(s), so we don't just
    // re-pick whoever sorts first every tick.
    last_optimistic: Vec<SocketAddr>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChokeDecision {
    Unchoke,
    Choke,
}

impl Unchoker {
    pub fn new(regular_slots: usize, optimistic_slots: usize) -> Self {
        Self {
            regular_slots,
            optimistic_slots,
            last_optimistic: Vec::new(),
        }
    }

    // `peers` is every connected, interested-or-not peer with their current
    // state; `seeding` picks whether ranking is by upload or download
    // throughput. Returns the full set of decisions for peers we are
    // choking or unchoking this round (peers with no decision keep their
    // current state).
    pub fn select(
        &mut self,
        peers: &[(SocketAddr, SessionState)],
        seeding: bool,
    ) -> Vec<(SocketAddr, ChokeDecision)> {
        let mut decisions = Vec::with_capacity(peers.len());

        let mut interested: Vec<&(SocketAddr, SessionState)> =
            peers.iter().filter(|(_, s)| s.peer_interested).collect();

        // An uninterested peer is immediately choked; nothing else to decide.
        for (addr, state) in peers {
            if !state.peer_interested && !state.choked {
                decisions.push((*addr, ChokeDecision::Choke));
            }
        }

        interested.sort_by_key(|(_, s)| {
            let rate = if seeding { s.throughput.up.avg() } else { s.throughput.down.avg() };
            std::cmp::Reverse(rate)
        });

        let regular: Vec<SocketAddr> = interested
            .iter()
            .take(self.regular_slots)
            .map(|(a, _)| *a)
            .collect();

        let remaining: Vec<SocketAddr> = interested
            .iter()
            .skip(self.regular_slots)
            .map(|(a, _)| *a)
            .collect();

        // Keep the previous round's optimistic pick(s) if still eligible,
        // otherwise rotate to the next remaining candidate(s).
        let mut optimistic: Vec<SocketAddr> = self
            .last_optimistic
            .iter()
            .filter(|a| remaining.contains(a))
            .take(self.optimistic_slots)
            .copied()
            .collect();
        for addr in &remaining {
            if optimistic.len() >= self.optimistic_slots {
                break;
            }
            if !optimistic.contains(addr) {
                optimistic.push(*addr);
            }
        }
        self.last_optimistic = optimistic.clone();

        let unchoked: Vec<SocketAddr> = regular.iter().chain(optimistic.iter()).copied().collect();

        for (addr, state) in peers.iter().filter(|(_, s)| s.peer_interested) {
            let should_unchoke = unchoked.contains(addr);
            if should_unchoke && state.choked {
                decisions.push((*addr, ChokeDecision::Unchoke));
            } else if !should_unchoke && !state.choked {
                decisions.push((*addr, ChokeDecision::Choke));
            }
        }

        decisions
    }
}

pub fn is_seed(stats: &TorrentStats) -> bool {
    stats.piece_stats.is_seed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::p2p::state::ConnState;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    fn peer(interested: bool, choked: bool, down_rate: u64) -> SessionState {
        let mut state = SessionState::default();
        state.conn_state = ConnState::Connected;
        state.peer_interested = interested;
        state.choked = choked;
        for _ in 0..down_rate {
            state.throughput.down.add(1);
        }
        state.throughput.down.reset();
        state
    }

    #[test]
    fn test_uninterested_peer_is_choked() {
        let mut unchoker = Unchoker::new(2, 1);
        let peers = vec![(addr(1), peer(false, false, 0))];
        let decisions = unchoker.select(&peers, false);
        assert_eq!(decisions, vec![(addr(1), ChokeDecision::Choke)]);
    }

    #[test]
    fn test_fastest_interested_peers_unchoked() {
        let mut unchoker = Unchoker::new(1, 0);
        let peers = vec![
            (addr(1), peer(true, true, 10)),
            (addr(2), peer(true, true, 100)),
        ];
        let decisions = unchoker.select(&peers, false);
        assert!(decisions.contains(&(addr(2), ChokeDecision::Unchoke)));
        assert!(!decisions.iter().any(|(a, _)| *a == addr(1)));
    }
}
