use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex},
};
use sha1::Digest;
use tokio::task::JoinHandle;
use crate::{
    block::{num_blocks, Block, BlockData},
    p2p::{PeerCommand, PeerTx},
    storage::{FileStorage, Storage, StoreInfo},
    torrent::{TorrentCommand, TorrentTx},
    Bitfield,
    ID,
};
use super::{
    piece::{read_piece, PieceBuf},
    AllocationError,
    BlockRequest,
    Result,
};


#[derive(Debug)]
pub struct Torrent {

    info: StoreInfo,

    piece_hashes: Vec<ID>,

    // Place to collect pieces, idxed by piece idx.
    write_buf: HashMap<usize, PieceBuf>,

    // Context shared for piece writing task.
    ctx: Arc<Ctx>,

}

// Ctx involves data needed for the IO threads.
struct Ctx {

    pub storage: Arc<dyn Storage>,

    pub torrent_tx: TorrentTx,

    // Peers often will read multiple blocks from the same piece.
    // So we read whole piece then cache pieces to avoid disk syscalls.
    // Lru cache ensures least recently used pieces are removed.
    pub read_cache: Mutex<lru::LruCache<usize, Vec<Arc<Vec<u8>>>>>,

    // Piece indices with a hash+write already spawned (or completed). A
    // duplicate full piece delivered by a second peer during endgame must
    // not spawn a second concurrent writer for the same index; cleared on
    // hash failure so the re-requested piece can be written once it comes
    // back around.
    pub writing: Mutex<HashSet<usize>>,

}

impl std::fmt::Debug for Ctx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ctx").finish_non_exhaustive()
    }
}

impl Torrent {

    pub fn new(
        info: StoreInfo,
        piece_hashes: Vec<ID>,
        torrent_tx: TorrentTx,
    ) -> std::result::Result<Self, AllocationError> {

        let storage: Arc<dyn Storage> = Arc::new(FileStorage::new(&info)?);

        // TODO: make lru size a configurable option, tied to config.piece_cache_size.
        let read_cache = Mutex::new(lru::LruCache::new(std::num::NonZeroUsize::new(500).unwrap()));
        Ok(Self {
            info,
            piece_hashes,
            write_buf: HashMap::new(),
            ctx: Arc::new(Ctx {
                storage,
                torrent_tx,
                read_cache,
                writing: Mutex::new(HashSet::new()),
            })
        })
    }

    pub fn write_block(&mut self, block: Block) {
        // Block info is validated in the peer session.

        let piece_idx = block.piece_idx;
        if self.ctx.writing.lock().unwrap().contains(&piece_idx) {
            // A duplicate delivery for a piece already hashing/written
            // (endgame); drop it, the writer already in flight owns it.
            tracing::trace!("dropping block for piece {} already writing", piece_idx);
            return;
        }
        let piece = self.write_buf.entry(piece_idx).or_insert_with(|| {
            let len = self.info.piece_length(piece_idx);
            tracing::trace!("creating new piece {} in write buf", piece_idx);
            PieceBuf {
                hash: self.piece_hashes[piece_idx],
                len,
                data: vec![0; len],
                blocks_received: vec![false; num_blocks(len) as usize],
                num_blocks_received: 0,
            }
        });

        piece.add_block(&block);
        tracing::trace!("piece {}: {} blocks received out of {}", piece_idx, piece.num_blocks_received, num_blocks(piece.len));

        // If we have all the blocks for this piece, write piece to disk.
        if piece.is_complete() {
            tracing::trace!("all blocks received for piece {} ... writing", piece_idx);

            let piece = self.write_buf.remove(&piece_idx).expect("piece not found in write buf");
            let info = self.info.clone();
            let ctx = Arc::clone(&self.ctx);

            // Spawn a thread for expensive workload.
            let _: JoinHandle<Result<()>> = tokio::task::spawn_blocking(move || {

                if piece.verify_hash() {
                    piece.write(piece_idx, &info, &*ctx.storage)?;
                    ctx.torrent_tx.send(TorrentCommand::PieceWritten { idx: piece_idx, valid: true })?;
                } else {
                    tracing::warn!("piece {} failed hash verification", piece_idx);
                    ctx.torrent_tx.send(TorrentCommand::PieceWritten { idx: piece_idx, valid: false })?;
                }

                Ok(())
            });
        }
    }

    // Reads a block from disk and sends it to the peer.
    pub fn read_block(&self, block_info: BlockRequest, peer_tx: PeerTx) -> Result<()> {

        let block_idx = block_info.idx_in_piece();
        // If the block is in cache, retrieve it and send to peer.
        if let Some(cached) = self.ctx.read_cache.lock()?.get(&block_info.piece_idx) {
            tracing::trace!("cache hit for piece {}", block_info.piece_idx);

            if block_idx >= cached.len() {
                return Ok(());
            }

            peer_tx.send(PeerCommand::BlockRead(Block::from_block_request(
                &block_info,
                BlockData::Cached(Arc::clone(&cached[block_idx])),
            ))).ok();

        } else {
            // If not in cache, read from disk and put in cache.
            let info = self.info.clone();
            let ctx = Arc::clone(&self.ctx);

            let _: JoinHandle<Result<()>> = tokio::task::spawn_blocking(move || {
                let piece = read_piece(block_info.piece_idx, &info, &*ctx.storage)?;
                let block = Arc::clone(&piece[block_idx]);

                ctx.read_cache.lock()?.put(block_info.piece_idx, piece);
                peer_tx.send(PeerCommand::BlockRead(Block::from_block_request(
                    &block_info,
                    BlockData::Cached(block),
                ))).ok();
                Ok(())
            });
        }

        Ok(())
    }

    // Checks if the files exist, if so returns a bitfield of correctly occuring pieces.
    pub fn check_existing_files(&self) -> Bitfield {

        let mut bitfield = Bitfield::repeat(false, self.info.num_pieces as usize);

        // Iterate over all pieces and check hash matches.
        for piece_idx in 0..self.info.num_pieces as usize {
            match read_piece(piece_idx, &self.info, &*self.ctx.storage) {
                Ok(piece) => {
                    let mut hasher = sha1::Sha1::new();
                    for block in piece.iter() {
                        hasher.update(&**block);
                    }
                    let hash = hasher.finalize();
                    if hash.as_slice() == self.piece_hashes[piece_idx] {
                        bitfield.set(piece_idx, true);
                    }
                },
                Err(_) => continue,
            }
        }

        bitfield
    }
}
