#![allow(dead_code)]

mod metainfo;
mod storage;
mod resume;
mod torrent;
mod tracker;
mod dht;
mod p2p;
mod disk;
mod block;
mod picker;
mod unchoke;
mod webseed;
mod stats;
mod config;
mod client;
mod de;
mod info_downloader;
mod magnet;
pub mod event;

const BLOCK_SIZE: usize = 0x4000;

// Maximum block size we will ever request from, or serve to, a peer.
// Peers requesting more than this are misbehaving and disconnected.
const MAX_BLOCK_LEN: usize = 0x8000;

type Bitfield = bitvec::vec::BitVec<u8, bitvec::order::Msb0>;

// Sha1 info-hash, also reused as a torrent's identity in every map keyed by torrent.
pub type ID = [u8; 20];
pub type TorrentID = ID;

pub use metainfo::{MagnetLink, MagnetLinkError, MetaInfo};
pub use torrent::Torrent;
pub use client::{Client, ClientCommand};
pub use config::{Config, ClientConfig};
pub use event::{Notification, UserTx, UserRx};
