use std::{
    fs::{File, OpenOptions},
    io::{Read, Seek, SeekFrom, Write},
    ops::Range,
    path::PathBuf,
    sync::RwLock,
};

use serde_derive::{Deserialize, Serialize};
use thiserror::Error;

use crate::metainfo::MetaInfo;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("short read/write: expected {expected} bytes, got {actual}")]
    ShortTransfer { expected: usize, actual: usize },
}

// File entry as it appears in metainfo, plus its computed offset within the
// torrent's flattened byte space.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename = "File")]
pub struct FileInfo {
    #[serde(deserialize_with = "crate::de::path_deserialize")]
    pub path: PathBuf,

    pub length: usize,

    // Offset in bytes from start of torrent when viewed as single array.
    #[serde(skip)]
    pub offset: usize,

    #[serde(default)]
    pub md5sum: Option<String>,
}

impl FileInfo {
    // Byte index range for whole torrent. Exclusive end: `offset + length`.
    pub fn byte_range(&self) -> Range<usize> {
        self.offset..(self.offset + self.length)
    }
}

// General geometry of a torrent's storage: piece sizes, file layout, and
// the directory files are written under.
#[derive(Debug, Clone)]
pub struct StoreInfo {
    pub total_len: u64,
    pub piece_len: usize,
    pub last_piece_len: usize,
    pub num_pieces: u32,
    pub files: Vec<FileInfo>,
    pub output_dir: PathBuf,
}

impl StoreInfo {
    pub fn new(metainfo: &MetaInfo, output_dir: PathBuf) -> Self {
        let total_len = metainfo.total_len();
        let num_pieces = metainfo.num_pieces();
        let piece_len = metainfo.piece_len();
        let last_piece_len = (total_len - (piece_len as u64 * (num_pieces as u64 - 1))) as usize;
        let files = metainfo.files();
        let output_dir = if metainfo.is_multi_file() {
            output_dir.join(metainfo.name())
        } else {
            output_dir
        };

        Self {
            total_len,
            piece_len,
            last_piece_len,
            num_pieces,
            files,
            output_dir,
        }
    }

    pub fn piece_length(&self, idx: usize) -> usize {
        if idx as u32 == self.num_pieces - 1 {
            self.last_piece_len
        } else {
            self.piece_len
        }
    }

    pub fn piece_byte_offset(&self, piece_idx: usize) -> usize {
        piece_idx * self.piece_len
    }

    // Returns the indexes of the first and last file that a piece intersects.
    // Both bounds are found by a single inclusive-end search: a piece's last
    // byte at `end - 1` is only ever out of range if the torrent's metainfo
    // is itself inconsistent, which we treat as a bug rather than recover from.
    pub fn piece_file_intersections(&self, piece_idx: usize) -> Range<usize> {
        debug_assert!(
            piece_idx < self.num_pieces as usize,
            "piece index out of bounds"
        );

        if self.files.len() == 1 {
            return 0..1;
        }

        let offset = piece_idx * self.piece_len;
        let last_byte = offset + self.piece_length(piece_idx) - 1;

        let start_file = self
            .files
            .iter()
            .position(|f| f.byte_range().contains(&offset))
            .expect("piece byte offset exceeds file length");

        let end_file = self.files[start_file..]
            .iter()
            .position(|f| f.byte_range().contains(&last_byte))
            .map(|idx| start_file + idx)
            .expect("piece last byte exceeds torrent length");

        start_file..(end_file + 1)
    }
}

// Storage is the seam between the disk actor and however bytes actually get
// persisted. The default implementation is a set of files on the local
// filesystem laid out per the torrent's metainfo, but tests and alternative
// backends (e.g. in-memory) can swap in their own.
pub trait Storage: Send + Sync {
    fn read_at(&self, file_idx: usize, offset: u64, buf: &mut [u8]) -> Result<usize, StorageError>;
    fn write_at(&self, file_idx: usize, offset: u64, buf: &[u8]) -> Result<(), StorageError>;
    fn close(&self, file_idx: usize) -> Result<(), StorageError>;

    // Root directory (or single file path, for single-file torrents) that
    // downloaded data is written under.
    fn destination(&self) -> &std::path::Path;
}

// Default filesystem-backed storage: one `std::fs::File` per torrent file,
// opened lazily on first access and kept behind a lock for interior
// mutability since reads and writes are dispatched from `spawn_blocking`
// tasks that don't own `&mut Storage`.
pub struct FileStorage {
    output_dir: PathBuf,
    files: Vec<FileEntry>,
}

struct FileEntry {
    path: PathBuf,
    length: usize,
    handle: RwLock<Option<File>>,
}

impl FileStorage {
    pub fn new(info: &StoreInfo) -> Result<Self, StorageError> {
        std::fs::create_dir_all(&info.output_dir)?;
        let files = info
            .files
            .iter()
            .map(|f| FileEntry {
                path: info.output_dir.join(&f.path),
                length: f.length,
                handle: RwLock::new(None),
            })
            .collect();
        Ok(Self {
            output_dir: info.output_dir.clone(),
            files,
        })
    }

    fn with_file<T>(
        &self,
        idx: usize,
        f: impl FnOnce(&mut File) -> Result<T, StorageError>,
    ) -> Result<T, StorageError> {
        let entry = &self.files[idx];
        let mut guard = entry.handle.write().unwrap();
        if guard.is_none() {
            if let Some(parent) = entry.path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .open(&entry.path)?;
            file.set_len(entry.length as u64)?;
            *guard = Some(file);
        }
        f(guard.as_mut().unwrap())
    }
}

impl Storage for FileStorage {
    fn read_at(&self, file_idx: usize, offset: u64, buf: &mut [u8]) -> Result<usize, StorageError> {
        self.with_file(file_idx, |file| {
            file.seek(SeekFrom::Start(offset))?;
            let n = file.read(buf)?;
            Ok(n)
        })
    }

    fn write_at(&self, file_idx: usize, offset: u64, buf: &[u8]) -> Result<(), StorageError> {
        self.with_file(file_idx, |file| {
            file.seek(SeekFrom::Start(offset))?;
            file.write_all(buf)?;
            Ok(())
        })
    }

    fn close(&self, file_idx: usize) -> Result<(), StorageError> {
        let entry = &self.files[file_idx];
        let mut guard = entry.handle.write().unwrap();
        if let Some(file) = guard.as_ref() {
            file.sync_all()?;
        }
        *guard = None;
        Ok(())
    }

    fn destination(&self) -> &std::path::Path {
        &self.output_dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(offset: usize, length: usize) -> FileInfo {
        FileInfo {
            path: PathBuf::from(format!("f{offset}")),
            length,
            offset,
            md5sum: None,
        }
    }

    #[test]
    fn test_piece_file_intersections_single_file() {
        let info = StoreInfo {
            total_len: 100,
            piece_len: 32,
            last_piece_len: 4,
            num_pieces: 4,
            files: vec![file(0, 100)],
            output_dir: PathBuf::from("x"),
        };
        assert_eq!(info.piece_file_intersections(0), 0..1);
        assert_eq!(info.piece_file_intersections(3), 0..1);
    }

    #[test]
    fn test_piece_file_intersections_multi_file() {
        // files of length 40, 40, 20 => boundaries at 40, 80, 100
        let info = StoreInfo {
            total_len: 100,
            piece_len: 32,
            last_piece_len: 4,
            num_pieces: 4,
            files: vec![file(0, 40), file(40, 40), file(80, 20)],
            output_dir: PathBuf::from("x"),
        };
        // piece 0: bytes [0, 32) -> entirely in file 0
        assert_eq!(info.piece_file_intersections(0), 0..1);
        // piece 1: bytes [32, 64) -> spans file 0 and file 1
        assert_eq!(info.piece_file_intersections(1), 0..2);
        // piece 2: bytes [64, 96) -> spans file 1 and file 2
        assert_eq!(info.piece_file_intersections(2), 1..3);
        // piece 3 (last, len 4): bytes [96, 100) -> entirely in file 2
        assert_eq!(info.piece_file_intersections(3), 2..3);
    }

    #[test]
    fn test_byte_range_is_exclusive() {
        let f = file(10, 5);
        assert_eq!(f.byte_range(), 10..15);
        assert!(!f.byte_range().contains(&15));
    }
}
