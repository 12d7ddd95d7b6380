use serde_derive::{Deserialize, Serialize};
use thiserror::Error;

use crate::{Bitfield, TorrentID};

#[derive(Debug, Error)]
pub enum ResumeError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Encode(String),
}

// Everything needed to pick a torrent back up without re-checking every
// piece against its hash: which pieces are already complete and the
// lifetime counters shown to the user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResumeData {
    pub info_hash: TorrentID,
    #[serde(with = "bitfield_bytes")]
    pub bitfield: Bitfield,
    pub uploaded: u64,
    pub downloaded: u64,
    // Downloaded bytes that failed their piece hash check and had to be
    // re-requested; shown to the user alongside uploaded/downloaded.
    #[serde(default)]
    pub wasted: u64,
    // Seconds spent as a complete seed, accumulated across sessions.
    #[serde(default)]
    pub seeded_for: u64,
    // Whether the torrent was running (vs. paused) when we last saved.
    #[serde(default = "default_started")]
    pub started: bool,
    // Trackers discovered at runtime (e.g. via an announce's tracker list),
    // beyond what the .torrent file itself specified.
    #[serde(default)]
    pub trackers: Vec<String>,
    pub output_dir: std::path::PathBuf,
}

fn default_started() -> bool {
    true
}

mod bitfield_bytes {
    use crate::Bitfield;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bf: &Bitfield, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_bytes(bf.as_raw_slice())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Bitfield, D::Error> {
        let bytes: Vec<u8> = serde_bytes::ByteBuf::deserialize(d)?.into_vec();
        Ok(Bitfield::from_vec(bytes))
    }
}

// Persists and retrieves resume data for torrents across restarts. Kept as
// a trait so the on-disk format (a single file, a sled/sqlite db, whatever)
// is an implementation detail the torrent loop doesn't need to know.
pub trait Resumer: Send + Sync {
    fn save(&self, data: &ResumeData) -> Result<(), ResumeError>;
    fn load(&self, info_hash: &TorrentID) -> Result<Option<ResumeData>, ResumeError>;
    fn remove(&self, info_hash: &TorrentID) -> Result<(), ResumeError>;
}

// Resumer backed by one file per torrent under a directory, bencode-encoded.
// Simple, human-inspectable, and avoids pulling in a database dependency
// this crate otherwise has no use for.
pub struct FileResumer {
    dir: std::path::PathBuf,
}

impl FileResumer {
    pub fn new(dir: std::path::PathBuf) -> std::io::Result<Self> {
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn path_for(&self, info_hash: &TorrentID) -> std::path::PathBuf {
        self.dir.join(hex::encode(info_hash)).with_extension("resume")
    }
}

impl Resumer for FileResumer {
    fn save(&self, data: &ResumeData) -> Result<(), ResumeError> {
        let bytes = bencode::to_bytes(data).map_err(|e| ResumeError::Encode(e.to_string()))?;
        std::fs::write(self.path_for(&data.info_hash), bytes)?;
        Ok(())
    }

    fn load(&self, info_hash: &TorrentID) -> Result<Option<ResumeData>, ResumeError> {
        let path = self.path_for(info_hash);
        if !path.exists() {
            return Ok(None);
        }
        let bytes = std::fs::read(path)?;
        let data = bencode::from_bytes(&bytes).map_err(|e| ResumeError::Encode(e.to_string()))?;
        Ok(Some(data))
    }

    fn remove(&self, info_hash: &TorrentID) -> Result<(), ResumeError> {
        let path = self.path_for(info_hash);
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let resumer = FileResumer::new(dir.path().to_path_buf()).unwrap();
        let mut bf = Bitfield::repeat(false, 16);
        bf.set(3, true);
        let data = ResumeData {
            info_hash: [7u8; 20],
            bitfield: bf,
            uploaded: 100,
            downloaded: 200,
            wasted: 50,
            seeded_for: 3600,
            started: true,
            trackers: vec!["udp://tracker.example:80/announce".to_string()],
            output_dir: std::path::PathBuf::from("out"),
        };
        resumer.save(&data).unwrap();
        let loaded = resumer.load(&data.info_hash).unwrap().unwrap();
        assert_eq!(loaded.uploaded, 100);
        assert_eq!(loaded.wasted, 50);
        assert_eq!(loaded.seeded_for, 3600);
        assert_eq!(loaded.trackers, data.trackers);
        assert_eq!(loaded.bitfield, data.bitfield);
    }

    #[test]
    fn test_load_missing_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let resumer = FileResumer::new(dir.path().to_path_buf()).unwrap();
        assert!(resumer.load(&[0u8; 20]).unwrap().is_none());
    }
}
