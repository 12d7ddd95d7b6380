use rand::seq::SliceRandom;
use serde_derive::{Deserialize, Serialize};
use crate::storage::FileInfo;

#[derive(Debug, thiserror::Error)]
pub enum MetaInfoError {

    #[error("bencode error whilst decoding metainfo: {0}")]
    BencodeError(#[from] bencode::Error),

    #[error("invalid file extension, expected .torrent")]
    InvalidExtension,

    #[error(transparent)]
    IoError(#[from] std::io::Error),

    #[error("invalid pieces length, must be divisible by 20")]
    InvalidPiecesLength,

    #[error("file(s) with size 0")]
    FileNoSize,

    #[error("file(s) with no path")]
    FileEmptyPath,

    #[error("file has absolute path")]
    FileAbsolutePath,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct File {

    // #[serde(deserialize_with = "crate::de::path_deserialize")]
    pub path: Vec<String>,

    pub length: u64,

    pub md5sum: Option<String>,

}

#[derive(Clone, Deserialize, Serialize)]
pub struct Info {

    // File namepub .
    pub name: String,
    
    // String consisting of the concatenation of all 20-byte SHA1 hash values, one per piece.
    #[serde(with = "serde_bytes")]
    pub pieces: Vec<u8>,

    // Number of bytes in each piece (integer).
    #[serde(rename = "piece length")]
    pub piece_length: u32,

    // A 32-character hexadecimal string corresponding to the MD5 sum of the file.
    #[serde(default)]
    pub md5sum: Option<String>,
    
    // Length of the file in bytes (integer).
    #[serde(default)]
    pub length: Option<u64>,

    // A list of dictionaries, one for each file.
    #[serde(default)]
    pub files: Option<Vec<File>>,
    
    // If it is set to "1", the client MUST publish its presence to get other peers ONLY 
    // via the trackers explicitly described in the metainfo file. If this field is set to 
    // "0" or is not present, the client may obtain peer from other means, e.g. PEX peer exchange, dht.
    #[serde(default)]
    pub private: Option<u8>,

    #[serde(default)]
    #[serde(rename = "root hash")]
    pub root_hash: Option<String>,

}

impl Info {
    // Calculates the sha1 hash of info dict to verify torrent integrity.
    fn info_hash(&self) -> Result<[u8; 20], MetaInfoError> {
        use sha1::Digest;
        let mut hasher = sha1::Sha1::new();
        // Serialize info dict into bencode.
        let info_data = bencode::encode_to_raw(&self)?;
        hasher.update(info_data);
        Ok(hasher.finalize().into())
    }    
}

#[allow(dead_code)]
#[derive(Deserialize, Clone)]
pub struct MetaInfo {
    
    // The announce URL of the tracker (string).
    #[serde(deserialize_with = "crate::de::url_deserialize")]
    pub announce: url::Url,
    
    // A dictionary that describes the file(s) of the torrent.
    pub info: Info,
    
    // sha1 hash of info dict
    #[serde(skip)] 
    pub info_hash: [u8; 20],
    
    // (optional) the string encoding format used to generate the pieces part of the info 
    // dictionary in the .torrent metafile (string).
    #[serde(default)]
    pub encoding: Option<String>,
    
    // (optional) this is an extention to the official specification, offering backwards-compatibility.
    #[serde(default)]
    #[serde(rename = "announce-list")]
    #[serde(deserialize_with = "crate::de::announce_list_deserialize")]
    pub announce_list: Option<Vec<Vec<url::Url>>>,
    
    // (optional) the creation time of the torrent, in standard UNIX epoch format.
    #[serde(default)]
    #[serde(rename = "creation date")]
    pub creation_date: Option<i64>,
    
    // (optional) free-form textual comments of the author (string).
    #[serde(rename = "comment")]
    pub comment: Option<String>,
    
    // (optional) name and version of the program used to create the .torrent (string).
    #[serde(default)]
    #[serde(rename = "created by")]
    pub created_by: Option<String>,

    // (optional, BEP 19) HTTP/FTP urls that can serve this torrent's content
    // by byte range, supplementing the peer swarm.
    #[serde(default)]
    #[serde(rename = "url-list")]
    #[serde(deserialize_with = "crate::de::url_list_deserialize")]
    pub url_list: Vec<url::Url>,

}

impl MetaInfo {

    pub fn new<P: AsRef<std::path::Path>>(path: P) -> Result<MetaInfo, MetaInfoError> {
        
        if path.as_ref().extension().unwrap_or_default() != "torrent" {
            return Err(MetaInfoError::InvalidExtension);
        }

        let mut metainfo: MetaInfo = bencode::decode_bytes(&std::fs::read(path)?)?;
        
        if metainfo.info.pieces.len() % 20 != 0 || metainfo.info.pieces.is_empty() {
            return Err(MetaInfoError::InvalidPiecesLength);
        }

        metainfo.info_hash = metainfo.info.info_hash()?;
        tracing::debug!("metainfo created: {:#?}", metainfo);
        Ok(metainfo)
    }

    pub fn piece_hashes(&self) -> Vec<[u8; 20]> {
        self.info.pieces
            .chunks_exact(20)
            // Safe as we have already checked length is a multiple of 20, in new.
            .map(|c| c.try_into().unwrap())
            .collect()
    }

    pub fn piece_len(&self) -> usize { self.info.piece_length as usize }

    pub fn num_pieces(&self) -> u32 { self.info.pieces.len() as u32 / 20 }

    pub fn is_multi_file(&self) -> bool { self.info.files.is_some() }
    
    pub fn single_file_len(&self) -> Option<u64> { self.info.length }

    pub fn total_len(&self) -> u64 {
        if let Some(files) = &self.info.files {
            files.iter().map(|f| f.length as u64).sum()
        } else {
            self.info.length.unwrap_or(0) as u64
        }
    }

    pub fn info_hash(&self) -> [u8; 20] { self.info_hash }
    
    pub fn name(&self) -> &str { &self.info.name }

    pub fn trackers(&self) -> Vec<Vec<url::Url>> {
        // If announce_list is present, we use that.
        if let Some(announce_list) = self.announce_list.clone() {
            let mut tiers = Vec::new();
            for mut tier in announce_list {
                // Randomly shuffle the trackers in the tier.
                tier.shuffle(&mut rand::thread_rng());
                tiers.push(tier);
            }
            tiers
        // Otherwise we just use the announce key.
        } else {
            vec![vec![self.announce.clone()]]
        }
    }

    pub fn webseed_urls(&self) -> Vec<url::Url> {
        self.url_list.clone()
    }

    pub fn files(&self) -> Vec<FileInfo> {
        if let Some(files) = &self.info.files {
            let mut offset = 0;
            files.iter().map(|f| {
                let file_info = FileInfo {
                    path: f.path.join("/").into(),
                    length: f.length as usize,
                    offset,
                    md5sum: f.md5sum.clone(),
                };
                offset += f.length as usize;
                file_info
            }).collect()
        } else {
            vec![FileInfo {
                path: self.info.name.clone().into(),
                length: self.info.length.unwrap() as usize,
                offset: 0,
                md5sum: None,
            }]
        }
    }

    // Formatting methods.

    pub fn creation_date_fmt(&self) -> Option<String> {
        self.creation_date.map(|v| {
            let date = chrono::NaiveDateTime::from_timestamp_opt(v, 0);
            date.map(|v| v.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_else(|| "Invalid date".to_string())
        })
    }

    pub fn info_hash_hex(&self) -> String {
        hex::encode(&self.info_hash)
    }

    pub fn size_fmt(&self) -> String {
        if self.is_multi_file() {
            let size = self.info.files.as_ref().unwrap().iter()
                .map(|f| f.length)
                .sum::<u64>();
            format_size(size)
        } else {
            format_size(self.info.length.unwrap())
        }
    }
}

fn format_size(bytes: u64) -> String {
    let mut size = bytes as f64;
    let mut unit = "B";
    if size > 1024.0 {
        size /= 1024.0;
        unit = "KiB";
    }
    if size > 1024.0 {
        size /= 1024.0;
        unit = "MiB";
    }
    if size > 1024.0 {
        size /= 1024.0;
        unit = "GiB";
    }
    if size > 1024.0 {
        size /= 1024.0;
        unit = "TiB";
    }
    format!("{:.2} {}", size, unit)
}

impl std::fmt::Debug for MetaInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetaInfo")
            .field("announce", &self.announce.as_str())
            .field("info", &self.info)
            .field("info_hash", &self.info_hash_hex())
            .field("encoding", &self.encoding)
            // Change urls to strings for printing.
            .field("announce_list", &self.announce_list.as_ref().map(|v| 
                v.iter().map(|v| 
                    v.iter().map(|v| 
                        v.as_str()
                    ).collect()
                ).collect::<Vec<Vec<&str>>>()
            ))
            .field("creation_date", &self.creation_date_fmt())
            .field("comment", &self.comment)
            .field("created_by", &self.created_by)
            .finish()
    }
}

// Dont want to print out the pieces field, so we implement Debug manually.
impl std::fmt::Debug for Info {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Info")
            .field("name", &self.name)
            .field("num pieces", &(&self.pieces.len() / 20))
            .field("piece_length", &self.piece_length)
            .field("md5sum", &self.md5sum)
            .field("length", &self.length)
            .field("files", &self.files)
            .field("private", &self.private)
            .field("root_hash", &self.root_hash)
            .finish()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MagnetLinkError {
    #[error("not a magnet uri: {0}")]
    InvalidUri(#[from] url::ParseError),

    #[error("missing xt (exact topic) parameter")]
    MissingTopic,

    #[error("unsupported xt urn, only urn:btih is supported: {0}")]
    UnsupportedTopic(String),

    #[error("info hash has invalid length, expected 20 bytes, got {0}")]
    InvalidInfoHashLength(usize),

    #[error("invalid base32 in btih")]
    InvalidBase32,
}

// A `magnet:?xt=urn:btih:<info-hash>&dn=<name>&tr=<tracker>...` link, parsed
// down to the bits needed to bootstrap a swarm before the info dict itself
// is known: the info hash to verify it against, a display name, and zero or
// more trackers to announce to while hunting for peers who have it.
#[derive(Debug, Clone)]
pub struct MagnetLink {
    pub info_hash: [u8; 20],
    pub display_name: Option<String>,
    pub trackers: Vec<url::Url>,
}

impl MagnetLink {
    pub fn parse(uri: &str) -> Result<Self, MagnetLinkError> {
        let url = url::Url::parse(uri)?;

        let mut info_hash = None;
        let mut display_name = None;
        let mut trackers = Vec::new();

        for (key, value) in url.query_pairs() {
            match &*key {
                "xt" => {
                    let urn = value
                        .strip_prefix("urn:btih:")
                        .ok_or_else(|| MagnetLinkError::UnsupportedTopic(value.to_string()))?;
                    info_hash = Some(decode_btih(urn)?);
                }
                "dn" => display_name = Some(value.into_owned()),
                "tr" => {
                    if let Ok(tracker) = url::Url::parse(&value) {
                        trackers.push(tracker);
                    } else {
                        tracing::warn!("ignoring unparsable tracker url in magnet link: {}", value);
                    }
                }
                _ => {}
            }
        }

        Ok(Self {
            info_hash: info_hash.ok_or(MagnetLinkError::MissingTopic)?,
            display_name,
            trackers,
        })
    }
}

// The btih can be either 40 hex chars or 32 base32 chars (RFC 4648); both
// encode the same 20-byte SHA1 info hash.
fn decode_btih(s: &str) -> Result<[u8; 20], MagnetLinkError> {
    let bytes = if s.len() == 40 {
        hex::decode(s).map_err(|_| MagnetLinkError::InvalidBase32)?
    } else if s.len() == 32 {
        base32_decode(s).ok_or(MagnetLinkError::InvalidBase32)?
    } else {
        return Err(MagnetLinkError::InvalidInfoHashLength(s.len()));
    };

    bytes
        .try_into()
        .map_err(|b: Vec<u8>| MagnetLinkError::InvalidInfoHashLength(b.len()))
}

// RFC 4648 base32 decode (no padding), upper or lower case. Small enough,
// and specific enough to btih's fixed 32-char alphabet, that pulling in a
// dedicated crate for it isn't worth it.
fn base32_decode(input: &str) -> Option<Vec<u8>> {
    const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ234567";

    let mut bits: u64 = 0;
    let mut bit_count: u32 = 0;
    let mut out = Vec::with_capacity(input.len() * 5 / 8);

    for c in input.chars() {
        let c = c.to_ascii_uppercase() as u8;
        let value = ALPHABET.iter().position(|&a| a == c)? as u64;
        bits = (bits << 5) | value;
        bit_count += 5;
        if bit_count >= 8 {
            bit_count -= 8;
            out.push(((bits >> bit_count) & 0xFF) as u8);
        }
    }

    Some(out)
}

impl MetaInfo {
    // Assembles a `MetaInfo` from a magnet link plus an `Info` dict already
    // fetched and SHA1-verified against `link.info_hash` over ut_metadata
    // (BEP 9). The magnet's own trackers become the announce tier(s); with
    // none, peers can only be found via the swarm's existing PEX/DHT paths.
    pub fn from_magnet(link: MagnetLink, info: Info) -> Self {
        let mut trackers = link.trackers.into_iter();
        let announce = trackers
            .next()
            .unwrap_or_else(|| url::Url::parse("udp://0.0.0.0:0").expect("static url"));
        let announce_list: Vec<url::Url> = trackers.collect();

        MetaInfo {
            announce,
            info,
            info_hash: link.info_hash,
            encoding: None,
            announce_list: if announce_list.is_empty() {
                None
            } else {
                Some(vec![announce_list])
            },
            creation_date: None,
            comment: link.display_name,
            created_by: None,
            url_list: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metainfo() {
        // Test metainfo with small single file torrent.
        let metainfo = MetaInfo::new("tests/test_torrents/test_small.torrent").unwrap();
        assert_eq!(metainfo.num_pieces(), 1028);
        assert_eq!(metainfo.info.piece_length, 32_768);
        assert_eq!(metainfo.total_len(), 33_677_666);
        assert_eq!(metainfo.is_multi_file(), false);
        assert_eq!(metainfo.info_hash_hex(), "f1a8db22ffe20c7014c6267b5f68b97fdc438b1a");
    }

    #[test]
    fn debug_meta_info() {
        let metainfo = MetaInfo::new("tests/test_torrents/test_multi.torrent").unwrap();
        // Pretty debug print.
        println!("{:#?}", metainfo);
        println!("{}", metainfo.total_len());
    }

    #[test]
    fn test_magnet_link_parse_hex_btih() {
        let uri = "magnet:?xt=urn:btih:f1a8db22ffe20c7014c6267b5f68b97fdc438b1a&dn=test&tr=udp%3A%2F%2Ftracker.example.com%3A80";
        let link = MagnetLink::parse(uri).unwrap();
        assert_eq!(hex::encode(link.info_hash), "f1a8db22ffe20c7014c6267b5f68b97fdc438b1a");
        assert_eq!(link.display_name.as_deref(), Some("test"));
        assert_eq!(link.trackers.len(), 1);
        assert_eq!(link.trackers[0].as_str(), "udp://tracker.example.com:80/");
    }

    #[test]
    fn test_magnet_link_parse_base32_btih() {
        // Base32 encoding of the same 20-byte hash used above.
        let hex_hash = "f1a8db22ffe20c7014c6267b5f68b97fdc438b1a";
        let bytes = hex::decode(hex_hash).unwrap();
        let b32 = base32_encode_for_test(&bytes);
        let uri = format!("magnet:?xt=urn:btih:{}", b32);
        let link = MagnetLink::parse(&uri).unwrap();
        assert_eq!(hex::encode(link.info_hash), hex_hash);
    }

    #[test]
    fn test_magnet_link_requires_xt() {
        let result = MagnetLink::parse("magnet:?dn=no-topic");
        assert!(matches!(result, Err(MagnetLinkError::MissingTopic)));
    }

    #[test]
    fn test_magnet_link_rejects_non_btih_urn() {
        let result = MagnetLink::parse("magnet:?xt=urn:sha1:deadbeef");
        assert!(matches!(result, Err(MagnetLinkError::UnsupportedTopic(_))));
    }

    #[test]
    fn test_from_magnet_uses_first_tracker_as_announce() {
        let link = MagnetLink::parse(
            "magnet:?xt=urn:btih:f1a8db22ffe20c7014c6267b5f68b97fdc438b1a&tr=udp%3A%2F%2Fa.example%3A1&tr=udp%3A%2F%2Fb.example%3A2",
        )
        .unwrap();
        let info = Info {
            name: "x".into(),
            pieces: vec![0; 20],
            piece_length: 16384,
            md5sum: None,
            length: Some(16384),
            files: None,
            private: None,
            root_hash: None,
        };
        let metainfo = MetaInfo::from_magnet(link, info);
        assert_eq!(metainfo.announce.as_str(), "udp://a.example:1/");
        assert_eq!(metainfo.announce_list.unwrap()[0][0].as_str(), "udp://b.example:2/");
    }

    // Test-only mirror of the base32 alphabet used to encode a known hash
    // for the decode roundtrip test above.
    fn base32_encode_for_test(bytes: &[u8]) -> String {
        const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ234567";
        let mut bits: u64 = 0;
        let mut bit_count: u32 = 0;
        let mut out = String::new();
        for &b in bytes {
            bits = (bits << 8) | b as u64;
            bit_count += 8;
            while bit_count >= 5 {
                bit_count -= 5;
                out.push(ALPHABET[((bits >> bit_count) & 0x1F) as usize] as char);
            }
        }
        if bit_count > 0 {
            out.push(ALPHABET[((bits << (5 - bit_count)) & 0x1F) as usize] as char);
        }
        out
    }
}
