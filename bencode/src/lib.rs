#![allow(unused)]

// Convention from https://serde.rs/conventions.html
mod encode;
mod decode;
mod error;
mod token;

pub use encode::{encode_to_raw, encode_to_string};
pub use decode::{decode_bytes, decode_str};
pub use error::{Error, Result};

// Thin aliases matching the serde_json-style `to_bytes`/`from_bytes` naming
// used by callers that don't care about bencode-specific terminology.
pub fn to_bytes<T: serde::Serialize>(v: &T) -> Result<Vec<u8>> {
    encode_to_raw(v)
}

pub fn from_bytes<'de, T: serde::Deserialize<'de>>(b: &'de [u8]) -> Result<T> {
    decode_bytes(b)
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    #[test]
    fn load() {
        let b = std::fs::read(Path::new("../debian.torrent")).unwrap();
        println!("{:?}", String::from_utf8_lossy(&b));
    }
}
