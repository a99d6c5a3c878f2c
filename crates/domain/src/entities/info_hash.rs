use crate::errors::DomainError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const INFO_HASH_LEN: usize = 20;

/// 160-bit content identity of a torrent. Serialized as lowercase hex.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct InfoHash(pub [u8; INFO_HASH_LEN]);

impl InfoHash {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DomainError> {
        if bytes.len() != INFO_HASH_LEN {
            return Err(DomainError::ValidationError(format!(
                "Info hash must be {} bytes, got {}",
                INFO_HASH_LEN,
                bytes.len()
            )));
        }
        let mut arr = [0u8; INFO_HASH_LEN];
        arr.copy_from_slice(bytes);
        Ok(Self(arr))
    }

    pub fn from_hex(s: &str) -> Result<Self, DomainError> {
        let bytes = hex::decode(s)
            .map_err(|e| DomainError::ValidationError(format!("Invalid info hash: {}", e)))?;
        Self::from_bytes(&bytes)
    }

    pub fn as_bytes(&self) -> &[u8; INFO_HASH_LEN] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for InfoHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InfoHash({})", self.to_hex())
    }
}

impl fmt::Display for InfoHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl FromStr for InfoHash {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl TryFrom<String> for InfoHash {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_hex(&value)
    }
}

impl From<InfoHash> for String {
    fn from(hash: InfoHash) -> Self {
        hash.to_hex()
    }
}

/// Fixed-width peer identifier carried in the wire handshake.
///
/// Tracker-side peer ids are opaque strings; ids of exactly 20 bytes are used
/// as-is, anything else is folded to 20 bytes with SHA-1.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct WirePeerId(pub [u8; INFO_HASH_LEN]);

impl WirePeerId {
    pub fn from_peer_id(peer_id: &str) -> Self {
        use sha1::{Digest, Sha1};

        let bytes = peer_id.as_bytes();
        let mut id = [0u8; INFO_HASH_LEN];
        if bytes.len() == INFO_HASH_LEN {
            id.copy_from_slice(bytes);
        } else {
            id.copy_from_slice(&Sha1::digest(bytes));
        }
        Self(id)
    }
}

impl fmt::Debug for WirePeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WirePeerId({})", hex::encode(self.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn it_should_parse_a_40_char_hex_string() {
        let hash = InfoHash::from_hex("3b245504cf5f11bbdbe1201cea6a6bf45aee1bc0").unwrap();

        assert_eq!(hash.to_hex(), "3b245504cf5f11bbdbe1201cea6a6bf45aee1bc0");
    }

    #[test]
    fn it_should_reject_hex_of_the_wrong_width() {
        assert!(InfoHash::from_hex("3b245504").is_err());
        assert!(InfoHash::from_hex("not hex at all").is_err());
    }

    #[test]
    fn short_peer_ids_are_hashed_to_twenty_bytes_and_exact_ones_kept() {
        let exact = WirePeerId::from_peer_id("-SW0001-abcdefghijkl");
        assert_eq!(&exact.0, b"-SW0001-abcdefghijkl");

        let short = WirePeerId::from_peer_id("node-a");
        assert_eq!(short, WirePeerId::from_peer_id("node-a"));
        assert_ne!(short, WirePeerId::from_peer_id("node-b"));
    }
}
