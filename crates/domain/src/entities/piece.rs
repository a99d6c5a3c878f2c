use serde::{Deserialize, Serialize};

/// One piece of a torrent as a node needs to know it for transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Piece {
    pub index: u32,
    pub hash: String, // SHA1 hash as hex string
    pub length: u64,
}

impl Piece {
    pub fn new(index: u32, hash: String, length: u64) -> Self {
        Self { index, hash, length }
    }

    pub fn matches(&self, data: &[u8]) -> bool {
        data.len() as u64 == self.length && crate::services::piece_codec::hash_piece(data) == self.hash
    }
}
