use crate::entities::{InfoHash, Piece, TorrentFile};
use crate::errors::DomainError;
use serde::{Deserialize, Serialize};
use std::time::SystemTime;

/// Piece length used by nodes when publishing (512 KiB).
pub const DEFAULT_PIECE_LENGTH: u32 = 524_288;

/// Largest piece a descriptor may declare (16 MiB); a piece must fit in one wire frame.
pub const MAX_PIECE_LENGTH: u32 = 16 * 1024 * 1024;

/// A published torrent. Immutable once stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Torrent {
    pub id: Option<i32>,
    pub info_hash: String, // SHA1 content identity as hex string
    pub name: String,
    pub total_size: i64,
    pub piece_length: i32,
    pub piece_hashes: Vec<String>,
    pub created_at: SystemTime,
}

impl Torrent {
    pub fn new(
        info_hash: String,
        name: String,
        total_size: i64,
        piece_length: i32,
        piece_hashes: Vec<String>,
    ) -> Self {
        Self {
            id: None,
            info_hash,
            name,
            total_size,
            piece_length,
            piece_hashes,
            created_at: SystemTime::now(),
        }
    }

    pub fn piece_count(&self) -> u32 {
        self.piece_hashes.len() as u32
    }

    pub fn identity(&self) -> Result<InfoHash, DomainError> {
        InfoHash::from_hex(&self.info_hash)
    }

    /// Byte length of piece `index`; only the last piece may be shorter.
    pub fn piece_size(&self, index: u32) -> u64 {
        let piece_length = self.piece_length as u64;
        let total = self.total_size as u64;
        let offset = index as u64 * piece_length;
        total.saturating_sub(offset).min(piece_length)
    }

    pub fn piece(&self, index: u32) -> Option<Piece> {
        self.piece_hashes
            .get(index as usize)
            .map(|hash| Piece::new(index, hash.clone(), self.piece_size(index)))
    }

    pub fn descriptor(&self) -> TorrentMetadata {
        TorrentMetadata {
            name: self.name.clone(),
            size: self.total_size,
            piece_length: self.piece_length,
            piece_hashes: self.piece_hashes.clone(),
            info_hash: self.info_hash.clone(),
            files: None,
        }
    }
}

/// A file entry inside a multi-file publish request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileEntry {
    pub name: String,
    pub size: i64,
}

/// Publish payload and stored torrent descriptor, as exchanged with the tracker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TorrentMetadata {
    pub name: String,
    pub size: i64,
    pub piece_length: i32,
    pub piece_hashes: Vec<String>,
    pub info_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub files: Option<Vec<FileEntry>>,
}

impl TorrentMetadata {
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.name.trim().is_empty() {
            return Err(DomainError::ValidationError("Torrent name cannot be empty".to_string()));
        }
        if self.size < 0 {
            return Err(DomainError::ValidationError("Torrent size cannot be negative".to_string()));
        }
        if self.piece_length <= 0 {
            return Err(DomainError::ValidationError("Piece length must be positive".to_string()));
        }
        if self.piece_length as u32 > MAX_PIECE_LENGTH {
            return Err(DomainError::ValidationError(format!(
                "Piece length {} exceeds the maximum of {}",
                self.piece_length, MAX_PIECE_LENGTH
            )));
        }

        let expected_pieces = (self.size as u64).div_ceil(self.piece_length as u64);
        if self.piece_hashes.len() as u64 != expected_pieces {
            return Err(DomainError::ValidationError(format!(
                "Expected {} piece hashes for {} bytes, got {}",
                expected_pieces,
                self.size,
                self.piece_hashes.len()
            )));
        }

        if let Some(files) = &self.files {
            if files.iter().any(|f| f.size < 0) {
                return Err(DomainError::ValidationError("File sizes cannot be negative".to_string()));
            }
            let sum: i64 = files.iter().map(|f| f.size).sum();
            if sum != self.size {
                return Err(DomainError::ValidationError(format!(
                    "File sizes add up to {} but torrent size is {}",
                    sum, self.size
                )));
            }
        }

        Ok(())
    }

    /// Files laid out over the torrent's concatenated byte stream.
    pub fn file_layout(&self, torrent_id: i32) -> Vec<TorrentFile> {
        let entries = match &self.files {
            Some(files) if !files.is_empty() => files.clone(),
            _ => vec![FileEntry {
                name: self.name.clone(),
                size: self.size,
            }],
        };

        let mut offset = 0;
        entries
            .into_iter()
            .map(|entry| {
                let file = TorrentFile::new(torrent_id, entry.name, entry.size, offset);
                offset += entry.size;
                file
            })
            .collect()
    }

    pub fn into_torrent(self) -> Torrent {
        Torrent::new(
            self.info_hash,
            self.name,
            self.size,
            self.piece_length,
            self.piece_hashes,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_torrent(total_size: i64) -> Torrent {
        let pieces = (total_size as u64).div_ceil(DEFAULT_PIECE_LENGTH as u64) as usize;
        Torrent::new(
            "00".repeat(20),
            "movie.mkv".to_string(),
            total_size,
            DEFAULT_PIECE_LENGTH as i32,
            vec!["aa".repeat(20); pieces],
        )
    }

    #[test]
    fn the_last_piece_carries_the_remainder() {
        let torrent = sample_torrent(786_432);

        assert_eq!(torrent.piece_count(), 2);
        assert_eq!(torrent.piece_size(0), 524_288);
        assert_eq!(torrent.piece_size(1), 262_144);
    }

    #[test]
    fn a_single_file_publish_lays_out_one_file_at_offset_zero() {
        let metadata = sample_torrent(10).descriptor();

        let files = metadata.file_layout(7);

        assert_eq!(files.len(), 1);
        assert_eq!(files[0].torrent_id, 7);
        assert_eq!(files[0].offset, 0);
        assert_eq!(files[0].length, 10);
    }

    #[test]
    fn multi_file_offsets_are_cumulative() {
        let mut metadata = sample_torrent(30).descriptor();
        metadata.files = Some(vec![
            FileEntry { name: "a".into(), size: 10 },
            FileEntry { name: "b".into(), size: 20 },
        ]);

        let files = metadata.file_layout(1);

        assert_eq!(files[1].offset, 10);
        assert_eq!(files[1].offset + files[1].length, 30);
        assert!(metadata.validate().is_ok());
    }

    #[test]
    fn validation_rejects_a_piece_hash_count_that_does_not_match_the_size() {
        let mut metadata = sample_torrent(786_432).descriptor();
        metadata.piece_hashes.pop();

        assert!(matches!(metadata.validate(), Err(DomainError::ValidationError(_))));
    }

    #[test]
    fn validation_rejects_pieces_larger_than_a_wire_frame() {
        let size = MAX_PIECE_LENGTH as i64 + 1;
        let metadata = TorrentMetadata {
            name: "big.bin".to_string(),
            size,
            piece_length: MAX_PIECE_LENGTH as i32 + 1,
            piece_hashes: vec!["aa".repeat(20)],
            info_hash: "00".repeat(20),
            files: None,
        };

        assert!(matches!(metadata.validate(), Err(DomainError::ValidationError(_))));

        let at_limit = TorrentMetadata {
            size: MAX_PIECE_LENGTH as i64,
            piece_length: MAX_PIECE_LENGTH as i32,
            ..metadata
        };
        assert!(at_limit.validate().is_ok());
    }

    #[test]
    fn validation_rejects_negative_file_sizes() {
        let mut metadata = sample_torrent(10).descriptor();
        metadata.files = Some(vec![
            FileEntry { name: "a".into(), size: 11 },
            FileEntry { name: "b".into(), size: -1 },
        ]);

        assert!(matches!(metadata.validate(), Err(DomainError::ValidationError(_))));
    }
}
