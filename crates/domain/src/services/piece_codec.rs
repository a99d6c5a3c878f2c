use crate::entities::{InfoHash, Piece, TorrentMetadata, DEFAULT_PIECE_LENGTH, MAX_PIECE_LENGTH};
use crate::errors::DomainError;
use serde::Serialize;
use sha1::{Digest, Sha1};
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Hex SHA-1 digest of one piece.
pub fn hash_piece(data: &[u8]) -> String {
    hex::encode(Sha1::digest(data))
}

/// Fields the content identity is computed over, in their canonical order.
#[derive(Serialize)]
struct IdentityFields<'a> {
    name: &'a str,
    size: i64,
    piece_length: i32,
    piece_hashes: &'a [String],
}

/// SHA-1 over the canonical JSON encoding of a torrent's descriptive fields.
/// Two publishes of the same bytes under the same name and piece length
/// always agree on it.
pub fn content_identity(
    name: &str,
    size: i64,
    piece_length: i32,
    piece_hashes: &[String],
) -> Result<InfoHash, DomainError> {
    let canonical = serde_json::to_vec(&IdentityFields {
        name,
        size,
        piece_length,
        piece_hashes,
    })
    .map_err(|e| DomainError::ValidationError(format!("Cannot encode torrent fields: {}", e)))?;

    InfoHash::from_bytes(&Sha1::digest(&canonical))
}

/// Checks a received piece against its expected hash and length.
pub fn verify_piece(piece: &Piece, data: &[u8]) -> Result<(), DomainError> {
    if piece.matches(data) {
        return Ok(());
    }
    Err(DomainError::CorruptPiece {
        index: piece.index,
        expected: piece.hash.clone(),
        actual: hash_piece(data),
    })
}

/// A piece blob on local disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalPiece {
    pub index: u32,
    pub path: PathBuf,
}

/// Splits files into fixed-length pieces and reassembles them.
#[derive(Debug, Clone, Copy)]
pub struct PieceCodec {
    piece_length: u32,
}

impl Default for PieceCodec {
    fn default() -> Self {
        Self::new(DEFAULT_PIECE_LENGTH)
    }
}

impl PieceCodec {
    pub fn new(piece_length: u32) -> Self {
        Self {
            piece_length: piece_length.max(1),
        }
    }

    pub fn piece_length(&self) -> u32 {
        self.piece_length
    }

    /// Reads `path` into consecutive pieces; every piece but the last is
    /// exactly `piece_length` bytes. An empty file yields no pieces.
    pub async fn split(&self, path: &Path) -> Result<Vec<Vec<u8>>, DomainError> {
        let mut file = File::open(path).await.map_err(|e| {
            DomainError::IoError(format!("Cannot open {}: {}", path.display(), e))
        })?;

        let mut pieces = Vec::new();
        loop {
            let mut buf = Vec::with_capacity(self.piece_length as usize);
            let read = (&mut file)
                .take(self.piece_length as u64)
                .read_to_end(&mut buf)
                .await?;
            if read == 0 {
                break;
            }
            pieces.push(buf);
        }

        Ok(pieces)
    }

    /// Splits `path` and derives the full publish descriptor for it.
    pub async fn describe(
        &self,
        path: &Path,
        name: &str,
    ) -> Result<(TorrentMetadata, Vec<Vec<u8>>), DomainError> {
        let piece_length = i32::try_from(self.piece_length)
            .ok()
            .filter(|_| self.piece_length <= MAX_PIECE_LENGTH)
            .ok_or_else(|| {
                DomainError::ValidationError(format!(
                    "Piece length {} exceeds the maximum of {}",
                    self.piece_length, MAX_PIECE_LENGTH
                ))
            })?;

        let pieces = self.split(path).await?;
        let size: i64 = pieces.iter().map(|p| p.len() as i64).sum();
        let piece_hashes: Vec<String> = pieces.iter().map(|p| hash_piece(p)).collect();
        let info_hash = content_identity(name, size, piece_length, &piece_hashes)?;

        let metadata = TorrentMetadata {
            name: name.to_string(),
            size,
            piece_length,
            piece_hashes,
            info_hash: info_hash.to_hex(),
            files: None,
        };
        metadata.validate()?;
        Ok((metadata, pieces))
    }

    /// Concatenates pieces in index order into `output`.
    ///
    /// Every index in `0..piece_count` must be present, otherwise nothing is
    /// written and the missing indices are reported. The output appears
    /// atomically under its final name.
    pub async fn merge(
        &self,
        pieces: &[LocalPiece],
        piece_count: u32,
        output: &Path,
    ) -> Result<u64, DomainError> {
        let mut ordered: Vec<&LocalPiece> = pieces.iter().filter(|p| p.index < piece_count).collect();
        ordered.sort_by_key(|p| p.index);
        ordered.dedup_by_key(|p| p.index);

        let missing: Vec<u32> = (0..piece_count)
            .filter(|i| ordered.binary_search_by_key(i, |p| p.index).is_err())
            .collect();
        if !missing.is_empty() {
            return Err(DomainError::IncompletePieceSet(missing));
        }

        if let Some(parent) = output.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let staging = staging_path(output);
        let written = match write_concatenated(&ordered, &staging).await {
            Ok(written) => written,
            Err(e) => {
                let _ = tokio::fs::remove_file(&staging).await;
                return Err(e);
            }
        };
        tokio::fs::rename(&staging, output).await?;

        Ok(written)
    }
}

async fn write_concatenated(pieces: &[&LocalPiece], staging: &Path) -> Result<u64, DomainError> {
    let mut out = File::create(staging).await?;
    let mut written = 0u64;
    for piece in pieces {
        let data = tokio::fs::read(&piece.path).await.map_err(|e| {
            DomainError::IoError(format!("Cannot read piece {}: {}", piece.index, e))
        })?;
        out.write_all(&data).await?;
        written += data.len() as u64;
    }
    out.flush().await?;
    out.sync_all().await?;
    Ok(written)
}

/// Sibling path used while a file is being written.
pub(crate) fn staging_path(target: &Path) -> PathBuf {
    let mut name = target
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(format!(".{}.part", uuid::Uuid::new_v4().simple()));
    target.with_file_name(name)
}
