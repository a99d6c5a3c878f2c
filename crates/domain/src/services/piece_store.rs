use crate::entities::{Bitfield, Torrent};
use crate::errors::DomainError;
use crate::services::piece_codec::{staging_path, verify_piece, LocalPiece};
use bytes::Bytes;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

/// Node-local piece blobs, laid out as `<root>/<info_hash>/<name>.piece<index>`.
#[derive(Debug, Clone)]
pub struct PieceStore {
    root: PathBuf,
}

impl PieceStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn torrent_dir(&self, torrent: &Torrent) -> PathBuf {
        self.root.join(&torrent.info_hash)
    }

    pub fn piece_path(&self, torrent: &Torrent, index: u32) -> PathBuf {
        let file_name = Path::new(&torrent.name)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "content".to_string());
        self.torrent_dir(torrent)
            .join(format!("{}.piece{}", file_name, index))
    }

    /// Writes a piece so that it is either fully present under its final
    /// name or absent.
    pub async fn write_piece(&self, torrent: &Torrent, index: u32, data: &[u8]) -> Result<PathBuf, DomainError> {
        let path = self.piece_path(torrent, index);
        tokio::fs::create_dir_all(self.torrent_dir(torrent)).await?;

        let staging = staging_path(&path);
        let result = async {
            let mut file = tokio::fs::File::create(&staging).await?;
            file.write_all(data).await?;
            file.sync_all().await?;
            tokio::fs::rename(&staging, &path).await
        }
        .await;

        if let Err(e) = result {
            let _ = tokio::fs::remove_file(&staging).await;
            return Err(DomainError::IoError(format!(
                "Cannot store piece {} of {}: {}",
                index, torrent.info_hash, e
            )));
        }
        Ok(path)
    }

    /// Piece bytes, or `None` when this node does not hold the piece.
    pub async fn read_piece(&self, torrent: &Torrent, index: u32) -> Result<Option<Bytes>, DomainError> {
        if index >= torrent.piece_count() {
            return Ok(None);
        }
        match tokio::fs::read(self.piece_path(torrent, index)).await {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Pieces present on disk, in index order.
    pub async fn local_pieces(&self, torrent: &Torrent) -> Result<Vec<LocalPiece>, DomainError> {
        let mut present = Vec::new();
        for index in 0..torrent.piece_count() {
            let path = self.piece_path(torrent, index);
            if tokio::fs::try_exists(&path).await? {
                present.push(LocalPiece { index, path });
            }
        }
        Ok(present)
    }

    /// Pieces present on disk whose bytes still match the torrent's hashes.
    /// Blobs that fail the check are removed.
    pub async fn verified_pieces(&self, torrent: &Torrent) -> Result<Vec<LocalPiece>, DomainError> {
        let mut verified = Vec::new();
        for local in self.local_pieces(torrent).await? {
            let Some(piece) = torrent.piece(local.index) else {
                continue;
            };
            let data = tokio::fs::read(&local.path).await?;
            if verify_piece(&piece, &data).is_ok() {
                verified.push(local);
            } else {
                tracing::warn!(index = local.index, info_hash = %torrent.info_hash, "discarding corrupt local piece");
                let _ = tokio::fs::remove_file(&local.path).await;
            }
        }
        Ok(verified)
    }

    pub async fn bitfield(&self, torrent: &Torrent) -> Result<Bitfield, DomainError> {
        let local = self.local_pieces(torrent).await?;
        Ok(Bitfield::from_indices(
            local.into_iter().map(|p| p.index),
            torrent.piece_count(),
        ))
    }

    /// Stores every piece of a freshly split file.
    pub async fn import(&self, torrent: &Torrent, pieces: &[Vec<u8>]) -> Result<(), DomainError> {
        for (index, data) in pieces.iter().enumerate() {
            self.write_piece(torrent, index as u32, data).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::piece_codec::hash_piece;
    use tempfile::tempdir;

    fn torrent() -> Torrent {
        Torrent::new(
            "ab".repeat(20),
            "notes.txt".to_string(),
            6,
            4,
            vec![hash_piece(b"abcd"), hash_piece(b"ef")],
        )
    }

    #[tokio::test]
    async fn pieces_are_named_after_the_torrent() {
        let dir = tempdir().unwrap();
        let store = PieceStore::new(dir.path());
        let torrent = torrent();

        let path = store.write_piece(&torrent, 1, b"ef").await.unwrap();

        assert_eq!(path, dir.path().join("ab".repeat(20)).join("notes.txt.piece1"));
        assert_eq!(store.read_piece(&torrent, 1).await.unwrap().unwrap().as_ref(), b"ef");
        assert!(store.read_piece(&torrent, 0).await.unwrap().is_none());
        assert!(store.read_piece(&torrent, 9).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn bitfield_reflects_pieces_on_disk() {
        let dir = tempdir().unwrap();
        let store = PieceStore::new(dir.path());
        let torrent = torrent();
        store.write_piece(&torrent, 1, b"ef").await.unwrap();

        let bitfield = store.bitfield(&torrent).await.unwrap();

        assert!(!bitfield.has(0));
        assert!(bitfield.has(1));
    }

    #[tokio::test]
    async fn corrupt_local_pieces_are_dropped() {
        let dir = tempdir().unwrap();
        let store = PieceStore::new(dir.path());
        let torrent = torrent();
        store.import(&torrent, &[b"abcd".to_vec(), b"xx".to_vec()]).await.unwrap();

        let verified = store.verified_pieces(&torrent).await.unwrap();

        assert_eq!(verified.len(), 1);
        assert_eq!(verified[0].index, 0);
        assert!(!store.piece_path(&torrent, 1).exists());
    }
}
