use crate::entities::{Torrent, TorrentFile};
use crate::errors::DomainError;
use async_trait::async_trait;

#[async_trait]
pub trait TorrentRepository: Send + Sync {
    async fn find_by_id(&self, id: i32) -> Result<Option<Torrent>, DomainError>;
    async fn find_by_info_hash(&self, info_hash: &str) -> Result<Option<Torrent>, DomainError>;
    /// Inserts the torrent together with its files, all or nothing. The
    /// files' `torrent_id` is replaced by the new torrent's id. Fails if the
    /// info hash is already stored.
    async fn create(
        &self,
        torrent: &Torrent,
        files: &[TorrentFile],
    ) -> Result<(Torrent, Vec<TorrentFile>), DomainError>;
    async fn find_files(&self, torrent_id: i32) -> Result<Vec<TorrentFile>, DomainError>;
}
