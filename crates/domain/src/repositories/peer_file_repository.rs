use crate::entities::PeerFile;
use crate::errors::DomainError;
use async_trait::async_trait;

/// Storage for peer ↔ file associations. At most one row per (peer, file).
#[async_trait]
pub trait PeerFileRepository: Send + Sync {
    async fn find(&self, peer_id: i32, file_id: i32) -> Result<Option<PeerFile>, DomainError>;
    async fn find_by_file_ids(&self, file_ids: &[i32]) -> Result<Vec<PeerFile>, DomainError>;
    async fn save(&self, peer_file: &PeerFile) -> Result<PeerFile, DomainError>;
    async fn update(&self, peer_file: &PeerFile) -> Result<PeerFile, DomainError>;
}
