use crate::entities::Peer;
use crate::errors::DomainError;
use async_trait::async_trait;

#[async_trait]
pub trait PeerRepository: Send + Sync {
    async fn find_by_peer_id(&self, peer_id: &str) -> Result<Option<Peer>, DomainError>;
    async fn find_by_ids(&self, ids: &[i32]) -> Result<Vec<Peer>, DomainError>;
    async fn save(&self, peer: &Peer) -> Result<Peer, DomainError>;
    async fn update(&self, peer: &Peer) -> Result<Peer, DomainError>;
}
