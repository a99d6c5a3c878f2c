//! In-memory implementation of every repository port.
//!
//! Used by ephemeral trackers (`SWARM_DATABASE_PATH=:memory:`) and by tests.
//! Uniqueness constraints mirror the SQLite schema.
use crate::entities::{Peer, PeerFile, Torrent, TorrentFile, User};
use crate::errors::DomainError;
use crate::repositories::{PeerFileRepository, PeerRepository, TorrentRepository, UserRepository};
use async_trait::async_trait;
use std::sync::{Mutex, MutexGuard};

#[derive(Default)]
struct Tables {
    torrents: Vec<Torrent>,
    files: Vec<TorrentFile>,
    peers: Vec<Peer>,
    peer_files: Vec<PeerFile>,
    users: Vec<User>,
    next_id: i32,
}

impl Tables {
    fn next_id(&mut self) -> i32 {
        self.next_id += 1;
        self.next_id
    }
}

#[derive(Default)]
pub struct InMemoryRepository {
    tables: Mutex<Tables>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> Result<MutexGuard<'_, Tables>, DomainError> {
        self.tables
            .lock()
            .map_err(|e| DomainError::RepositoryError(e.to_string()))
    }

    pub fn peer_file_count(&self) -> usize {
        self.tables().map(|t| t.peer_files.len()).unwrap_or_default()
    }

    pub fn torrent_count(&self) -> usize {
        self.tables().map(|t| t.torrents.len()).unwrap_or_default()
    }
}

fn missing_id(entity: &str) -> DomainError {
    DomainError::ValidationError(format!("{} ID is required for updates", entity))
}

#[async_trait]
impl TorrentRepository for InMemoryRepository {
    async fn find_by_id(&self, id: i32) -> Result<Option<Torrent>, DomainError> {
        Ok(self.tables()?.torrents.iter().find(|t| t.id == Some(id)).cloned())
    }

    async fn find_by_info_hash(&self, info_hash: &str) -> Result<Option<Torrent>, DomainError> {
        Ok(self
            .tables()?
            .torrents
            .iter()
            .find(|t| t.info_hash == info_hash)
            .cloned())
    }

    async fn create(
        &self,
        torrent: &Torrent,
        files: &[TorrentFile],
    ) -> Result<(Torrent, Vec<TorrentFile>), DomainError> {
        let mut tables = self.tables()?;
        if tables.torrents.iter().any(|t| t.info_hash == torrent.info_hash) {
            return Err(DomainError::RepositoryError(format!(
                "UNIQUE constraint failed: torrents.info_hash ({})",
                torrent.info_hash
            )));
        }

        let mut stored = torrent.clone();
        let torrent_id = tables.next_id();
        stored.id = Some(torrent_id);

        let mut stored_files = Vec::with_capacity(files.len());
        for file in files {
            let mut file = file.clone();
            file.id = Some(tables.next_id());
            file.torrent_id = torrent_id;
            stored_files.push(file);
        }

        tables.torrents.push(stored.clone());
        tables.files.extend(stored_files.iter().cloned());
        Ok((stored, stored_files))
    }

    async fn find_files(&self, torrent_id: i32) -> Result<Vec<TorrentFile>, DomainError> {
        Ok(self
            .tables()?
            .files
            .iter()
            .filter(|f| f.torrent_id == torrent_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl PeerRepository for InMemoryRepository {
    async fn find_by_peer_id(&self, peer_id: &str) -> Result<Option<Peer>, DomainError> {
        Ok(self.tables()?.peers.iter().find(|p| p.peer_id == peer_id).cloned())
    }

    async fn find_by_ids(&self, ids: &[i32]) -> Result<Vec<Peer>, DomainError> {
        Ok(self
            .tables()?
            .peers
            .iter()
            .filter(|p| p.id.is_some_and(|id| ids.contains(&id)))
            .cloned()
            .collect())
    }

    async fn save(&self, peer: &Peer) -> Result<Peer, DomainError> {
        let mut tables = self.tables()?;
        if tables.peers.iter().any(|p| p.peer_id == peer.peer_id) {
            return Err(DomainError::RepositoryError(format!(
                "UNIQUE constraint failed: peers.peer_id ({})",
                peer.peer_id
            )));
        }
        let mut stored = peer.clone();
        stored.id = Some(tables.next_id());
        tables.peers.push(stored.clone());
        Ok(stored)
    }

    async fn update(&self, peer: &Peer) -> Result<Peer, DomainError> {
        let id = peer.id.ok_or_else(|| missing_id("Peer"))?;
        let mut tables = self.tables()?;
        let row = tables
            .peers
            .iter_mut()
            .find(|p| p.id == Some(id))
            .ok_or_else(|| DomainError::NotFound(format!("Peer {}", id)))?;
        *row = peer.clone();
        Ok(row.clone())
    }
}

#[async_trait]
impl PeerFileRepository for InMemoryRepository {
    async fn find(&self, peer_id: i32, file_id: i32) -> Result<Option<PeerFile>, DomainError> {
        Ok(self
            .tables()?
            .peer_files
            .iter()
            .find(|pf| pf.peer_id == peer_id && pf.file_id == file_id)
            .cloned())
    }

    async fn find_by_file_ids(&self, file_ids: &[i32]) -> Result<Vec<PeerFile>, DomainError> {
        Ok(self
            .tables()?
            .peer_files
            .iter()
            .filter(|pf| file_ids.contains(&pf.file_id))
            .cloned()
            .collect())
    }

    async fn save(&self, peer_file: &PeerFile) -> Result<PeerFile, DomainError> {
        let mut tables = self.tables()?;
        if tables
            .peer_files
            .iter()
            .any(|pf| pf.peer_id == peer_file.peer_id && pf.file_id == peer_file.file_id)
        {
            return Err(DomainError::RepositoryError(format!(
                "UNIQUE constraint failed: peer_files.peer_id, peer_files.file_id ({}, {})",
                peer_file.peer_id, peer_file.file_id
            )));
        }
        let mut stored = peer_file.clone();
        stored.id = Some(tables.next_id());
        tables.peer_files.push(stored.clone());
        Ok(stored)
    }

    async fn update(&self, peer_file: &PeerFile) -> Result<PeerFile, DomainError> {
        let id = peer_file.id.ok_or_else(|| missing_id("PeerFile"))?;
        let mut tables = self.tables()?;
        let row = tables
            .peer_files
            .iter_mut()
            .find(|pf| pf.id == Some(id))
            .ok_or_else(|| DomainError::NotFound(format!("PeerFile {}", id)))?;
        *row = peer_file.clone();
        Ok(row.clone())
    }
}

#[async_trait]
impl UserRepository for InMemoryRepository {
    async fn find_by_id(&self, id: i32) -> Result<Option<User>, DomainError> {
        Ok(self.tables()?.users.iter().find(|u| u.id == Some(id)).cloned())
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<User>, DomainError> {
        Ok(self.tables()?.users.iter().find(|u| u.username == username).cloned())
    }

    async fn find_by_token(&self, token: &str) -> Result<Option<User>, DomainError> {
        Ok(self
            .tables()?
            .users
            .iter()
            .find(|u| u.access_token.as_deref() == Some(token))
            .cloned())
    }

    async fn save(&self, user: &User) -> Result<User, DomainError> {
        let mut tables = self.tables()?;
        if tables.users.iter().any(|u| u.username == user.username) {
            return Err(DomainError::UsernameAlreadyExists(user.username.clone()));
        }
        let mut stored = user.clone();
        stored.id = Some(tables.next_id());
        tables.users.push(stored.clone());
        Ok(stored)
    }

    async fn update(&self, user: &User) -> Result<User, DomainError> {
        let id = user.id.ok_or_else(|| missing_id("User"))?;
        let mut tables = self.tables()?;
        let row = tables
            .users
            .iter_mut()
            .find(|u| u.id == Some(id))
            .ok_or_else(|| DomainError::NotFound(format!("User {}", id)))?;
        *row = user.clone();
        Ok(row.clone())
    }
}
