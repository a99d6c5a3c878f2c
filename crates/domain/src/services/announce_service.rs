//! Announce handling.
//!
//! A peer announces itself for a torrent to join (or leave) its swarm. The
//! tracker upserts the peer, moves each of the peer's file associations
//! through the status table in [`PeerStatus::transition`], and answers with
//! every active swarm member.
//!
//! Two announces touching the same (peer, file) pair are applied one after
//! the other; announces for different pairs proceed in parallel.
use crate::entities::{AnnounceRequest, AnnounceResponse, Peer, PeerFile, PeerInfo, PeerStatus, User};
use crate::errors::DomainError;
use crate::repositories::{PeerFileRepository, PeerRepository, TorrentRepository};
use std::collections::{BTreeSet, HashMap};
use std::hash::Hash;
use std::net::IpAddr;
use std::sync::{Arc, Mutex};

pub const DEFAULT_ANNOUNCE_INTERVAL: u32 = 1800;
pub const DEFAULT_TRACKER_ID: &str = "swarmshare-tracker";

/// What the tracker tells peers about itself on every announce.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnouncePolicy {
    pub interval: u32,
    pub tracker_id: String,
}

impl Default for AnnouncePolicy {
    fn default() -> Self {
        Self {
            interval: DEFAULT_ANNOUNCE_INTERVAL,
            tracker_id: DEFAULT_TRACKER_ID.to_string(),
        }
    }
}

/// Per-key async locks. Entries are created on first use.
pub struct RowLocks<K> {
    locks: Mutex<HashMap<K, Arc<tokio::sync::Mutex<()>>>>,
}

impl<K: Eq + Hash + Clone> Default for RowLocks<K> {
    fn default() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }
}

impl<K: Eq + Hash + Clone> RowLocks<K> {
    pub fn lock_for(&self, key: &K) -> Result<Arc<tokio::sync::Mutex<()>>, DomainError> {
        let mut locks = self
            .locks
            .lock()
            .map_err(|e| DomainError::RepositoryError(e.to_string()))?;
        Ok(locks.entry(key.clone()).or_default().clone())
    }
}

pub struct AnnounceService {
    torrent_repository: Arc<dyn TorrentRepository>,
    peer_repository: Arc<dyn PeerRepository>,
    peer_file_repository: Arc<dyn PeerFileRepository>,
    policy: AnnouncePolicy,
    peer_locks: RowLocks<String>,
    row_locks: RowLocks<(i32, i32)>,
}

impl AnnounceService {
    pub fn new(
        torrent_repository: Arc<dyn TorrentRepository>,
        peer_repository: Arc<dyn PeerRepository>,
        peer_file_repository: Arc<dyn PeerFileRepository>,
        policy: AnnouncePolicy,
    ) -> Self {
        Self {
            torrent_repository,
            peer_repository,
            peer_file_repository,
            policy,
            peer_locks: RowLocks::default(),
            row_locks: RowLocks::default(),
        }
    }

    /// Records the announce and returns the swarm. Nothing is written when
    /// the event or the torrent is unknown.
    pub async fn announce(
        &self,
        user: Option<&User>,
        request: &AnnounceRequest,
    ) -> Result<AnnounceResponse, DomainError> {
        let event = request.event()?;
        if request.peer_id.trim().is_empty() {
            return Err(DomainError::ValidationError("peer_id cannot be empty".to_string()));
        }
        request
            .ip
            .parse::<IpAddr>()
            .map_err(|_| DomainError::ValidationError(format!("Invalid peer ip: {}", request.ip)))?;

        let info_hash = request.info_hash.to_ascii_lowercase();
        let torrent = self
            .torrent_repository
            .find_by_info_hash(&info_hash)
            .await?
            .ok_or_else(|| DomainError::UnknownTorrent(request.info_hash.clone()))?;
        let torrent_id = torrent
            .id
            .ok_or_else(|| DomainError::RepositoryError("stored torrent without id".to_string()))?;
        let files = self.torrent_repository.find_files(torrent_id).await?;

        let peer = self.upsert_peer(user, request).await?;
        let peer_row = peer
            .id
            .ok_or_else(|| DomainError::RepositoryError("stored peer without id".to_string()))?;

        for file in &files {
            let Some(file_id) = file.id else { continue };

            let lock = self.row_locks.lock_for(&(peer_row, file_id))?;
            let _guard = lock.lock().await;

            match self.peer_file_repository.find(peer_row, file_id).await? {
                Some(mut row) => {
                    row.apply(event, request.stats());
                    self.peer_file_repository.update(&row).await?;
                }
                None => {
                    let row = PeerFile::new(peer_row, file_id, event, request.stats());
                    self.peer_file_repository.save(&row).await?;
                }
            }
        }

        let peers = self
            .active_peers(&files.iter().filter_map(|f| f.id).collect::<Vec<_>>())
            .await?;

        tracing::debug!(
            info_hash = %info_hash,
            peer_id = %request.peer_id,
            event = event.map(|e| e.as_str()).unwrap_or("none"),
            swarm = peers.len(),
            "announce"
        );

        Ok(AnnounceResponse {
            peers,
            tracker_id: self.policy.tracker_id.clone(),
            interval: self.policy.interval,
        })
    }

    async fn upsert_peer(&self, user: Option<&User>, request: &AnnounceRequest) -> Result<Peer, DomainError> {
        let lock = self.peer_locks.lock_for(&request.peer_id)?;
        let _guard = lock.lock().await;

        match self.peer_repository.find_by_peer_id(&request.peer_id).await? {
            Some(mut peer) => {
                peer.relocate(request.ip.clone(), request.port);
                if let Some(user_id) = user.and_then(|u| u.id) {
                    peer.user_id = Some(user_id);
                }
                self.peer_repository.update(&peer).await
            }
            None => {
                let mut peer = Peer::new(request.peer_id.clone(), request.ip.clone(), request.port);
                peer.user_id = user.and_then(|u| u.id);
                self.peer_repository.save(&peer).await
            }
        }
    }

    /// Distinct non-stopped peers across the given files, ordered by peer id.
    async fn active_peers(&self, file_ids: &[i32]) -> Result<Vec<PeerInfo>, DomainError> {
        if file_ids.is_empty() {
            return Ok(Vec::new());
        }

        let rows = self.peer_file_repository.find_by_file_ids(file_ids).await?;
        let peer_rows: BTreeSet<i32> = rows
            .iter()
            .filter(|row| row.status != PeerStatus::Stopped)
            .map(|row| row.peer_id)
            .collect();
        if peer_rows.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<i32> = peer_rows.into_iter().collect();
        let mut peers: Vec<PeerInfo> = self
            .peer_repository
            .find_by_ids(&ids)
            .await?
            .iter()
            .map(Peer::info)
            .collect();
        peers.sort_by(|a, b| a.peer_id.cmp(&b.peer_id));
        peers.dedup_by(|a, b| a.peer_id == b.peer_id);
        Ok(peers)
    }
}
