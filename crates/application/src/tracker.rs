use config::TrackerConfig;
use domain::*;
use infrastructure::*;
use std::sync::Arc;

/// Tracker application - the services behind the HTTP surface
pub struct TrackerApp {
    pub torrent_service: TorrentService,
    pub announce_service: AnnounceService,
    pub user_service: UserService,
}

impl TrackerApp {
    pub fn new(config: &TrackerConfig) -> Result<Self, DomainError> {
        // Infrastructure layer - database setup
        let database = Database::new(&config.database_path)?;
        let pool = database.get_pool().clone();

        let torrent_repository: Arc<dyn TorrentRepository> =
            Arc::new(SqliteTorrentRepository::new(pool.clone()));
        let peer_repository: Arc<dyn PeerRepository> =
            Arc::new(SqlitePeerRepository::new(pool.clone()));
        let peer_file_repository: Arc<dyn PeerFileRepository> =
            Arc::new(SqlitePeerFileRepository::new(pool.clone()));
        let user_repository: Arc<dyn UserRepository> = Arc::new(SqliteUserRepository::new(pool));

        let policy = AnnouncePolicy {
            interval: config.announce_interval,
            tracker_id: config.tracker_id.clone(),
        };

        tracing::info!(database = %config.database_path, "tracker storage ready");

        Ok(Self::with_repositories(
            torrent_repository,
            peer_repository,
            peer_file_repository,
            user_repository,
            policy,
        ))
    }

    pub fn with_repositories(
        torrent_repository: Arc<dyn TorrentRepository>,
        peer_repository: Arc<dyn PeerRepository>,
        peer_file_repository: Arc<dyn PeerFileRepository>,
        user_repository: Arc<dyn UserRepository>,
        policy: AnnouncePolicy,
    ) -> Self {
        Self {
            torrent_service: TorrentService::new(torrent_repository.clone()),
            announce_service: AnnounceService::new(
                torrent_repository,
                peer_repository,
                peer_file_repository,
                policy,
            ),
            user_service: UserService::new(user_repository),
        }
    }

    /// Tracker backed by process memory only.
    pub fn in_memory(policy: AnnouncePolicy) -> Self {
        let repository = Arc::new(InMemoryRepository::new());
        Self::with_repositories(
            repository.clone(),
            repository.clone(),
            repository.clone(),
            repository,
            policy,
        )
    }
}
