pub mod sqlite_peer_file_repository;
pub mod sqlite_peer_repository;
pub mod sqlite_torrent_repository;
pub mod sqlite_user_repository;

pub use sqlite_peer_file_repository::SqlitePeerFileRepository;
pub use sqlite_peer_repository::SqlitePeerRepository;
pub use sqlite_torrent_repository::SqliteTorrentRepository;
pub use sqlite_user_repository::SqliteUserRepository;
