pub mod in_memory;
pub mod peer_file_repository;
pub mod peer_repository;
pub mod torrent_repository;
pub mod user_repository;

pub use in_memory::InMemoryRepository;
pub use peer_file_repository::PeerFileRepository;
pub use peer_repository::PeerRepository;
pub use torrent_repository::TorrentRepository;
pub use user_repository::UserRepository;
