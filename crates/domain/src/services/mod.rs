pub mod announce_service;
pub mod magnet;
pub mod node_service;
pub mod peer_connection;
pub mod peer_server;
pub mod peer_wire;
pub mod piece_codec;
pub mod piece_downloader;
pub mod piece_scheduler;
pub mod piece_store;
pub mod torrent_service;
pub mod tracker_client;
pub mod user_service;

pub use announce_service::{AnnouncePolicy, AnnounceService, RowLocks};
pub use magnet::MagnetLink;
pub use node_service::{NodeIdentity, NodeService, PublishReport};
pub use peer_connection::{ConnectionPool, PeerConnection, WireTimeouts};
pub use peer_server::{PeerServer, SeedCatalog, ServerLimits};
pub use peer_wire::{Handshake, Message, PeerCodec};
pub use piece_codec::{content_identity, hash_piece, verify_piece, LocalPiece, PieceCodec};
pub use piece_downloader::{DownloadSettings, FetchReport, PieceDownloader};
pub use piece_scheduler::{Assignment, AvailabilityMap, PieceScheduler};
pub use piece_store::PieceStore;
pub use torrent_service::{PublishOutcome, TorrentService};
pub use tracker_client::{ErrorBody, TrackerClient};
pub use user_service::UserService;
