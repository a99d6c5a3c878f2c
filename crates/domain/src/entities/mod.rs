pub mod announce;
pub mod bitfield;
pub mod info_hash;
pub mod peer;
pub mod peer_file;
pub mod piece;
pub mod torrent;
pub mod torrent_file;
pub mod user;

pub use announce::*;
pub use bitfield::*;
pub use info_hash::*;
pub use peer::*;
pub use peer_file::*;
pub use piece::*;
pub use torrent::*;
pub use torrent_file::*;
pub use user::*;
