// Database schema for the tracker
diesel::table! {
    users (id) {
        id -> Integer,
        username -> Text,
        password_hash -> Text,              // <salt hex>$<sha1 hex>
        access_token -> Nullable<Text>,     // current bearer token
        created_at -> Timestamp,
    }
}

diesel::table! {
    torrents (id) {
        id -> Integer,
        info_hash -> Text,         // SHA1 content identity, unique
        name -> Text,
        total_size -> BigInt,
        piece_length -> Integer,
        piece_hashes -> Text,      // JSON array of hex digests, in piece order
        created_at -> Timestamp,
    }
}

diesel::table! {
    torrent_files (id) {
        id -> Integer,
        torrent_id -> Integer,
        path -> Text,              // File path within torrent
        length -> BigInt,          // File size in bytes
        offset -> BigInt,          // Byte offset in the torrent
    }
}

diesel::table! {
    peers (id) {
        id -> Integer,
        peer_id -> Text,           // caller-supplied, unique
        user_id -> Nullable<Integer>,
        ip -> Text,
        port -> Integer,
        last_seen -> Timestamp,
    }
}

diesel::table! {
    peer_files (id) {
        id -> Integer,
        peer_id -> Integer,        // peers.id
        file_id -> Integer,        // torrent_files.id
        status -> Text,            // LEECHING, SEEDING, STOPPED
        uploaded -> BigInt,
        downloaded -> BigInt,
        left -> BigInt,
        updated_at -> Timestamp,
    }
}

diesel::joinable!(torrent_files -> torrents (torrent_id));
diesel::joinable!(peers -> users (user_id));
diesel::joinable!(peer_files -> peers (peer_id));
diesel::joinable!(peer_files -> torrent_files (file_id));

diesel::allow_tables_to_appear_in_same_query!(users, torrents, torrent_files, peers, peer_files,);
