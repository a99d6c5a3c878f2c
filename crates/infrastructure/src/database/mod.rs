use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::r2d2::{self, ConnectionManager, CustomizeConnection};
use domain::DomainError;

pub mod schema;
pub use schema::*;

pub type SqlitePool = r2d2::Pool<ConnectionManager<SqliteConnection>>;

/// Tables and indexes, created on first use of a database file.
const BOOTSTRAP_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
    username TEXT NOT NULL UNIQUE,
    password_hash TEXT NOT NULL,
    access_token TEXT,
    created_at TIMESTAMP NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_users_access_token ON users (access_token);

CREATE TABLE IF NOT EXISTS torrents (
    id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
    info_hash TEXT NOT NULL UNIQUE,
    name TEXT NOT NULL,
    total_size BIGINT NOT NULL,
    piece_length INTEGER NOT NULL,
    piece_hashes TEXT NOT NULL,
    created_at TIMESTAMP NOT NULL
);

CREATE TABLE IF NOT EXISTS torrent_files (
    id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
    torrent_id INTEGER NOT NULL REFERENCES torrents (id),
    path TEXT NOT NULL,
    length BIGINT NOT NULL CHECK (length >= 0),
    "offset" BIGINT NOT NULL CHECK ("offset" >= 0)
);
CREATE INDEX IF NOT EXISTS idx_torrent_files_torrent ON torrent_files (torrent_id);

CREATE TABLE IF NOT EXISTS peers (
    id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
    peer_id TEXT NOT NULL UNIQUE,
    user_id INTEGER REFERENCES users (id),
    ip TEXT NOT NULL,
    port INTEGER NOT NULL,
    last_seen TIMESTAMP NOT NULL
);

CREATE TABLE IF NOT EXISTS peer_files (
    id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
    peer_id INTEGER NOT NULL REFERENCES peers (id),
    file_id INTEGER NOT NULL REFERENCES torrent_files (id),
    status TEXT NOT NULL,
    uploaded BIGINT NOT NULL,
    downloaded BIGINT NOT NULL,
    "left" BIGINT NOT NULL,
    updated_at TIMESTAMP NOT NULL,
    UNIQUE (peer_id, file_id)
);
CREATE INDEX IF NOT EXISTS idx_peer_files_file ON peer_files (file_id);
"#;

#[derive(Debug)]
struct ConnectionOptions;

impl CustomizeConnection<SqliteConnection, r2d2::Error> for ConnectionOptions {
    fn on_acquire(&self, conn: &mut SqliteConnection) -> Result<(), r2d2::Error> {
        conn.batch_execute("PRAGMA busy_timeout = 5000; PRAGMA foreign_keys = ON;")
            .map_err(r2d2::Error::QueryError)
    }
}

pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Opens (or creates) the database at `database_path` and makes sure the
    /// schema exists. `:memory:` gives a private database on one connection.
    pub fn new(database_path: &str) -> Result<Self, DomainError> {
        let in_memory = database_path == ":memory:";
        let manager = ConnectionManager::<SqliteConnection>::new(database_path);
        let mut builder = r2d2::Pool::builder().max_size(if in_memory { 1 } else { 8 });
        if in_memory {
            // the data lives only as long as this one connection
            builder = builder.max_lifetime(None).idle_timeout(None);
        }
        let pool = builder
            .connection_customizer(Box::new(ConnectionOptions))
            .build(manager)
            .map_err(|e| {
                DomainError::RepositoryError(format!("Failed to open database {}: {}", database_path, e))
            })?;

        let database = Database { pool };
        database.bootstrap()?;
        tracing::info!(path = database_path, "database ready");
        Ok(database)
    }

    pub fn get_pool(&self) -> &SqlitePool {
        &self.pool
    }

    fn bootstrap(&self) -> Result<(), DomainError> {
        let mut conn = self
            .pool
            .get()
            .map_err(|e| DomainError::RepositoryError(e.to_string()))?;
        conn.batch_execute(BOOTSTRAP_SQL)
            .map_err(|e| DomainError::RepositoryError(format!("Schema bootstrap failed: {}", e)))
    }
}

/// Runs a blocking diesel call on the blocking pool with a pooled connection.
pub(crate) async fn with_connection<T, F>(pool: &SqlitePool, query: F) -> Result<T, DomainError>
where
    T: Send + 'static,
    F: FnOnce(&mut SqliteConnection) -> Result<T, DomainError> + Send + 'static,
{
    let pool = pool.clone();
    tokio::task::spawn_blocking(move || {
        let mut conn = pool
            .get()
            .map_err(|e| DomainError::RepositoryError(e.to_string()))?;
        query(&mut conn)
    })
    .await
    .map_err(|e| DomainError::RepositoryError(e.to_string()))?
}

pub(crate) fn query_error(e: diesel::result::Error) -> DomainError {
    DomainError::RepositoryError(e.to_string())
}

pub(crate) fn to_timestamp(time: std::time::SystemTime) -> chrono::NaiveDateTime {
    chrono::DateTime::<chrono::Utc>::from(time).naive_utc()
}

pub(crate) fn from_timestamp(time: chrono::NaiveDateTime) -> std::time::SystemTime {
    std::time::SystemTime::from(time.and_utc())
}
