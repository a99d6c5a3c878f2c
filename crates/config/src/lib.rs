//! Environment-driven configuration for the tracker and for peer nodes.
//!
//! Every setting is read from a `SWARM_*` variable, optionally loaded from a
//! `.env` file first, and falls back to a default when unset.
use dotenv::{dotenv, from_path};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load env file {path}: {reason}")]
    EnvFile { path: String, reason: String },

    #[error("Invalid value for {key}: '{value}'")]
    InvalidValue { key: String, value: String },
}

/// Loads the given `.env` file, or the default one from the working
/// directory if present.
fn load_env(env_path: Option<&str>) -> Result<(), ConfigError> {
    match env_path {
        Some(path) => from_path(path).map(|_| ()).map_err(|e| ConfigError::EnvFile {
            path: path.to_string(),
            reason: e.to_string(),
        }),
        None => {
            dotenv().ok();
            Ok(())
        }
    }
}

fn string(key: &str, default: &str) -> String {
    env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parsed<T: FromStr>(key: &str, default: T) -> Result<T, ConfigError> {
    match optional(key) {
        None => Ok(default),
        Some(value) => value.trim().parse().map_err(|_| ConfigError::InvalidValue {
            key: key.to_string(),
            value,
        }),
    }
}

fn seconds(key: &str, default: u64) -> Result<Duration, ConfigError> {
    parsed(key, default).map(Duration::from_secs)
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrackerConfig {
    /// SQLite file, or `:memory:` for a throwaway tracker.
    pub database_path: String,
    pub host: String,
    pub port: u16,
    pub announce_interval: u32,
    pub tracker_id: String,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            database_path: "swarmshare.db".to_string(),
            host: "0.0.0.0".to_string(),
            port: 8000,
            announce_interval: 1800,
            tracker_id: "swarmshare-tracker".to_string(),
        }
    }
}

impl TrackerConfig {
    pub fn from_env(env_path: Option<&str>) -> Result<Self, ConfigError> {
        load_env(env_path)?;
        let defaults = Self::default();

        Ok(Self {
            database_path: string("SWARM_DATABASE_PATH", &defaults.database_path),
            host: string("SWARM_TRACKER_HOST", &defaults.host),
            port: parsed("SWARM_TRACKER_PORT", defaults.port)?,
            announce_interval: parsed("SWARM_ANNOUNCE_INTERVAL", defaults.announce_interval)?,
            tracker_id: string("SWARM_TRACKER_ID", &defaults.tracker_id),
        })
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Largest piece length a node may publish with; one piece travels in one frame.
pub const MAX_PIECE_LENGTH: u32 = 16 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq)]
pub struct NodeConfig {
    pub tracker_url: String,
    /// Generated per process when unset.
    pub peer_id: Option<String>,
    pub listen_host: String,
    /// 0 picks a free port.
    pub listen_port: u16,
    /// Address other peers are told to connect to.
    pub advertise_ip: String,
    pub piece_dir: PathBuf,
    pub download_dir: PathBuf,
    pub piece_length: u32,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub bitfield_timeout: Duration,
    pub tracker_timeout: Duration,
    pub max_concurrent_transfers: usize,
    pub max_connections: usize,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            tracker_url: "http://127.0.0.1:8000".to_string(),
            peer_id: None,
            listen_host: "0.0.0.0".to_string(),
            listen_port: 0,
            advertise_ip: "127.0.0.1".to_string(),
            piece_dir: PathBuf::from("pieces"),
            download_dir: PathBuf::from("downloads"),
            piece_length: 524_288,
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(30),
            bitfield_timeout: Duration::from_secs(5),
            tracker_timeout: Duration::from_secs(15),
            max_concurrent_transfers: 8,
            max_connections: 64,
            username: None,
            password: None,
        }
    }
}

impl NodeConfig {
    pub fn from_env(env_path: Option<&str>) -> Result<Self, ConfigError> {
        load_env(env_path)?;
        let defaults = Self::default();

        let piece_length: u32 = parsed("SWARM_PIECE_LENGTH", defaults.piece_length)?;
        if piece_length == 0 || piece_length > MAX_PIECE_LENGTH {
            return Err(ConfigError::InvalidValue {
                key: "SWARM_PIECE_LENGTH".to_string(),
                value: piece_length.to_string(),
            });
        }

        Ok(Self {
            tracker_url: string("SWARM_TRACKER_URL", &defaults.tracker_url),
            peer_id: optional("SWARM_PEER_ID"),
            listen_host: string("SWARM_LISTEN_HOST", &defaults.listen_host),
            listen_port: parsed("SWARM_LISTEN_PORT", defaults.listen_port)?,
            advertise_ip: string("SWARM_ADVERTISE_IP", &defaults.advertise_ip),
            piece_dir: optional("SWARM_PIECE_DIR").map(PathBuf::from).unwrap_or(defaults.piece_dir),
            download_dir: optional("SWARM_DOWNLOAD_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.download_dir),
            piece_length,
            connect_timeout: seconds("SWARM_CONNECT_TIMEOUT_SECS", defaults.connect_timeout.as_secs())?,
            read_timeout: seconds("SWARM_READ_TIMEOUT_SECS", defaults.read_timeout.as_secs())?,
            bitfield_timeout: seconds("SWARM_BITFIELD_TIMEOUT_SECS", defaults.bitfield_timeout.as_secs())?,
            tracker_timeout: seconds("SWARM_TRACKER_TIMEOUT_SECS", defaults.tracker_timeout.as_secs())?,
            max_concurrent_transfers: parsed("SWARM_MAX_TRANSFERS", defaults.max_concurrent_transfers)?,
            max_connections: parsed("SWARM_MAX_CONNECTIONS", defaults.max_connections)?,
            username: optional("SWARM_USERNAME"),
            password: optional("SWARM_PASSWORD"),
        })
    }

    pub fn listen_address(&self) -> String {
        format!("{}:{}", self.listen_host, self.listen_port)
    }
}
