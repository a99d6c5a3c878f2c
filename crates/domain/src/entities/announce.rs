use crate::entities::{AnnounceEvent, PeerInfo, TransferStats};
use crate::errors::DomainError;
use serde::{Deserialize, Serialize};

/// Query parameters of `GET /announce`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnounceRequest {
    pub info_hash: String,
    pub peer_id: String,
    pub ip: String,
    pub port: u16,
    pub uploaded: i64,
    pub downloaded: i64,
    pub left: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<String>,
}

impl AnnounceRequest {
    pub fn event(&self) -> Result<Option<AnnounceEvent>, DomainError> {
        AnnounceEvent::parse_optional(self.event.as_deref())
    }

    pub fn stats(&self) -> TransferStats {
        TransferStats {
            uploaded: self.uploaded,
            downloaded: self.downloaded,
            left: self.left,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnounceResponse {
    pub peers: Vec<PeerInfo>,
    pub tracker_id: String,
    pub interval: u32,
}

impl AnnounceResponse {
    /// Swarm members other than `peer_id`.
    pub fn others(&self, peer_id: &str) -> Vec<PeerInfo> {
        self.peers
            .iter()
            .filter(|p| p.peer_id != peer_id)
            .cloned()
            .collect()
    }
}

/// Bearer credential returned by `/register` and `/login`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessToken {
    pub access_token: String,
    pub token_type: String,
}

impl AccessToken {
    pub fn bearer(token: String) -> Self {
        Self {
            access_token: token,
            token_type: "bearer".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}
