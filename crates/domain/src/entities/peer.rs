use serde::{Deserialize, Serialize};
use std::time::SystemTime;

/// A node known to the tracker. Upserted on every announce, never deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Peer {
    pub id: Option<i32>,
    pub peer_id: String,
    pub user_id: Option<i32>,
    pub ip: String,
    pub port: u16,
    pub last_seen: SystemTime,
}

impl Peer {
    pub fn new(peer_id: String, ip: String, port: u16) -> Self {
        Self {
            id: None,
            peer_id,
            user_id: None,
            ip,
            port,
            last_seen: SystemTime::now(),
        }
    }

    /// Moves the peer to a new address, as happens after a NAT or port change.
    pub fn relocate(&mut self, ip: String, port: u16) {
        self.ip = ip;
        self.port = port;
        self.last_seen = SystemTime::now();
    }

    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }

    pub fn info(&self) -> PeerInfo {
        PeerInfo {
            peer_id: self.peer_id.clone(),
            ip: self.ip.clone(),
            port: self.port,
        }
    }
}

/// A swarm member as handed out in announce responses.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerInfo {
    pub peer_id: String,
    pub ip: String,
    pub port: u16,
}

impl PeerInfo {
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }
}
