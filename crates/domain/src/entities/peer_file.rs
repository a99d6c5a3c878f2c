use crate::errors::DomainError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::SystemTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PeerStatus {
    Leeching,
    Seeding,
    Stopped,
}

impl PeerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PeerStatus::Leeching => "LEECHING",
            PeerStatus::Seeding => "SEEDING",
            PeerStatus::Stopped => "STOPPED",
        }
    }

    /// The swarm status transition table.
    ///
    /// | prior        | event              | next      |
    /// |--------------|--------------------|-----------|
    /// | any          | `completed`        | SEEDING   |
    /// | any          | `stopped`          | STOPPED   |
    /// | none         | absent / `started` | LEECHING  |
    /// | STOPPED      | `started`          | LEECHING  |
    /// | LEECHING     | `started`          | LEECHING  |
    /// | SEEDING      | `started`          | SEEDING   |
    /// | some(s)      | absent             | s         |
    pub fn transition(prior: Option<PeerStatus>, event: Option<AnnounceEvent>) -> PeerStatus {
        match (prior, event) {
            (_, Some(AnnounceEvent::Completed)) => PeerStatus::Seeding,
            (_, Some(AnnounceEvent::Stopped)) => PeerStatus::Stopped,
            (None, None | Some(AnnounceEvent::Started)) => PeerStatus::Leeching,
            (Some(PeerStatus::Stopped), Some(AnnounceEvent::Started)) => PeerStatus::Leeching,
            (Some(status), _) => status,
        }
    }
}

impl fmt::Display for PeerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PeerStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "LEECHING" => Ok(PeerStatus::Leeching),
            "SEEDING" => Ok(PeerStatus::Seeding),
            "STOPPED" => Ok(PeerStatus::Stopped),
            other => Err(DomainError::RepositoryError(format!("Unknown peer status: {}", other))),
        }
    }
}

/// Announce `event` parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnnounceEvent {
    Started,
    Completed,
    Stopped,
}

impl AnnounceEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnnounceEvent::Started => "started",
            AnnounceEvent::Completed => "completed",
            AnnounceEvent::Stopped => "stopped",
        }
    }

    /// Parses an optional query value; empty strings count as absent.
    pub fn parse_optional(value: Option<&str>) -> Result<Option<Self>, DomainError> {
        match value.map(str::trim) {
            None | Some("") => Ok(None),
            Some(s) => s.parse().map(Some),
        }
    }
}

impl FromStr for AnnounceEvent {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "started" => Ok(AnnounceEvent::Started),
            "completed" => Ok(AnnounceEvent::Completed),
            "stopped" => Ok(AnnounceEvent::Stopped),
            other => Err(DomainError::InvalidStatusTransition(format!(
                "unknown announce event '{}'",
                other
            ))),
        }
    }
}

/// Transfer counters a peer reports on announce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TransferStats {
    pub uploaded: i64,
    pub downloaded: i64,
    pub left: i64,
}

/// Association between a peer and one file of a torrent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerFile {
    pub id: Option<i32>,
    pub peer_id: i32,
    pub file_id: i32,
    pub status: PeerStatus,
    pub uploaded: i64,
    pub downloaded: i64,
    pub left: i64,
    pub updated_at: SystemTime,
}

impl PeerFile {
    pub fn new(peer_id: i32, file_id: i32, event: Option<AnnounceEvent>, stats: TransferStats) -> Self {
        Self {
            id: None,
            peer_id,
            file_id,
            status: PeerStatus::transition(None, event),
            uploaded: stats.uploaded,
            downloaded: stats.downloaded,
            left: stats.left,
            updated_at: SystemTime::now(),
        }
    }

    /// Applies an announce: status follows the transition table, counters are
    /// overwritten with the reported values.
    pub fn apply(&mut self, event: Option<AnnounceEvent>, stats: TransferStats) {
        self.status = PeerStatus::transition(Some(self.status), event);
        self.uploaded = stats.uploaded;
        self.downloaded = stats.downloaded;
        self.left = stats.left;
        self.updated_at = SystemTime::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [PeerStatus; 3] = [PeerStatus::Leeching, PeerStatus::Seeding, PeerStatus::Stopped];

    #[test]
    fn a_first_announce_without_event_starts_leeching() {
        assert_eq!(PeerStatus::transition(None, None), PeerStatus::Leeching);
        assert_eq!(
            PeerStatus::transition(None, Some(AnnounceEvent::Started)),
            PeerStatus::Leeching
        );
    }

    #[test]
    fn completed_always_ends_in_seeding() {
        assert_eq!(
            PeerStatus::transition(None, Some(AnnounceEvent::Completed)),
            PeerStatus::Seeding
        );
        for prior in ALL {
            assert_eq!(
                PeerStatus::transition(Some(prior), Some(AnnounceEvent::Completed)),
                PeerStatus::Seeding
            );
        }
    }

    #[test]
    fn stopped_always_ends_in_stopped() {
        assert_eq!(
            PeerStatus::transition(None, Some(AnnounceEvent::Stopped)),
            PeerStatus::Stopped
        );
        for prior in ALL {
            assert_eq!(
                PeerStatus::transition(Some(prior), Some(AnnounceEvent::Stopped)),
                PeerStatus::Stopped
            );
        }
    }

    #[test]
    fn a_periodic_announce_keeps_the_current_status() {
        for prior in ALL {
            assert_eq!(PeerStatus::transition(Some(prior), None), prior);
        }
    }

    #[test]
    fn counters_are_overwritten_not_accumulated() {
        let mut row = PeerFile::new(
            1,
            1,
            None,
            TransferStats { uploaded: 100, downloaded: 200, left: 300 },
        );

        row.apply(None, TransferStats { uploaded: 5, downloaded: 6, left: 7 });

        assert_eq!((row.uploaded, row.downloaded, row.left), (5, 6, 7));
    }

    #[test]
    fn unknown_events_are_rejected_and_blank_ones_are_absent() {
        assert!(matches!(
            AnnounceEvent::parse_optional(Some("paused")),
            Err(DomainError::InvalidStatusTransition(_))
        ));
        assert_eq!(AnnounceEvent::parse_optional(Some("")).unwrap(), None);
        assert_eq!(AnnounceEvent::parse_optional(None).unwrap(), None);
        assert_eq!(
            AnnounceEvent::parse_optional(Some("completed")).unwrap(),
            Some(AnnounceEvent::Completed)
        );
    }
}
