use thiserror::Error;

#[derive(Error, Debug)]
pub enum DomainError {
    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Unknown torrent with info hash: {0}")]
    UnknownTorrent(String),

    #[error("Invalid status transition: {0}")]
    InvalidStatusTransition(String),

    #[error("Handshake mismatch: {0}")]
    HandshakeMismatch(String),

    #[error("Corrupt piece {index}: expected hash {expected}, got {actual}")]
    CorruptPiece {
        index: u32,
        expected: String,
        actual: String,
    },

    #[error("incomplete: missing pieces {0:?}")]
    IncompletePieceSet(Vec<u32>),

    #[error("Peer unreachable: {0}")]
    PeerUnreachable(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Protocol error: {0}")]
    ProtocolError(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Username already registered: {0}")]
    UsernameAlreadyExists(String),

    #[error("Tracker error: {0}")]
    TrackerError(String),

    #[error("Invalid locator: {0}")]
    InvalidLocator(String),

    #[error("Cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    IoError(String),

    #[error("Repository error: {0}")]
    RepositoryError(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

impl From<std::io::Error> for DomainError {
    fn from(err: std::io::Error) -> Self {
        DomainError::IoError(err.to_string())
    }
}

impl DomainError {
    /// Stable machine-readable name, used in tracker error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            DomainError::ValidationError(_) => "validation",
            DomainError::UnknownTorrent(_) => "unknown_torrent",
            DomainError::InvalidStatusTransition(_) => "invalid_status_transition",
            DomainError::HandshakeMismatch(_) => "handshake_mismatch",
            DomainError::CorruptPiece { .. } => "corrupt_piece",
            DomainError::IncompletePieceSet(_) => "incomplete",
            DomainError::PeerUnreachable(_) => "peer_unreachable",
            DomainError::Timeout(_) => "timeout",
            DomainError::ProtocolError(_) => "protocol",
            DomainError::Unauthorized(_) => "unauthorized",
            DomainError::UsernameAlreadyExists(_) => "username_taken",
            DomainError::TrackerError(_) => "tracker",
            DomainError::InvalidLocator(_) => "invalid_locator",
            DomainError::Cancelled => "cancelled",
            DomainError::IoError(_) => "io",
            DomainError::RepositoryError(_) => "repository",
            DomainError::NotFound(_) => "not_found",
        }
    }

    /// The error's payload without its display prefix.
    pub fn detail(&self) -> String {
        match self {
            DomainError::ValidationError(m)
            | DomainError::UnknownTorrent(m)
            | DomainError::InvalidStatusTransition(m)
            | DomainError::HandshakeMismatch(m)
            | DomainError::PeerUnreachable(m)
            | DomainError::Timeout(m)
            | DomainError::ProtocolError(m)
            | DomainError::Unauthorized(m)
            | DomainError::UsernameAlreadyExists(m)
            | DomainError::TrackerError(m)
            | DomainError::InvalidLocator(m)
            | DomainError::IoError(m)
            | DomainError::RepositoryError(m)
            | DomainError::NotFound(m) => m.clone(),
            other => other.to_string(),
        }
    }

    /// Rebuilds an error reported by the tracker from its kind and message.
    pub fn from_kind(kind: &str, message: String) -> Self {
        match kind {
            "validation" => DomainError::ValidationError(message),
            "unknown_torrent" => DomainError::UnknownTorrent(message),
            "invalid_status_transition" => DomainError::InvalidStatusTransition(message),
            "unauthorized" => DomainError::Unauthorized(message),
            "username_taken" => DomainError::UsernameAlreadyExists(message),
            "not_found" => DomainError::NotFound(message),
            _ => DomainError::TrackerError(message),
        }
    }

    /// Failures that only disqualify one peer or one transfer attempt.
    pub fn is_peer_local(&self) -> bool {
        matches!(
            self,
            DomainError::HandshakeMismatch(_)
                | DomainError::CorruptPiece { .. }
                | DomainError::PeerUnreachable(_)
                | DomainError::Timeout(_)
                | DomainError::ProtocolError(_)
                | DomainError::IoError(_)
        )
    }
}
