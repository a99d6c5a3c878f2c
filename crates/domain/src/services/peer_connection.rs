use crate::entities::{Bitfield, InfoHash, PeerInfo, WirePeerId};
use crate::errors::DomainError;
use crate::services::peer_wire::{Handshake, Message, PeerCodec};
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_util::codec::Framed;

/// Deadlines applied to every outbound peer exchange.
#[derive(Debug, Clone, Copy)]
pub struct WireTimeouts {
    pub connect: Duration,
    pub handshake: Duration,
    pub read: Duration,
    /// How long a freshly connected peer gets to advertise its pieces.
    pub bitfield: Duration,
}

impl Default for WireTimeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(10),
            handshake: Duration::from_secs(10),
            read: Duration::from_secs(30),
            bitfield: Duration::from_secs(5),
        }
    }
}

/// Outbound connection to one swarm member for one torrent.
pub struct PeerConnection {
    peer: PeerInfo,
    info_hash: InfoHash,
    framed: Framed<TcpStream, PeerCodec>,
    timeouts: WireTimeouts,
}

impl PeerConnection {
    /// Connects and completes the handshake. The remote must answer with the
    /// same content identity.
    pub async fn open(
        peer: &PeerInfo,
        info_hash: InfoHash,
        local_id: WirePeerId,
        timeouts: WireTimeouts,
    ) -> Result<Self, DomainError> {
        let addr = peer.socket_addr();
        let mut stream = tokio::time::timeout(timeouts.connect, TcpStream::connect(&addr))
            .await
            .map_err(|_| DomainError::PeerUnreachable(format!("connection timeout to {}", addr)))?
            .map_err(|e| DomainError::PeerUnreachable(format!("failed to connect to {}: {}", addr, e)))?;

        Handshake::new(info_hash, local_id).write_to(&mut stream).await?;
        let reply = Handshake::read_from(&mut stream, timeouts.handshake).await?;
        if reply.info_hash != info_hash {
            return Err(DomainError::HandshakeMismatch(format!(
                "{} answered for {} instead of {}",
                addr, reply.info_hash, info_hash
            )));
        }

        tracing::debug!(peer = %addr, %info_hash, "handshake complete");

        Ok(Self {
            peer: peer.clone(),
            info_hash,
            framed: Framed::new(stream, PeerCodec::default()),
            timeouts,
        })
    }

    pub async fn send_bitfield(&mut self, bitfield: &Bitfield) -> Result<(), DomainError> {
        self.framed.send(Message::Bitfield(bitfield.to_bytes())).await
    }

    /// The peer's advertised pieces. A peer that stays silent past the
    /// bitfield deadline is taken to hold nothing.
    pub async fn read_bitfield(&mut self, piece_count: u32) -> Result<Bitfield, DomainError> {
        match tokio::time::timeout(self.timeouts.bitfield, self.framed.next()).await {
            Err(_) => Ok(Bitfield::new(piece_count)),
            Ok(None) => Err(DomainError::PeerUnreachable(format!(
                "{} closed the connection before advertising pieces",
                self.peer.socket_addr()
            ))),
            Ok(Some(Err(e))) => Err(e),
            Ok(Some(Ok(Message::Bitfield(bits)))) => Ok(Bitfield::from_bytes(&bits, piece_count)),
            Ok(Some(Ok(other))) => Err(DomainError::ProtocolError(format!(
                "expected bitfield from {}, got {:?}",
                self.peer.socket_addr(),
                message_kind(&other)
            ))),
        }
    }

    /// Requests one piece and waits for its bytes. A peer that does not
    /// have the piece closes the connection, which surfaces as
    /// `PeerUnreachable`.
    pub async fn request_piece(&mut self, index: u32) -> Result<Bytes, DomainError> {
        self.framed
            .send(Message::Request {
                info_hash: self.info_hash,
                index,
            })
            .await?;

        loop {
            let frame = tokio::time::timeout(self.timeouts.read, self.framed.next())
                .await
                .map_err(|_| {
                    DomainError::Timeout(format!("piece {} from {}", index, self.peer.socket_addr()))
                })?;

            match frame {
                None => {
                    return Err(DomainError::PeerUnreachable(format!(
                        "{} closed the connection instead of sending piece {}",
                        self.peer.socket_addr(),
                        index
                    )))
                }
                Some(Err(e)) => return Err(e),
                // late or repeated advertisement
                Some(Ok(Message::Bitfield(_))) => continue,
                Some(Ok(Message::Piece { index: got, data })) if got == index => return Ok(data),
                Some(Ok(other)) => {
                    return Err(DomainError::ProtocolError(format!(
                        "expected piece {} from {}, got {:?}",
                        index,
                        self.peer.socket_addr(),
                        message_kind(&other)
                    )))
                }
            }
        }
    }
}

fn message_kind(message: &Message) -> &'static str {
    match message {
        Message::Bitfield(_) => "bitfield",
        Message::Request { .. } => "request",
        Message::Piece { .. } => "piece",
    }
}

/// Idle connections kept for reuse within one fetch, keyed by peer id.
/// At most one idle connection is kept per peer; concurrent transfers from
/// the same peer open their own.
#[derive(Default)]
pub struct ConnectionPool {
    idle: Mutex<HashMap<String, PeerConnection>>,
}

impl ConnectionPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn take(&self, peer: &PeerInfo) -> Option<PeerConnection> {
        self.idle.lock().ok()?.remove(&peer.peer_id)
    }

    pub fn give_back(&self, connection: PeerConnection) {
        if let Ok(mut idle) = self.idle.lock() {
            idle.entry(connection.peer.peer_id.clone()).or_insert(connection);
        }
    }

    pub fn len(&self) -> usize {
        self.idle.lock().map(|idle| idle.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
