use crate::entities::{InfoHash, Torrent, WirePeerId};
use crate::errors::DomainError;
use crate::services::peer_wire::{Handshake, Message, PeerCodec};
use crate::services::piece_store::PieceStore;
use futures::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Torrents this node is willing to serve pieces for.
#[derive(Default)]
pub struct SeedCatalog {
    torrents: RwLock<HashMap<InfoHash, Arc<Torrent>>>,
}

impl SeedCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, torrent: Torrent) -> Result<(), DomainError> {
        let info_hash = torrent.identity()?;
        if let Ok(mut torrents) = self.torrents.write() {
            torrents.insert(info_hash, Arc::new(torrent));
        }
        Ok(())
    }

    pub fn get(&self, info_hash: &InfoHash) -> Option<Arc<Torrent>> {
        self.torrents.read().ok()?.get(info_hash).cloned()
    }

    pub fn len(&self) -> usize {
        self.torrents.read().map(|t| t.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ServerLimits {
    pub max_connections: usize,
    pub handshake_timeout: Duration,
    /// Connections with no request for this long are closed.
    pub idle_timeout: Duration,
    /// Upper bound on any single write; a peer that stops reading is dropped.
    pub write_timeout: Duration,
    /// How long open connections get to finish after shutdown.
    pub drain_timeout: Duration,
}

impl Default for ServerLimits {
    fn default() -> Self {
        Self {
            max_connections: 64,
            handshake_timeout: Duration::from_secs(10),
            idle_timeout: Duration::from_secs(60),
            write_timeout: Duration::from_secs(30),
            drain_timeout: Duration::from_secs(10),
        }
    }
}

/// Serves pieces from the local store to other nodes.
///
/// The accept loop stops as soon as the shutdown token is cancelled; open
/// connections finish the piece they are sending and then close. Connections
/// still open after `drain_timeout` are dropped.
pub struct PeerServer {
    listener: TcpListener,
    context: Arc<ServeContext>,
    limits: ServerLimits,
    shutdown: CancellationToken,
}

struct ServeContext {
    catalog: Arc<SeedCatalog>,
    store: Arc<PieceStore>,
    local_id: WirePeerId,
}

impl PeerServer {
    pub async fn bind(
        addr: SocketAddr,
        catalog: Arc<SeedCatalog>,
        store: Arc<PieceStore>,
        local_id: WirePeerId,
        limits: ServerLimits,
        shutdown: CancellationToken,
    ) -> Result<Self, DomainError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| DomainError::IoError(format!("Cannot listen on {}: {}", addr, e)))?;

        Ok(Self {
            listener,
            context: Arc::new(ServeContext {
                catalog,
                store,
                local_id,
            }),
            limits,
            shutdown,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, DomainError> {
        Ok(self.listener.local_addr()?)
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Runs until cancelled, then waits for open connections to drain.
    pub async fn run(self) -> Result<(), DomainError> {
        let permits = Arc::new(Semaphore::new(self.limits.max_connections.max(1)));
        let tasks = TaskTracker::new();
        let abort = CancellationToken::new();

        tracing::info!(addr = ?self.listener.local_addr().ok(), "peer server listening");

        loop {
            // wait for a free slot before accepting, so excess clients queue in the backlog
            let permit = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                permit = permits.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let (stream, remote) = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        tracing::warn!(error = %e, "accept failed");
                        continue;
                    }
                },
            };

            let context = self.context.clone();
            let shutdown = self.shutdown.clone();
            let abort = abort.clone();
            let limits = self.limits;
            tasks.spawn(async move {
                tokio::select! {
                    _ = abort.cancelled() => {
                        tracing::debug!(peer = %remote, "connection dropped at shutdown");
                    }
                    result = serve_connection(stream, context, limits, shutdown) => {
                        if let Err(e) = result {
                            tracing::debug!(peer = %remote, error = %e, "connection closed");
                        }
                    }
                }
                drop(permit);
            });
        }

        tasks.close();
        if tokio::time::timeout(self.limits.drain_timeout, tasks.wait()).await.is_err() {
            tracing::warn!(open = tasks.len(), "connections still open after drain timeout, dropping them");
            abort.cancel();
            tasks.wait().await;
        }
        tracing::info!("peer server stopped");
        Ok(())
    }

    /// Runs the server on the current runtime.
    pub fn spawn(self) -> tokio::task::JoinHandle<Result<(), DomainError>> {
        tokio::spawn(self.run())
    }
}

async fn serve_connection(
    mut stream: TcpStream,
    context: Arc<ServeContext>,
    limits: ServerLimits,
    shutdown: CancellationToken,
) -> Result<(), DomainError> {
    let hello = Handshake::read_from(&mut stream, limits.handshake_timeout).await?;
    let torrent = context.catalog.get(&hello.info_hash).ok_or_else(|| {
        DomainError::HandshakeMismatch(format!("not serving {}", hello.info_hash))
    })?;

    let reply = Handshake::new(hello.info_hash, context.local_id);
    tokio::time::timeout(limits.write_timeout, reply.write_to(&mut stream))
        .await
        .map_err(|_| DomainError::Timeout("sending handshake".to_string()))??;

    let mut framed = Framed::new(stream, PeerCodec::default());
    let held = context.store.bitfield(&torrent).await?;
    if !held.is_empty() {
        send_within(&mut framed, Message::Bitfield(held.to_bytes()), limits.write_timeout).await?;
    }

    loop {
        let frame = tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            frame = tokio::time::timeout(limits.idle_timeout, framed.next()) => match frame {
                Err(_) => return Err(DomainError::Timeout("idle connection".to_string())),
                Ok(None) => return Ok(()),
                Ok(Some(frame)) => frame?,
            },
        };

        match frame {
            Message::Request { info_hash, index } => {
                if info_hash != hello.info_hash {
                    return Err(DomainError::ProtocolError(format!(
                        "request for {} on a connection for {}",
                        info_hash, hello.info_hash
                    )));
                }
                match context.store.read_piece(&torrent, index).await? {
                    Some(data) => {
                        tracing::debug!(index, info_hash = %info_hash, "sending piece");
                        send_within(&mut framed, Message::Piece { index, data }, limits.write_timeout)
                            .await?;
                    }
                    None => {
                        // no piece to offer, the requester moves on to the next holder
                        tracing::debug!(index, info_hash = %info_hash, "piece not held, closing");
                        return Ok(());
                    }
                }
            }
            Message::Bitfield(_) => {}
            Message::Piece { index, .. } => {
                tracing::debug!(index, "ignoring unsolicited piece");
            }
        }
    }
}

async fn send_within(
    framed: &mut Framed<TcpStream, PeerCodec>,
    message: Message,
    limit: Duration,
) -> Result<(), DomainError> {
    tokio::time::timeout(limit, framed.send(message))
        .await
        .map_err(|_| DomainError::Timeout("peer stopped reading".to_string()))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{PeerInfo, WirePeerId};
    use crate::services::peer_connection::{PeerConnection, WireTimeouts};
    use crate::services::piece_codec::{content_identity, hash_piece};
    use tempfile::tempdir;

    fn torrent() -> Torrent {
        let hashes = vec![hash_piece(b"abcd"), hash_piece(b"ef")];
        let info_hash = content_identity("t.bin", 6, 4, &hashes).unwrap();
        Torrent::new(info_hash.to_hex(), "t.bin".to_string(), 6, 4, hashes)
    }

    type Running = (SocketAddr, CancellationToken, tokio::task::JoinHandle<Result<(), DomainError>>, tempfile::TempDir);

    async fn start(torrent: &Torrent, pieces: &[(u32, &[u8])]) -> Running {
        start_with(torrent, pieces, ServerLimits::default()).await
    }

    async fn start_with(torrent: &Torrent, pieces: &[(u32, &[u8])], limits: ServerLimits) -> Running {
        let dir = tempdir().unwrap();
        let store = Arc::new(PieceStore::new(dir.path()));
        for (index, data) in pieces {
            store.write_piece(torrent, *index, data).await.unwrap();
        }
        let catalog = Arc::new(SeedCatalog::new());
        catalog.add(torrent.clone()).unwrap();

        let shutdown = CancellationToken::new();
        let server = PeerServer::bind(
            "127.0.0.1:0".parse().unwrap(),
            catalog,
            store,
            WirePeerId::from_peer_id("seeder"),
            limits,
            shutdown.clone(),
        )
        .await
        .unwrap();
        let addr = server.local_addr().unwrap();
        (addr, shutdown, server.spawn(), dir)
    }

    fn peer_at(addr: SocketAddr) -> PeerInfo {
        PeerInfo {
            peer_id: "seeder".to_string(),
            ip: addr.ip().to_string(),
            port: addr.port(),
        }
    }

    const LARGE_PIECE: usize = 8 * 1024 * 1024;

    fn large_torrent(data: &[u8]) -> Torrent {
        let hashes = vec![hash_piece(data)];
        let size = data.len() as i64;
        let info_hash = content_identity("large.bin", size, data.len() as i32, &hashes).unwrap();
        Torrent::new(info_hash.to_hex(), "large.bin".to_string(), size, data.len() as i32, hashes)
    }

    /// Completes the handshake, queues many requests and never reads the replies.
    async fn connect_without_reading(addr: SocketAddr, torrent: &Torrent) -> Framed<TcpStream, PeerCodec> {
        let info_hash = torrent.identity().unwrap();
        let mut stream = TcpStream::connect(addr).await.unwrap();
        Handshake::new(info_hash, WirePeerId::from_peer_id("stalled"))
            .write_to(&mut stream)
            .await
            .unwrap();
        Handshake::read_from(&mut stream, Duration::from_secs(5)).await.unwrap();

        let mut framed = Framed::new(stream, PeerCodec::default());
        for _ in 0..20 {
            framed.send(Message::Request { info_hash, index: 0 }).await.unwrap();
        }
        framed
    }

    #[tokio::test]
    async fn serves_held_pieces_and_advertises_them() {
        let torrent = torrent();
        let (addr, shutdown, handle, _dir) = start(&torrent, &[(0, b"abcd"), (1, b"ef")]).await;

        let mut conn = PeerConnection::open(
            &peer_at(addr),
            torrent.identity().unwrap(),
            WirePeerId::from_peer_id("leecher"),
            WireTimeouts::default(),
        )
        .await
        .unwrap();

        let bitfield = conn.read_bitfield(2).await.unwrap();
        assert!(bitfield.has(0) && bitfield.has(1));
        assert_eq!(conn.request_piece(1).await.unwrap().as_ref(), b"ef");
        assert_eq!(conn.request_piece(0).await.unwrap().as_ref(), b"abcd");

        shutdown.cancel();
        drop(conn);
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn unknown_identity_is_refused() {
        let torrent = torrent();
        let (addr, shutdown, _handle, _dir) = start(&torrent, &[(0, b"abcd")]).await;

        let result = PeerConnection::open(
            &peer_at(addr),
            InfoHash([1u8; 20]),
            WirePeerId::from_peer_id("leecher"),
            WireTimeouts::default(),
        )
        .await;

        assert!(result.is_err());
        shutdown.cancel();
    }

    #[tokio::test]
    async fn missing_piece_closes_the_connection() {
        let torrent = torrent();
        let (addr, shutdown, _handle, _dir) = start(&torrent, &[(0, b"abcd")]).await;

        let mut conn = PeerConnection::open(
            &peer_at(addr),
            torrent.identity().unwrap(),
            WirePeerId::from_peer_id("leecher"),
            WireTimeouts::default(),
        )
        .await
        .unwrap();

        let err = conn.request_piece(1).await.unwrap_err();
        assert!(matches!(err, DomainError::PeerUnreachable(_)));
        shutdown.cancel();
    }

    #[tokio::test]
    async fn cancelling_stops_accepting() {
        let torrent = torrent();
        let (addr, shutdown, handle, _dir) = start(&torrent, &[]).await;

        shutdown.cancel();
        handle.await.unwrap().unwrap();

        assert!(TcpStream::connect(addr).await.is_err());
    }

    #[tokio::test]
    async fn a_peer_that_stops_reading_frees_its_slot() {
        let data = vec![7u8; LARGE_PIECE];
        let torrent = large_torrent(&data);
        let limits = ServerLimits {
            max_connections: 1,
            write_timeout: Duration::from_secs(1),
            ..ServerLimits::default()
        };
        let (addr, shutdown, handle, _dir) = start_with(&torrent, &[(0, data.as_slice())], limits).await;

        let _stalled = connect_without_reading(addr, &torrent).await;

        // only one slot, so this is accepted once the stalled peer is dropped
        let mut conn = PeerConnection::open(
            &peer_at(addr),
            torrent.identity().unwrap(),
            WirePeerId::from_peer_id("leecher"),
            WireTimeouts::default(),
        )
        .await
        .unwrap();
        assert!(conn.read_bitfield(1).await.unwrap().has(0));
        assert_eq!(conn.request_piece(0).await.unwrap().len(), LARGE_PIECE);

        shutdown.cancel();
        drop(conn);
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn shutdown_drops_connections_that_do_not_drain() {
        let data = vec![3u8; LARGE_PIECE];
        let torrent = large_torrent(&data);
        let limits = ServerLimits {
            write_timeout: Duration::from_secs(120),
            drain_timeout: Duration::from_millis(200),
            ..ServerLimits::default()
        };
        let (addr, shutdown, handle, _dir) = start_with(&torrent, &[(0, data.as_slice())], limits).await;

        let _stalled = connect_without_reading(addr, &torrent).await;
        tokio::time::sleep(Duration::from_millis(200)).await;

        shutdown.cancel();
        let stopped = tokio::time::timeout(Duration::from_secs(10), handle).await;
        assert!(stopped.expect("server kept waiting on a stalled peer").unwrap().is_ok());
    }
}
