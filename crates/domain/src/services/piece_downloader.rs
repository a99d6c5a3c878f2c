use crate::entities::{Bitfield, InfoHash, PeerInfo, Piece, Torrent, WirePeerId};
use crate::errors::DomainError;
use crate::services::peer_connection::{ConnectionPool, PeerConnection, WireTimeouts};
use crate::services::piece_codec::{verify_piece, PieceCodec};
use crate::services::piece_scheduler::{AvailabilityMap, PieceScheduler};
use crate::services::piece_store::PieceStore;
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy)]
pub struct DownloadSettings {
    pub timeouts: WireTimeouts,
    /// Upper bound on piece transfers running at once.
    pub max_concurrent_transfers: usize,
    /// Upper bound on peers probed at once.
    pub max_concurrent_probes: usize,
}

impl Default for DownloadSettings {
    fn default() -> Self {
        Self {
            timeouts: WireTimeouts::default(),
            max_concurrent_transfers: 8,
            max_concurrent_probes: 16,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchReport {
    pub output: PathBuf,
    pub bytes: u64,
    pub pieces_transferred: u32,
    pub pieces_reused: u32,
    pub peers_probed: usize,
    pub peers_responsive: usize,
}

/// Downloads a torrent's pieces from a swarm and assembles the file.
pub struct PieceDownloader {
    store: Arc<PieceStore>,
    codec: PieceCodec,
    local_id: WirePeerId,
    settings: DownloadSettings,
}

struct TransferContext {
    torrent: Torrent,
    info_hash: InfoHash,
    store: Arc<PieceStore>,
    scheduler: PieceScheduler,
    pool: ConnectionPool,
    local_id: WirePeerId,
    timeouts: WireTimeouts,
    cancel: CancellationToken,
}

impl PieceDownloader {
    pub fn new(store: Arc<PieceStore>, local_id: WirePeerId, settings: DownloadSettings) -> Self {
        Self {
            store,
            codec: PieceCodec::default(),
            local_id,
            settings,
        }
    }

    /// Connects to every peer concurrently and records what each holds.
    /// Peers that cannot be reached or answer for another torrent are left
    /// out. Live connections are parked in `pool` for the transfers.
    pub async fn probe(
        &self,
        torrent: &Torrent,
        peers: &[PeerInfo],
        pool: &ConnectionPool,
    ) -> Result<AvailabilityMap, DomainError> {
        let info_hash = torrent.identity()?;
        let piece_count = torrent.piece_count();
        let held = self.store.bitfield(torrent).await?;
        let timeouts = self.settings.timeouts;
        let local_id = self.local_id;

        // `buffered` keeps results in peer-list order, which fixes holder order
        let probes: Vec<(PeerInfo, Result<(PeerConnection, Bitfield), DomainError>)> =
            stream::iter(peers.iter().cloned())
                .map(|peer| {
                    let held = held.clone();
                    async move {
                        let result = probe_peer(&peer, info_hash, local_id, timeouts, &held, piece_count).await;
                        (peer, result)
                    }
                })
                .buffered(self.settings.max_concurrent_probes.max(1))
                .collect()
                .await;

        let mut availability = AvailabilityMap::new(piece_count);
        for (peer, result) in probes {
            match result {
                Ok((connection, bitfield)) => {
                    tracing::debug!(peer = %peer.peer_id, pieces = bitfield.count(), "peer probed");
                    availability.record(&peer, &bitfield);
                    pool.give_back(connection);
                }
                Err(e) => {
                    tracing::warn!(peer = %peer.peer_id, addr = %peer.socket_addr(), error = %e, "skipping peer");
                }
            }
        }

        Ok(availability)
    }

    /// Fetches every piece of `torrent` not already held locally, then
    /// merges them into `output`.
    ///
    /// Pieces are started rarest first; each piece tries its holders in
    /// turn until one delivers bytes matching the piece hash. If any piece
    /// cannot be obtained the verified pieces stay in the store and the
    /// missing indices are reported.
    pub async fn fetch(
        &self,
        torrent: &Torrent,
        peers: &[PeerInfo],
        output: &Path,
        cancel: &CancellationToken,
    ) -> Result<FetchReport, DomainError> {
        let info_hash = torrent.identity()?;
        let reused = self.store.verified_pieces(torrent).await?;
        let pool = ConnectionPool::new();

        let availability = if reused.len() as u32 == torrent.piece_count() {
            AvailabilityMap::new(torrent.piece_count())
        } else {
            tokio::select! {
                _ = cancel.cancelled() => return Err(DomainError::Cancelled),
                availability = self.probe(torrent, peers, &pool) => availability?,
            }
        };
        let responsive = pool.len();

        let context = Arc::new(TransferContext {
            torrent: torrent.clone(),
            info_hash,
            store: self.store.clone(),
            scheduler: PieceScheduler::new(availability, reused.iter().map(|p| p.index)),
            pool,
            local_id: self.local_id,
            timeouts: self.settings.timeouts,
            cancel: cancel.clone(),
        });

        let unavailable: Vec<u32> = context
            .scheduler
            .availability()
            .unavailable()
            .into_iter()
            .filter(|i| !context.scheduler.completed().contains(i))
            .collect();
        if !unavailable.is_empty() {
            tracing::warn!(%info_hash, missing = ?unavailable, "no peer advertises some pieces");
        }

        let permits = Arc::new(Semaphore::new(self.settings.max_concurrent_transfers.max(1)));
        let mut transfers = JoinSet::new();
        let pending = context.scheduler.pending();
        let transferred = pending.len();

        for index in pending {
            let permit = tokio::select! {
                _ = cancel.cancelled() => break,
                permit = permits.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };
            let context = context.clone();
            transfers.spawn(async move {
                let result = transfer_piece(&context, index).await;
                drop(permit);
                result
            });
        }

        let mut fatal = None;
        while let Some(joined) = transfers.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::error!(error = %e, "piece transfer failed");
                    fatal.get_or_insert(e);
                }
                Err(e) => {
                    fatal.get_or_insert(DomainError::IoError(format!("transfer task failed: {}", e)));
                }
            }
        }

        if cancel.is_cancelled() {
            return Err(DomainError::Cancelled);
        }
        if let Some(e) = fatal {
            return Err(e);
        }

        let missing = context.scheduler.missing();
        if !missing.is_empty() {
            return Err(DomainError::IncompletePieceSet(missing));
        }

        let pieces = self.store.local_pieces(torrent).await?;
        let bytes = self.codec.merge(&pieces, torrent.piece_count(), output).await?;

        tracing::info!(
            %info_hash,
            output = %output.display(),
            bytes,
            transferred,
            reused = reused.len(),
            "fetch complete"
        );

        Ok(FetchReport {
            output: output.to_path_buf(),
            bytes,
            pieces_transferred: transferred as u32,
            pieces_reused: reused.len() as u32,
            peers_probed: peers.len(),
            peers_responsive: responsive,
        })
    }
}

async fn probe_peer(
    peer: &PeerInfo,
    info_hash: InfoHash,
    local_id: WirePeerId,
    timeouts: WireTimeouts,
    held: &Bitfield,
    piece_count: u32,
) -> Result<(PeerConnection, Bitfield), DomainError> {
    let mut connection = PeerConnection::open(peer, info_hash, local_id, timeouts).await?;
    if !held.is_empty() {
        connection.send_bitfield(held).await?;
    }
    let bitfield = connection.read_bitfield(piece_count).await?;
    Ok((connection, bitfield))
}

/// Tries each holder of `index` in turn. Failures that only disqualify the
/// holder move on to the next one; anything else, including store failures,
/// is returned. A piece no holder could deliver is left to `missing()`.
async fn transfer_piece(context: &TransferContext, index: u32) -> Result<(), DomainError> {
    let Some(piece) = context.torrent.piece(index) else {
        return Ok(());
    };

    while let Some(holder) = context.scheduler.next_holder(index) {
        if context.cancel.is_cancelled() {
            context.scheduler.fail(index);
            return Ok(());
        }

        let received = tokio::select! {
            _ = context.cancel.cancelled() => Err(DomainError::Cancelled),
            received = request_from(context, &holder, &piece) => received,
        };

        match received {
            Ok(data) => {
                if let Err(e) = context.store.write_piece(&context.torrent, index, &data).await {
                    context.scheduler.fail(index);
                    return Err(e);
                }
                context.scheduler.complete(index);
                tracing::debug!(index, peer = %holder.peer_id, "piece stored");
                return Ok(());
            }
            Err(DomainError::Cancelled) => {
                context.scheduler.fail(index);
                return Ok(());
            }
            Err(e) if e.is_peer_local() => {
                tracing::warn!(index, peer = %holder.peer_id, error = %e, "piece transfer failed, trying next holder");
                context.scheduler.fail(index);
            }
            Err(e) => {
                context.scheduler.fail(index);
                return Err(e);
            }
        }
    }

    Ok(())
}

async fn request_from(
    context: &TransferContext,
    holder: &PeerInfo,
    piece: &Piece,
) -> Result<Bytes, DomainError> {
    let mut connection = match context.pool.take(holder) {
        Some(connection) => connection,
        None => PeerConnection::open(holder, context.info_hash, context.local_id, context.timeouts).await?,
    };

    let data = connection.request_piece(piece.index).await?;
    verify_piece(piece, &data)?;

    context.pool.give_back(connection);
    Ok(data)
}
