use crate::entities::{AnnounceEvent, AnnounceRequest, PeerInfo, Torrent, TorrentMetadata, TransferStats};
use crate::errors::DomainError;
use crate::services::magnet::MagnetLink;
use crate::services::piece_codec::{content_identity, PieceCodec};
use crate::services::piece_downloader::{FetchReport, PieceDownloader};
use crate::services::peer_server::SeedCatalog;
use crate::services::piece_store::PieceStore;
use crate::services::tracker_client::TrackerClient;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

/// How this node presents itself to the tracker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeIdentity {
    pub peer_id: String,
    pub ip: String,
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct PublishReport {
    pub metadata: TorrentMetadata,
    pub magnet: MagnetLink,
}

/// Node-side flows: publish a local file, fetch a torrent from its swarm,
/// and keep the tracker informed about both.
pub struct NodeService {
    tracker: TrackerClient,
    store: Arc<PieceStore>,
    catalog: Arc<SeedCatalog>,
    downloader: PieceDownloader,
    codec: PieceCodec,
    identity: NodeIdentity,
    download_dir: PathBuf,
    /// Swarms the tracker has seen this node start in.
    swarms: Mutex<Vec<String>>,
}

impl NodeService {
    pub fn new(
        tracker: TrackerClient,
        store: Arc<PieceStore>,
        catalog: Arc<SeedCatalog>,
        downloader: PieceDownloader,
        codec: PieceCodec,
        identity: NodeIdentity,
        download_dir: PathBuf,
    ) -> Self {
        Self {
            tracker,
            store,
            catalog,
            downloader,
            codec,
            identity,
            download_dir,
            swarms: Mutex::new(Vec::new()),
        }
    }

    pub fn identity(&self) -> &NodeIdentity {
        &self.identity
    }

    /// Splits `path` into the piece store, publishes it and joins its swarm
    /// as a seeder: `started`, then `completed` since nothing is left.
    pub async fn publish(&self, path: &Path) -> Result<PublishReport, DomainError> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| DomainError::ValidationError(format!("{} is not a file", path.display())))?;

        let (metadata, pieces) = self.codec.describe(path, &name).await?;
        let torrent = metadata.clone().into_torrent();
        self.store.import(&torrent, &pieces).await?;

        let stored = self.tracker.publish(&metadata).await?;
        self.catalog.add(stored.clone().into_torrent())?;

        self.announce(&stored.info_hash, Some(AnnounceEvent::Started), TransferStats::default())
            .await?;
        self.joined(&stored.info_hash);
        self.announce(&stored.info_hash, Some(AnnounceEvent::Completed), TransferStats::default())
            .await?;

        tracing::info!(
            info_hash = %stored.info_hash,
            name = %stored.name,
            pieces = stored.piece_hashes.len(),
            "seeding"
        );

        let magnet = MagnetLink::new(torrent.identity()?)
            .with_name(stored.name.clone())
            .with_tracker(self.tracker.base_url().as_str());

        Ok(PublishReport {
            metadata: stored,
            magnet,
        })
    }

    /// Downloads the torrent identified by `info_hash` into the download
    /// directory. On success the node keeps seeding it.
    pub async fn fetch(&self, info_hash: &str, cancel: &CancellationToken) -> Result<FetchReport, DomainError> {
        let metadata = self.tracker.torrent(info_hash).await?;
        let torrent = trusted_torrent(metadata)?;

        let response = self
            .announce(
                &torrent.info_hash,
                Some(AnnounceEvent::Started),
                TransferStats {
                    left: torrent.total_size,
                    ..Default::default()
                },
            )
            .await?;
        self.joined(&torrent.info_hash);
        let peers: Vec<PeerInfo> = response.others(&self.identity.peer_id);
        tracing::info!(info_hash = %torrent.info_hash, peers = peers.len(), "swarm joined");

        let output = self.output_path(&torrent);
        match self.downloader.fetch(&torrent, &peers, &output, cancel).await {
            Ok(report) => {
                self.catalog.add(torrent.clone())?;
                self.announce(
                    &torrent.info_hash,
                    Some(AnnounceEvent::Completed),
                    TransferStats {
                        downloaded: report.bytes as i64,
                        ..Default::default()
                    },
                )
                .await?;
                Ok(report)
            }
            Err(DomainError::IncompletePieceSet(missing)) => {
                let left: u64 = missing.iter().map(|i| torrent.piece_size(*i)).sum();
                let stats = TransferStats {
                    downloaded: torrent.total_size - left as i64,
                    left: left as i64,
                    ..Default::default()
                };
                if let Err(e) = self.announce(&torrent.info_hash, None, stats).await {
                    tracing::warn!(error = %e, "progress announce failed");
                }
                Err(DomainError::IncompletePieceSet(missing))
            }
            Err(e) => Err(e),
        }
    }

    pub async fn fetch_magnet(&self, uri: &str, cancel: &CancellationToken) -> Result<FetchReport, DomainError> {
        let link = MagnetLink::parse(uri)?;
        if let Some(tracker) = &link.tracker {
            if tracker.trim_end_matches('/') != self.tracker.base_url().as_str().trim_end_matches('/') {
                tracing::warn!(link_tracker = %tracker, "magnet names another tracker, using the configured one");
            }
        }
        self.fetch(&link.info_hash.to_hex(), cancel).await
    }

    /// Tells the tracker this node is leaving every swarm it joined, whether
    /// or not the transfer that joined it succeeded.
    pub async fn leave_all(&self) {
        let swarms = self
            .swarms
            .lock()
            .map(|mut s| std::mem::take(&mut *s))
            .unwrap_or_default();
        for info_hash in &swarms {
            if let Err(e) = self
                .announce(info_hash, Some(AnnounceEvent::Stopped), TransferStats::default())
                .await
            {
                tracing::warn!(%info_hash, error = %e, "stop announce failed");
            }
        }
    }

    fn joined(&self, info_hash: &str) {
        if let Ok(mut swarms) = self.swarms.lock() {
            if !swarms.iter().any(|s| s == info_hash) {
                swarms.push(info_hash.to_string());
            }
        }
    }

    fn output_path(&self, torrent: &Torrent) -> PathBuf {
        let name = Path::new(&torrent.name)
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| torrent.info_hash.clone().into());
        self.download_dir.join(name)
    }

    async fn announce(
        &self,
        info_hash: &str,
        event: Option<AnnounceEvent>,
        stats: TransferStats,
    ) -> Result<crate::entities::AnnounceResponse, DomainError> {
        self.tracker
            .announce(&AnnounceRequest {
                info_hash: info_hash.to_string(),
                peer_id: self.identity.peer_id.clone(),
                ip: self.identity.ip.clone(),
                port: self.identity.port,
                uploaded: stats.uploaded,
                downloaded: stats.downloaded,
                left: stats.left,
                event: event.map(|e| e.as_str().to_string()),
            })
            .await
    }
}

/// Checks a descriptor received from the tracker before any byte is fetched
/// for it.
fn trusted_torrent(metadata: TorrentMetadata) -> Result<Torrent, DomainError> {
    metadata.validate()?;
    let identity = content_identity(
        &metadata.name,
        metadata.size,
        metadata.piece_length,
        &metadata.piece_hashes,
    )?;
    if !metadata.info_hash.eq_ignore_ascii_case(&identity.to_hex()) {
        return Err(DomainError::TrackerError(format!(
            "descriptor for {} does not hash to its identity",
            metadata.info_hash
        )));
    }
    Ok(metadata.into_torrent())
}
