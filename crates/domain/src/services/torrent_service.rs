use crate::entities::{FileEntry, Torrent, TorrentMetadata};
use crate::errors::DomainError;
use crate::repositories::TorrentRepository;
use crate::services::piece_codec::content_identity;
use std::sync::Arc;

/// Result of a publish: the stored descriptor and whether this call
/// created it.
#[derive(Debug, Clone, PartialEq)]
pub struct PublishOutcome {
    pub metadata: TorrentMetadata,
    pub created: bool,
}

/// Tracker-side catalog of published torrents.
pub struct TorrentService {
    torrent_repository: Arc<dyn TorrentRepository>,
}

impl TorrentService {
    pub fn new(torrent_repository: Arc<dyn TorrentRepository>) -> Self {
        Self { torrent_repository }
    }

    /// Stores a torrent descriptor. Publishing an identity that is already
    /// known returns the stored descriptor unchanged.
    pub async fn publish(&self, mut metadata: TorrentMetadata) -> Result<PublishOutcome, DomainError> {
        metadata.validate()?;

        let identity = content_identity(
            &metadata.name,
            metadata.size,
            metadata.piece_length,
            &metadata.piece_hashes,
        )?;
        if !metadata.info_hash.eq_ignore_ascii_case(&identity.to_hex()) {
            return Err(DomainError::ValidationError(format!(
                "info_hash {} does not match the descriptor (expected {})",
                metadata.info_hash, identity
            )));
        }
        metadata.info_hash = identity.to_hex();

        if let Some(existing) = self.torrent_repository.find_by_info_hash(&metadata.info_hash).await? {
            return Ok(PublishOutcome {
                metadata: self.describe(&existing).await?,
                created: false,
            });
        }

        let torrent = metadata.clone().into_torrent();
        let torrent = match self.torrent_repository.create(&torrent, &metadata.file_layout(0)).await {
            Ok((torrent, _files)) => torrent,
            Err(create_error) => {
                // a concurrent publish of the same identity may have won the insert
                return match self.torrent_repository.find_by_info_hash(&metadata.info_hash).await? {
                    Some(existing) => Ok(PublishOutcome {
                        metadata: self.describe(&existing).await?,
                        created: false,
                    }),
                    None => Err(create_error),
                };
            }
        };

        tracing::info!(
            info_hash = %torrent.info_hash,
            name = %torrent.name,
            size = torrent.total_size,
            pieces = torrent.piece_count(),
            "torrent published"
        );

        Ok(PublishOutcome {
            metadata: self.describe(&torrent).await?,
            created: true,
        })
    }

    pub async fn find(&self, info_hash: &str) -> Result<Torrent, DomainError> {
        self.torrent_repository
            .find_by_info_hash(&info_hash.to_ascii_lowercase())
            .await?
            .ok_or_else(|| DomainError::UnknownTorrent(info_hash.to_string()))
    }

    /// Descriptor of a stored torrent, listing its files when it has more
    /// than one.
    pub async fn describe(&self, torrent: &Torrent) -> Result<TorrentMetadata, DomainError> {
        let mut metadata = torrent.descriptor();
        let files = self.torrent_repository.find_files(stored_id(torrent)?).await?;
        if files.len() > 1 {
            metadata.files = Some(
                files
                    .into_iter()
                    .map(|f| FileEntry {
                        name: f.path,
                        size: f.length,
                    })
                    .collect(),
            );
        }
        Ok(metadata)
    }
}

fn stored_id(torrent: &Torrent) -> Result<i32, DomainError> {
    torrent
        .id
        .ok_or_else(|| DomainError::RepositoryError(format!("torrent {} has no id", torrent.info_hash)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::TorrentFile;
    use crate::repositories::InMemoryRepository;
    use crate::services::piece_codec::hash_piece;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Store whose first insert fails before writing anything.
    struct FailsFirstCreate {
        inner: InMemoryRepository,
        failed: AtomicBool,
    }

    #[async_trait]
    impl TorrentRepository for FailsFirstCreate {
        async fn find_by_id(&self, id: i32) -> Result<Option<Torrent>, DomainError> {
            self.inner.find_by_id(id).await
        }

        async fn find_by_info_hash(&self, info_hash: &str) -> Result<Option<Torrent>, DomainError> {
            self.inner.find_by_info_hash(info_hash).await
        }

        async fn create(
            &self,
            torrent: &Torrent,
            files: &[TorrentFile],
        ) -> Result<(Torrent, Vec<TorrentFile>), DomainError> {
            if !self.failed.swap(true, Ordering::SeqCst) {
                return Err(DomainError::RepositoryError("disk full".to_string()));
            }
            self.inner.create(torrent, files).await
        }

        async fn find_files(&self, torrent_id: i32) -> Result<Vec<TorrentFile>, DomainError> {
            self.inner.find_files(torrent_id).await
        }
    }

    fn metadata(name: &str) -> TorrentMetadata {
        let piece_hashes = vec![hash_piece(b"0123"), hash_piece(b"45")];
        let info_hash = content_identity(name, 6, 4, &piece_hashes).unwrap().to_hex();
        TorrentMetadata {
            name: name.to_string(),
            size: 6,
            piece_length: 4,
            piece_hashes,
            info_hash,
            files: None,
        }
    }

    #[tokio::test]
    async fn publishing_twice_keeps_one_record() {
        let repository = Arc::new(InMemoryRepository::new());
        let service = TorrentService::new(repository.clone());

        let first = service.publish(metadata("a.bin")).await.unwrap();
        let second = service.publish(metadata("a.bin")).await.unwrap();

        assert!(first.created);
        assert!(!second.created);
        assert_eq!(first.metadata, second.metadata);
        assert_eq!(repository.torrent_count(), 1);
    }

    #[tokio::test]
    async fn a_forged_identity_is_rejected() {
        let service = TorrentService::new(Arc::new(InMemoryRepository::new()));
        let mut forged = metadata("a.bin");
        forged.info_hash = "ff".repeat(20);

        let err = service.publish(forged).await.unwrap_err();
        assert!(matches!(err, DomainError::ValidationError(_)));
    }

    #[tokio::test]
    async fn unknown_identity_is_reported() {
        let service = TorrentService::new(Arc::new(InMemoryRepository::new()));

        let err = service.find(&"ab".repeat(20)).await.unwrap_err();
        assert!(matches!(err, DomainError::UnknownTorrent(_)));
    }

    #[tokio::test]
    async fn multi_file_layout_is_returned_by_describe() {
        let service = TorrentService::new(Arc::new(InMemoryRepository::new()));
        let mut bundle = metadata("bundle");
        bundle.files = Some(vec![
            FileEntry { name: "a.txt".into(), size: 2 },
            FileEntry { name: "b.txt".into(), size: 4 },
        ]);

        let outcome = service.publish(bundle).await.unwrap();

        let files = outcome.metadata.files.unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(files[1].name, "b.txt");
    }

    #[tokio::test]
    async fn a_failed_publish_can_be_retried_and_keeps_its_files() {
        let repository = Arc::new(FailsFirstCreate {
            inner: InMemoryRepository::new(),
            failed: AtomicBool::new(false),
        });
        let service = TorrentService::new(repository.clone());

        assert!(service.publish(metadata("a.bin")).await.is_err());
        assert_eq!(repository.inner.torrent_count(), 0);

        let retry = service.publish(metadata("a.bin")).await.unwrap();
        assert!(retry.created);

        let stored = service.find(&retry.metadata.info_hash).await.unwrap();
        let files = repository.find_files(stored.id.unwrap()).await.unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].path, "a.bin");
        assert_eq!(files[0].torrent_id, stored.id.unwrap());
    }
}
