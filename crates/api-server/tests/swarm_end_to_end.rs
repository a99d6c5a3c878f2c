use api_server::{router, AppState};
use application::TrackerApp;
use application::NodeApp;
use config::NodeConfig;
use domain::{
    AnnouncePolicy, DomainError, InMemoryRepository, PeerFileRepository, PeerRepository, PeerStatus,
    TorrentRepository,
};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::net::TcpListener;

async fn spawn_tracker() -> SocketAddr {
    spawn_tracker_with_storage().await.0
}

/// Tracker whose storage stays inspectable by the test.
async fn spawn_tracker_with_storage() -> (SocketAddr, Arc<InMemoryRepository>) {
    let repository = Arc::new(InMemoryRepository::new());
    let tracker = TrackerApp::with_repositories(
        repository.clone(),
        repository.clone(),
        repository.clone(),
        repository.clone(),
        AnnouncePolicy::default(),
    );

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = router(AppState::new(tracker));
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, repository)
}

/// Status the tracker holds for `peer_id` in the swarm of `info_hash`.
async fn status_of(repository: &InMemoryRepository, info_hash: &str, peer_id: &str) -> Option<PeerStatus> {
    let torrent = repository.find_by_info_hash(info_hash).await.unwrap()?;
    let files = repository.find_files(torrent.id?).await.unwrap();
    let peer = repository.find_by_peer_id(peer_id).await.unwrap()?;
    let row = repository.find(peer.id?, files.first()?.id?).await.unwrap()?;
    Some(row.status)
}

fn node_config(tracker: SocketAddr, dir: &Path) -> NodeConfig {
    NodeConfig {
        tracker_url: format!("http://{}", tracker),
        listen_host: "127.0.0.1".to_string(),
        listen_port: 0,
        advertise_ip: "127.0.0.1".to_string(),
        piece_dir: dir.join("pieces"),
        download_dir: dir.join("downloads"),
        piece_length: 1024,
        ..Default::default()
    }
}

#[tokio::test]
async fn published_file_is_fetched_through_its_magnet_link() {
    let tracker = spawn_tracker().await;
    let seeder_dir = TempDir::new().unwrap();
    let leecher_dir = TempDir::new().unwrap();

    let content: Vec<u8> = (0..2500u32).map(|i| (i * 7 % 251) as u8).collect();
    let source = seeder_dir.path().join("clip.bin");
    std::fs::write(&source, &content).unwrap();

    let seeder = NodeApp::start(&node_config(tracker, seeder_dir.path())).await.unwrap();
    let published = seeder.publish(&source).await.unwrap();
    assert_eq!(published.metadata.piece_hashes.len(), 3);

    let leecher = NodeApp::start(&node_config(tracker, leecher_dir.path())).await.unwrap();
    let report = leecher.fetch_magnet(&published.magnet.to_uri()).await.unwrap();

    assert_eq!(report.pieces_transferred, 3);
    assert_eq!(report.output, leecher_dir.path().join("downloads").join("clip.bin"));
    assert_eq!(std::fs::read(&report.output).unwrap(), content);

    leecher.shutdown().await.unwrap();
    seeder.shutdown().await.unwrap();
}

#[tokio::test]
async fn fetching_an_unpublished_identity_fails_fast() {
    let tracker = spawn_tracker().await;
    let dir = TempDir::new().unwrap();
    let node = NodeApp::start(&node_config(tracker, dir.path())).await.unwrap();

    let result = node.fetch(&"ef".repeat(20)).await;

    assert!(matches!(result, Err(DomainError::UnknownTorrent(_))));
    node.shutdown().await.unwrap();
}

#[tokio::test]
async fn a_publisher_is_recorded_as_seeding() {
    let (tracker, repository) = spawn_tracker_with_storage().await;
    let dir = TempDir::new().unwrap();
    let source = dir.path().join("notes.txt");
    std::fs::write(&source, b"nothing left to download").unwrap();

    let node = NodeApp::start(&node_config(tracker, dir.path())).await.unwrap();
    let published = node.publish(&source).await.unwrap();
    let peer_id = node.identity().peer_id.clone();

    assert_eq!(
        status_of(&repository, &published.metadata.info_hash, &peer_id).await,
        Some(PeerStatus::Seeding)
    );

    node.shutdown().await.unwrap();
    assert_eq!(
        status_of(&repository, &published.metadata.info_hash, &peer_id).await,
        Some(PeerStatus::Stopped)
    );
}

#[tokio::test]
async fn a_failed_fetch_still_leaves_the_swarm_on_shutdown() {
    let (tracker, repository) = spawn_tracker_with_storage().await;
    let seeder_dir = TempDir::new().unwrap();
    let leecher_dir = TempDir::new().unwrap();
    let source = seeder_dir.path().join("gone.bin");
    std::fs::write(&source, vec![5u8; 3000]).unwrap();

    // the only seeder leaves before anyone fetches
    let seeder = NodeApp::start(&node_config(tracker, seeder_dir.path())).await.unwrap();
    let info_hash = seeder.publish(&source).await.unwrap().metadata.info_hash;
    seeder.shutdown().await.unwrap();

    let leecher = NodeApp::start(&node_config(tracker, leecher_dir.path())).await.unwrap();
    let peer_id = leecher.identity().peer_id.clone();
    let result = leecher.fetch(&info_hash).await;

    assert!(matches!(result, Err(DomainError::IncompletePieceSet(_))));
    assert_eq!(status_of(&repository, &info_hash, &peer_id).await, Some(PeerStatus::Leeching));

    leecher.shutdown().await.unwrap();
    assert_eq!(status_of(&repository, &info_hash, &peer_id).await, Some(PeerStatus::Stopped));
}
