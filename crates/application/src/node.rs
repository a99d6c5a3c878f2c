use config::NodeConfig;
use domain::*;
use rand::distributions::Alphanumeric;
use rand::Rng;
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const PEER_ID_PREFIX: &str = "-SW0100-";
const CREDENTIALS_FILE: &str = ".credentials";
const GENERATED_PASSWORD_LEN: usize = 32;

/// Fresh 20-character peer id, `-SW0100-` followed by random characters.
pub fn generate_peer_id() -> String {
    format!("{}{}", PEER_ID_PREFIX, random_alphanumeric(20 - PEER_ID_PREFIX.len()))
}

fn random_alphanumeric(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// A running peer node: the piece server is listening and the tracker
/// session is established.
pub struct NodeApp {
    service: NodeService,
    server: Mutex<Option<JoinHandle<Result<(), DomainError>>>>,
    listen_addr: SocketAddr,
    shutdown: CancellationToken,
}

impl NodeApp {
    pub async fn start(config: &NodeConfig) -> Result<Self, DomainError> {
        let peer_id = config.peer_id.clone().unwrap_or_else(generate_peer_id);
        let local_id = WirePeerId::from_peer_id(&peer_id);

        let store = Arc::new(PieceStore::new(&config.piece_dir));
        let catalog = Arc::new(SeedCatalog::new());
        let shutdown = CancellationToken::new();

        let addr: SocketAddr = config.listen_address().parse().map_err(|_| {
            DomainError::ValidationError(format!("Invalid listen address: {}", config.listen_address()))
        })?;
        let server = PeerServer::bind(
            addr,
            catalog.clone(),
            store.clone(),
            local_id,
            ServerLimits {
                max_connections: config.max_connections,
                handshake_timeout: config.connect_timeout,
                write_timeout: config.read_timeout,
                ..Default::default()
            },
            shutdown.clone(),
        )
        .await?;
        let listen_addr = server.local_addr()?;

        let tracker = connect_tracker(config, &peer_id).await?;

        let timeouts = WireTimeouts {
            connect: config.connect_timeout,
            handshake: config.connect_timeout,
            read: config.read_timeout,
            bitfield: config.bitfield_timeout,
        };
        let downloader = PieceDownloader::new(
            store.clone(),
            local_id,
            DownloadSettings {
                timeouts,
                max_concurrent_transfers: config.max_concurrent_transfers,
                ..Default::default()
            },
        );

        let identity = NodeIdentity {
            peer_id,
            ip: config.advertise_ip.clone(),
            port: listen_addr.port(),
        };
        tracing::info!(peer_id = %identity.peer_id, addr = %listen_addr, "node listening");

        let service = NodeService::new(
            tracker,
            store,
            catalog,
            downloader,
            PieceCodec::new(config.piece_length),
            identity,
            config.download_dir.clone(),
        );

        Ok(Self {
            service,
            server: Mutex::new(Some(server.spawn())),
            listen_addr,
            shutdown,
        })
    }

    pub fn listen_addr(&self) -> SocketAddr {
        self.listen_addr
    }

    pub fn identity(&self) -> &NodeIdentity {
        self.service.identity()
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub async fn publish(&self, path: &Path) -> Result<PublishReport, DomainError> {
        self.service.publish(path).await
    }

    /// Downloads a torrent. Cancelling the shutdown token aborts it.
    pub async fn fetch(&self, info_hash: &str) -> Result<FetchReport, DomainError> {
        let cancel = self.shutdown.child_token();
        self.service.fetch(info_hash, &cancel).await
    }

    pub async fn fetch_magnet(&self, uri: &str) -> Result<FetchReport, DomainError> {
        let cancel = self.shutdown.child_token();
        self.service.fetch_magnet(uri, &cancel).await
    }

    /// Keeps seeding until ctrl-c or until the shutdown token fires, then
    /// leaves every swarm.
    pub async fn serve(&self) -> Result<(), DomainError> {
        tokio::select! {
            _ = self.shutdown.cancelled() => {}
            signal = tokio::signal::ctrl_c() => {
                signal?;
                tracing::info!("interrupt received");
            }
        }
        self.shutdown().await
    }

    /// Announces `stopped` for every joined swarm and stops the piece server.
    pub async fn shutdown(&self) -> Result<(), DomainError> {
        self.service.leave_all().await;

        self.shutdown.cancel();
        let handle = self.server.lock().ok().and_then(|mut h| h.take());
        if let Some(handle) = handle {
            match handle.await {
                Ok(result) => result?,
                Err(e) => return Err(DomainError::IoError(format!("peer server task failed: {}", e))),
            }
        }
        tracing::info!("node stopped");
        Ok(())
    }
}

/// Opens the tracker session: logs in, registering the account first if the
/// tracker does not know it. Without configured credentials the node uses
/// the account kept in its piece directory.
async fn connect_tracker(config: &NodeConfig, peer_id: &str) -> Result<TrackerClient, DomainError> {
    let mut tracker = TrackerClient::new(&config.tracker_url, config.tracker_timeout)?;

    let credentials = match (&config.username, &config.password) {
        (Some(username), Some(password)) => Credentials {
            username: username.clone(),
            password: password.clone(),
        },
        _ => stored_credentials(&config.piece_dir, peer_id).await?,
    };

    let token = match tracker.login(&credentials).await {
        Ok(token) => token,
        Err(DomainError::Unauthorized(_)) => {
            tracing::info!(username = %credentials.username, "registering with tracker");
            tracker.register(&credentials).await?
        }
        Err(e) => return Err(e),
    };
    tracker.set_token(token.access_token);

    Ok(tracker)
}

/// Loads the node's own tracker account from `<piece_dir>/.credentials`
/// (username line, password line), creating it with a random password on
/// first use.
async fn stored_credentials(piece_dir: &Path, peer_id: &str) -> Result<Credentials, DomainError> {
    let path = piece_dir.join(CREDENTIALS_FILE);
    match tokio::fs::read_to_string(&path).await {
        Ok(content) => {
            let mut lines = content.lines();
            return match (lines.next(), lines.next()) {
                (Some(username), Some(password)) if !username.is_empty() && !password.is_empty() => {
                    Ok(Credentials {
                        username: username.to_string(),
                        password: password.to_string(),
                    })
                }
                _ => Err(DomainError::ValidationError(format!(
                    "{} must hold a username line and a password line",
                    path.display()
                ))),
            };
        }
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }

    let credentials = Credentials {
        username: peer_id.to_string(),
        password: random_alphanumeric(GENERATED_PASSWORD_LEN),
    };
    tokio::fs::create_dir_all(piece_dir).await?;
    tokio::fs::write(&path, format!("{}\n{}\n", credentials.username, credentials.password)).await?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600)).await?;
    }
    tracing::info!(username = %credentials.username, path = %path.display(), "created tracker account credentials");

    Ok(credentials)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn generated_peer_ids_are_wire_sized_and_distinct() {
        let a = generate_peer_id();
        let b = generate_peer_id();

        assert_eq!(a.len(), 20);
        assert!(a.starts_with(PEER_ID_PREFIX));
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn unconfigured_nodes_keep_a_random_password_between_runs() {
        let dir = TempDir::new().unwrap();
        let piece_dir = dir.path().join("pieces");

        let first = stored_credentials(&piece_dir, "-SW0100-aaaaaaaaaaaa").await.unwrap();
        assert_eq!(first.username, "-SW0100-aaaaaaaaaaaa");
        assert_eq!(first.password.len(), GENERATED_PASSWORD_LEN);
        assert_ne!(first.password, first.username);

        // a restart with a new peer id still logs into the same account
        let second = stored_credentials(&piece_dir, "-SW0100-bbbbbbbbbbbb").await.unwrap();
        assert_eq!(second.username, first.username);
        assert_eq!(second.password, first.password);

        let other = TempDir::new().unwrap();
        let elsewhere = stored_credentials(other.path(), "-SW0100-aaaaaaaaaaaa").await.unwrap();
        assert_ne!(elsewhere.password, first.password);
    }

    #[tokio::test]
    async fn a_truncated_credentials_file_is_reported() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(CREDENTIALS_FILE), "only-a-name\n").unwrap();

        let result = stored_credentials(dir.path(), "-SW0100-aaaaaaaaaaaa").await;

        assert!(matches!(result, Err(DomainError::ValidationError(_))));
    }
}
