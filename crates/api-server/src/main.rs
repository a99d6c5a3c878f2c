use api_server::{router, AppState};
use application::TrackerApp;
use config::TrackerConfig;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("api_server=debug,application=info,domain=info,tower_http=debug")),
        )
        .init();

    let config = TrackerConfig::from_env(None)?;
    info!(database = %config.database_path, "starting tracker");

    let tracker_app = TrackerApp::new(&config)?;
    let app = router(AppState::new(tracker_app));

    let bind_address = config.bind_address();
    let listener = tokio::net::TcpListener::bind(&bind_address).await?;
    info!("tracker listening on http://{}", bind_address);
    info!("   POST /register            - Create an account");
    info!("   POST /login               - Obtain a bearer token");
    info!("   POST /publish             - Publish a torrent descriptor");
    info!("   GET  /announce            - Join a swarm and list its peers");
    info!("   GET  /torrent/:info_hash  - Fetch a stored descriptor");
    info!("   GET  /health              - Health check");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutting down tracker");
        })
        .await?;

    Ok(())
}
