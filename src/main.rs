use application::NodeApp;
use clap::{Parser, Subcommand};
use config::NodeConfig;
use domain::DomainError;
use std::future::Future;
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Peer node of a swarmshare swarm.
#[derive(Parser, Debug)]
#[command(name = "swarmshare", version, about)]
struct Cli {
    /// Load settings from this .env file instead of ./.env
    #[arg(long, global = true)]
    env_file: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Publish local files and seed them until interrupted.
    Seed {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Download a published torrent by its info hash.
    Fetch {
        info_hash: String,
        /// Exit once the download is complete instead of seeding it.
        #[arg(long)]
        no_seed: bool,
    },
    /// Download a torrent from a magnet link.
    Magnet {
        uri: String,
        #[arg(long)]
        no_seed: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("swarmshare=info,application=info,domain=info")),
        )
        .init();

    let cli = Cli::parse();
    let config = NodeConfig::from_env(cli.env_file.as_deref())?;
    let node = NodeApp::start(&config).await?;

    match run(cli.command, &node).await {
        Ok(true) => {
            info!(addr = %node.listen_addr(), "seeding, press ctrl-c to stop");
            node.serve().await?;
        }
        Ok(false) => node.shutdown().await?,
        Err(e) => {
            // leave the swarms joined so far before reporting the failure
            if let Err(stop) = node.shutdown().await {
                warn!(error = %stop, "shutdown after failure");
            }
            return Err(e);
        }
    }

    Ok(())
}

/// Runs one command; `Ok(true)` means keep seeding afterwards.
async fn run(command: Command, node: &NodeApp) -> anyhow::Result<bool> {
    match command {
        Command::Seed { files } => {
            for file in &files {
                let report = until_interrupted(node, node.publish(file)).await?;
                println!("{}  {}", report.metadata.info_hash, file.display());
                println!("{}", report.magnet);
            }
            Ok(true)
        }
        Command::Fetch { info_hash, no_seed } => {
            fetched(until_interrupted(node, node.fetch(&info_hash)).await)?;
            Ok(!no_seed)
        }
        Command::Magnet { uri, no_seed } => {
            fetched(until_interrupted(node, node.fetch_magnet(&uri)).await)?;
            Ok(!no_seed)
        }
    }
}

/// Lets ctrl-c cancel `work` through the node's shutdown token; `work` still
/// runs to its own end so partial progress is kept.
async fn until_interrupted<T>(
    node: &NodeApp,
    work: impl Future<Output = Result<T, DomainError>>,
) -> Result<T, DomainError> {
    tokio::pin!(work);
    tokio::select! {
        result = &mut work => result,
        _ = tokio::signal::ctrl_c() => {
            info!("interrupt received, cancelling");
            node.shutdown_token().cancel();
            work.await
        }
    }
}

fn fetched(result: Result<domain::FetchReport, DomainError>) -> anyhow::Result<()> {
    match result {
        Ok(report) => {
            println!(
                "{} ({} bytes, {} pieces fetched, {} reused)",
                report.output.display(),
                report.bytes,
                report.pieces_transferred,
                report.pieces_reused
            );
            Ok(())
        }
        Err(DomainError::IncompletePieceSet(missing)) => {
            warn!(?missing, "verified pieces were kept, rerun to resume");
            Err(DomainError::IncompletePieceSet(missing).into())
        }
        Err(e) => Err(e.into()),
    }
}
