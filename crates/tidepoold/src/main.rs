//! tidepoold: the tidepool daemon.
//!
//! Runs the autoscaling control plane for one cluster:
//! - Resource tracker fed by a topology feed
//! - Policy and activity state (in memory or redb)
//! - Autoscaler + scaling orchestrator
//! - Activity garbage collection
//!
//! # Usage
//!
//! ```text
//! tidepoold server --config /etc/tidepool/tidepoold.toml --feed -
//! ```

use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use tidepoold::config::ServerArgs;
use tidepoold::feed::FeedSource;
use tidepoold::ControlPlane;

const DEFAULT_LOG_FILTER: &str = "info,tidepool=debug,tidepoold=debug";

#[derive(Parser)]
#[command(name = "tidepoold", about = "tidepool autoscaling daemon")]
struct Cli {
    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the control plane until interrupted.
    Server(ServerArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match cli.command {
        Command::Server(args) => run_server(args).await,
    }
}

fn init_tracing(json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn run_server(args: ServerArgs) -> anyhow::Result<()> {
    let config = args.load()?;
    info!(
        autoscaler = config.autoscaler.enabled,
        interval_secs = config.autoscaler.interval_secs,
        threads = config.autoscaler.threads,
        "tidepool daemon starting"
    );

    // No AutoScaling client ships with the daemon.
    let mut control_plane = ControlPlane::start(&config, None)?;

    if let Some(feed) = &config.feed {
        control_plane.spawn_feed(FeedSource::parse(feed));
    }

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");

    control_plane.shutdown().await;
    info!("tidepool daemon stopped");
    Ok(())
}
