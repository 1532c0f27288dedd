//! Lab Relay Service
//!
//! Discovers power relay and cable flysim controllers on the host's serial
//! ports and exposes them over HTTP. Every serial transaction goes through
//! one dispatcher queue, so only one port is ever open at a time.

mod routes;
mod settings;

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use relay_dispatch::Dispatcher;
use settings::Settings;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use warp::Filter;

#[derive(Parser)]
#[command(name = "labrelay")]
#[command(about = "Serial relay controller service for lab automation", version)]
struct Cli {
    /// Settings file (defaults to $XDG_CONFIG_HOME/labrelay/settings.json)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Bind address
    #[arg(short, long)]
    bind: Option<String>,

    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Use the simulated devices from the settings file instead of hardware
    #[arg(long)]
    simulate: bool,

    /// Command response window in milliseconds
    #[arg(long)]
    response_timeout_ms: Option<u64>,

    /// Greeting probe window in milliseconds
    #[arg(long)]
    probe_timeout_ms: Option<u64>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Scan for devices and serve the HTTP API (default)
    Serve,
    /// Scan for devices, print the registry and exit
    Scan,
    /// Write a settings file with default values
    Config {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

impl Cli {
    fn settings_path(&self) -> Option<PathBuf> {
        self.config.clone().or_else(Settings::default_path)
    }

    /// Load settings and apply command line overrides
    fn settings(&self) -> Result<Settings> {
        let mut settings = match &self.config {
            Some(path) => Settings::load_from(path)?,
            None => Settings::load(),
        };

        if let Some(bind) = &self.bind {
            settings.bind_address = bind.clone();
        }
        if let Some(port) = self.port {
            settings.port = port;
        }
        if self.simulate {
            settings.simulate = true;
        }
        if let Some(ms) = self.response_timeout_ms {
            settings.response_timeout_ms = ms;
        }
        if let Some(ms) = self.probe_timeout_ms {
            settings.probe_timeout_ms = ms;
        }

        Ok(settings)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "labrelay=info,relay_protocol=info,relay_detect=info,relay_dispatch=info,relay_sim=info"
                    .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match &cli.command {
        Some(Command::Serve) | None => serve(cli.settings()?).await,
        Some(Command::Scan) => scan_only(cli.settings()?).await,
        Some(Command::Config { force }) => {
            let path = cli
                .settings_path()
                .context("Could not determine settings path")?;
            write_default_config(&path, *force)
        }
    }
}

/// Run the HTTP service until Ctrl+C
async fn serve(settings: Settings) -> Result<()> {
    let addr: SocketAddr = format!("{}:{}", settings.bind_address, settings.port)
        .parse()
        .context("Invalid bind address")?;

    info!(
        "Starting labrelay ({})",
        if settings.simulate { "simulated devices" } else { "serial hardware" }
    );
    let (dispatcher, actor) = Dispatcher::spawn(settings.backend()?, settings.dispatch_config());

    // Queued ahead of any request, so early commands wait for the registry
    if settings.scan_on_startup {
        dispatcher.scan_detached().await?;
    }

    let routes = routes::create_routes(dispatcher.clone())
        .with(warp::cors().allow_any_origin().allow_methods(vec!["GET", "POST"]))
        .with(warp::trace::request());

    let (bound, server) = warp::serve(routes)
        .try_bind_with_graceful_shutdown(addr, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for Ctrl+C: {}", e);
                std::future::pending::<()>().await;
            }
            info!("Received shutdown signal");
        })
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!("Listening on http://{}", bound);
    info!("  GET  /api/power/{{relayId}}/{{cmd}}");
    info!("  GET  /api/cableflysim/{{cmd}}");
    info!("  GET  /api/power");
    info!("  GET  /api/devices");
    info!("  POST /api/devices/scan");

    server.await;

    dispatcher.shutdown().await;
    actor.await.context("Dispatcher task failed")?;
    Ok(())
}

/// Discover devices, print them and exit
async fn scan_only(settings: Settings) -> Result<()> {
    let mut config = settings.dispatch_config();
    config.clock_sync = false;

    let (dispatcher, actor) = Dispatcher::spawn(settings.backend()?, config);
    let report = dispatcher.scan().await?;

    println!(
        "Tried {} port(s), recognized {} device(s)",
        report.tried, report.recognized
    );
    for (id, port) in dispatcher.registry().snapshot().await {
        println!("  {:<20} {}", id.to_string(), port);
    }

    dispatcher.shutdown().await;
    actor.await.context("Dispatcher task failed")?;
    Ok(())
}

/// Write default settings to `path`
fn write_default_config(path: &std::path::Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!(
            "{} already exists (use --force to overwrite)",
            path.display()
        );
    }

    Settings::default().save_to(path)?;
    println!("Wrote default settings to {}", path.display());
    Ok(())
}
