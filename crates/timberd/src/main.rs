//! timberd - the timber logging daemon.
//!
//! Producers write datagrams to the ingest socket, readers subscribe on
//! the reader socket, and administrative clients drive the control
//! socket. The store is volatile; the daemon is meant to be restarted
//! by the platform supervisor on failure.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use timber_store::LogStore;
use timber_tags::TagRegistry;
use timberd::collectors::{AuditCollector, KernelCollector};
use timberd::config::DaemonConfig;
use timberd::control::ControlEndpoint;
use timberd::egress::EgressEndpoint;
use timberd::ingest::IngestEndpoint;

#[derive(Parser)]
#[command(name = "timberd")]
#[command(about = "User-space logging daemon")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the daemon
    Run {
        /// Path to config file; defaults apply without one
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Ask a running daemon to rotate and reload its tag dictionary
    Reinit {
        /// Socket directory of the running daemon
        #[arg(long, default_value = "/run/timber")]
        socket_dir: PathBuf,
    },

    /// Write a config file populated with the defaults
    InitConfig {
        /// Path to write
        #[arg(short, long, default_value = "/etc/timber/timberd.json")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run { config } => {
            let config = match config {
                Some(path) => DaemonConfig::load(&path)?,
                None => DaemonConfig::default(),
            };
            run_daemon(config).await
        }
        Commands::Reinit { socket_dir } => {
            let reply = issue_reinit(&socket_dir.join("control.sock")).await?;
            if reply == "success" {
                Ok(())
            } else {
                anyhow::bail!("reinit failed: {reply}")
            }
        }
        Commands::InitConfig { output } => {
            if let Some(parent) = output.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(
                &output,
                serde_json::to_string_pretty(&DaemonConfig::default())?,
            )?;
            info!(path = %output.display(), "wrote default config");
            Ok(())
        }
    }
}

async fn run_daemon(config: DaemonConfig) -> anyhow::Result<()> {
    std::fs::create_dir_all(&config.socket_dir)?;

    let store = Arc::new(LogStore::new(config.store_config()));
    let tags = Arc::new(TagRegistry::load(
        config.tag_files.clone(),
        config.writable_tag_file.clone(),
    )?);

    // Reader endpoint first, so nothing written at startup can wake a
    // half-initialized subscription path.
    let reader_path = config.reader_socket();
    let _ = std::fs::remove_file(&reader_path);
    let reader_listener = UnixListener::bind(&reader_path)?;
    let egress = EgressEndpoint::new(Arc::clone(&store), config.chatty);
    tokio::spawn(async move {
        if let Err(err) = egress.serve(reader_listener).await {
            error!(%err, "reader endpoint failed");
        }
    });

    let ingest = IngestEndpoint::bind(Arc::clone(&store), &config.ingest_socket(), None)?;
    let sidecar = match config.sidecar_socket_path() {
        Some(path) => Some(IngestEndpoint::bind(
            Arc::clone(&store),
            &path,
            Some(timber_proto::Partition::Kernel),
        )?),
        None => None,
    };

    let control_path = config.control_socket();
    let _ = std::fs::remove_file(&control_path);
    let control_listener = UnixListener::bind(&control_path)?;
    let control = ControlEndpoint::new(Arc::clone(&store), Arc::clone(&tags));
    tokio::spawn(async move {
        if let Err(err) = control.serve(control_listener).await {
            error!(%err, "control endpoint failed");
        }
    });

    // One follow task per configured source: existing content first,
    // then appended lines for as long as the daemon runs.
    if let Some(path) = config.kmsg_source.clone() {
        let collector = KernelCollector::new(Arc::clone(&store));
        tokio::spawn(async move {
            if let Err(err) = collector.follow_file(&path).await {
                warn!(%err, path = %path.display(), "kernel ring source failed");
            }
        });
    }
    if let Some(path) = config.audit_source.clone() {
        let collector = AuditCollector::new(
            Arc::clone(&store),
            config.audit_to_main,
            config.audit_to_events,
        );
        tokio::spawn(async move {
            if let Err(err) = collector.follow_file(&path).await {
                warn!(%err, path = %path.display(), "audit source failed");
            }
        });
    }

    info!(socket_dir = %config.socket_dir.display(), "timberd ready");
    shutdown_signal().await;

    info!("shutting down");
    store.cancel_all_subscriptions();
    ingest.shutdown();
    if let Some(sidecar) = sidecar {
        sidecar.shutdown();
    }
    Ok(())
}

async fn shutdown_signal() {
    let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
    {
        Ok(signal) => signal,
        Err(err) => {
            error!(%err, "cannot install SIGTERM handler");
            return;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

/// Connects to a running daemon's control socket and issues `reinit`.
async fn issue_reinit(control_socket: &std::path::Path) -> anyhow::Result<String> {
    let stream = UnixStream::connect(control_socket).await?;
    let (read_half, mut write_half) = stream.into_split();
    write_half.write_all(b"reinit\n").await?;

    let mut reply = String::new();
    BufReader::new(read_half).read_line(&mut reply).await?;
    Ok(reply.trim_end().to_string())
}
