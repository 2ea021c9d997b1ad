mod config;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use events::{NatsOptions, NatsTransport};
use peer::{AdmissionPolicy, SessionPeer};
use peer_core::{SessionId, SessionSubjects, Topic};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{default_config_path, FileConfig, Overrides};

#[derive(Parser)]
#[command(name = "plan-peer")]
#[command(about = "Simulated plan-execution peer", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (defaults to <config dir>/plan-peer/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to the broker and serve one session until interrupted
    Run {
        #[arg(long, env = "NATS_URL")]
        nats_url: Option<String>,

        #[arg(long, env = "PLAN_SESSION_ID")]
        session_id: Option<String>,

        /// Milliseconds each phase stays running
        #[arg(long)]
        pacing_ms: Option<u64>,

        /// What to do with a start that arrives mid-run: queue or reject
        #[arg(long)]
        admission: Option<AdmissionPolicy>,
    },
    /// Print the subjects derived from a session id
    Subjects { session_id: String },
    /// Write a default config file
    Init {
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            nats_url,
            session_id,
            pacing_ms,
            admission,
        } => {
            let overrides = Overrides {
                nats_url,
                session_id,
                pacing_ms,
                admission,
            };
            run(cli.config, overrides).await
        }
        Commands::Subjects { session_id } => print_subjects(&session_id),
        Commands::Init { force } => init_config(cli.config, force),
    }
}

async fn run(config_path: Option<PathBuf>, overrides: Overrides) -> Result<()> {
    init_tracing();

    let settings = FileConfig::discover(config_path.as_deref())?.resolve(overrides)?;
    let session_id = settings.peer.session_id.clone();

    tracing::info!("Connecting to NATS at {}", settings.nats_url);
    let transport = NatsTransport::connect(&settings.nats_url, NatsOptions::default())
        .await
        .with_context(|| format!("Failed to connect to {}", settings.nats_url))?;

    let handle = SessionPeer::new(settings.peer, Arc::new(transport))
        .start()
        .await
        .context("Failed to start session peer")?;

    println!();
    println!("{} {}", "Plan peer".bold(), session_id.as_str().cyan());
    println!("════════════════════════════════════════");
    for (topic, subject) in handle.subjects().iter() {
        println!("  {:<8} {}", topic.as_str(), subject);
    }
    println!();
    println!("Press Ctrl+C to stop");
    println!();

    shutdown_signal().await;
    handle.shutdown().await.context("Shutdown failed")?;
    Ok(())
}

fn print_subjects(session_id: &str) -> Result<()> {
    let session_id = SessionId::new(session_id).context("Invalid session id")?;
    if session_id.has_delimiter_collision() {
        eprintln!(
            "{} session id contains subject delimiters, wildcards or whitespace; subjects will not isolate this session",
            "warning:".yellow().bold()
        );
    }

    let subjects = SessionSubjects::new(session_id);
    for topic in Topic::ALL {
        println!("{}", subjects.get(topic));
    }
    Ok(())
}

fn init_config(config_path: Option<PathBuf>, force: bool) -> Result<()> {
    let path = match config_path {
        Some(path) => path,
        None => default_config_path().context("No config directory on this platform")?,
    };

    if path.exists() && !force {
        println!("Config already exists at {}", path.display());
        println!("Use --force to overwrite it.");
        return Ok(());
    }

    FileConfig::default().write(&path)?;
    println!("{} {}", "Wrote".green(), path.display());
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("Shutdown signal received");
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "plan_peer=info,peer=info,events=info".into()),
        )
        .init();
}
