// arcollab: command-line front end for the ar-collab session core
//
// Runs local demo sessions over the in-process medium and manages the
// session configuration file.

mod config;

use anyhow::{Context, Result};
use arcollab_core::{
    LocalIdentity, LocalMedium, SessionConfig, SessionCoordinator, SessionHandlers,
};
use clap::{Parser, Subcommand};
use colored::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "arcollab")]
#[command(about = "ar-collab: local peer-to-peer collaboration sessions", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run several peers in one process and exchange payloads between them
    Demo {
        /// Number of peers (overrides demo.peers)
        #[arg(short, long)]
        peers: Option<usize>,
        /// Discovery namespace (overrides namespace)
        #[arg(short, long)]
        namespace: Option<String>,
        /// Encryption preference: required, optional or disabled
        #[arg(short, long)]
        encryption: Option<String>,
        /// Send best-effort instead of reliable
        #[arg(long)]
        best_effort: bool,
    },
    /// Generate a throwaway session identity and print it
    Identity,
    /// Configure settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    Set { key: String, value: String },
    Get { key: String },
    List,
    /// Print the config file location
    Path,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Demo {
            peers,
            namespace,
            encryption,
            best_effort,
        } => cmd_demo(peers, namespace, encryption, best_effort).await,
        Commands::Identity => cmd_identity(),
        Commands::Config { action } => cmd_config(action),
    }
}

fn demo_handlers(name: String, received: Arc<AtomicUsize>) -> SessionHandlers {
    let (joined_name, left_name) = (name.clone(), name.clone());
    SessionHandlers::new(
        move |payload, from| {
            received.fetch_add(1, Ordering::SeqCst);
            println!(
                "  {} {} ← {}: {}",
                "✉".cyan(),
                name.bold(),
                from.display_name(),
                String::from_utf8_lossy(&payload.data)
            );
        },
        move |peer| println!("  {} {} joined {}", "+".green(), peer, joined_name),
        move |peer| println!("  {} {} left {}", "-".yellow(), peer, left_name),
        |_| true,
    )
    .with_send_failed(|peer, e| println!("  {} send to {} failed: {}", "✗".red(), peer, e))
}

async fn cmd_demo(
    peers: Option<usize>,
    namespace: Option<String>,
    encryption: Option<String>,
    best_effort: bool,
) -> Result<()> {
    let config = config::Config::load()?;

    let peers = peers.unwrap_or(config.demo.peers);
    anyhow::ensure!(peers >= 2, "A demo needs at least two peers");

    let mut session: SessionConfig = config.session.clone();
    if let Some(namespace) = namespace {
        session = session.with_namespace(namespace);
    }
    if let Some(encryption) = encryption {
        session = session.with_encryption(config::parse_encryption(&encryption)?);
    }
    session.validate()?;

    println!(
        "{} {} peers under {:?}",
        "Starting".bold(),
        peers,
        session.namespace
    );

    let medium = LocalMedium::new();
    let received = Arc::new(AtomicUsize::new(0));
    let mut coordinators = Vec::with_capacity(peers);
    for i in 1..=peers {
        let name = format!("peer-{}", i);
        let config = SessionConfig {
            display_name: name.clone(),
            ..session.clone()
        };
        let coordinator = SessionCoordinator::new(
            config,
            Arc::new(medium.link()),
            demo_handlers(name.clone(), received.clone()),
        )
        .with_context(|| format!("Failed to start {}", name))?;
        coordinators.push(coordinator);
    }

    let meshed = tokio::time::timeout(session.invitation_timeout(), async {
        while !coordinators
            .iter()
            .all(|c| c.connected_peers().len() == peers - 1)
        {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .is_ok();

    if meshed {
        println!("  {} Every peer joined every other peer", "✓".green());
    } else {
        println!(
            "  {} Session incomplete after {}s",
            "⚠".yellow(),
            session.invitation_timeout_secs
        );
    }

    println!();
    println!("{}", "Exchanging payloads".bold());
    for coordinator in &coordinators {
        let text = format!("hello from {}", coordinator.local_peer().display_name());
        coordinator.send_to_all_connected_peers(text.as_bytes(), !best_effort);
    }
    tokio::time::sleep(Duration::from_millis(config.demo.settle_ms)).await;

    let expected = peers * (peers - 1);
    let got = received.load(Ordering::SeqCst);
    tracing::info!("Demo delivered {}/{} payloads", got, expected);
    println!();
    if got == expected {
        println!("  {} {}/{} payloads delivered", "✓".green(), got, expected);
    } else {
        println!("  {} {}/{} payloads delivered", "⚠".yellow(), got, expected);
    }

    println!();
    println!("{}", "Shutting down".bold());
    for coordinator in coordinators {
        coordinator.shutdown().await?;
    }
    Ok(())
}

fn cmd_identity() -> Result<()> {
    let config = config::Config::load()?;
    let identity = LocalIdentity::generate(config.session.display_name);

    println!("{}", "Session identity".bold());
    println!("  Name:        {}", identity.peer().display_name());
    println!("  Peer ID:     {}", identity.peer().id());
    println!("  Channel key: {}", identity.keys().public_key_hex());
    println!();
    println!(
        "  {}",
        "Identities live for one session and are never stored.".dimmed()
    );
    Ok(())
}

fn cmd_config(action: ConfigAction) -> Result<()> {
    let mut config = config::Config::load()?;

    match action {
        ConfigAction::Set { key, value } => {
            config.set(&key, &value)?;
            config.save()?;
            println!("{} {} = {}", "✓".green(), key, value);
        }
        ConfigAction::Get { key } => match config.get(&key) {
            Some(value) => println!("{}", value),
            None => anyhow::bail!("Unknown config key: {}", key),
        },
        ConfigAction::List => {
            println!("{}", "Configuration".bold());
            for (key, value) in config.list() {
                println!("  {:<26} {}", key, value);
            }
        }
        ConfigAction::Path => {
            println!("{}", config::Config::config_file()?.display());
        }
    }
    Ok(())
}
