//! Relato - Offline-first citizen incident reporting node

use anyhow::Result;
use chrono::Utc;
use clap::{Parser, Subcommand};
use relato_core::envelope;
use relato_core::{
    FixedPassphraseProvider, IncidentDraft, Origin, PassphraseCache, PeerAddress, PeerComms,
    PeerEvent, SyncState,
};
use relato_node::{Config, FsMediaStore, IncidentStore, NoRemoteService, SyncCoordinator};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "relato")]
#[command(about = "Offline-first citizen incident reporting", long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "~/.relato/config.toml")]
    config: String,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Data directory (overrides config)
    #[arg(short, long)]
    data_dir: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize configuration and data directories
    Init,

    /// Capture a new incident report
    Report {
        /// What happened
        #[arg(required = true)]
        description: String,

        /// Latitude of the incident
        #[arg(long, allow_hyphen_values = true)]
        lat: f64,

        /// Longitude of the incident
        #[arg(long, allow_hyphen_values = true)]
        lon: f64,

        /// Human-readable place name
        #[arg(short, long)]
        place: Option<String>,

        /// Mark the incident as urgent
        #[arg(short, long)]
        urgent: bool,

        /// Path to an attached photo
        #[arg(long)]
        photo: Option<String>,

        /// Path to an attached video (referenced, never sent inline)
        #[arg(long)]
        video: Option<String>,
    },

    /// List stored incidents
    List {
        /// Only urgent incidents
        #[arg(short, long)]
        urgent: bool,

        /// Only incidents awaiting sync
        #[arg(short, long)]
        pending: bool,
    },

    /// Send one incident to a nearby peer
    Share {
        /// Local incident id
        #[arg(required = true)]
        id: i64,

        /// Peer address (host or host:port)
        #[arg(required = true)]
        peer: String,

        /// Encrypt the envelope with this passphrase
        #[arg(short = 'P', long)]
        passphrase: Option<String>,
    },

    /// Listen for incidents from nearby peers
    Serve {
        /// Listening port (overrides config)
        #[arg(short, long)]
        port: Option<u16>,

        /// Passphrase for decrypting received envelopes
        #[arg(short = 'P', long)]
        passphrase: Option<String>,
    },

    /// Run one sync pass against the remote service
    Sync,

    /// Show store and sync status
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    let config = load_config(&cli.config);
    let data_dir = cli
        .data_dir
        .as_deref()
        .map(expand_path)
        .unwrap_or_else(|| config.data_dir());

    match cli.command {
        Commands::Init => {
            init_config().await?;
        }
        Commands::Report {
            description,
            lat,
            lon,
            place,
            urgent,
            photo,
            video,
        } => {
            report_incident(&data_dir, &description, lat, lon, place, urgent, photo, video)?;
        }
        Commands::List { urgent, pending } => {
            list_incidents(&data_dir, urgent, pending)?;
        }
        Commands::Share {
            id,
            peer,
            passphrase,
        } => {
            let passphrase = passphrase.or_else(|| config.peer.passphrase.clone());
            share_incident(&data_dir, &config, id, &peer, passphrase.as_deref()).await?;
        }
        Commands::Serve { port, passphrase } => {
            let port = port.unwrap_or(config.peer.port);
            let passphrase = passphrase.or_else(|| config.peer.passphrase.clone());
            serve(&data_dir, &config, port, passphrase.as_deref()).await?;
        }
        Commands::Sync => {
            run_sync(&data_dir).await?;
        }
        Commands::Status => {
            show_status(&data_dir, &config)?;
        }
    }

    Ok(())
}

fn load_config(path: &str) -> Config {
    let path = expand_path(path);
    match Config::load(&path) {
        Ok(config) => config,
        Err(_) => Config::default(),
    }
}

fn expand_path(path: &str) -> PathBuf {
    if path.starts_with("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(&path[2..]);
        }
    }
    PathBuf::from(path)
}

fn open_store(data_dir: &std::path::Path) -> Result<IncidentStore> {
    std::fs::create_dir_all(data_dir)?;
    Ok(IncidentStore::open(&data_dir.join("incidents.db"))?)
}

fn open_media(data_dir: &std::path::Path) -> Result<FsMediaStore> {
    Ok(FsMediaStore::open(&data_dir.join("media"))?)
}

#[allow(clippy::too_many_arguments)]
fn report_incident(
    data_dir: &std::path::Path,
    description: &str,
    lat: f64,
    lon: f64,
    place: Option<String>,
    urgent: bool,
    photo: Option<String>,
    video: Option<String>,
) -> Result<()> {
    let store = open_store(data_dir)?;

    let draft = IncidentDraft {
        description: description.to_string(),
        symbolic_location: place,
        latitude: lat,
        longitude: lon,
        timestamp: Utc::now(),
        urgent,
        photo_ref: photo,
        video_ref: video,
    };

    let incident = store.create(&draft, Origin::AuthoredLocal)?;

    println!("Recorded incident #{}", incident.id);
    if incident.urgent {
        println!("Marked URGENT");
    }
    println!("Pending sync with the remote service");

    Ok(())
}

fn list_incidents(data_dir: &std::path::Path, urgent: bool, pending: bool) -> Result<()> {
    let store = open_store(data_dir)?;

    let incidents = if urgent {
        store.list_urgent()?
    } else if pending {
        store.list_pending_sync()?
    } else {
        store.list_all()?
    };

    if incidents.is_empty() {
        println!("No incidents stored");
        return Ok(());
    }

    for incident in &incidents {
        let urgency = if incident.urgent { " URGENT" } else { "" };
        let state = match incident.sync_state {
            SyncState::PendingSync => "pending",
            SyncState::Synced => "synced",
            SyncState::NeverSync => "peer-received",
        };
        println!(
            "#{}{} [{}] {} ({:.5}, {:.5})",
            incident.id, urgency, state, incident.description, incident.latitude,
            incident.longitude
        );
        if let Some(place) = &incident.symbolic_location {
            println!("   at {}", place);
        }
        println!(
            "   reported {} | shared {} time(s)",
            incident.timestamp.format("%Y-%m-%d %H:%M:%S"),
            incident.share_count
        );
    }
    println!();
    println!("{} incident(s)", incidents.len());

    Ok(())
}

async fn share_incident(
    data_dir: &std::path::Path,
    config: &Config,
    id: i64,
    peer: &str,
    passphrase: Option<&str>,
) -> Result<()> {
    let store = open_store(data_dir)?;
    let media = open_media(data_dir)?;

    let incident = store
        .get(id)?
        .ok_or_else(|| anyhow::anyhow!("No incident with id {}", id))?;

    let message = envelope::encode(&incident, passphrase, &media)?;

    let addr = PeerAddress::new(peer);
    let mut comms = PeerComms::new(config.peer.port);
    comms.set_send_timeout(Duration::from_secs(config.peer.send_timeout_secs));
    comms.connect(&addr).await?;
    comms.send(&message).await?;
    comms.disconnect();

    // The counter only moves on a transport-confirmed send.
    let count = store.increment_share_count(id)?;

    println!("Shared incident #{} with {}", id, addr);
    println!("Share count: {}", count);
    if passphrase.is_some() {
        println!("Envelope was encrypted");
    } else {
        println!("Envelope was sent in plaintext");
    }

    Ok(())
}

async fn serve(
    data_dir: &std::path::Path,
    config: &Config,
    port: u16,
    passphrase: Option<&str>,
) -> Result<()> {
    let store = Arc::new(open_store(data_dir)?);
    let media = open_media(data_dir)?;

    // Non-interactive node: the configured passphrase answers every prompt.
    // Without one, encrypted envelopes are rejected as cancelled.
    let provider = match passphrase {
        Some(pass) => FixedPassphraseProvider::new(pass),
        None => FixedPassphraseProvider::refusing(),
    };
    let mut cache = PassphraseCache::new();

    let mut comms = PeerComms::new(port);
    let mut events = comms.start_server().await?;
    let addr = comms
        .server_addr()
        .ok_or_else(|| anyhow::anyhow!("Server failed to report its address"))?;

    // Background drain toward the remote service, when one is configured.
    // No HTTP client is wired up yet, so passes report the failure and
    // records stay pending.
    let (sync_shutdown, sync_rx) = tokio::sync::watch::channel(false);
    let sync_task = config.sync.remote_url.as_ref().map(|url| {
        tracing::info!(
            "sync loop: draining toward {} every {}s",
            url,
            config.sync.interval_secs
        );
        let coordinator = SyncCoordinator::new(Arc::clone(&store), NoRemoteService);
        let interval = Duration::from_secs(config.sync.interval_secs);
        tokio::spawn(async move { coordinator.run(interval, sync_rx).await })
    });

    println!("Listening for peers on {}", addr);
    println!("Press Ctrl+C to stop");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!();
                println!("Shutting down");
                break;
            }
            event = events.recv() => {
                match event {
                    Some(PeerEvent::MessageReceived(message)) => {
                        handle_peer_message(&store, &media, &mut cache, &provider, &message).await;
                    }
                    Some(PeerEvent::Stopped) | None => {
                        tracing::warn!("peer server stopped unexpectedly");
                        break;
                    }
                }
            }
        }
    }

    let _ = sync_shutdown.send(true);
    if let Some(task) = sync_task {
        let _ = task.await;
    }
    comms.cleanup().await;
    Ok(())
}

async fn handle_peer_message(
    store: &IncidentStore,
    media: &FsMediaStore,
    cache: &mut PassphraseCache,
    provider: &FixedPassphraseProvider,
    message: &str,
) {
    match envelope::decode(message, cache, provider, media).await {
        Ok(draft) => match store.create(&draft, Origin::ReceivedFromPeer) {
            Ok(incident) => {
                println!(
                    "Received incident #{}: {}{}",
                    incident.id,
                    incident.description,
                    if incident.urgent { " (URGENT)" } else { "" }
                );
            }
            Err(e) => {
                tracing::warn!("could not store received incident: {}", e);
            }
        },
        Err(e) => {
            tracing::warn!("discarding undecodable peer message: {}", e);
        }
    }
}

async fn run_sync(data_dir: &std::path::Path) -> Result<()> {
    let store = Arc::new(open_store(data_dir)?);
    let pending = store.count_pending_sync()?;

    if pending == 0 {
        println!("Nothing to sync");
        return Ok(());
    }

    println!("{} incident(s) pending sync", pending);

    // No live backend is wired up yet; the drain reports honestly and the
    // records stay pending.
    let coordinator = SyncCoordinator::new(Arc::clone(&store), NoRemoteService);
    let report = coordinator.drain_pending().await?;

    println!(
        "Attempted {}, synced {}, failed {}",
        report.attempted, report.synced, report.failed
    );
    if report.synced < report.attempted {
        println!(
            "{} incident(s) remain pending",
            store.count_pending_sync()?
        );
    }

    Ok(())
}

fn show_status(data_dir: &std::path::Path, config: &Config) -> Result<()> {
    println!("Relato v{}", env!("CARGO_PKG_VERSION"));

    let store = open_store(data_dir)?;
    let all = store.list_all()?;
    let urgent = all.iter().filter(|i| i.urgent).count();
    let from_peers = all
        .iter()
        .filter(|i| i.origin == Origin::ReceivedFromPeer)
        .count();

    println!("Data directory: {}", data_dir.display());
    println!("Peer port: {}", config.peer.port);
    println!("Sync user: {}", config.sync.user_id);
    match &config.sync.remote_url {
        Some(url) => println!("Remote service: {}", url),
        None => println!("Remote service: not configured"),
    }
    println!("Incidents stored: {}", all.len());
    println!("  urgent: {}", urgent);
    println!("  received from peers: {}", from_peers);
    println!("  pending sync: {}", store.count_pending_sync()?);

    Ok(())
}

async fn init_config() -> Result<()> {
    let config_dir = dirs::home_dir()
        .ok_or_else(|| anyhow::anyhow!("Could not determine home directory"))?
        .join(".relato");

    if !config_dir.exists() {
        std::fs::create_dir_all(&config_dir)?;
        tracing::info!("Created config directory: {}", config_dir.display());
    }

    let config_path = config_dir.join("config.toml");
    if config_path.exists() {
        println!("Config already exists at: {}", config_path.display());
        return Ok(());
    }

    let config = Config::default();
    let toml = toml::to_string_pretty(&config)?;
    std::fs::write(&config_path, toml)?;

    std::fs::create_dir_all(config_dir.join("media"))?;

    println!("Initialized Relato at: {}", config_dir.display());

    Ok(())
}
