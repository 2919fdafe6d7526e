//! Lorastack CUPS server
//!
//! Configuration and Update Server for LoRa Basic Station gateways.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{info, warn};

use lorastack_core::tracing_init::{LogFormat, init_tracing};
use lorastack_registry::{AccessRegistry, EntityIdentifiers, EventBus, GatewayRegistry, Right};
use lorastack_store::{Database, SqliteStore, TypedStoreAdapter};

use lorastack_cups::firmware::{DirectoryUpdateResolver, Ed25519Signer, UpdateSigner};
use lorastack_cups::http::{AppState, router};
use lorastack_cups::trust::{TlsTrustResolver, TrustPool, read_pem_certificates};
use lorastack_cups::{CupsServer, LocalGatewayService, ServerConfig};

#[derive(Parser, Debug)]
#[command(name = "lorastack-cups")]
#[command(version, about = "Lorastack CUPS server - configuration and updates for LoRa Basic Station")]
struct Args {
    /// Address to listen on.
    #[arg(long, default_value = "0.0.0.0:8443", env = "LORASTACK_CUPS_LISTEN")]
    addr: SocketAddr,

    /// Path to SQLite database file.
    #[arg(long, env = "LORASTACK_DB_PATH")]
    db_path: Option<PathBuf>,

    /// Path to JSON config file.
    #[arg(long, env = "LORASTACK_CUPS_CONFIG")]
    config: Option<PathBuf>,

    /// Root CA certificates (PEM) trusted when dialing servers.
    #[arg(long)]
    root_ca: Option<PathBuf>,

    /// Certificate (PEM) sent to stations when no server address is known.
    #[arg(long)]
    trust: Option<PathBuf>,

    /// Do not trust the system root certificates.
    #[arg(long)]
    no_system_roots: bool,

    /// Directory with firmware updates.
    #[arg(long)]
    firmware_dir: Option<PathBuf>,

    /// Ed25519 key files to sign firmware updates with.
    #[arg(long = "signing-key")]
    signing_keys: Vec<PathBuf>,

    /// Output logs as JSON (for structured log aggregation).
    #[arg(long)]
    log_json: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Issue an API key for a user or organization and print its token.
    CreateApiKey {
        /// `user` or `organization`.
        #[arg(long, default_value = "user")]
        owner_type: String,

        #[arg(long)]
        owner_id: String,

        #[arg(long, default_value = "cups")]
        name: String,

        /// Rights of the key, e.g. `GATEWAY_ALL`.
        #[arg(long = "right", value_parser = parse_right, default_values = ["GATEWAY_ALL"])]
        rights: Vec<Right>,
    },
    /// Write the error message bundle to a file.
    Messages {
        /// Output file.
        path: PathBuf,

        /// Translations to merge before writing.
        #[arg(long)]
        merge: Option<PathBuf>,
    },
}

fn parse_right(s: &str) -> Result<Right, String> {
    serde_json::from_value(serde_json::Value::String(s.to_ascii_uppercase()))
        .map_err(|_| format!("unknown right: {s}"))
}

fn default_db_path() -> anyhow::Result<PathBuf> {
    let data_dir =
        dirs::data_dir().ok_or_else(|| anyhow::anyhow!("Cannot determine data directory"))?;
    Ok(data_dir.join("lorastack").join("cups.db"))
}

struct Registries {
    gateways: Arc<GatewayRegistry>,
    access: Arc<AccessRegistry>,
}

async fn open_registries(path: &Path) -> anyhow::Result<Registries> {
    info!(path = %path.display(), "Opening registry database");
    let db = Database::open(path).await?;
    let store = |collection: &str| Arc::new(TypedStoreAdapter::new(SqliteStore::new(db.clone(), collection)));
    Ok(Registries {
        gateways: Arc::new(GatewayRegistry::new(store("gateways"), EventBus::new())),
        access: Arc::new(AccessRegistry::new(store("api_keys"), store("memberships"))),
    })
}

/// Apply command line arguments over the loaded configuration.
fn apply_args(config: &mut ServerConfig, args: &Args) {
    if let Some(root_ca) = &args.root_ca {
        config.tls.root_ca = Some(root_ca.clone());
    }
    if let Some(trust) = &args.trust {
        config.tls.trust = Some(trust.clone());
    }
    if args.no_system_roots {
        config.tls.system_roots = false;
    }
    if let Some(dir) = &args.firmware_dir {
        config.firmware.directory = Some(dir.clone());
    }
    config.firmware.signing_keys.extend(args.signing_keys.iter().cloned());
}

fn trust_resolver(config: &ServerConfig) -> anyhow::Result<TlsTrustResolver> {
    let mut pool = if config.tls.system_roots {
        TrustPool::native()
    } else {
        TrustPool::new()
    };
    if let Some(path) = &config.tls.root_ca {
        let added = pool.add_pem_file(path)?;
        info!(path = %path.display(), added, "Loaded root CAs");
    }
    if pool.is_empty() {
        warn!("No root CAs, trust resolution will fail for every server");
    }
    let static_trust = match &config.tls.trust {
        Some(path) => read_pem_certificates(path)?.into_iter().next(),
        None => None,
    };
    Ok(TlsTrustResolver::new(
        &pool,
        static_trust,
        config.timeouts.dial(),
    )?)
}

#[allow(clippy::print_stdout)]
async fn run_command(command: Command, registries: Option<Registries>) -> anyhow::Result<()> {
    match command {
        Command::CreateApiKey {
            owner_type,
            owner_id,
            name,
            rights,
        } => {
            let registries =
                registries.ok_or_else(|| anyhow::anyhow!("Registry database not opened"))?;
            let owner = match owner_type.as_str() {
                "user" => EntityIdentifiers::user(owner_id),
                "organization" => EntityIdentifiers::organization(owner_id),
                other => anyhow::bail!("Unknown owner type: {other}"),
            };
            let (key, token) = registries.access.create_api_key(&owner, &name, &rights).await?;
            info!(owner = %owner, key_id = %key.id, "API key created");
            println!("{token}");
        }
        Command::Messages { path, merge } => {
            if let Some(merge) = merge {
                lorastack_core::i18n::merge_file(&merge)?;
            }
            let bundle = lorastack_core::i18n::snapshot();
            bundle.write_file(&path)?;
            info!(path = %path.display(), messages = bundle.len(), "Message bundle written");
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut args = Args::parse();

    let format = if args.log_json {
        LogFormat::Json
    } else {
        LogFormat::Text
    };
    init_tracing("lorastack_cups=info", format);
    lorastack_cups::init();

    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        warn!("Crypto provider already installed");
    }

    let db_path = match &args.db_path {
        Some(path) => path.clone(),
        None => default_db_path()?,
    };

    if let Some(command) = args.command.take() {
        let registries = if matches!(command, Command::CreateApiKey { .. }) {
            Some(open_registries(&db_path).await?)
        } else {
            None
        };
        return run_command(command, registries).await;
    }

    let mut config = ServerConfig::load(args.config.as_deref())?;
    apply_args(&mut config, &args);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        addr = %args.addr,
        require_explicit_enable = config.require_explicit_enable,
        register_unknown = config.register_unknown.owner().is_some(),
        "Starting lorastack-cups"
    );

    let registries = open_registries(&db_path).await?;
    let service = Arc::new(LocalGatewayService::new(
        Arc::clone(&registries.gateways),
        Arc::clone(&registries.access),
    ));
    let trust = Arc::new(trust_resolver(&config)?);

    let mut server = CupsServer::new(config.clone(), service.clone(), service, trust);
    if let Some(dir) = &config.firmware.directory {
        info!(path = %dir.display(), "Serving firmware updates");
        server = server.with_update_resolver(Arc::new(DirectoryUpdateResolver::new(dir)));
    }
    for path in &config.firmware.signing_keys {
        let signer = Ed25519Signer::from_file(path)?;
        info!(path = %path.display(), key_crc = signer.key_crc(), "Loaded signing key");
        server = server.with_signer(Arc::new(signer));
    }

    let app = router(AppState {
        server: Arc::new(server),
    });
    let listener = tokio::net::TcpListener::bind(args.addr).await?;
    info!(addr = %args.addr, "CUPS server listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        return;
    }
    info!("Shutdown signal received");
}
