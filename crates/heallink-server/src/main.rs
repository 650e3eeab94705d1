use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{bail, Result};
use clap::{Args, Parser, Subcommand};
use heallink_core::LifecycleConfig;
use heallink_db::{Database, DbConfig, SqliteDatabase};
use heallink_store::HostConfig;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use heallink_server::auth::{self, LOCAL_ACCOUNT};
use heallink_server::sweep::{self, OrphanSweeper};

#[derive(Parser)]
#[command(name = "heallink-server")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    #[command(flatten)]
    serve: ServeArgs,
}

#[derive(Args)]
struct ServeArgs {
    /// Address to bind
    #[arg(long, env = "HEALLINK_BIND", default_value = "0.0.0.0")]
    bind: String,

    #[arg(long, env = "HEALLINK_PORT", default_value_t = 3720)]
    port: u16,

    /// Browser origin allowed by CORS
    #[arg(long, env = "HEALLINK_FRONTEND_URL")]
    frontend_url: Option<String>,

    /// Cron expression (with seconds) for the orphan sweep, in local time
    #[arg(long, env = "HEALLINK_SWEEP_SCHEDULE", default_value = sweep::DEFAULT_SCHEDULE)]
    sweep_schedule: String,

    /// Do not schedule the orphan sweep in this process
    #[arg(long)]
    no_sweep: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a new API key
    Keygen {
        /// Account the key acts as
        #[arg(long, default_value = LOCAL_ACCOUNT)]
        account: String,
        /// Human-readable name for the key
        #[arg(long, default_value = "")]
        name: String,
    },
    /// List all API keys (metadata only, no secrets)
    ListKeys,
    /// Revoke (delete) an API key by ID
    RevokeKey {
        /// The API key ID to revoke
        id: String,
    },
    /// Run one orphan sweep pass and print the report
    Sweep,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let db: Arc<dyn Database> = Arc::new(SqliteDatabase::open(&DbConfig::from_env())?);

    match cli.command {
        Some(Commands::Keygen { account, name }) => {
            let raw_key = auth::generate_api_key();
            let hash = auth::sha256_hex(&raw_key);
            let api_key = db.insert_api_key(&account, &name, &hash).await?;
            eprintln!("Created API key (id: {}) for account {account}", api_key.id);
            if !name.is_empty() {
                eprintln!("  name: {name}");
            }
            // Print the raw key to stdout so it can be captured
            println!("{raw_key}");
            eprintln!("\nSave this key. It cannot be retrieved again.");
        }
        Some(Commands::ListKeys) => {
            let keys = db.list_api_keys().await?;
            if keys.is_empty() {
                eprintln!("No API keys found.");
            } else {
                println!(
                    "{:<38} {:<16} {:<20} {:<28} LAST USED",
                    "ID", "ACCOUNT", "NAME", "CREATED"
                );
                for key in keys {
                    println!(
                        "{:<38} {:<16} {:<20} {:<28} {}",
                        key.id,
                        key.account_id,
                        if key.name.is_empty() { "-" } else { &key.name },
                        key.created_at,
                        key.last_used_at.as_deref().unwrap_or("never"),
                    );
                }
            }
        }
        Some(Commands::RevokeKey { id }) => {
            db.delete_api_key(&id).await?;
            eprintln!("Revoked API key {id}");
        }
        Some(Commands::Sweep) => {
            let config = LifecycleConfig::from_env();
            let host = heallink_store::create_host(&HostConfig::from_env(), &config.folder)?;
            let sweeper = OrphanSweeper::new(db, host, &config.folder, config.grace_period());
            let report = sweeper.run().await;
            println!("{}", serde_json::to_string_pretty(&report)?);
            if !report.success {
                bail!(
                    "sweep failed: {}",
                    report.error.as_deref().unwrap_or("unknown error")
                );
            }
        }
        None => serve(db, cli.serve).await?,
    }

    Ok(())
}

async fn serve(db: Arc<dyn Database>, args: ServeArgs) -> Result<()> {
    let addr = SocketAddr::new(args.bind.parse()?, args.port);
    let config = LifecycleConfig::from_env();
    let host_config = HostConfig::from_env();
    let host = heallink_store::create_host(&host_config, &config.folder)?;
    if !host_config.is_cloudinary() {
        info!("asset host: local directory");
    }

    let auth = auth::build_auth_config(db.clone()).await;
    if auth.is_some() {
        info!("authentication enabled");
    } else {
        warn!("authentication disabled (no HEALLINK_API_KEY or DB keys)");
    }

    let state = heallink_server::build_state(db, host, &config, auth);

    if args.no_sweep {
        info!("orphan sweep not scheduled in this process");
    } else {
        let schedule = sweep::parse_schedule(&args.sweep_schedule)?;
        tokio::spawn(sweep::run_scheduled(state.sweeper.clone(), schedule));
    }

    let listener = TcpListener::bind(addr).await?;
    info!("heallink-server listening on http://{addr}");

    heallink_server::serve(listener, state, args.frontend_url.as_deref()).await
}
