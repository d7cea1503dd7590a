use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use switchboard::api::{serve, AppState};
use switchboard::hub::BroadcastHub;
use switchboard::retention::RetentionPolicy;
use switchboard::storage::{FailoverStorage, InMemoryStore, PostgresStore, StorageBackend};
use switchboard::{AgentStore, Config};

#[derive(Parser)]
#[command(name = "switchboard")]
#[command(about = "Agent lifecycle registry and real-time broadcast hub", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP and WebSocket server
    Serve {
        #[arg(short, long)]
        port: Option<u16>,

        /// TOML config file; environment variables still override it
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Postgres connection string; omit to run memory-only
        #[arg(long, env = "DATABASE_URL")]
        database_url: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "switchboard=debug,tower_http=debug"
    } else {
        "switchboard=info,tower_http=info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Serve {
            port,
            config,
            database_url,
        } => {
            let mut config = match config {
                Some(path) => Config::load(&path)?,
                None => Config::from_env(),
            };
            if let Some(port) = port {
                config.port = port;
            }
            if database_url.is_some() {
                config.database_url = database_url;
            }
            run_server(config).await?
        }
    }

    Ok(())
}

async fn run_server(config: Config) -> Result<()> {
    let memory = Arc::new(InMemoryStore::with_ttl(config.memory_ttl()));
    let storage = match &config.database_url {
        Some(url) => {
            let postgres = PostgresStore::connect_lazy(
                url,
                config.storage.max_connections,
                config.storage.ping_timeout(),
            )?;
            match postgres.run_migrations().await {
                Ok(()) => log::info!("Durable storage ready"),
                Err(e) => log::warn!("Could not migrate durable storage, starting degraded: {:#}", e),
            }
            let durable: Arc<dyn StorageBackend> = Arc::new(postgres);
            Arc::new(FailoverStorage::new(durable, memory, &config.storage))
        }
        None => {
            log::info!("No DATABASE_URL configured, running memory-only");
            Arc::new(FailoverStorage::memory_only(memory))
        }
    };

    let hub = Arc::new(BroadcastHub::new(&config.hub));
    let store = Arc::new(AgentStore::new(
        Arc::clone(&storage),
        Arc::clone(&hub),
        config.agents.clone(),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut tasks = vec![
        storage.spawn_health_probe(
            config.storage.health_check_interval(),
            shutdown_rx.clone(),
        ),
        hub.spawn_heartbeat(config.hub.heartbeat_interval(), shutdown_rx.clone()),
    ];
    if config.retention.window_secs > 0 {
        let retention = Arc::new(RetentionPolicy::from_config(
            Arc::clone(&store),
            &config.retention,
        ));
        tasks.push(retention.spawn(config.retention.sweep_interval(), shutdown_rx.clone()));
    }

    let shutdown = async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::error!("Failed to listen for shutdown signal: {}", e);
            std::future::pending::<()>().await;
        }
        log::info!("Shutting down");
        let _ = shutdown_tx.send(true);
    };

    serve(AppState::new(store), &config.host, config.port, shutdown).await?;

    for task in tasks {
        let _ = task.await;
    }
    Ok(())
}
