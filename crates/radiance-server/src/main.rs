//! Radiance Watch server entry point.

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;

use std::sync::Arc;

use radiance::{DedupPolicy, LoopTracker, NoDedup, RecentlyAlerted};
use radiance_server::config::{
    resolve_addr, resolve_db_path, resolve_dedup_window, resolve_stale_after, resolve_token,
};
use radiance_server::phases::{reason, sense};
use radiance_server::types::IngestRequest;
use radiance_server::{AppState, HttpTransport, MetricStore};

#[derive(Parser)]
#[command(
    name = "radiance-server",
    about = "Radiance Watch: anomaly alerts, trending entities, and loop status over HTTP",
    version
)]
struct Cli {
    /// Path to the SQLite database.
    /// Also reads from RADIANCE_DB env var.
    #[arg(long, global = true)]
    db: Option<String>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP API (default).
    Serve {
        /// Listen address (host:port).
        /// Also reads from RADIANCE_ADDR env var.
        #[arg(long)]
        addr: Option<String>,

        /// Bearer token for authentication.
        /// Also reads from RADIANCE_TOKEN env var.
        #[arg(long)]
        token: Option<String>,
    },

    /// Run the scorer once and print the outcome as JSON.
    Score,

    /// Ingest entities and metrics from a JSON file.
    Ingest {
        /// File shaped like the body of POST /sense/ingest.
        file: std::path::PathBuf,
    },

    /// Delete alerts and events older than the given age.
    Prune {
        /// Age in days.
        #[arg(long, default_value_t = 90, value_parser = clap::value_parser!(u32).range(1..))]
        days: u32,
    },

    /// Generate shell completion scripts.
    ///
    /// Examples:
    ///   radiance-server completions bash > ~/.local/share/bash-completion/completions/radiance-server
    ///   radiance-server completions zsh > ~/.zfunc/_radiance-server
    Completions {
        /// Shell type (bash, zsh, fish, powershell, elvish).
        shell: Shell,
    },
}

fn dedup_policy() -> Arc<dyn DedupPolicy> {
    match resolve_dedup_window() {
        Some(within) => {
            tracing::info!(hours = within.num_hours(), "Repeat alerts suppressed");
            Arc::new(RecentlyAlerted::new(within))
        }
        None => Arc::new(NoDedup),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let command = cli.command.unwrap_or(Commands::Serve {
        addr: None,
        token: None,
    });

    match command {
        Commands::Serve { addr, token } => {
            let db_path = resolve_db_path(cli.db.as_deref());
            let addr = resolve_addr(addr.as_deref());
            let token = resolve_token(token.as_deref());

            tracing::info!("Radiance Watch server");
            tracing::info!("Database: {}", db_path.display());
            if token.is_some() {
                tracing::info!("Auth: bearer token required");
            }

            let store = MetricStore::open(&db_path)?;
            let state = AppState::new(store)
                .with_token(token)
                .with_stale_after(resolve_stale_after())
                .with_dedup(dedup_policy());
            HttpTransport::new(state).run(&addr).await?;
        }

        Commands::Score => {
            let mut store = MetricStore::open(&resolve_db_path(cli.db.as_deref()))?;
            let tracker = LoopTracker::new();
            let dedup = dedup_policy();
            let outcome = reason::run(&mut store, &tracker, dedup.as_ref(), chrono::Utc::now())?;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }

        Commands::Ingest { file } => {
            let raw = std::fs::read_to_string(&file)?;
            let req: IngestRequest = serde_json::from_str(&raw)?;
            let mut store = MetricStore::open(&resolve_db_path(cli.db.as_deref()))?;
            let tracker = LoopTracker::new();
            let resp = sense::run(&mut store, &tracker, &req, chrono::Utc::now())?;
            println!("{}", serde_json::to_string_pretty(&resp)?);
        }

        Commands::Prune { days } => {
            let mut store = MetricStore::open(&resolve_db_path(cli.db.as_deref()))?;
            let before = chrono::Utc::now() - chrono::Duration::days(i64::from(days));
            let counts = store.prune(before)?;
            println!(
                "Pruned {} alerts and {} events older than {days} days",
                counts.alerts, counts.events
            );
        }

        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "radiance-server", &mut std::io::stdout());
        }
    }

    Ok(())
}
