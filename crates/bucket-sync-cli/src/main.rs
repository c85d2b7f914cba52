use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod commands;
mod config;

use config::AgentConfig;

/// bucket-sync: Local-first bucket replication.
///
/// Run the LWW merge server, sync a local SQLite store against it, and
/// inspect what each side holds.
#[derive(Parser)]
#[command(name = "bucket-sync", version, about, long_about = None)]
struct Cli {
    /// Increase log verbosity (-v debug, -vv trace). `RUST_LOG` wins.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the merge server.
    Serve {
        /// Address to listen on.
        #[arg(short, long, default_value = "127.0.0.1:8787")]
        bind: String,

        /// Path of the persisted register document.
        #[arg(short, long, default_value = "sync-db.json")]
        document: PathBuf,
    },

    /// Fetch and print the server's snapshot.
    Snapshot {
        /// Server base URL.
        #[arg(short, long, default_value = "http://127.0.0.1:8787")]
        server: String,
    },

    /// Write one bucket through a local store and push it.
    Put {
        /// Server base URL.
        #[arg(short, long, default_value = "http://127.0.0.1:8787")]
        server: String,

        /// Path of the local SQLite store.
        #[arg(long, default_value = "bucket-sync.db")]
        db: PathBuf,

        /// Bucket name.
        key: String,

        /// New value as JSON text.
        #[arg(required_unless_present = "clear", conflicts_with = "clear")]
        value: Option<String>,

        /// Clear the bucket instead of writing a value.
        #[arg(long)]
        clear: bool,
    },

    /// Run a sync agent against a local SQLite store until Ctrl-C.
    Agent {
        /// TOML agent config. Defaults apply to anything it omits.
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Override the server base URL.
        #[arg(short, long)]
        server: Option<String>,

        /// Override the local store path.
        #[arg(long)]
        db: Option<PathBuf>,
    },

    /// List the buckets in a local SQLite store.
    Inspect {
        /// Path to the SQLite database file.
        db: PathBuf,
    },
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(verbose > 0).with_writer(std::io::stderr))
        .init();
}

fn agent_config(
    path: Option<PathBuf>,
    server: Option<String>,
    db: Option<PathBuf>,
) -> Result<AgentConfig, config::ConfigError> {
    let mut config = match path {
        Some(path) => AgentConfig::load(&path)?,
        None => AgentConfig::default(),
    };
    if let Some(server) = server {
        config.server = server;
    }
    if let Some(db) = db {
        config.db = db;
    }
    Ok(config)
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result: Result<(), Box<dyn std::error::Error>> = match cli.command {
        Commands::Serve { bind, document } => commands::serve(&bind, &document).await,
        Commands::Snapshot { server } => commands::snapshot(&server).await,
        Commands::Put {
            server,
            db,
            key,
            value,
            clear,
        } => {
            let value = if clear { None } else { value };
            commands::put(&server, &db, &key, value.as_deref()).await
        }
        Commands::Agent { config, server, db } => match agent_config(config, server, db) {
            Ok(config) => commands::agent(config).await,
            Err(e) => Err(e.into()),
        },
        Commands::Inspect { db } => commands::inspect(&db),
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        process::exit(1);
    }
}
