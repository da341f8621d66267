mod config;
mod error;

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{Local, TimeZone};
use clap::{Parser, Subcommand};
use runtime::{Agent, LlmProvider, McpClient, ToolRegistry, prompt};
use storage::{
    CleanupTask, DURABLE_SWEEP_INTERVAL, MEMORY_SWEEP_INTERVAL, MemoryStore, SessionStore,
    SqliteStore,
};
use tracing::{info, warn};

use config::{Config, ConfigError, StorageConfig, ToolServerConfig};
use error::{Error, Result};

const CONFIG_FILE: &str = "concierge.toml";
const DB_FILE: &str = "sessions.db";

#[derive(Parser)]
#[command(name = "concierge")]
#[command(about = "A multilingual travel concierge agent backed by MCP tools", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = CONFIG_FILE)]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start an interactive chat session
    Chat {
        /// Connection identifier; reuse one to resume its conversation
        #[arg(short = 'n', long, default_value = "local")]
        connection: String,
    },
    /// List stored sessions
    Sessions {
        /// Show only the last N sessions
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },
    /// Clear the stored conversation for a connection
    Clear {
        /// Connection identifier to clear
        connection: String,
    },
    /// Remove expired sessions now
    Cleanup,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    if let Err(e) = run().await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    match cli.command {
        Some(Commands::Chat { connection }) => cmd_chat(&config, &connection).await,
        None => cmd_chat(&config, "local").await,
        Some(Commands::Sessions { limit }) => cmd_sessions(&config, limit),
        Some(Commands::Clear { connection }) => cmd_clear(&config, &connection),
        Some(Commands::Cleanup) => cmd_cleanup(&config),
    }
}

fn load_config(path: &PathBuf) -> Result<Config> {
    if path.exists() {
        Ok(Config::load(path)?)
    } else {
        info!(path = %path.display(), "no config file found, using defaults");
        Ok(Config::default())
    }
}

/// Open the configured session store.
///
/// A durable store that fails to open degrades to the in-memory store with a
/// loud warning instead of aborting; conversations then do not survive a
/// restart.
fn open_store(storage: &StorageConfig) -> Result<(Arc<dyn SessionStore>, Duration)> {
    match storage.backend.as_str() {
        "memory" => Ok((Arc::new(MemoryStore::new()), MEMORY_SWEEP_INTERVAL)),
        "sqlite" => {
            let path = db_path(storage);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            match SqliteStore::open(&path) {
                Ok(store) => {
                    info!(path = %path.display(), "session store opened");
                    Ok((Arc::new(store), DURABLE_SWEEP_INTERVAL))
                }
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "failed to open sqlite store, falling back to in-memory sessions"
                    );
                    Ok((Arc::new(MemoryStore::new()), MEMORY_SWEEP_INTERVAL))
                }
            }
        }
        other => Err(ConfigError::UnknownStorageBackend(other.to_string()).into()),
    }
}

fn db_path(storage: &StorageConfig) -> PathBuf {
    storage.path.clone().unwrap_or_else(|| {
        dirs_data_dir()
            .unwrap_or_else(|| ".concierge".into())
            .join(DB_FILE)
    })
}

async fn cmd_chat(config: &Config, connection: &str) -> Result<()> {
    println!("concierge v{}", env!("CARGO_PKG_VERSION"));

    let provider =
        LlmProvider::from_settings(config.provider.kind()?, config.provider.settings()?)?;
    println!("Provider: {provider}");

    let registry = connect_tool_servers(&config.tool_servers).await;
    println!("Tools: {}", registry.len());

    let (store, sweep_interval) = open_store(&config.storage)?;
    let _sweeper = CleanupTask::spawn(Arc::clone(&store), sweep_interval);

    let agent = Agent::new(provider, registry, Arc::clone(&store))
        .with_retry_policy(config.retry.policy());

    println!("Connection: {connection}");
    println!("Type 'quit' or Ctrl+D to exit.\n");
    println!("{}\n", prompt::welcome_for_user(None));

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        print!("> ");
        stdout.flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            // EOF
            break;
        }

        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if input == "quit" || input == "exit" {
            break;
        }

        let answer = agent.process_message(connection, input).await;
        println!("\n{answer}\n");
    }

    println!("\nGoodbye.");
    Ok(())
}

/// Spawn and register every configured tool server. One server failing to
/// start is logged and skipped rather than aborting startup.
async fn connect_tool_servers(servers: &[ToolServerConfig]) -> ToolRegistry {
    let mut registry = ToolRegistry::new();

    for server in servers {
        let client = match McpClient::spawn_with(
            &server.command,
            &server.args,
            &server.env,
            server.cwd.as_deref(),
        )
        .await
        {
            Ok(client) => client,
            Err(e) => {
                warn!(server = %server.name, error = %e, "failed to start tool server");
                continue;
            }
        };

        match registry.register_server(client).await {
            Ok(count) => info!(server = %server.name, tools = count, "tool server connected"),
            Err(e) => warn!(server = %server.name, error = %e, "failed to list tools"),
        }
    }

    if registry.is_empty() && !servers.is_empty() {
        warn!("no tool servers available; answers will not use live data");
    }
    registry
}

fn cmd_sessions(config: &Config, limit: usize) -> Result<()> {
    let store = open_sqlite(config)?;
    let sessions = store.list_sessions()?;

    if sessions.is_empty() {
        println!("No sessions found.");
        return Ok(());
    }

    println!(
        "{:<24}  {:<20}  {:<20}  MSGS",
        "CONNECTION", "CREATED", "EXPIRES"
    );
    println!("{}", "-".repeat(76));

    for summary in sessions.into_iter().take(limit) {
        let created = Local
            .from_utc_datetime(&summary.created_at.naive_utc())
            .format("%Y-%m-%d %H:%M");
        let expires = Local
            .from_utc_datetime(&summary.expires_at.naive_utc())
            .format("%Y-%m-%d %H:%M");
        println!(
            "{:<24}  {:<20}  {:<20}  {}",
            summary.connection_id, created, expires, summary.message_count
        );
    }

    Ok(())
}

fn cmd_clear(config: &Config, connection: &str) -> Result<()> {
    let store = open_sqlite(config)?;
    store.clear_context(connection)?;
    println!("Cleared conversation for '{connection}'.");
    Ok(())
}

fn cmd_cleanup(config: &Config) -> Result<()> {
    let store = open_sqlite(config)?;
    let removed = store.cleanup_expired_sessions()?;
    println!("Removed {removed} expired session(s).");
    Ok(())
}

/// Open the durable store directly for operational commands; these are
/// meaningless against the in-memory fallback.
fn open_sqlite(config: &Config) -> Result<SqliteStore> {
    let path = db_path(&config.storage);
    if !path.exists() {
        return Err(Error::DatabaseNotFound { path });
    }
    Ok(SqliteStore::open(&path)?)
}

fn dirs_data_dir() -> Option<PathBuf> {
    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".local/share/concierge"))
    }
    #[cfg(target_os = "linux")]
    {
        std::env::var_os("XDG_DATA_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".local/share")))
            .map(|p| p.join("concierge"))
    }
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA").map(|h| PathBuf::from(h).join("concierge"))
    }
    #[cfg(not(any(target_os = "macos", target_os = "linux", target_os = "windows")))]
    {
        None
    }
}
