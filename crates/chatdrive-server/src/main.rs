//! chatdrive server binary
//!
//! ## Usage
//!
//! ```bash
//! # Run the WebDAV server (default)
//! chatdrive [--config FILE] [--db PATH] serve [--listen ADDR]
//!
//! # Account management
//! chatdrive add-user <username> <owner-id>
//! CHATDRIVE_PASSWORD=... chatdrive set-password <username>
//! chatdrive list-users
//! ```

use std::io::BufRead;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use chatdrive_server::constants::PASSWORD_ENV;
use chatdrive_server::{DavServer, ServerConfig, check_memory_blobs};
use chatdrive_store::{OwnerId, TreeStore};
use chatdrive_transfer::MemoryBlobStore;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Multi-tenant file drive served over WebDAV.
#[derive(Parser, Debug)]
#[command(name = "chatdrive")]
#[command(about = "WebDAV file drive backed by chat blob storage")]
struct Cli {
    /// Config file (default: <config dir>/chatdrive/config.toml if present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Metadata database, overriding the config file
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the WebDAV server
    Serve {
        /// Listen address, overriding the config file
        #[arg(long)]
        listen: Option<SocketAddr>,
    },
    /// Create (or take over) a login for an owner
    AddUser { username: String, owner_id: i64 },
    /// Set a user's password from $CHATDRIVE_PASSWORD or stdin
    SetPassword { username: String },
    /// List all users
    ListUsers,
}

#[tokio::main]
async fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let result = match load_config(&cli) {
        Ok(config) => match cli.command {
            None => run_server(config, None).await,
            Some(Command::Serve { listen }) => run_server(config, listen).await,
            Some(Command::AddUser { username, owner_id }) => {
                cmd_add_user(&config, &username, OwnerId(owner_id))
            }
            Some(Command::SetPassword { username }) => cmd_set_password(&config, &username),
            Some(Command::ListUsers) => cmd_list_users(&config),
        },
        Err(e) => Err(e),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn load_config(cli: &Cli) -> Result<ServerConfig> {
    let mut config = ServerConfig::load_or_default(cli.config.as_deref())?;
    if let Some(db) = &cli.db {
        config.set_db_path(db);
    }
    Ok(config)
}

fn open_store(path: &Path) -> Result<TreeStore> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
    }
    TreeStore::open(path).with_context(|| format!("opening {}", path.display()))
}

async fn run_server(mut config: ServerConfig, listen: Option<SocketAddr>) -> Result<()> {
    if let Some(addr) = listen {
        config.listen = addr;
    }
    let tree = Arc::new(open_store(&config.db_path)?);
    tracing::info!("Metadata database: {}", config.db_path.display());
    check_memory_blobs(&tree)
        .with_context(|| format!("refusing to serve {}", config.db_path.display()))?;
    tracing::warn!("Using in-memory blob store; file content will not survive a restart");
    let blobs = Arc::new(MemoryBlobStore::default());

    let server = DavServer::new(config, tree, blobs);
    let shutdown = CancellationToken::new();
    let on_signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupted");
        }
        on_signal.cancel();
    });

    server.run(shutdown).await.context("WebDAV server failed")
}

fn cmd_add_user(config: &ServerConfig, username: &str, owner: OwnerId) -> Result<()> {
    let tree = open_store(&config.db_path)?;
    tree.ensure_owner_root(owner)?;
    let profile = tree.upsert_profile(owner, username)?;
    println!("User {} -> owner {}", profile.username, profile.owner);
    if !tree.has_password(owner)? {
        println!("No password set; run: chatdrive set-password {}", profile.username);
    }
    Ok(())
}

fn cmd_set_password(config: &ServerConfig, username: &str) -> Result<()> {
    let tree = open_store(&config.db_path)?;
    let owner = tree
        .owner_by_username(username)
        .with_context(|| format!("no user named {username}"))?;

    let password = match std::env::var(PASSWORD_ENV) {
        Ok(pw) => pw,
        Err(_) => {
            eprintln!("Password (one line on stdin):");
            let mut line = String::new();
            std::io::stdin().lock().read_line(&mut line)?;
            line.trim_end_matches(['\r', '\n']).to_string()
        }
    };
    if password.is_empty() {
        bail!("refusing to set an empty password");
    }

    tree.set_password(owner, &password)?;
    println!("Password updated for {}", username);
    Ok(())
}

fn cmd_list_users(config: &ServerConfig) -> Result<()> {
    let tree = open_store(&config.db_path)?;
    let profiles = tree.list_profiles()?;
    if profiles.is_empty() {
        println!("No users. Add one with: chatdrive add-user <username> <owner-id>");
        return Ok(());
    }

    println!("{:<24} {:>16}  {}", "USERNAME", "OWNER", "PASSWORD");
    for profile in profiles {
        let has_password = tree.has_password(profile.owner)?;
        println!(
            "{:<24} {:>16}  {}",
            profile.username,
            profile.owner.get(),
            if has_password { "yes" } else { "no" }
        );
    }
    Ok(())
}
