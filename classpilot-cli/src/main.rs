//! classpilot CLI
//!
//! Administers the GitHub token classpilot uses for every API call.
//!
//! # Usage
//!
//! ```bash
//! # Verify a token and save it (the token is read from stdin)
//! classpilot token set --storage keychain < token.txt
//!
//! # Show which backend holds a token and which one wins
//! classpilot token status
//!
//! # Check the resolved token against the required scopes
//! classpilot token check
//!
//! # Check a token before saving it
//! classpilot token check --stdin < token.txt
//!
//! # Show the account behind the resolved token
//! classpilot whoami
//! ```

use std::io::{self, BufRead, IsTerminal};
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use classpilot_core::{ApiClient, Paths, Settings, StorageType, TokenManager};
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "classpilot")]
#[command(about = "GitHub token administration for classpilot")]
#[command(version)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Use this directory instead of the platform config directory
    #[arg(long, global = true, env = "CLASSPILOT_CONFIG_DIR")]
    config_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage the stored GitHub token
    #[command(subcommand)]
    Token(TokenCommand),

    /// Show the GitHub account behind the resolved token
    Whoami,
}

#[derive(Subcommand)]
enum TokenCommand {
    /// Verify a token read from stdin and save it
    Set {
        /// Inline token. Visible in shell history and the process list; pipe it
        /// on stdin instead
        #[arg(hide = true)]
        token: Option<String>,

        /// Where to save it (config_file, keychain)
        #[arg(short, long)]
        storage: Option<StorageType>,
    },

    /// Show what each backend holds, in resolution order
    Status {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Verify a token and compare its scopes to the required set
    Check {
        /// Check a token read from stdin instead of the resolved token
        #[arg(long)]
        stdin: bool,

        /// Inline token. Visible in shell history and the process list; use
        /// --stdin instead
        #[arg(hide = true, conflicts_with = "stdin")]
        token: Option<String>,
    },

    /// Delete the token from one backend
    Remove {
        /// Backend to clear (config_file, keychain)
        #[arg(short, long)]
        storage: StorageType,
    },
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let paths = match cli.config_dir {
        Some(dir) => Paths::new(dir),
        None => Paths::user().context("could not determine the config directory")?,
    };
    let settings = Settings::load(&paths)
        .with_context(|| format!("failed to load {}", paths.settings_file().display()))?;
    debug!(config_dir = %paths.config_dir.display(), "loaded settings");

    let manager = TokenManager::from_settings(&settings, &paths)?;

    match cli.command {
        Commands::Token(TokenCommand::Set { token, storage }) => set_token(&manager, token, storage).await,
        Commands::Token(TokenCommand::Status { format }) => token_status(&manager, &format).await,
        Commands::Token(TokenCommand::Check { stdin, token }) => {
            let token = match inline_token(token) {
                Some(token) => Some(token),
                None if stdin => Some(read_token_from_stdin()?),
                None => None,
            };
            check_token(&manager, token).await
        }
        Commands::Token(TokenCommand::Remove { storage }) => remove_token(&manager, storage).await,
        Commands::Whoami => whoami(&manager, &settings).await,
    }
}

/// Read a single token line from stdin, prompting when interactive.
fn read_token_from_stdin() -> Result<String> {
    let stdin = io::stdin();
    if stdin.is_terminal() {
        eprint!("Paste GitHub token: ");
    }
    let mut line = String::new();
    stdin
        .lock()
        .read_line(&mut line)
        .context("failed to read token from stdin")?;
    Ok(line.trim().to_string())
}

/// Accept a token given on the command line, warning that it has leaked
/// into shell history and the process list.
fn inline_token(token: Option<String>) -> Option<String> {
    if token.is_some() {
        tracing::warn!("token passed as an argument may be visible to other users; pipe it on stdin instead");
    }
    token
}

async fn set_token(manager: &TokenManager, token: Option<String>, storage: Option<StorageType>) -> Result<()> {
    let token = match inline_token(token) {
        Some(token) => token,
        None => read_token_from_stdin()?,
    };

    let credential = match storage {
        Some(storage) => manager.save_token_to(&token, storage).await,
        None => manager.save_token(&token).await,
    }
    .context("token was not saved")?;

    println!(
        "Saved {} token {} for {} to {}",
        credential.token_type,
        credential.masked(),
        credential.login.as_deref().unwrap_or("unknown user"),
        credential.storage_type
    );
    if let Some(expires_at) = credential.expires_at {
        println!("  Expires: {}", expires_at.format("%Y-%m-%d %H:%M UTC"));
    }
    Ok(())
}

async fn token_status(manager: &TokenManager, format: &str) -> Result<()> {
    let status = manager.status().await;

    match format {
        "json" => {
            let entries: Vec<_> = status
                .iter()
                .map(|s| {
                    serde_json::json!({
                        "storage_type": s.storage_type,
                        "description": s.description,
                        "token": s.token,
                        "error": s.error,
                        "active": s.active,
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&entries)?);
        }
        _ => {
            println!("Token sources (highest priority first):");
            for s in &status {
                let marker = if s.active { "*" } else { " " };
                let held = match (&s.token, &s.error) {
                    (Some(token), _) => token.clone(),
                    (None, Some(error)) => format!("unreadable ({})", error),
                    (None, None) => "none".to_string(),
                };
                println!(" {} {:<40} {}", marker, s.description, held);
            }
            if !status.iter().any(|s| s.active) {
                println!("No token configured. Run `classpilot token set`.");
            }
        }
    }
    Ok(())
}

async fn check_token(manager: &TokenManager, token: Option<String>) -> Result<()> {
    let token = match token {
        Some(token) => token,
        None => manager.require_token().await?.token.expose().to_string(),
    };

    let (ok, message) = manager.validate_token_permissions(&token).await;
    println!("{}", message);
    if !ok {
        bail!("token check failed");
    }
    Ok(())
}

async fn remove_token(manager: &TokenManager, storage: StorageType) -> Result<()> {
    manager.remove_token(storage).await?;
    println!("Removed token from {}", storage);

    if let Some(remaining) = manager.get_token().await {
        println!(
            "Note: {} token {} from {} is still in effect",
            remaining.token_type,
            remaining.masked(),
            remaining.storage_type
        );
    }
    Ok(())
}

async fn whoami(manager: &TokenManager, settings: &Settings) -> Result<()> {
    let client = ApiClient::connect(manager, settings).await?;
    let user = client.current_user().await.context("could not fetch the current user")?;
    println!("{} (id {})", user.login, user.id);
    Ok(())
}
