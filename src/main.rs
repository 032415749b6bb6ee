//! mailsync command-line front end.
//!
//! Thin wiring around the library: build the [`Config`], create the
//! orchestrator and gateway, run one command, print the result.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use mailsync::auth::CredentialOrchestrator;
use mailsync::config::{load_config, Config};
use mailsync::credentials::GrantFlow;
use mailsync::sync::{ChangeRecord, CursorStore, MessageFilter, SyncGateway};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

/// Sign in to a mail account and pull incremental changes.
#[derive(Parser)]
#[command(name = "mailsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// TOML config file (environment variables are used when omitted)
    #[arg(global = true, short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sign in with one of the grant flows
    Login {
        /// interactive, device or client_credentials (defaults to DEFAULT_AUTH_METHOD)
        #[arg(short, long)]
        method: Option<GrantFlow>,
    },

    /// Show the current authentication status
    Status,

    /// Forget cached credentials and delete the cache file
    Logout,

    /// Run one delta sync pass for a mail folder
    Sync {
        /// Folder key, e.g. inbox, sentItems, drafts
        #[arg(default_value = "inbox")]
        resource: String,

        /// Print full change records as JSON
        #[arg(long)]
        json: bool,
    },

    /// List messages with a filter query (does not touch cursors)
    List {
        #[arg(default_value = "inbox")]
        resource: String,

        /// Only messages received at or after this RFC 3339 instant
        #[arg(long)]
        since: Option<DateTime<Utc>>,

        /// Maximum number of messages
        #[arg(short, long, default_value = "25")]
        limit: usize,

        /// Only unread messages
        #[arg(long)]
        unread: bool,
    },

    /// Forget the sync cursor of one folder, or of all folders
    ResetCursor {
        resource: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // .env is optional
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mailsync=info".into()),
        )
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config(&path.to_string_lossy())?,
        None => Config::from_env().context("Invalid configuration")?,
    };
    let config = Arc::new(config);
    debug!(
        tenant = %config.tenant_id,
        cache = %config.token_cache_file.display(),
        cursors = %config.cursor_file.display(),
        "Configuration loaded"
    );

    let orchestrator = Arc::new(
        CredentialOrchestrator::from_config(config.clone())
            .context("Failed to load credential cache")?,
    );

    match cli.command {
        Commands::Login { method } => {
            let method = method.unwrap_or(config.default_auth_method);
            let result = orchestrator.authenticate(method).await;
            if !result.success {
                bail!(
                    "Login failed: {}",
                    result.error_message.unwrap_or_else(|| "unknown error".to_string())
                );
            }
            let who = result
                .status
                .user
                .as_ref()
                .and_then(|u| u.display_name.clone().or_else(|| u.user_principal_name.clone()))
                .unwrap_or_else(|| "application".to_string());
            println!("Signed in as {} ({})", who, method);
        }

        Commands::Status => {
            let status = orchestrator.auth_status().await;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }

        Commands::Logout => {
            if !orchestrator.logout() {
                bail!("Failed to remove the credential cache");
            }
            println!("Signed out");
        }

        Commands::Sync { resource, json } => {
            let gateway = gateway(&config, &orchestrator);
            let pass = gateway
                .sync_resource(&resource)
                .await
                .with_context(|| format!("Sync of '{}' failed", resource))?;

            for change in &pass.changes {
                if json {
                    println!("{}", change_json(change));
                } else {
                    match change {
                        ChangeRecord::Upserted { id, item } => println!(
                            "+ {} {}",
                            id,
                            item.get("subject").and_then(|s| s.as_str()).unwrap_or("")
                        ),
                        ChangeRecord::Removed { id, .. } => println!("- {}", id),
                    }
                }
            }
            info!(resource = %resource, changes = pass.changes.len(), "Done");
        }

        Commands::List {
            resource,
            since,
            limit,
            unread,
        } => {
            let gateway = gateway(&config, &orchestrator);
            let filter = MessageFilter {
                since,
                limit,
                unread_only: unread,
            };
            let items = gateway
                .list_messages(&resource, &filter)
                .await
                .with_context(|| format!("Listing '{}' failed", resource))?;
            for item in items {
                println!("{}", item);
            }
        }

        Commands::ResetCursor { resource } => {
            let gateway = gateway(&config, &orchestrator);
            gateway
                .reset_cursor(resource.as_deref())
                .context("Failed to reset cursor")?;
            match resource {
                Some(resource) => println!("Cursor for '{}' reset", resource),
                None => println!("All cursors reset"),
            }
        }
    }

    Ok(())
}

fn gateway(config: &Arc<Config>, orchestrator: &Arc<CredentialOrchestrator>) -> SyncGateway {
    SyncGateway::new(
        config.clone(),
        orchestrator.clone(),
        CursorStore::open(&config.cursor_file),
    )
}

fn change_json(change: &ChangeRecord) -> serde_json::Value {
    match change {
        ChangeRecord::Upserted { id, item } => {
            serde_json::json!({ "change": "upserted", "id": id, "item": item })
        }
        ChangeRecord::Removed { id, reason } => {
            serde_json::json!({ "change": "removed", "id": id, "reason": reason })
        }
    }
}
