//! admin-sessionctl
//!
//! Operator CLI over the admin session layer:
//! 1. Loads TOML config and opens the file-backed credential store
//! 2. Runs one command (login, logout, whoami, status, get)
//! 3. Prints the result as JSON on stdout; logs go to stderr

mod cli;
mod config;
mod error;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use admin_auth::{CredentialStore, FileStore};
use admin_session::{AdminSession, ApiRequest, GuardDecision, require_admin};
use anyhow::{Context, Result};
use serde_json::{Value, json};
use tracing::info;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::cli::{Cli, Command};
use crate::config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    // JSON logs on stderr, LOG_LEVEL then RUST_LOG
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let cli = Cli::parse(&args)?;

    let config_path = Config::resolve_path(cli.config.as_deref());
    info!(path = %config_path.display(), "loading configuration");
    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.api.timeout_secs))
        .build()
        .context("failed to build HTTP client")?;
    let store = open_store(&config.storage.credentials_path)?;
    let session = AdminSession::new(client, config.api.base_url.clone(), store.clone());

    let outcome = run(&session, &store, &config, cli.command).await;
    session.shutdown().await;

    let output = outcome?;
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn open_store(path: &Path) -> Result<CredentialStore> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let backend = FileStore::open(path)
        .with_context(|| format!("failed to open credential store {}", path.display()))?;
    Ok(CredentialStore::new(Arc::new(backend)))
}

async fn run(session: &AdminSession, store: &CredentialStore, config: &Config, command: Command) -> Result<Value> {
    match command {
        Command::Login { email } => {
            let email = email
                .or_else(|| config.login.email.clone())
                .ok_or(error::Error::MissingEmail)?;
            let password = config
                .login
                .password
                .as_ref()
                .ok_or(error::Error::MissingPassword)?;
            let principal = session.login(&email, password).await.context("login failed")?;
            Ok(json!({
                "loggedIn": true,
                "displayName": principal.display_name(),
                "principal": principal,
            }))
        }
        Command::Logout => {
            session.logout().await;
            Ok(json!({ "loggedIn": false }))
        }
        Command::Whoami => {
            let snapshot = session.hydrate().await.context("failed to verify stored session")?;
            let access = match require_admin(&snapshot) {
                GuardDecision::Allow => "allowed",
                GuardDecision::Redirect(route) => route.path(),
            };
            Ok(json!({
                "phase": snapshot.phase.as_str(),
                "superAdmin": snapshot.is_super_admin(),
                "dashboard": access,
                "principal": snapshot.principal,
            }))
        }
        Command::Status => Ok(json!({
            "stored": store.get().is_some(),
            "principal": store.principal(),
        })),
        Command::Get { path, query } => {
            session.hydrate().await.context("failed to verify stored session")?;
            let request = query
                .into_iter()
                .fold(ApiRequest::get(path), |request, (k, v)| request.with_query(k, v));
            let response = session
                .pipeline()
                .execute(&request)
                .await
                .with_context(|| format!("GET {} failed", request.path))?;
            let body = response
                .json::<Value>()
                .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(response.body()).into_owned()));
            Ok(json!({ "status": response.status(), "body": body }))
        }
    }
}
