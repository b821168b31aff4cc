//! mirrord - Gmail mirror server
//!
//! Serves the mirrored mailbox over REST and pushes new-mail events over a
//! WebSocket feed. A background poller keeps the mirror current.

use anyhow::{Context, Result};
use log::{error, info, warn};
use mirror::{GmailAuth, GmailCredentials, MailService, MailStore, Poller, Settings, SqliteMailStore};
use std::sync::Arc;

mod auth;
mod error;
mod routes;
mod ws;

#[tokio::main]
async fn main() {
    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    // Bootstrap config directory
    if let Err(e) = config::init() {
        error!("Failed to initialize config directory: {}", e);
    }

    if let Err(e) = run().await {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let settings = Settings::load().context("Failed to load settings")?;

    let credentials = GmailCredentials::load().inspect_err(|_| {
        if let Some(path) = GmailCredentials::default_credentials_path() {
            warn!(
                "To configure Gmail access, either:\n\
                 1. Place your Google OAuth credentials at: {}\n\
                 2. Or set environment variables: GMAIL_CLIENT_ID and GMAIL_CLIENT_SECRET",
                path.display()
            );
        }
    })?;

    let db_path = settings.database_path()?;
    info!("Opening mirror database at {}", db_path.display());
    let store: Arc<dyn MailStore> = Arc::new(SqliteMailStore::new(&db_path)?);
    let provider = Arc::new(GmailAuth::from_credentials(&credentials));
    let service = Arc::new(MailService::new(store, provider, settings.clone()));

    // Restore before the poller can run a sync
    let svc = service.clone();
    if tokio::task::spawn_blocking(move || svc.restore()).await??.is_some() {
        let svc = service.clone();
        tokio::task::spawn_blocking(move || {
            if let Some(report) = svc.initial_sync() {
                info!(
                    "Startup sync finished: {} inbox, {} sent",
                    report.inbox.inserted, report.sent.inserted
                );
            }
        });
    }

    let poller = Poller::spawn(service.clone(), settings.poll_interval())
        .context("Failed to start poller")?;

    let app = routes::router(service, &settings.cors_origins);
    let listener = tokio::net::TcpListener::bind(&settings.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", settings.bind_addr))?;
    info!("mirrord listening on {}", settings.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    tokio::task::spawn_blocking(move || poller.stop()).await?;
    info!("mirrord stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
    }
    info!("Shutting down");
}
