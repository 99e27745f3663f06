//! Passage - credential and session service

use passage::auth::{CredentialService, JwtSigner, SecretHasher};
use passage::db::{DatabaseManager, SessionRepository, UserRepository};
use passage::{api, core};

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration (handles CLI args, env vars, and config file)
    let config = match core::config::Config::load() {
        Ok(cfg) => cfg,
        Err(e) => {
            // Logging isn't initialized yet
            eprintln!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    let _logger = match core::Logger::init(&config.logging) {
        Ok(logger) => logger,
        Err(e) => {
            eprintln!("Failed to initialize logging: {}", e);
            return Err(e);
        }
    };

    info!("Starting Passage v{}", passage::VERSION);
    info!(
        host = %config.server.host,
        port = config.server.port,
        "Server configuration"
    );
    info!(
        path = ?config.database.path,
        access_ttl = config.auth.access_ttl,
        refresh_ttl = config.auth.refresh_ttl,
        "Auth configuration"
    );

    info!("Initializing database...");
    let db = Arc::new(DatabaseManager::new(
        &config.database.path,
        config.database.connection_pool_size as u32,
        Duration::from_millis(config.database.busy_timeout),
    )?);
    info!("Database initialized successfully");

    let service = Arc::new(CredentialService::new(
        Arc::new(UserRepository::new(db.clone())),
        Arc::new(SessionRepository::new(db)),
        Arc::new(JwtSigner::new(&config.auth.jwt_secret)?),
        SecretHasher::new(config.auth.password_cost)?,
        config.auth.access_ttl(),
        config.auth.refresh_ttl(),
    ));

    let server_url = format!("http://{}:{}", config.server.host, config.server.port);
    let server = api::ApiServer::new(&config, service);
    info!(url = %server_url, "Server ready - starting to serve requests");

    // Blocks until shutdown signal
    server.serve().await?;

    Ok(())
}
