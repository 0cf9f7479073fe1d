use anyhow::{Context, Result};
use axum::Router;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::{fs, io::ErrorKind, path::Path, str::FromStr, sync::Arc};
use tokio::{net::TcpListener, signal};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

mod config;
mod errors;
mod handlers;
mod models;
mod routes;
mod services;

use config::{AppConfig, Backend};
use handlers::AppState;
use services::{
    blob_repository::KeyedBlobRepository, object_store::ObjectStore,
    remote_store::RemoteObjectStore, storage_service::LocalObjectStore,
};

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Load .env, then parse and validate config ---
    match dotenvy::dotenv() {
        Ok(path) => tracing::debug!("Loaded environment from {}", path.display()),
        Err(err) if err.not_found() => {}
        Err(err) => return Err(err).context("loading .env"),
    }
    let (cfg, migrate) = AppConfig::from_env_and_args().context("invalid configuration")?;

    tracing::info!("Starting keydrop with config: {:?}", cfg);

    // --- Open the object namespace ---
    let store: Arc<dyn ObjectStore> = match cfg.backend {
        Backend::Local => {
            let local = open_local_store(&cfg).await?;
            if migrate {
                tracing::info!("Database migration complete.");
                return Ok(());
            }
            Arc::new(local)
        }
        Backend::S3 => {
            if migrate {
                anyhow::bail!("--migrate only applies to the local backend");
            }
            Arc::new(
                RemoteObjectStore::s3(&cfg.bucket, cfg.list_page_size)
                    .context("configuring S3 client")?,
            )
        }
    };

    // --- Initialize core service ---
    let repository = KeyedBlobRepository::new(store, cfg.secret.clone())
        .with_size_limit(cfg.max_upload_bytes)
        .with_unreadable_policy(cfg.on_unreadable);

    let shutdown = CancellationToken::new();
    let state = AppState {
        repository,
        request_timeout: cfg.request_timeout,
        shutdown: shutdown.clone(),
    };

    // --- Build router ---
    if !Path::new(&cfg.public_dir).is_dir() {
        tracing::warn!("Public directory {} does not exist", cfg.public_dir);
    }
    let app: Router =
        routes::routes::routes(cfg.max_upload_bytes, &cfg.public_dir).with_state(state);

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await?;

    Ok(())
}

/// Connect to SQLite, creating the payload and database directories as
/// needed, and apply the schema.
async fn open_local_store(cfg: &AppConfig) -> Result<LocalObjectStore> {
    if !Path::new(&cfg.storage_dir).exists() {
        fs::create_dir_all(&cfg.storage_dir)?;
        tracing::info!("Created storage directory at {}", cfg.storage_dir);
    }

    let options = SqliteConnectOptions::from_str(&cfg.database_url)
        .with_context(|| format!("parsing database url `{}`", cfg.database_url))?
        .create_if_missing(true)
        .foreign_keys(true);

    let db_path = options.get_filename();
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)?;
            tracing::info!("Created missing directory {:?}", parent);
        }
    }
    tracing::debug!("Connecting to SQLite at {}", db_path.display());

    let db = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    let store =
        LocalObjectStore::open(Arc::new(db), &cfg.storage_dir, &cfg.bucket, cfg.list_page_size)
            .await
            .context("opening local object store")?;
    Ok(store)
}

/// Resolve on Ctrl+C or SIGTERM and cancel in-flight lookups.
async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", err);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(err) => {
                tracing::error!("Failed to install SIGTERM handler: {}", err);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, draining connections");
    shutdown.cancel();
}
