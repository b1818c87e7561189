use anyhow::{Context, Result};
use axum::Router;
use segment_fs::{
    config::{self, AppConfig, Backend},
    driver::Driver,
    routes,
    store::{ObjectStore, local::LocalStore, memory::MemoryStore, swift::SwiftStore},
};
use sqlx::sqlite::SqlitePoolOptions;
use std::{fs, io::ErrorKind, path::Path, sync::Arc};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + migrate flag ---
    let (cfg, migrate) = config::AppConfig::from_env_and_args()?;

    tracing::info!("Starting segment-fs with config: {:?}", cfg);

    if migrate && cfg.backend != Backend::Local {
        anyhow::bail!("--migrate only applies to the local backend");
    }

    // --- Connect the object store ---
    let store: Arc<dyn ObjectStore> = match cfg.backend {
        Backend::Swift => Arc::new(
            SwiftStore::connect(cfg.driver.swift_config())
                .await
                .context("connecting to Swift")?,
        ),
        Backend::Local => {
            let store = local_store(&cfg).await?;
            store.migrate().await.context("running migrations")?;
            if migrate {
                tracing::info!("Database migration complete.");
                return Ok(()); // exit after migration
            }
            Arc::new(store)
        }
        Backend::Memory => Arc::new(MemoryStore::default()),
    };

    // --- Initialize the driver ---
    let driver = Driver::new(store, cfg.driver.driver_options())
        .await
        .context("initializing storage driver")?;
    tracing::info!(
        container = driver.container(),
        chunk_size = driver.chunk_size(),
        bulk_delete = driver.bulk_delete_supported(),
        "driver ready"
    );

    // --- Build router ---
    let app: Router = routes::routes::routes().with_state(driver);

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
    axum::serve(listener, app).await?;

    Ok(())
}

/// Open the SQLite metadata pool and payload directory of the local backend.
async fn local_store(cfg: &AppConfig) -> Result<LocalStore> {
    // --- Ensure storage directory exists ---
    if !Path::new(&cfg.storage_dir).exists() {
        fs::create_dir_all(&cfg.storage_dir)?;
        tracing::info!("Created storage directory at {}", cfg.storage_dir);
    }

    let db_url = &cfg.database_url;
    tracing::debug!("Connecting using raw URL => {}", db_url);

    // Extract the local file path SQLx will use
    let db_path = db_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("file:");
    let db_path_obj = Path::new(db_path);

    // Create parent directory if needed
    if let Some(parent) = db_path_obj.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)?;
            tracing::info!("Created missing directory {:?}", parent);
        }
    }

    // SQLx does not create the database file on its own
    if let Err(err) = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(db_path)
    {
        tracing::warn!("Failed to open {}: {}", db_path, err);
    }

    let db = Arc::new(
        SqlitePoolOptions::new()
            .max_connections(5)
            .connect(db_url)
            .await
            .with_context(|| format!("connecting to {db_url}"))?,
    );

    Ok(LocalStore::new(db, &cfg.storage_dir))
}
