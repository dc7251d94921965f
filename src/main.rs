use anyhow::{Context, Result};
use object_api::{build_app, config, storage};
use sqlx::sqlite::SqlitePoolOptions;
use std::{io::ErrorKind, path::Path};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + migrate flag ---
    let (cfg, migrate) = config::AppConfig::from_env_and_args()?;
    tracing::info!("Starting object-api with config: {:?}", cfg);

    if cfg.database_url.starts_with("sqlite:") {
        ensure_db_dir(&cfg.database_url)?;
    }

    // --- Handle migration mode ---
    if migrate {
        run_migrations(&cfg.database_url).await?;
        tracing::info!("Database migration complete.");
        return Ok(()); // exit after migration
    }

    // --- Build router ---
    let app = build_app(&cfg.database_url, cfg.settings.clone())
        .await
        .with_context(|| format!("opening storage `{}`", cfg.database_url))?;

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

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Shutdown signal received");
            }
            shutdown.cancel();
        }
    });

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;

    Ok(())
}

/// Create the parent directory of a file-backed SQLite URL.
fn ensure_db_dir(db_url: &str) -> Result<()> {
    let db_path = db_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();
    if db_path.is_empty() || db_path.starts_with(":memory:") {
        return Ok(());
    }
    if let Some(parent) = Path::new(db_path).parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating directory {}", parent.display()))?;
            tracing::info!("Created missing directory {:?}", parent);
        }
    }
    Ok(())
}

/// Apply the embedded schema to the configured SQLite database.
async fn run_migrations(db_url: &str) -> Result<()> {
    if !db_url.starts_with("sqlite:") {
        anyhow::bail!("--migrate needs a sqlite database url, got `{db_url}`");
    }
    let options = db_url
        .parse::<sqlx::sqlite::SqliteConnectOptions>()
        .with_context(|| format!("parsing database url `{db_url}`"))?
        .create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await?;

    let applied = storage::sqlite::run_schema(&pool).await?;
    tracing::info!("Ran {} migration statements", applied);
    Ok(())
}
