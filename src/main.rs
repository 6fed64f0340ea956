use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use graphapp::api::routes;
use graphapp::catalog::{Catalog, MemoryCatalog};
use graphapp::config::AppConfig;
use graphapp::operations::GraphService;
use graphapp::store::{BlobStore, FsBlobStore, MemoryBlobStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("graphapp=info")),
        )
        .init();

    let config = AppConfig::load().context("failed to load configuration")?;

    let catalog = open_catalog(&config).await?;
    let blobs: Arc<dyn BlobStore> = match &config.blob_root {
        Some(root) => {
            let store = FsBlobStore::open(root.clone())
                .await
                .with_context(|| format!("failed to open blob directory {}", root.display()))?;
            info!(root = %store.root().display(), "using filesystem blob store");
            Arc::new(store)
        }
        None => {
            warn!("GRAPHAPP_BLOB_ROOT is not set, blobs are kept in memory");
            Arc::new(MemoryBlobStore::new())
        }
    };

    let (service, _worker) = GraphService::spawn(catalog, blobs, &config);
    let _watchdog = service.dispatcher().spawn_watchdog();

    let app = routes::<GraphService>().with_state(service);

    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("failed to bind listener on {}", config.bind))?;
    info!(bind = %config.bind, "graphapp server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown requested");
        })
        .await
        .context("server failed")
}

#[cfg(feature = "sqlx")]
async fn open_catalog(config: &AppConfig) -> anyhow::Result<Arc<dyn Catalog>> {
    let Some(database_url) = config.database_url.as_deref() else {
        warn!("DATABASE_URL is not set, catalog is kept in memory");
        return Ok(Arc::new(MemoryCatalog::new()));
    };

    let catalog = graphapp::db::PgCatalog::connect(database_url, config.database_max_connections)
        .await
        .context("failed to connect to postgres")?;
    graphapp::db::create_graphapp_tables(catalog.pool())
        .await
        .context("failed to run graphapp migrations")?;
    info!("using postgres catalog");
    Ok(Arc::new(catalog))
}

#[cfg(not(feature = "sqlx"))]
async fn open_catalog(config: &AppConfig) -> anyhow::Result<Arc<dyn Catalog>> {
    if config.database_url.is_some() {
        warn!("DATABASE_URL is set but the sqlx feature is disabled, catalog is kept in memory");
    }
    Ok(Arc::new(MemoryCatalog::new()))
}
