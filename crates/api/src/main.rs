use std::sync::Arc;

use anyhow::Context;

use iapos_api::app::{build_app, services::AppServices};
use iapos_infra::{AppConfig, InMemoryStore, Store};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load().context("failed to load configuration")?;
    iapos_observability::init(config.log_format);

    let store = open_store(&config).await?;
    let bind_addr = config.bind_addr;
    let environment = config.environment;
    let app = build_app(Arc::new(AppServices::new(store, config)));

    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("failed to bind {bind_addr}"))?;
    tracing::info!(addr = %listener.local_addr()?, ?environment, "listening");

    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}

fn in_memory() -> Arc<dyn Store> {
    tracing::warn!("DATABASE_URL not set; using the in-memory store (data is lost on restart)");
    Arc::new(InMemoryStore::new())
}

#[cfg(feature = "postgres")]
async fn open_store(config: &AppConfig) -> anyhow::Result<Arc<dyn Store>> {
    let Some(url) = config.database_url.as_deref() else {
        return Ok(in_memory());
    };
    let store = iapos_infra::PostgresStore::connect(url)
        .await
        .context("failed to connect to postgres")?;
    store.migrate().await.context("failed to apply schema")?;
    tracing::info!("using postgres store");
    Ok(Arc::new(store))
}

#[cfg(not(feature = "postgres"))]
async fn open_store(config: &AppConfig) -> anyhow::Result<Arc<dyn Store>> {
    if config.database_url.is_some() {
        tracing::warn!("DATABASE_URL is set but this build has no postgres support");
    }
    Ok(in_memory())
}
