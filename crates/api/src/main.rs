use finverse_core::aggregator::plaid::PlaidClient;
use finverse_core::aggregator::AggregatorClient;
use finverse_core::config::Settings;
use finverse_core::llm::anthropic::AnthropicClient;
use finverse_core::llm::LlmClient;
use finverse_core::storage::memory::MemoryStore;
use finverse_core::storage::postgres::PgStore;
use finverse_core::storage::Store;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod app;
mod error;
mod extract;
mod routes;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = Settings::from_env()?;
    let _sentry_guard = init_sentry(&settings);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer())
        .init();

    let state = app::AppState {
        store: open_store(&settings).await,
        llm: AnthropicClient::from_settings(&settings)
            .map(|c| Arc::new(c) as Arc<dyn LlmClient>)
            .map_err(|e| tracing::warn!(error = %e, "text generation disabled"))
            .ok(),
        aggregator: PlaidClient::from_settings(&settings)
            .map(|c| Arc::new(c) as Arc<dyn AggregatorClient>)
            .map_err(|e| tracing::warn!(error = %e, "bank aggregator disabled"))
            .ok(),
        chat_timeout: settings.chat_timeout,
    };

    let app = app::router(state);

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(3000);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));

    tracing::info!(%addr, "api listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

/// Without DATABASE_URL the API keeps everything in memory. A configured
/// database that cannot be reached leaves the API up in degraded mode.
async fn open_store(settings: &Settings) -> Option<Arc<dyn Store>> {
    let Some(db_url) = settings.database_url.as_deref() else {
        tracing::warn!("DATABASE_URL not set; using the in-memory store");
        return Some(Arc::new(MemoryStore::new()));
    };

    match sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(db_url)
        .await
    {
        Ok(pool) => match finverse_core::storage::migrate(&pool).await {
            Ok(()) => Some(Arc::new(PgStore::new(pool))),
            Err(e) => {
                sentry_anyhow::capture_anyhow(&e);
                tracing::error!(error = %e, "db migrations failed; starting API in degraded mode");
                None
            }
        },
        Err(e) => {
            let err = anyhow::Error::new(e);
            sentry_anyhow::capture_anyhow(&err);
            tracing::error!(error = %err, "db connect failed; starting API in degraded mode");
            None
        }
    }
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

fn init_sentry(settings: &Settings) -> Option<sentry::ClientInitGuard> {
    let dsn = settings.sentry_dsn.as_deref()?;
    Some(sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            ..Default::default()
        },
    )))
}
