use anyhow::Context;
use clap::Parser;
use finverse_core::aggregator::plaid::PlaidClient;
use finverse_core::domain::transaction::UserId;
use finverse_core::storage::postgres::PgStore;
use finverse_core::storage::Store;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod sync;

#[derive(Debug, Parser)]
#[command(name = "finverse_worker")]
struct Args {
    /// Sync only this user. Defaults to every user with a linked bank account.
    #[arg(long)]
    user_id: Option<String>,

    /// Fetch from the aggregator and log counts without writing to the database.
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = finverse_core::config::Settings::from_env()?;
    let _sentry_guard = init_sentry(&settings);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer())
        .init();

    let args = Args::parse();

    let db_url = settings.require_database_url()?;
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(db_url)
        .await
        .context("connect DATABASE_URL failed")?;

    finverse_core::storage::migrate(&pool).await?;

    let store = PgStore::new(pool);
    let aggregator = PlaidClient::from_settings(&settings)?;

    let users = match args.user_id.as_deref() {
        Some(raw) => vec![UserId::new(raw).context("--user-id must not be blank")?],
        None => store.linked_users().await?,
    };

    tracing::info!(users = users.len(), dry_run = args.dry_run, "sync run starting");

    let summary = sync::run(&store, &aggregator, &users, args.dry_run, chrono::Utc::now()).await?;

    tracing::info!(
        synced = summary.synced,
        skipped = summary.skipped,
        failed = summary.failed,
        dry_run = args.dry_run,
        "sync run finished"
    );

    if summary.failed > 0 {
        anyhow::bail!("{} of {} users failed to sync", summary.failed, users.len());
    }
    Ok(())
}

fn init_sentry(settings: &finverse_core::config::Settings) -> Option<sentry::ClientInitGuard> {
    let dsn = settings.sentry_dsn.as_deref()?;
    Some(sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            ..Default::default()
        },
    )))
}
