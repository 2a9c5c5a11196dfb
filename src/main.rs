use std::sync::Arc;
use std::time::Duration;

use sqlx::sqlite::SqlitePoolOptions;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use remit::{
    api::{self, state::AppState},
    config::Settings,
    payments::{FeePolicy, ProviderClient, StripeProvider},
    queue::{JobQueue, WorkerPool, QUEUE_PAYMENTS},
    repository::{SqliteRefundRepository, SqliteTransactionRepository},
    webhooks::WebhookProcessor,
    workers::{CreateIntentWorker, RefundWorker},
};

/// How long in-flight jobs and requests get to finish after a shutdown
/// signal.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "remit=debug,tower_http=debug,axum=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let settings = Settings::new().unwrap_or_else(|e| {
        tracing::warn!("Failed to load config: {}. Using defaults.", e);
        Settings::default()
    });

    tracing::info!(
        "Starting remit on {}:{}",
        settings.server.host,
        settings.server.port
    );

    // Initialize database. The pool is the one shared resource; its bounds
    // are explicit because worker concurrency is deliberately decoupled
    // from connection count.
    let db_pool = SqlitePoolOptions::new()
        .max_connections(settings.database.max_connections)
        .min_connections(settings.database.min_connections)
        .connect(&settings.database.url)
        .await?;

    // Run migrations
    sqlx::migrate!("./migrations").run(&db_pool).await?;

    // The provider client is a constructed instance handed to whoever
    // needs it; the API key lives nowhere else.
    let (api_key, webhook_secret) = match (
        settings.stripe.enabled,
        settings.stripe.secret_key.clone(),
        settings.stripe.webhook_secret.clone(),
    ) {
        (true, Some(key), Some(secret)) => (key, secret),
        _ => anyhow::bail!(
            "stripe is not configured; set REMIT__STRIPE__ENABLED, \
             REMIT__STRIPE__SECRET_KEY and REMIT__STRIPE__WEBHOOK_SECRET"
        ),
    };
    let provider = Arc::new(StripeProvider::new(api_key));

    // Initialize repositories
    let transaction_repo = Arc::new(SqliteTransactionRepository::new(db_pool.clone()));
    let refund_repo = Arc::new(SqliteRefundRepository::new(db_pool.clone()));

    // Queue + workers
    let queue = Arc::new(JobQueue::new(db_pool.clone()));
    let fee_policy = FeePolicy::from(&settings.fees);
    if fee_policy.enabled {
        tracing::info!(
            percent = fee_policy.percent,
            flat_cents = fee_policy.flat_cents,
            "processing fees enabled"
        );
    }

    let mut pool = WorkerPool::new(
        queue.clone(),
        &[QUEUE_PAYMENTS],
        settings.queue.concurrency,
        Duration::from_millis(settings.queue.poll_interval_ms),
    );
    pool.register(Arc::new(CreateIntentWorker::new(
        transaction_repo.clone(),
        provider.clone(),
        fee_policy,
    )));
    pool.register(Arc::new(RefundWorker::new(
        transaction_repo.clone(),
        refund_repo.clone(),
        provider.clone(),
        queue.clone(),
    )));

    let shutdown = CancellationToken::new();
    let workers = tokio::spawn(pool.run(shutdown.clone()));

    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("shutdown signal received, draining");
                shutdown.cancel();
            }
        });
    }

    // Webhook receiver + health surface
    let processor = Arc::new(WebhookProcessor::new(db_pool.clone(), webhook_secret));
    let state = AppState::new(processor, provider.name().to_string());
    let app = api::create_app(
        state,
        Duration::from_secs(settings.server.request_timeout_secs),
    );

    let listener = tokio::net::TcpListener::bind(format!(
        "{}:{}",
        settings.server.host, settings.server.port
    ))
    .await?;

    tracing::info!(
        "Listening on http://{}:{}",
        settings.server.host,
        settings.server.port
    );

    let server_shutdown = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { server_shutdown.cancelled().await })
        .await?;

    // The HTTP side is down; give the worker slots the rest of the grace
    // period to finish their in-flight jobs.
    if tokio::time::timeout(SHUTDOWN_GRACE, workers).await.is_err() {
        tracing::warn!("workers did not drain within the grace period");
    }

    tracing::info!("shutdown complete");
    Ok(())
}
