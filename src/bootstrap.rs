use sqlx::{postgres::PgPoolOptions, PgPool};
use std::{sync::Arc, time::Duration};
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    api::handler::AppState,
    config::Config,
    error::{AppError, AppResult},
    gateway::{GatewayRetryClient, PortOneClient, PortOneConfig},
    lock::{InMemoryLockService, LockService, PgLockService},
    payment::{PaymentQuery, PaymentRepository},
    settlement::{
        FailureNotifier, FanoutNotifier, LoggingNotifier, SettlementFailureLog, SettlementRepository,
        SettlementScheduler, SettlementWriter, WebhookNotifier,
    },
};

pub async fn initialize_app_state(config: &Config) -> AppResult<AppState> {
    info!("Initializing application components ...");

    // Database pool
    let pool = initialize_database(&config.database_url, config.database_max_connections).await?;

    // Repositories
    let payments: Arc<dyn PaymentQuery> = Arc::new(PaymentRepository::new(pool.clone()));
    let settlements = Arc::new(SettlementRepository::new(pool.clone(), config.settlement_upsert));
    info!(
        "✅ Repositories initialized (settlement writes: {})",
        if config.settlement_upsert { "upsert" } else { "insert" }
    );

    // Cluster-wide lock
    let locks: Arc<dyn LockService> = match config.settlement_lock_backend.to_ascii_lowercase().as_str() {
        "postgres" => {
            let instance = std::env::var("HOSTNAME").unwrap_or_else(|_| Uuid::new_v4().to_string());
            info!("✅ Postgres lock service initialized for instance {}", instance);
            Arc::new(PgLockService::new(pool.clone(), instance))
        }
        "memory" => {
            warn!("⚠️  In-memory settlement lock - only safe with a single instance");
            Arc::new(InMemoryLockService::new())
        }
        other => {
            return Err(AppError::Config(format!("Unknown SETTLEMENT_LOCK_BACKEND: {}", other)));
        }
    };

    let writer = Arc::new(SettlementWriter::new(settlements, config.writer_config()?));

    // Failure sinks
    let mut sinks: Vec<Arc<dyn FailureNotifier>> = vec![
        Arc::new(LoggingNotifier),
        Arc::new(SettlementFailureLog::new(pool.clone())),
    ];
    match &config.settlement_alert_webhook_url {
        Some(url) if !url.is_empty() => {
            sinks.push(Arc::new(WebhookNotifier::new(
                url.clone(),
                Duration::from_millis(config.settlement_notify_timeout_ms),
            )?));
            info!("✅ Settlement failure webhook registered");
        }
        _ => warn!("⚠️  SETTLEMENT_ALERT_WEBHOOK_URL not set - failures are logged and recorded only"),
    }
    let notifier = Arc::new(FanoutNotifier::new(sinks));

    let scheduler = Arc::new(SettlementScheduler::new(
        config.schedule_config()?,
        locks,
        payments.clone(),
        writer,
        notifier,
    ));
    info!("✅ Settlement scheduler initialized");

    // Payment gateway
    if config.portone_imp_key.is_empty() {
        warn!("⚠️  PORTONE_IMP_KEY not set - gateway calls will be rejected");
    }
    let gateway = Arc::new(PortOneClient::new(
        PortOneConfig {
            base_url: config.portone_base_url.clone(),
            imp_key: config.portone_imp_key.clone(),
            imp_secret: config.portone_imp_secret.clone(),
            timeout: Duration::from_secs(config.portone_timeout_secs),
        },
        GatewayRetryClient::new(config.retry_policy()),
    )?);
    info!("✅ PortOne client initialized: {}", config.portone_base_url);

    Ok(AppState {
        scheduler,
        payments,
        gateway,
    })
}

async fn initialize_database(database_url: &str, max_connections: u32) -> AppResult<PgPool> {
    info!("📊 Connecting to database...");

    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(30))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(database_url)
        .await?;

    info!("✓ Database pool configured: {} max connections", max_connections);

    // Run migrations
    info!("🔄 Running database migrations...");
    sqlx::migrate!("./migrations").run(&pool).await?;

    info!("✓ Database initialized");
    Ok(pool)
}
