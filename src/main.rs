//! Procura Billing service
//!
//! - `POST /webhooks/payments` - Processor webhook receiver
//! - `GET /subscriptions/:id` - Subscription read view
//! - `GET /health` - Liveness probe
//!
//! A background task resolves stale pending charges and expires lapsed
//! subscriptions every `billing.sweep_interval_secs`.

use std::sync::Arc;

use axum::Router;
use secrecy::SecretString;
use tokio::signal;
use tower::ServiceBuilder;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use procura_billing::adapters::{
    billing_router, run_migrations, BillingAppState, InMemoryAffiliateDirectory,
    InMemoryAuditLog, InMemoryEventBus, InMemoryIdempotencyStore,
    InMemorySubscriptionRepository, PostgresAffiliateDirectory, PostgresAuditLogRepository,
    PostgresIdempotencyStore, PostgresSubscriptionRepository, SandboxGateway, StripeConfig,
    StripeGateway,
};
use procura_billing::application::billing::{
    AuditRecorder, CommissionGenerator, PaymentOrchestrator, RetryExecutor, SubscriptionLedger,
};
use procura_billing::config::{AppConfig, ConfigError, GatewayKind, PaymentConfig};
use procura_billing::ports::{
    AffiliateDirectory, AuditLogRepository, Clock, EventSubscriber, IdempotencyStore,
    PaymentGateway, SubscriptionRepository, SystemClock,
};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

struct Storage {
    subscriptions: Arc<dyn SubscriptionRepository>,
    idempotency: Arc<dyn IdempotencyStore>,
    audit_log: Arc<dyn AuditLogRepository>,
    affiliates: Arc<dyn AffiliateDirectory>,
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let config = AppConfig::load()?;
    init_tracing(&config);
    config.validate().map_err(ConfigError::from)?;

    tracing::info!(
        environment = ?config.server.environment,
        gateway = ?config.payment.gateway,
        persistent = config.database.is_some(),
        "Starting Procura Billing"
    );

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let storage = build_storage(&config).await?;
    let gateway = build_gateway(&config.payment, clock.clone())?;

    let bus = Arc::new(InMemoryEventBus::without_history());
    let audit = Arc::new(AuditRecorder::new(storage.audit_log));
    let ledger = Arc::new(SubscriptionLedger::new(
        storage.subscriptions,
        config.billing.default_grace_period_days,
    ));

    let commissions = CommissionGenerator::new(
        storage.affiliates,
        audit.clone(),
        bus.clone(),
        clock.clone(),
        config.billing.commission_rate_bps,
    );
    bus.subscribe_all(&CommissionGenerator::event_types(), Arc::new(commissions));

    let orchestrator = Arc::new(PaymentOrchestrator::new(
        gateway,
        ledger,
        storage.idempotency,
        audit,
        bus,
        RetryExecutor::new(config.billing.retry_policy()),
        clock.clone(),
    ));

    let sweeper = tokio::spawn(run_sweeps(orchestrator.clone(), clock, config.clone()));

    let app = build_router(BillingAppState::new(orchestrator), &config);
    let addr = config.server.socket_addr()?;
    tracing::info!("HTTP server listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    sweeper.abort();
    tracing::info!("Shutdown complete");
    Ok(())
}

fn init_tracing(config: &AppConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.server.log_level));

    if config.is_production() {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

async fn build_storage(config: &AppConfig) -> Result<Storage, BoxError> {
    let Some(database) = &config.database else {
        tracing::warn!("No database configured, using in-memory storage");
        return Ok(Storage {
            subscriptions: Arc::new(InMemorySubscriptionRepository::new()),
            idempotency: Arc::new(InMemoryIdempotencyStore::new()),
            audit_log: Arc::new(InMemoryAuditLog::new()),
            affiliates: Arc::new(InMemoryAffiliateDirectory::new()),
        });
    };

    let pool = database.connect().await?;
    tracing::info!("Database pool created");
    if database.run_migrations {
        run_migrations(&pool).await?;
        tracing::info!("Migrations applied");
    }

    Ok(Storage {
        subscriptions: Arc::new(PostgresSubscriptionRepository::new(pool.clone())),
        idempotency: Arc::new(PostgresIdempotencyStore::new(pool.clone())),
        audit_log: Arc::new(PostgresAuditLogRepository::new(pool.clone())),
        affiliates: Arc::new(PostgresAffiliateDirectory::new(pool)),
    })
}

fn build_gateway(
    payment: &PaymentConfig,
    clock: Arc<dyn Clock>,
) -> Result<Arc<dyn PaymentGateway>, BoxError> {
    let webhook_secret = payment
        .webhook_secret
        .clone()
        .ok_or("payment.webhook_secret is required")?;

    match payment.gateway {
        GatewayKind::Sandbox => Ok(Arc::new(SandboxGateway::new(webhook_secret))),
        GatewayKind::Stripe => {
            let api_key: SecretString = payment
                .stripe_api_key
                .clone()
                .ok_or("payment.stripe_api_key is required")?;
            let stripe_config = StripeConfig::new(api_key, webhook_secret)
                .with_base_url(payment.api_base_url.clone())
                .with_require_livemode(payment.require_livemode)
                .with_webhook_tolerance_secs(payment.webhook_tolerance_secs);
            Ok(Arc::new(StripeGateway::new(stripe_config, clock)?))
        }
    }
}

fn build_router(state: BillingAppState, config: &AppConfig) -> Router {
    let middleware = ServiceBuilder::new()
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(TimeoutLayer::new(config.server.request_timeout()));

    billing_router(state).layer(middleware)
}

/// Resolves stale pending charges, then expires lapsed subscriptions.
async fn run_sweeps(orchestrator: Arc<PaymentOrchestrator>, clock: Arc<dyn Clock>, config: AppConfig) {
    let mut interval = tokio::time::interval(config.billing.sweep_interval());
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let pending_timeout = config.billing.pending_timeout();

    loop {
        interval.tick().await;
        let now = clock.now();

        match orchestrator.sweep_stale_pending(now, pending_timeout).await {
            Ok(report) if report.examined > 0 => tracing::info!(
                examined = report.examined,
                settled = report.settled,
                timed_out = report.timed_out,
                errors = report.errors,
                "pending sweep finished"
            ),
            Ok(_) => {}
            Err(err) => tracing::error!(error = %err, "pending sweep failed"),
        }

        match orchestrator.expire_overdue(now).await {
            Ok(expired) if !expired.is_empty() => {
                tracing::info!(count = expired.len(), "subscriptions expired")
            }
            Ok(_) => {}
            Err(err) => tracing::error!(error = %err, "expiration sweep failed"),
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("Shutdown signal received, starting graceful shutdown");
}
