use anyhow::Context;
use coachline_api::{app, worker, AppState, RateLimits};
use coachline_booking::{BookingServices, BookingSettings, Collaborators, Repositories};
use coachline_store::app_config::Config;
use coachline_store::{
    DbClient, EventProducer, HttpPaymentGateway, RedisClient, S3ObjectStorage, SmtpMailer, StoreBookingRepository,
    StoreDirectory, StoreOtpRepository, StoreParcelRepository, StorePaymentRepository, StoreScheduleQueue,
};
use prometheus::Registry;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn booking_settings(config: &Config) -> BookingSettings {
    let rules = &config.business_rules;
    BookingSettings {
        booking_waiting: chrono::Duration::minutes(rules.booking_waiting_minutes),
        otp_waiting: chrono::Duration::minutes(rules.otp_waiting_minutes),
        e_ticket_otp_waiting: chrono::Duration::minutes(rules.e_ticket_otp_waiting_minutes),
        gateway_timeout: std::time::Duration::from_secs(rules.gateway_timeout_seconds),
        callback_url: config.service.callback_url(),
        event_topic: config.kafka.topic.clone(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "coachline_api=debug,coachline_booking=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load().context("Failed to load config")?;
    tracing::info!(
        "Starting {} {} on port {}",
        config.service.name,
        config.service.version,
        config.server.port
    );

    // Postgres
    let db = DbClient::new(&config.database)
        .await
        .context("Failed to connect to Postgres")?;
    db.migrate().await.context("Failed to run migrations")?;
    db.ping().await.context("Postgres is not answering")?;
    let pool = db.pool.clone();

    // Redis
    let redis = RedisClient::new(&config.redis.url)
        .await
        .context("Failed to connect to Redis")?;
    if let Err(e) = redis.ping().await {
        // limiter fails open, so keep serving
        tracing::warn!("Redis is not answering: {}", e);
    }

    // Kafka
    let events = EventProducer::new(&config.kafka.brokers).context("Failed to create Kafka producer")?;

    let mailer = SmtpMailer::new(&config.smtp).context("Failed to configure SMTP transport")?;
    let storage = S3ObjectStorage::new(&config.storage).await;
    let gateway = HttpPaymentGateway::new(&config.payment_gateway);

    let directory = Arc::new(StoreDirectory::new(pool.clone()));
    let schedule = Arc::new(StoreScheduleQueue::new(pool.clone()));
    let repos = Repositories {
        bookings: Arc::new(StoreBookingRepository::new(pool.clone())),
        otps: Arc::new(StoreOtpRepository::new(pool.clone())),
        payments: Arc::new(StorePaymentRepository::new(pool.clone())),
        commuters: directory.clone(),
        parcels: Arc::new(StoreParcelRepository::new(pool.clone())),
        trips: directory,
        scheduler: schedule.clone(),
        schedule_source: schedule,
    };
    let collaborators = Collaborators {
        notifier: Arc::new(mailer),
        events: Arc::new(events),
        storage: Arc::new(storage),
        gateway: Arc::new(gateway),
    };

    let registry = Registry::new();
    let services = BookingServices::build(repos, collaborators, booking_settings(&config), &registry)
        .context("Failed to register metrics")?;

    tokio::spawn(worker::start_expiry_worker(
        services.clone(),
        tokio::time::Duration::from_secs(config.worker.poll_interval_seconds),
        config.worker.batch_size,
    ));

    let app_state = AppState {
        services,
        limiter: Arc::new(redis),
        limits: RateLimits {
            requests_per_minute: config.business_rules.requests_per_minute,
            otp_attempts_per_window: config.business_rules.otp_attempts_per_window,
            otp_window_seconds: config.business_rules.otp_window_seconds,
        },
        registry,
        api_prefix: config.service.api_prefix(),
    };

    let app = app(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    tracing::info!("Listening on {}{}", addr, config.service.api_prefix());

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await?;
    Ok(())
}
