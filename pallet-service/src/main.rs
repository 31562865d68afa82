use anyhow::Result;
use clap::Parser;
use diesel::{Connection, PgConnection};
use diesel_async::pooled_connection::{bb8::Pool, AsyncDieselConnectionManager};
use diesel_async::AsyncPgConnection;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use rdkafka::config::ClientConfig;
use rdkafka::producer::FutureProducer;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use pallet_service::api;
use shared::clock::SystemClock;
use pallet_service::config::Args;
use pallet_service::engine::Engine;
use pallet_service::geocoder::HttpGeocoder;
use pallet_service::outbox::{KafkaPublisher, OutboxProcessor};
use pallet_service::store::PgStore;
use pallet_service::sweep::ReleaseSweep;

const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    // Run migrations first
    info!("Running database migrations...");
    let mut conn = PgConnection::establish(&args.database_url)?;
    conn.run_pending_migrations(MIGRATIONS)
        .map_err(|e| anyhow::anyhow!("Migration error: {}", e))?;
    info!("Migrations completed successfully");

    let config = AsyncDieselConnectionManager::<AsyncPgConnection>::new(&args.database_url);
    let pool = Pool::builder().build(config).await?;
    let store = Arc::new(PgStore::new(pool));

    let producer: FutureProducer = ClientConfig::new()
        .set("bootstrap.servers", &args.kafka_brokers)
        .set("message.timeout.ms", "5000")
        .create()?;

    let geocoder = Arc::new(HttpGeocoder::new(&args.geocoder_url, args.geocoder_timeout())?);
    let engine = Engine::new(
        store.clone(),
        geocoder,
        Arc::new(SystemClock),
        args.engine_settings(),
    );

    let outbox_processor = OutboxProcessor::new(
        store,
        Arc::new(KafkaPublisher::new(producer, args.event_topic.clone())),
        Duration::from_secs(args.outbox_interval_secs),
    );
    let release_sweep = ReleaseSweep::new(
        engine.reservations.clone(),
        Duration::from_secs(args.release_sweep_interval_secs),
    );

    tokio::spawn(async move {
        outbox_processor.run().await;
    });

    tokio::spawn(async move {
        release_sweep.run().await;
    });

    let app = api::create_router(api::AppState { engine });
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", args.port)).await?;

    info!("Pallet service web server started on port {}", args.port);
    info!(
        "Publishing reservation events to {} via {}",
        args.event_topic, args.kafka_brokers
    );

    axum::serve(listener, app).await?;

    Ok(())
}
