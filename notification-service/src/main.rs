use anyhow::Result;
use clap::Parser;
use diesel::{Connection, PgConnection};
use diesel_async::pooled_connection::{bb8::Pool, AsyncDieselConnectionManager};
use diesel_async::AsyncPgConnection;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use shared::clock::SystemClock;
use std::sync::Arc;
use tracing::info;

use notification_service::config::Args;
use notification_service::dispatcher::Dispatcher;
use notification_service::handlers::EventHandler;
use notification_service::ledger::PgLedger;
use notification_service::notifier::HttpMailer;
use notification_service::payment_links::HttpPaymentLinks;

const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    info!("Running database migrations...");
    let mut conn = PgConnection::establish(&args.database_url)?;
    conn.run_pending_migrations(MIGRATIONS)
        .map_err(|e| anyhow::anyhow!("Migration error: {}", e))?;
    info!("Migrations completed successfully");

    let config = AsyncDieselConnectionManager::<AsyncPgConnection>::new(&args.database_url);
    let pool = Pool::builder().build(config).await?;

    let consumer: StreamConsumer = ClientConfig::new()
        .set("group.id", &args.consumer_group)
        .set("bootstrap.servers", &args.kafka_brokers)
        .set("enable.auto.commit", "false")
        .set("auto.offset.reset", "earliest")
        .create()?;
    consumer.subscribe(&[&args.event_topic])?;

    let dispatcher = Dispatcher::new(
        Arc::new(PgLedger::new(pool)),
        Arc::new(HttpPaymentLinks::new(&args.payment_link_url, args.http_timeout())?),
        Arc::new(HttpMailer::new(&args.mailer_url, &args.mailer_from, args.http_timeout())?),
        Arc::new(SystemClock),
        args.retry_policy(),
    );
    let handler = EventHandler::new(Arc::new(dispatcher));

    info!("Notification service started, consuming {}", args.event_topic);
    handler.run(consumer).await;

    Ok(())
}
