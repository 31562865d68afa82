use anyhow::Result;
use async_trait::async_trait;
use rdkafka::producer::{FutureProducer, FutureRecord};
use shared::EventEnvelope;
use std::sync::Arc;
use std::time::Duration;
use tokio::time;
use tracing::{error, info};

use crate::store::ReservationStore;

const BATCH_SIZE: i64 = 100;

#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, envelope: &EventEnvelope) -> Result<()>;
}

pub struct KafkaPublisher {
    producer: FutureProducer,
    topic: String,
}

impl KafkaPublisher {
    pub fn new(producer: FutureProducer, topic: impl Into<String>) -> Self {
        Self {
            producer,
            topic: topic.into(),
        }
    }
}

#[async_trait]
impl EventPublisher for KafkaPublisher {
    async fn publish(&self, envelope: &EventEnvelope) -> Result<()> {
        let json = serde_json::to_string(envelope)?;
        let key = envelope.aggregate_id.to_string();
        let record = FutureRecord::to(&self.topic).payload(&json).key(&key);

        self.producer
            .send(record, Duration::from_secs(5))
            .await
            .map_err(|(e, _)| anyhow::anyhow!("Failed to publish event: {}", e))?;
        Ok(())
    }
}

/// Drains committed outbox rows to the event topic. Rows are marked only
/// after the broker accepted them, so a crash replays rather than drops.
pub struct OutboxProcessor {
    store: Arc<dyn ReservationStore>,
    publisher: Arc<dyn EventPublisher>,
    interval: Duration,
}

impl OutboxProcessor {
    pub fn new(
        store: Arc<dyn ReservationStore>,
        publisher: Arc<dyn EventPublisher>,
        interval: Duration,
    ) -> Self {
        Self {
            store,
            publisher,
            interval,
        }
    }

    pub async fn run(&self) {
        let mut interval = time::interval(self.interval);

        loop {
            interval.tick().await;

            if let Err(e) = self.process_outbox_events().await {
                error!("Error processing outbox events: {}", e);
            }
        }
    }

    /// One drain pass; returns how many events were published.
    pub async fn process_outbox_events(&self) -> Result<usize> {
        let unprocessed = self.store.unprocessed_events(BATCH_SIZE).await?;

        let mut published = 0;
        for envelope in unprocessed {
            if let Err(e) = self.publisher.publish(&envelope).await {
                error!("Failed to publish event {}: {}", envelope.id, e);
                continue;
            }

            self.store.mark_event_processed(envelope.id).await?;
            published += 1;
            info!(
                "Published outbox event {} ({}) for reservation {}",
                envelope.id,
                envelope.event.event_type(),
                envelope.aggregate_id
            );
        }

        Ok(published)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, NewItem, NewReservation};
    use uuid::Uuid;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct Recording {
        sent: Mutex<Vec<EventEnvelope>>,
        fail: bool,
    }

    #[async_trait]
    impl EventPublisher for Recording {
        async fn publish(&self, envelope: &EventEnvelope) -> Result<()> {
            if self.fail {
                anyhow::bail!("broker down");
            }
            self.sent.lock().await.push(envelope.clone());
            Ok(())
        }
    }

    #[tokio::test]
    async fn empty_outbox_publishes_nothing() {
        let store = Arc::new(MemoryStore::new());
        let publisher = Arc::new(Recording::default());
        let processor = OutboxProcessor::new(store, publisher.clone(), Duration::from_secs(1));

        assert_eq!(processor.process_outbox_events().await.unwrap(), 0);
        assert!(publisher.sent.lock().await.is_empty());
    }

    async fn store_with_due_payment() -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        let now = chrono::Utc::now();
        let lane = shared::Lane {
            pickup_zone_id: Uuid::new_v4(),
            delivery_zone_id: Uuid::new_v4(),
        };
        let pallet = store.get_or_create_open_pallet(lane, 1, now).await.unwrap();
        store
            .insert_reservation(NewReservation {
                user_id: Uuid::new_v4(),
                customer_email: "ana@example.com".to_string(),
                delivery_address: "Hauptstr. 1, 10115 Berlin, DE".to_string(),
                pallet_id: Some(pallet.id),
                pickup_zone_id: Some(lane.pickup_zone_id),
                delivery_zone_id: Some(lane.delivery_zone_id),
                zone_issue: None,
                items: vec![NewItem {
                    wine_id: Uuid::new_v4(),
                    quantity: 1,
                }],
                created_at: now,
            })
            .await
            .unwrap();
        store
            .complete_pallet(pallet.id, now, now + chrono::Duration::days(7))
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn published_events_are_marked_once() {
        let store = store_with_due_payment().await;
        let publisher = Arc::new(Recording::default());
        let processor = OutboxProcessor::new(store.clone(), publisher.clone(), Duration::from_secs(1));

        assert_eq!(processor.process_outbox_events().await.unwrap(), 1);
        assert_eq!(processor.process_outbox_events().await.unwrap(), 0);

        let sent = publisher.sent.lock().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].event.event_type(), "PaymentDue");
    }

    #[tokio::test]
    async fn failed_publish_leaves_rows_unprocessed() {
        let store = store_with_due_payment().await;
        let publisher = Arc::new(Recording {
            fail: true,
            ..Recording::default()
        });
        let processor = OutboxProcessor::new(store.clone(), publisher, Duration::from_secs(1));

        assert_eq!(processor.process_outbox_events().await.unwrap(), 0);
        assert_eq!(store.unprocessed_events(10).await.unwrap().len(), 1);
    }
}
