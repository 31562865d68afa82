use futures::StreamExt;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::Message;
use shared::EventEnvelope;
use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::dispatcher::{DispatchOutcome, Dispatcher};

pub struct EventHandler {
    dispatcher: Arc<Dispatcher>,
}

impl EventHandler {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self { dispatcher }
    }

    pub async fn run(&self, consumer: StreamConsumer) {
        let mut message_stream = consumer.stream();

        while let Some(message) = message_stream.next().await {
            match message {
                Ok(m) => {
                    if let Some(payload) = m.payload_view::<str>() {
                        match payload {
                            Ok(json_str) => self.handle_payload(json_str).await,
                            Err(e) => error!("Error parsing payload: {}", e),
                        }
                    }
                    if let Err(e) = consumer.commit_message(&m, CommitMode::Async) {
                        error!("Error committing message: {}", e);
                    }
                }
                Err(e) => error!("Error receiving message: {}", e),
            }
        }
    }

    async fn handle_payload(&self, json_str: &str) {
        let envelope = match serde_json::from_str::<EventEnvelope>(json_str) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!("Skipping unreadable event: {}", e);
                return;
            }
        };

        match self.dispatcher.handle(&envelope).await {
            Ok(DispatchOutcome::Failed { reason }) => {
                warn!(event_id = %envelope.id, %reason, "Event recorded as failed");
            }
            Ok(outcome) => debug!(event_id = %envelope.id, ?outcome, "Event handled"),
            Err(e) => error!(event_id = %envelope.id, "Error handling event: {}", e),
        }
    }
}
