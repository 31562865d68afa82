use chrono::{DateTime, Utc};
use serde::Serialize;
use shared::clock::Clock;
use shared::{EventEnvelope, ReservationEvent};
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::DispatchError;
use crate::ledger::{DeliveryLedger, DeliveryStatus};
use crate::notifier::{ApprovalEmail, Notifier, PaymentDueEmail};
use crate::payment_links::{PaymentLink, PaymentLinkService};
use crate::retry::{retry_with_backoff, RetryPolicy};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DispatchOutcome {
    /// An email went out.
    Sent,
    /// The event needs no message; it was only recorded.
    Logged,
    /// The event id was handled before.
    Duplicate,
    /// Delivery gave up. The event is recorded as failed and not retried.
    Failed { reason: String },
}

/// Turns reservation events into customer notifications, at most once per
/// event id.
pub struct Dispatcher {
    ledger: Arc<dyn DeliveryLedger>,
    links: Arc<dyn PaymentLinkService>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    retry: RetryPolicy,
}

impl Dispatcher {
    pub fn new(
        ledger: Arc<dyn DeliveryLedger>,
        links: Arc<dyn PaymentLinkService>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            ledger,
            links,
            notifier,
            clock,
            retry,
        }
    }

    pub async fn handle(&self, envelope: &EventEnvelope) -> Result<DispatchOutcome, DispatchError> {
        let event_type = envelope.event.event_type();
        let claimed = self
            .ledger
            .claim_event(envelope.id, event_type, self.clock.now())
            .await?;
        if !claimed {
            info!(event_id = %envelope.id, event_type, "Event already handled, skipping");
            return Ok(DispatchOutcome::Duplicate);
        }

        let outcome = match self.deliver(&envelope.event).await {
            Ok(status) => {
                self.ledger.finish_event(envelope.id, status, self.clock.now()).await?;
                match status {
                    DeliveryStatus::Logged => DispatchOutcome::Logged,
                    _ => DispatchOutcome::Sent,
                }
            }
            Err(err) => {
                error!(
                    event_id = %envelope.id,
                    event_type,
                    reservation_id = %envelope.aggregate_id,
                    error = %err,
                    "Notification delivery failed"
                );
                self.ledger
                    .finish_event(envelope.id, DeliveryStatus::Failed, self.clock.now())
                    .await?;
                DispatchOutcome::Failed {
                    reason: err.to_string(),
                }
            }
        };
        Ok(outcome)
    }

    async fn deliver(&self, event: &ReservationEvent) -> Result<DeliveryStatus, DispatchError> {
        match event {
            ReservationEvent::PaymentDue {
                reservation_id,
                customer_email,
                payment_deadline,
                ..
            } => {
                let link = self.payment_link(*reservation_id, *payment_deadline).await?;
                let email = PaymentDueEmail {
                    reservation_id: *reservation_id,
                    payment_url: link.url,
                    payment_deadline: *payment_deadline,
                };
                retry_with_backoff(self.retry, || self.notifier.send_payment_due_email(customer_email, &email)).await?;
                info!(reservation_id = %reservation_id, "Payment due email sent");
                Ok(DeliveryStatus::Sent)
            }
            ReservationEvent::ProducerDecided {
                reservation_id,
                customer_email,
                status,
                approved_bottles,
                requested_bottles,
            } => {
                let email = ApprovalEmail {
                    reservation_id: *reservation_id,
                    status: *status,
                    approved_bottles: *approved_bottles,
                    requested_bottles: *requested_bottles,
                };
                retry_with_backoff(self.retry, || self.notifier.send_approval_email(customer_email, &email)).await?;
                info!(reservation_id = %reservation_id, status = %status.as_str(), "Decision email sent");
                Ok(DeliveryStatus::Sent)
            }
            ReservationEvent::PaymentReleased {
                reservation_id,
                pallet_id,
                ..
            } => {
                info!(
                    reservation_id = %reservation_id,
                    pallet_id = ?pallet_id,
                    "Reservation released after missed payment deadline"
                );
                Ok(DeliveryStatus::Logged)
            }
        }
    }

    /// Reuses an unexpired link for the reservation before asking for a new one.
    async fn payment_link(&self, reservation_id: Uuid, expires_at: DateTime<Utc>) -> Result<PaymentLink, DispatchError> {
        let now = self.clock.now();
        if let Some(link) = self.ledger.cached_link(reservation_id, now).await? {
            return Ok(link);
        }
        if expires_at <= now {
            warn!(reservation_id = %reservation_id, "Payment deadline already passed when creating link");
        }

        let link = retry_with_backoff(self.retry, || self.links.create_payment_link(reservation_id, expires_at)).await?;
        self.ledger.store_link(reservation_id, &link, now).await?;
        Ok(link)
    }
}
