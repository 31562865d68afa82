pub mod clock;
pub mod geo;
pub mod model;
pub mod rules;

pub use model::*;
pub use rules::{
    DecisionOutcome, DecisionViolation, ItemDecision, ItemUpdate, PickupZoneResolution,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Side effects requested by committed state transitions. Written to the
/// outbox inside the transition's transaction and published afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReservationEvent {
    PaymentDue {
        reservation_id: Uuid,
        user_id: Uuid,
        customer_email: String,
        pallet_id: Uuid,
        payment_deadline: DateTime<Utc>,
    },
    ProducerDecided {
        reservation_id: Uuid,
        customer_email: String,
        status: ReservationStatus,
        approved_bottles: i64,
        requested_bottles: i64,
    },
    PaymentReleased {
        reservation_id: Uuid,
        customer_email: String,
        pallet_id: Option<Uuid>,
    },
}

impl ReservationEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::PaymentDue { .. } => "PaymentDue",
            Self::ProducerDecided { .. } => "ProducerDecided",
            Self::PaymentReleased { .. } => "PaymentReleased",
        }
    }

    pub fn reservation_id(&self) -> Uuid {
        match self {
            Self::PaymentDue { reservation_id, .. }
            | Self::ProducerDecided { reservation_id, .. }
            | Self::PaymentReleased { reservation_id, .. } => *reservation_id,
        }
    }

    pub fn payment_due(reservation: &Reservation, pallet_id: Uuid, payment_deadline: DateTime<Utc>) -> Self {
        Self::PaymentDue {
            reservation_id: reservation.id,
            user_id: reservation.user_id,
            customer_email: reservation.customer_email.clone(),
            pallet_id,
            payment_deadline,
        }
    }

    pub fn producer_decided(decided: &ReservationWithItems) -> Self {
        Self::ProducerDecided {
            reservation_id: decided.reservation.id,
            customer_email: decided.reservation.customer_email.clone(),
            status: decided.reservation.status,
            approved_bottles: decided.approved_bottles(),
            requested_bottles: decided.requested_bottles(),
        }
    }

    pub fn payment_released(reservation: &Reservation) -> Self {
        Self::PaymentReleased {
            reservation_id: reservation.id,
            customer_email: reservation.customer_email.clone(),
            pallet_id: reservation.pallet_id,
        }
    }
}

/// What travels over the broker: the outbox row id doubles as the
/// consumer-side idempotency key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub id: Uuid,
    pub aggregate_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub event: ReservationEvent,
}

impl EventEnvelope {
    pub fn new(event: ReservationEvent, created_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            aggregate_id: event.reservation_id(),
            created_at,
            event,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_serializes_with_tagged_event() {
        let envelope = EventEnvelope::new(
            ReservationEvent::ProducerDecided {
                reservation_id: Uuid::nil(),
                customer_email: "a@example.com".to_string(),
                status: ReservationStatus::PartlyApproved,
                approved_bottles: 6,
                requested_bottles: 12,
            },
            Utc::now(),
        );
        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["event"]["type"], "producer_decided");
        assert_eq!(json["event"]["status"], "partly_approved");
        let back: EventEnvelope = serde_json::from_value(json).unwrap();
        assert_eq!(back, envelope);
    }
}
