//! Persistence seam of the engine.
//!
//! Every method is one atomic unit against the backing store: compound
//! transitions (completion, revert, decisions) read and write inside a
//! single transaction, and the outbox rows a transition needs are written
//! in that same transaction.

pub mod memory;
pub mod pg;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared::{
    rules, Assignment, DecisionOutcome, DecisionViolation, EventEnvelope, ItemDecision,
    ItemUpdate, Lane, Pallet, PaymentStatus, Reservation, ReservationEvent, ReservationStatus,
    ReservationWithItems, WineOrigin, Zone, ZoneIssue, ZoneKind,
};
use std::collections::HashMap;
use uuid::Uuid;

pub use memory::MemoryStore;
pub use pg::PgStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),
    #[error("connection pool error: {0}")]
    Pool(String),
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

impl From<shared::ParseStatusError> for StoreError {
    fn from(e: shared::ParseStatusError) -> Self {
        Self::Corrupt(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        Self::Corrupt(e.to_string())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Clone)]
pub struct NewItem {
    pub wine_id: Uuid,
    pub quantity: i32,
}

#[derive(Debug, Clone)]
pub struct NewReservation {
    pub user_id: Uuid,
    pub customer_email: String,
    pub delivery_address: String,
    pub pallet_id: Option<Uuid>,
    pub pickup_zone_id: Option<Uuid>,
    pub delivery_zone_id: Option<Uuid>,
    pub zone_issue: Option<ZoneIssue>,
    pub items: Vec<NewItem>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum InsertCommit {
    Inserted(ReservationWithItems),
    /// The target pallet was no longer open when the insert ran; nothing
    /// was written.
    PalletClosed { pallet_id: Uuid },
}

#[derive(Debug, Clone, PartialEq)]
pub enum CompletionCommit {
    /// This call flipped the pallet; these reservations now await payment.
    Completed {
        pallet: Pallet,
        total: i64,
        moved: Vec<Uuid>,
    },
    /// Another caller already completed the pallet.
    AlreadyComplete,
    BelowCapacity { total: i64 },
    NotOpen(shared::PalletStatus),
    NotFound,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RevertCommit {
    Reverted {
        pallet: Pallet,
        total: i64,
        reopened: Vec<Uuid>,
    },
    NotComplete(shared::PalletStatus),
    AtCapacity { total: i64 },
    HasSettledReservations,
    LaneOccupied { open_pallet_id: Uuid },
    NotFound,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DecisionCommit {
    Applied {
        reservation: ReservationWithItems,
        outcome: DecisionOutcome,
        previous_status: ReservationStatus,
    },
    Rejected(DecisionViolation),
    NotDecidable(ReservationStatus),
    NotFound,
}

/// A guarded single-reservation status change.
#[derive(Debug, Clone, Copy)]
pub struct Transition {
    pub from: &'static [ReservationStatus],
    pub to: ReservationStatus,
    pub payment_status: Option<PaymentStatus>,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransitionCommit {
    Applied(Reservation),
    Rejected(ReservationStatus),
    NotFound,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reassignment {
    pub expected: Assignment,
    pub next: Assignment,
    pub zone_issue: Option<ZoneIssue>,
    pub at: DateTime<Utc>,
}

/// A decision batch worked through against the rows read in the caller's
/// transaction; the store only has to persist it.
#[derive(Debug, Clone)]
pub(crate) struct DecidedReservation {
    pub next: ReservationWithItems,
    pub updates: Vec<ItemUpdate>,
    pub outcome: DecisionOutcome,
    pub event: Option<EventEnvelope>,
}

pub(crate) fn decide_reservation(
    current: &ReservationWithItems,
    origins: &HashMap<Uuid, WineOrigin>,
    deciding_producer: Option<Uuid>,
    decisions: &[ItemDecision],
    at: DateTime<Utc>,
) -> Result<DecidedReservation, DecisionViolation> {
    let updates = rules::validate_decisions(&current.items, origins, deciding_producer, decisions)?;
    let items = rules::apply_updates(&current.items, &updates);
    let outcome = rules::aggregate_decisions(&items);

    let previous = &current.reservation;
    let mut reservation = previous.clone();
    reservation.status = rules::status_after_decisions(previous.status, outcome);
    match outcome {
        DecisionOutcome::Undecided => {}
        DecisionOutcome::Declined => {
            reservation.producer_rejected_at = Some(at);
            reservation.producer_approved_at = None;
        }
        DecisionOutcome::Approved | DecisionOutcome::PartlyApproved => {
            reservation.producer_approved_at = Some(at);
            reservation.producer_rejected_at = None;
        }
    }
    if outcome != DecisionOutcome::Undecided {
        reservation.decided_by_producer_id = deciding_producer.or(previous.decided_by_producer_id);
    }
    reservation.updated_at = at;

    let next = ReservationWithItems { reservation, items };
    let newly_decided = outcome != DecisionOutcome::Undecided
        && (next.reservation.status != previous.status
            || next.approved_bottles() != current.approved_bottles());
    let event = newly_decided.then(|| EventEnvelope::new(ReservationEvent::producer_decided(&next), at));

    Ok(DecidedReservation {
        next,
        updates,
        outcome,
        event,
    })
}

#[async_trait]
pub trait ReservationStore: Send + Sync {
    async fn zones(&self, kind: ZoneKind) -> StoreResult<Vec<Zone>>;
    async fn zone(&self, id: Uuid) -> StoreResult<Option<Zone>>;
    async fn producer_pickup_zone(&self, producer_id: Uuid) -> StoreResult<Option<Option<Uuid>>>;
    /// Origins of the requested wines; unknown wines are simply absent.
    async fn wine_origins(&self, wine_ids: &[Uuid]) -> StoreResult<Vec<WineOrigin>>;

    async fn pallet(&self, id: Uuid) -> StoreResult<Option<Pallet>>;
    async fn pallets(&self) -> StoreResult<Vec<Pallet>>;
    async fn open_pallet(&self, lane: Lane) -> StoreResult<Option<Pallet>>;
    /// Returns the lane's open pallet, inserting one when none exists.
    /// Concurrent callers for the same lane all observe the same pallet.
    async fn get_or_create_open_pallet(
        &self,
        lane: Lane,
        bottle_capacity: i32,
        at: DateTime<Utc>,
    ) -> StoreResult<Pallet>;
    async fn total_reserved_bottles(&self, pallet_id: Uuid) -> StoreResult<i64>;
    /// Compare-and-set `is_complete: false -> true`, re-checking capacity
    /// inside the transaction.
    async fn complete_pallet(
        &self,
        pallet_id: Uuid,
        completed_at: DateTime<Utc>,
        payment_deadline: DateTime<Utc>,
    ) -> StoreResult<CompletionCommit>;
    async fn revert_pallet_completion(
        &self,
        pallet_id: Uuid,
        at: DateTime<Utc>,
    ) -> StoreResult<RevertCommit>;

    /// Inserts the reservation and its items. A target pallet is re-read
    /// inside the same unit and must still be open.
    async fn insert_reservation(&self, new: NewReservation) -> StoreResult<InsertCommit>;
    async fn reservation(&self, id: Uuid) -> StoreResult<Option<ReservationWithItems>>;
    async fn apply_decisions(
        &self,
        reservation_id: Uuid,
        deciding_producer: Option<Uuid>,
        decisions: &[ItemDecision],
        at: DateTime<Utc>,
    ) -> StoreResult<DecisionCommit>;
    async fn transition_reservation(
        &self,
        reservation_id: Uuid,
        transition: Transition,
    ) -> StoreResult<TransitionCommit>;
    async fn active_reservation_ids(&self) -> StoreResult<Vec<Uuid>>;
    /// Writes `next` only while the row still holds `expected`.
    async fn reassign_reservation(
        &self,
        reservation_id: Uuid,
        reassignment: Reassignment,
    ) -> StoreResult<bool>;
    async fn release_expired(&self, now: DateTime<Utc>) -> StoreResult<Vec<Reservation>>;
    async fn flagged_reservations(&self) -> StoreResult<Vec<Reservation>>;

    async fn unprocessed_events(&self, limit: i64) -> StoreResult<Vec<EventEnvelope>>;
    async fn mark_event_processed(&self, id: Uuid) -> StoreResult<()>;
}
