//! In-process store for tests and local runs. A single mutex guards the
//! whole state, so every trait method is trivially atomic.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared::*;
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::*;

#[derive(Debug, Default)]
struct State {
    zones: HashMap<Uuid, Zone>,
    producers: HashMap<Uuid, Producer>,
    wines: HashMap<Uuid, Uuid>,
    pallets: HashMap<Uuid, Pallet>,
    reservations: HashMap<Uuid, Reservation>,
    items: HashMap<Uuid, Vec<ReservationItem>>,
    outbox: Vec<(EventEnvelope, bool)>,
}

impl State {
    fn reserved_total(&self, pallet_id: Uuid) -> i64 {
        self.reservations
            .values()
            .filter(|r| r.pallet_id == Some(pallet_id) && r.status.counts_toward_capacity())
            .flat_map(|r| self.items.get(&r.id).into_iter().flatten())
            .map(|i| i64::from(i.quantity))
            .sum()
    }

    fn open_pallet(&self, lane: Lane) -> Option<&Pallet> {
        self.pallets
            .values()
            .find(|p| p.status == PalletStatus::Open && p.lane() == lane)
    }

    fn origin(&self, wine_id: Uuid) -> Option<WineOrigin> {
        let producer_id = *self.wines.get(&wine_id)?;
        let producer = self.producers.get(&producer_id)?;
        Some(WineOrigin {
            wine_id,
            producer_id,
            pickup_zone_id: producer.pickup_zone_id,
        })
    }

    fn with_items(&self, id: Uuid) -> Option<ReservationWithItems> {
        let reservation = self.reservations.get(&id)?.clone();
        let items = self.items.get(&id).cloned().unwrap_or_default();
        Some(ReservationWithItems { reservation, items })
    }

    fn sorted_reservations(&self) -> Vec<&Reservation> {
        let mut all: Vec<&Reservation> = self.reservations.values().collect();
        all.sort_by_key(|r| (r.created_at, r.id));
        all
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_zone(&self, zone: Zone) {
        self.state.lock().await.zones.insert(zone.id, zone);
    }

    pub async fn insert_producer(&self, producer: Producer) {
        self.state.lock().await.producers.insert(producer.id, producer);
    }

    /// Moves a producer to another pickup zone, the drift the repair job
    /// reconciles.
    pub async fn set_producer_zone(&self, producer_id: Uuid, pickup_zone_id: Option<Uuid>) {
        if let Some(p) = self.state.lock().await.producers.get_mut(&producer_id) {
            p.pickup_zone_id = pickup_zone_id;
        }
    }

    pub async fn insert_wine(&self, wine_id: Uuid, producer_id: Uuid) {
        self.state.lock().await.wines.insert(wine_id, producer_id);
    }

    pub async fn insert_pallet(&self, pallet: Pallet) {
        self.state.lock().await.pallets.insert(pallet.id, pallet);
    }

    /// Overwrites a reservation's status, bypassing every guard.
    pub async fn events(&self) -> Vec<EventEnvelope> {
        self.state
            .lock()
            .await
            .outbox
            .iter()
            .map(|(e, _)| e.clone())
            .collect()
    }
}

#[async_trait]
impl ReservationStore for MemoryStore {
    async fn zones(&self, kind: ZoneKind) -> StoreResult<Vec<Zone>> {
        let state = self.state.lock().await;
        let mut zones: Vec<Zone> = state.zones.values().filter(|z| z.kind == kind).cloned().collect();
        zones.sort_by_key(|z| z.id);
        Ok(zones)
    }

    async fn zone(&self, id: Uuid) -> StoreResult<Option<Zone>> {
        Ok(self.state.lock().await.zones.get(&id).cloned())
    }

    async fn producer_pickup_zone(&self, producer_id: Uuid) -> StoreResult<Option<Option<Uuid>>> {
        Ok(self
            .state
            .lock()
            .await
            .producers
            .get(&producer_id)
            .map(|p| p.pickup_zone_id))
    }

    async fn wine_origins(&self, wine_ids: &[Uuid]) -> StoreResult<Vec<WineOrigin>> {
        let state = self.state.lock().await;
        Ok(wine_ids.iter().filter_map(|id| state.origin(*id)).collect())
    }

    async fn pallet(&self, id: Uuid) -> StoreResult<Option<Pallet>> {
        Ok(self.state.lock().await.pallets.get(&id).cloned())
    }

    async fn pallets(&self) -> StoreResult<Vec<Pallet>> {
        let state = self.state.lock().await;
        let mut pallets: Vec<Pallet> = state.pallets.values().cloned().collect();
        pallets.sort_by_key(|p| (p.created_at, p.id));
        Ok(pallets)
    }

    async fn open_pallet(&self, lane: Lane) -> StoreResult<Option<Pallet>> {
        Ok(self.state.lock().await.open_pallet(lane).cloned())
    }

    async fn get_or_create_open_pallet(
        &self,
        lane: Lane,
        bottle_capacity: i32,
        at: DateTime<Utc>,
    ) -> StoreResult<Pallet> {
        let mut state = self.state.lock().await;
        if let Some(existing) = state.open_pallet(lane) {
            return Ok(existing.clone());
        }
        let pallet = Pallet {
            id: Uuid::new_v4(),
            pickup_zone_id: lane.pickup_zone_id,
            delivery_zone_id: lane.delivery_zone_id,
            bottle_capacity,
            status: PalletStatus::Open,
            is_complete: false,
            completed_at: None,
            payment_deadline: None,
            created_at: at,
        };
        state.pallets.insert(pallet.id, pallet.clone());
        Ok(pallet)
    }

    async fn total_reserved_bottles(&self, pallet_id: Uuid) -> StoreResult<i64> {
        Ok(self.state.lock().await.reserved_total(pallet_id))
    }

    async fn complete_pallet(
        &self,
        pallet_id: Uuid,
        completed_at: DateTime<Utc>,
        payment_deadline: DateTime<Utc>,
    ) -> StoreResult<CompletionCommit> {
        let mut state = self.state.lock().await;
        let Some(pallet) = state.pallets.get(&pallet_id).cloned() else {
            return Ok(CompletionCommit::NotFound);
        };
        if pallet.is_complete {
            return Ok(CompletionCommit::AlreadyComplete);
        }
        if pallet.status != PalletStatus::Open {
            return Ok(CompletionCommit::NotOpen(pallet.status));
        }
        let total = state.reserved_total(pallet_id);
        if total < i64::from(pallet.bottle_capacity) {
            return Ok(CompletionCommit::BelowCapacity { total });
        }

        let flipped = Pallet {
            status: PalletStatus::Complete,
            is_complete: true,
            completed_at: Some(completed_at),
            payment_deadline: Some(payment_deadline),
            ..pallet
        };
        state.pallets.insert(pallet_id, flipped.clone());

        let mut moved = Vec::new();
        let mut events = Vec::new();
        for r in state.reservations.values_mut() {
            if r.pallet_id == Some(pallet_id) && r.status.awaits_completion() {
                r.status = ReservationStatus::PendingPayment;
                r.payment_status = PaymentStatus::Due;
                r.payment_deadline = Some(payment_deadline);
                r.updated_at = completed_at;
                moved.push(r.id);
                events.push(EventEnvelope::new(
                    ReservationEvent::payment_due(r, pallet_id, payment_deadline),
                    completed_at,
                ));
            }
        }
        state.outbox.extend(events.into_iter().map(|e| (e, false)));

        Ok(CompletionCommit::Completed {
            pallet: flipped,
            total,
            moved,
        })
    }

    async fn revert_pallet_completion(
        &self,
        pallet_id: Uuid,
        at: DateTime<Utc>,
    ) -> StoreResult<RevertCommit> {
        let mut state = self.state.lock().await;
        let Some(pallet) = state.pallets.get(&pallet_id).cloned() else {
            return Ok(RevertCommit::NotFound);
        };
        if pallet.status != PalletStatus::Complete {
            return Ok(RevertCommit::NotComplete(pallet.status));
        }
        let settled = state
            .reservations
            .values()
            .any(|r| r.pallet_id == Some(pallet_id) && r.status == ReservationStatus::Confirmed);
        if settled {
            return Ok(RevertCommit::HasSettledReservations);
        }
        let total = state.reserved_total(pallet_id);
        if total >= i64::from(pallet.bottle_capacity) {
            return Ok(RevertCommit::AtCapacity { total });
        }
        if let Some(open) = state.open_pallet(pallet.lane()) {
            return Ok(RevertCommit::LaneOccupied {
                open_pallet_id: open.id,
            });
        }

        let reopened_pallet = Pallet {
            status: PalletStatus::Open,
            is_complete: false,
            completed_at: None,
            payment_deadline: None,
            ..pallet
        };
        state.pallets.insert(pallet_id, reopened_pallet.clone());

        let mut reopened = Vec::new();
        for r in state.reservations.values_mut() {
            if r.pallet_id == Some(pallet_id) && r.status == ReservationStatus::PendingPayment {
                r.status = ReservationStatus::Placed;
                r.payment_status = PaymentStatus::Unpaid;
                r.payment_deadline = None;
                r.updated_at = at;
                reopened.push(r.id);
            }
        }

        Ok(RevertCommit::Reverted {
            pallet: reopened_pallet,
            total,
            reopened,
        })
    }

    async fn insert_reservation(&self, new: NewReservation) -> StoreResult<InsertCommit> {
        let mut state = self.state.lock().await;
        if let Some(pallet_id) = new.pallet_id {
            let open = state
                .pallets
                .get(&pallet_id)
                .is_some_and(|p| p.status == PalletStatus::Open);
            if !open {
                return Ok(InsertCommit::PalletClosed { pallet_id });
            }
        }
        let id = Uuid::new_v4();
        let reservation = Reservation {
            id,
            user_id: new.user_id,
            customer_email: new.customer_email,
            delivery_address: new.delivery_address,
            pallet_id: new.pallet_id,
            pickup_zone_id: new.pickup_zone_id,
            delivery_zone_id: new.delivery_zone_id,
            status: ReservationStatus::Placed,
            payment_status: PaymentStatus::Unpaid,
            payment_deadline: None,
            zone_issue: new.zone_issue,
            producer_approved_at: None,
            producer_rejected_at: None,
            decided_by_producer_id: None,
            created_at: new.created_at,
            updated_at: new.created_at,
        };
        let items: Vec<ReservationItem> = new
            .items
            .iter()
            .map(|item| ReservationItem {
                id: Uuid::new_v4(),
                reservation_id: id,
                wine_id: item.wine_id,
                quantity: item.quantity,
                decision_status: DecisionStatus::Pending,
                approved_quantity: 0,
            })
            .collect();

        state.reservations.insert(id, reservation.clone());
        state.items.insert(id, items.clone());
        Ok(InsertCommit::Inserted(ReservationWithItems { reservation, items }))
    }

    async fn reservation(&self, id: Uuid) -> StoreResult<Option<ReservationWithItems>> {
        Ok(self.state.lock().await.with_items(id))
    }

    async fn apply_decisions(
        &self,
        reservation_id: Uuid,
        deciding_producer: Option<Uuid>,
        decisions: &[ItemDecision],
        at: DateTime<Utc>,
    ) -> StoreResult<DecisionCommit> {
        let mut state = self.state.lock().await;
        let Some(current) = state.with_items(reservation_id) else {
            return Ok(DecisionCommit::NotFound);
        };
        let previous_status = current.reservation.status;
        if !previous_status.accepts_decisions() {
            return Ok(DecisionCommit::NotDecidable(previous_status));
        }

        let origins: HashMap<Uuid, WineOrigin> = current
            .items
            .iter()
            .filter_map(|i| state.origin(i.wine_id))
            .map(|o| (o.wine_id, o))
            .collect();

        let decided = match decide_reservation(&current, &origins, deciding_producer, decisions, at) {
            Ok(decided) => decided,
            Err(violation) => return Ok(DecisionCommit::Rejected(violation)),
        };

        state
            .reservations
            .insert(reservation_id, decided.next.reservation.clone());
        state.items.insert(reservation_id, decided.next.items.clone());
        if let Some(event) = decided.event {
            state.outbox.push((event, false));
        }

        Ok(DecisionCommit::Applied {
            reservation: decided.next,
            outcome: decided.outcome,
            previous_status,
        })
    }

    async fn transition_reservation(
        &self,
        reservation_id: Uuid,
        transition: Transition,
    ) -> StoreResult<TransitionCommit> {
        let mut state = self.state.lock().await;
        let Some(r) = state.reservations.get_mut(&reservation_id) else {
            return Ok(TransitionCommit::NotFound);
        };
        if !transition.from.contains(&r.status) {
            return Ok(TransitionCommit::Rejected(r.status));
        }
        r.status = transition.to;
        if let Some(payment_status) = transition.payment_status {
            r.payment_status = payment_status;
        }
        r.updated_at = transition.at;
        Ok(TransitionCommit::Applied(r.clone()))
    }

    async fn active_reservation_ids(&self) -> StoreResult<Vec<Uuid>> {
        let state = self.state.lock().await;
        Ok(state
            .sorted_reservations()
            .into_iter()
            .filter(|r| r.status.is_active())
            .map(|r| r.id)
            .collect())
    }

    async fn reassign_reservation(
        &self,
        reservation_id: Uuid,
        reassignment: Reassignment,
    ) -> StoreResult<bool> {
        let mut state = self.state.lock().await;
        let Some(r) = state.reservations.get_mut(&reservation_id) else {
            return Ok(false);
        };
        if !r.status.is_active() || r.assignment() != reassignment.expected {
            return Ok(false);
        }
        r.pickup_zone_id = reassignment.next.pickup_zone_id;
        r.pallet_id = reassignment.next.pallet_id;
        r.zone_issue = reassignment.zone_issue;
        r.updated_at = reassignment.at;
        Ok(true)
    }

    async fn release_expired(&self, now: DateTime<Utc>) -> StoreResult<Vec<Reservation>> {
        let mut state = self.state.lock().await;
        let mut released = Vec::new();
        for r in state.reservations.values_mut() {
            let expired = r.payment_deadline.is_some_and(|d| d < now);
            if r.status == ReservationStatus::PendingPayment && expired {
                r.status = ReservationStatus::Released;
                r.payment_status = PaymentStatus::Expired;
                r.updated_at = now;
                released.push(r.clone());
            }
        }
        let events = released
            .iter()
            .map(|r| (EventEnvelope::new(ReservationEvent::payment_released(r), now), false));
        state.outbox.extend(events);
        Ok(released)
    }

    async fn flagged_reservations(&self) -> StoreResult<Vec<Reservation>> {
        let state = self.state.lock().await;
        Ok(state
            .sorted_reservations()
            .into_iter()
            .filter(|r| r.status.is_active() && r.zone_issue.is_some())
            .cloned()
            .collect())
    }

    async fn unprocessed_events(&self, limit: i64) -> StoreResult<Vec<EventEnvelope>> {
        let state = self.state.lock().await;
        Ok(state
            .outbox
            .iter()
            .filter(|(_, processed)| !processed)
            .take(usize::try_from(limit).unwrap_or(0))
            .map(|(e, _)| e.clone())
            .collect())
    }

    async fn mark_event_processed(&self, id: Uuid) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        if let Some((_, processed)) = state.outbox.iter_mut().find(|(e, _)| e.id == id) {
            *processed = true;
        }
        Ok(())
    }
}
