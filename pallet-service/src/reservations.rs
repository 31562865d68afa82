use serde::{Deserialize, Serialize};
use shared::{
    PaymentStatus, PickupZoneResolution, Reservation, ReservationStatus, ReservationWithItems,
    ZoneIssue,
};
use shared::clock::Clock;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::actor::{Actor, Role};
use crate::completion::{CompletionOutcome, CompletionTrigger};
use crate::error::{EngineError, EngineResult};
use crate::geocoder::Address;
use crate::pallets::PalletResolver;
use crate::store::{
    InsertCommit, NewItem, NewReservation, ReservationStore, Transition, TransitionCommit,
};
use crate::zones::{DeliveryMatch, ZoneMatcher};

const CANCELLABLE: &[ReservationStatus] = &[
    ReservationStatus::Placed,
    ReservationStatus::Approved,
    ReservationStatus::PartlyApproved,
    ReservationStatus::PendingPayment,
];

const PAYABLE: &[ReservationStatus] = &[ReservationStatus::PendingPayment];

/// Pallet lookups per create before the reservation is stored unassigned.
const INSERT_ATTEMPTS: usize = 3;

/// Flag for a reservation that could not be placed on a pallet, most
/// blocking cause first.
fn zone_issue(pickup: &PickupZoneResolution, delivery: &DeliveryMatch, has_pallet: bool) -> Option<ZoneIssue> {
    match (pickup, delivery) {
        (PickupZoneResolution::Ambiguous { .. }, _) => Some(ZoneIssue::MultiplePickupZones),
        (PickupZoneResolution::Unresolved, _) => Some(ZoneIssue::NoPickupZone),
        (_, DeliveryMatch::Unavailable(_)) => Some(ZoneIssue::GeocodingFailed),
        (_, DeliveryMatch::OutsideServedArea) => Some(ZoneIssue::NoDeliveryZone),
        _ if has_pallet => None,
        _ => Some(ZoneIssue::NoOpenPallet),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationLine {
    pub wine_id: Uuid,
    pub quantity: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateReservation {
    pub user_id: Uuid,
    pub customer_email: String,
    pub address: Address,
    pub items: Vec<ReservationLine>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReservationReceipt {
    pub reservation: ReservationWithItems,
    /// No pallet yet; the customer sees the reservation as pending.
    pub pending: bool,
    pub completion: Option<CompletionOutcome>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReleaseReport {
    pub released: Vec<Uuid>,
}

pub struct ReservationService {
    store: Arc<dyn ReservationStore>,
    zones: Arc<ZoneMatcher>,
    pallets: Arc<PalletResolver>,
    completion: Arc<CompletionTrigger>,
    clock: Arc<dyn Clock>,
}

impl ReservationService {
    pub fn new(
        store: Arc<dyn ReservationStore>,
        zones: Arc<ZoneMatcher>,
        pallets: Arc<PalletResolver>,
        completion: Arc<CompletionTrigger>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            zones,
            pallets,
            completion,
            clock,
        }
    }

    pub async fn create_reservation(
        &self,
        actor: &Actor,
        request: CreateReservation,
    ) -> EngineResult<ReservationReceipt> {
        actor.require_user(request.user_id)?;
        if request.items.is_empty() {
            return Err(EngineError::validation("a reservation needs at least one item"));
        }
        if let Some(line) = request.items.iter().find(|l| l.quantity <= 0) {
            return Err(EngineError::validation(format!(
                "quantity for wine {} must be positive",
                line.wine_id
            )));
        }

        let wine_ids: Vec<Uuid> = request.items.iter().map(|l| l.wine_id).collect();
        let pickup = self.zones.resolve_pickup_zone_for_wines(&wine_ids).await?;
        let delivery = self.zones.match_delivery(&request.address).await?;

        let pickup_zone_id = pickup.zone_id();
        let delivery_zone_id = match &delivery {
            DeliveryMatch::Matched(zone) => Some(zone.id),
            DeliveryMatch::OutsideServedArea | DeliveryMatch::Unavailable(_) => None,
        };
        if let PickupZoneResolution::Ambiguous { zone_ids } = &pickup {
            warn!(
                user_id = %request.user_id,
                "reservation items ship from {} pickup zones, queued for an operator",
                zone_ids.len()
            );
        }

        let mut new = NewReservation {
            user_id: request.user_id,
            customer_email: request.customer_email,
            delivery_address: request.address.query(),
            pallet_id: None,
            pickup_zone_id,
            delivery_zone_id,
            zone_issue: None,
            items: request
                .items
                .iter()
                .map(|l| NewItem {
                    wine_id: l.wine_id,
                    quantity: l.quantity,
                })
                .collect(),
            created_at: self.clock.now(),
        };

        let mut attempt = 0;
        let reservation = loop {
            attempt += 1;
            // Out of attempts: store it unassigned and let repair place it.
            let pallet = if attempt > INSERT_ATTEMPTS {
                None
            } else {
                self.pallets
                    .resolve_optional(pickup_zone_id, delivery_zone_id)
                    .await?
            };
            new.pallet_id = pallet.as_ref().map(|p| p.id);
            new.zone_issue = zone_issue(&pickup, &delivery, pallet.is_some());

            match self.store.insert_reservation(new.clone()).await? {
                InsertCommit::Inserted(reservation) => break reservation,
                InsertCommit::PalletClosed { pallet_id } => {
                    debug!(
                        pallet_id = %pallet_id,
                        attempt,
                        "pallet closed before the reservation was stored, resolving again"
                    );
                }
            }
        };

        info!(
            reservation_id = %reservation.reservation.id,
            pallet_id = ?reservation.reservation.pallet_id,
            zone_issue = ?reservation.reservation.zone_issue,
            "reservation placed for {} bottles",
            reservation.requested_bottles()
        );

        let completion = match reservation.reservation.pallet_id {
            Some(pallet_id) => Some(self.completion.evaluate(pallet_id).await?),
            None => None,
        };
        let reservation = if matches!(completion, Some(CompletionOutcome::Completed { .. })) {
            self.load(reservation.reservation.id).await?
        } else {
            reservation
        };

        Ok(ReservationReceipt {
            pending: reservation.reservation.pallet_id.is_none(),
            reservation,
            completion,
        })
    }

    pub async fn get(&self, actor: &Actor, reservation_id: Uuid) -> EngineResult<ReservationWithItems> {
        let reservation = self.load(reservation_id).await?;
        match (actor.role, actor.producer_id) {
            (Role::Producer, Some(producer_id)) => {
                let wine_ids: Vec<Uuid> = reservation.items.iter().map(|i| i.wine_id).collect();
                let origins = self.store.wine_origins(&wine_ids).await?;
                if !origins.iter().any(|o| o.producer_id == producer_id) {
                    return Err(EngineError::Forbidden(format!(
                        "reservation {reservation_id} holds none of this producer's wines"
                    )));
                }
            }
            _ => actor.require_user(reservation.reservation.user_id)?,
        }
        Ok(reservation)
    }

    pub async fn cancel_reservation(&self, actor: &Actor, reservation_id: Uuid) -> EngineResult<Reservation> {
        let current = self.load(reservation_id).await?;
        actor.require_user(current.reservation.user_id)?;

        let transition = Transition {
            from: CANCELLABLE,
            to: ReservationStatus::Cancelled,
            payment_status: None,
            at: self.clock.now(),
        };
        match self.store.transition_reservation(reservation_id, transition).await? {
            TransitionCommit::Applied(reservation) => {
                info!(reservation_id = %reservation_id, "reservation cancelled");
                Ok(reservation)
            }
            TransitionCommit::Rejected(status) => Err(EngineError::validation(format!(
                "reservation {reservation_id} is {status} and cannot be cancelled"
            ))),
            TransitionCommit::NotFound => Err(EngineError::not_found("reservation", reservation_id)),
        }
    }

    /// Payment webhook. Replays for an already confirmed reservation return
    /// it unchanged.
    pub async fn record_payment(&self, reservation_id: Uuid) -> EngineResult<Reservation> {
        let transition = Transition {
            from: PAYABLE,
            to: ReservationStatus::Confirmed,
            payment_status: Some(PaymentStatus::Paid),
            at: self.clock.now(),
        };
        match self.store.transition_reservation(reservation_id, transition).await? {
            TransitionCommit::Applied(reservation) => {
                info!(reservation_id = %reservation_id, "payment captured, reservation confirmed");
                Ok(reservation)
            }
            TransitionCommit::Rejected(ReservationStatus::Confirmed) => {
                Ok(self.load(reservation_id).await?.reservation)
            }
            TransitionCommit::Rejected(status) => Err(EngineError::validation(format!(
                "reservation {reservation_id} is {status}, no payment is due"
            ))),
            TransitionCommit::NotFound => Err(EngineError::not_found("reservation", reservation_id)),
        }
    }

    pub async fn release_expired(&self, actor: &Actor) -> EngineResult<ReleaseReport> {
        actor.require_admin("releasing expired reservations")?;
        self.sweep_expired().await
    }

    /// Releases every payment-pending reservation past its deadline. Called
    /// by the periodic sweep as well as the operator endpoint.
    pub(crate) async fn sweep_expired(&self) -> EngineResult<ReleaseReport> {
        let released = self.store.release_expired(self.clock.now()).await?;
        if !released.is_empty() {
            info!("released {} reservations past their payment deadline", released.len());
        }
        Ok(ReleaseReport {
            released: released.into_iter().map(|r| r.id).collect(),
        })
    }

    pub async fn flagged_reservations(&self, actor: &Actor) -> EngineResult<Vec<Reservation>> {
        actor.require_admin("listing flagged reservations")?;
        Ok(self.store.flagged_reservations().await?)
    }

    async fn load(&self, reservation_id: Uuid) -> EngineResult<ReservationWithItems> {
        self.store
            .reservation(reservation_id)
            .await?
            .ok_or_else(|| EngineError::not_found("reservation", reservation_id))
    }
}
