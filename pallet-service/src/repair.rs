//! Reconciles reservations with the current wine -> producer -> pickup zone
//! mapping. Each reservation is read immediately before its own guarded
//! write, so a pass can run alongside live traffic and be repeated freely.

use serde::Serialize;
use shared::rules::resolve_pickup_zone;
use shared::{Assignment, PickupZoneResolution, ReservationWithItems, ZoneIssue};
use shared::clock::Clock;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::actor::Actor;
use crate::completion::{CompletionOutcome, CompletionTrigger};
use crate::error::{EngineError, EngineResult};
use crate::pallets::PalletResolver;
use crate::store::{Reassignment, ReservationStore};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RepairReport {
    pub scanned: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub no_pickup_zone: usize,
    pub multiple_pickup_zones: usize,
    pub failed: usize,
    pub pallets_completed: usize,
    pub failures: Vec<RepairFailure>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RepairFailure {
    pub reservation_id: Uuid,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Repaired {
    Updated { pallet_id: Option<Uuid> },
    Unchanged,
    NoPickupZone,
    MultiplePickupZones,
}

pub struct RepairJob {
    store: Arc<dyn ReservationStore>,
    pallets: Arc<PalletResolver>,
    completion: Arc<CompletionTrigger>,
    clock: Arc<dyn Clock>,
}

impl RepairJob {
    pub fn new(
        store: Arc<dyn ReservationStore>,
        pallets: Arc<PalletResolver>,
        completion: Arc<CompletionTrigger>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            pallets,
            completion,
            clock,
        }
    }

    pub async fn run(&self, actor: &Actor) -> EngineResult<RepairReport> {
        actor.require_admin("running the reservation repair job")?;

        let ids = self.store.active_reservation_ids().await?;
        let mut report = RepairReport {
            scanned: ids.len(),
            ..RepairReport::default()
        };
        let mut touched_pallets = BTreeSet::new();

        for id in ids {
            match self.repair_one(id).await {
                Ok(Repaired::Updated { pallet_id }) => {
                    report.updated += 1;
                    touched_pallets.extend(pallet_id);
                }
                Ok(Repaired::Unchanged) => report.unchanged += 1,
                Ok(Repaired::NoPickupZone) => report.no_pickup_zone += 1,
                Ok(Repaired::MultiplePickupZones) => report.multiple_pickup_zones += 1,
                Err(e) => {
                    warn!(reservation_id = %id, "repair failed: {}", e);
                    report.failed += 1;
                    report.failures.push(RepairFailure {
                        reservation_id: id,
                        reason: e.to_string(),
                    });
                }
            }
        }

        for pallet_id in touched_pallets {
            match self.completion.evaluate(pallet_id).await {
                Ok(CompletionOutcome::Completed { .. }) => report.pallets_completed += 1,
                Ok(_) => {}
                Err(e) => warn!(pallet_id = %pallet_id, "completion check after repair failed: {}", e),
            }
        }

        info!(
            scanned = report.scanned,
            updated = report.updated,
            unchanged = report.unchanged,
            no_pickup_zone = report.no_pickup_zone,
            multiple_pickup_zones = report.multiple_pickup_zones,
            failed = report.failed,
            "repair pass finished"
        );
        Ok(report)
    }

    async fn repair_one(&self, reservation_id: Uuid) -> EngineResult<Repaired> {
        let Some(current) = self.store.reservation(reservation_id).await? else {
            // Deleted since the id scan.
            return Ok(Repaired::Unchanged);
        };
        if !current.reservation.status.is_active() {
            return Ok(Repaired::Unchanged);
        }

        let desired_pickup = match self.desired_pickup_zone(&current).await? {
            PickupZoneResolution::Single { zone_id } => zone_id,
            PickupZoneResolution::Unresolved => {
                self.flag(&current, ZoneIssue::NoPickupZone).await?;
                return Ok(Repaired::NoPickupZone);
            }
            PickupZoneResolution::Ambiguous { zone_ids } => {
                debug!(reservation_id = %reservation_id, "items ship from zones {:?}", zone_ids);
                self.flag(&current, ZoneIssue::MultiplePickupZones).await?;
                return Ok(Repaired::MultiplePickupZones);
            }
        };

        let reservation = &current.reservation;
        let expected = reservation.assignment();
        let next_pallet = self.desired_pallet(&current, desired_pickup).await?;
        let next = Assignment {
            pickup_zone_id: Some(desired_pickup),
            pallet_id: next_pallet,
        };
        let zone_issue = match (reservation.delivery_zone_id, next_pallet) {
            (_, Some(_)) => None,
            (None, None) => match reservation.zone_issue {
                Some(issue @ (ZoneIssue::GeocodingFailed | ZoneIssue::NoDeliveryZone)) => Some(issue),
                _ => Some(ZoneIssue::NoDeliveryZone),
            },
            (Some(_), None) => Some(ZoneIssue::NoOpenPallet),
        };

        if next == expected {
            if reservation.zone_issue != zone_issue {
                self.write(reservation_id, expected, next, zone_issue).await?;
            }
            return Ok(Repaired::Unchanged);
        }

        self.write(reservation_id, expected, next, zone_issue).await?;
        info!(
            reservation_id = %reservation_id,
            "reassigned pickup zone {:?} -> {}, pallet {:?} -> {:?}",
            expected.pickup_zone_id,
            desired_pickup,
            expected.pallet_id,
            next_pallet
        );
        Ok(Repaired::Updated {
            pallet_id: next_pallet,
        })
    }

    async fn desired_pickup_zone(&self, current: &ReservationWithItems) -> EngineResult<PickupZoneResolution> {
        let wine_ids: Vec<Uuid> = current.items.iter().map(|i| i.wine_id).collect();
        let origins = self.store.wine_origins(&wine_ids).await?;
        Ok(resolve_pickup_zone(current.items.iter().map(|item| {
            origins
                .iter()
                .find(|o| o.wine_id == item.wine_id)
                .and_then(|o| o.pickup_zone_id)
        })))
    }

    /// Keeps the current pallet while it still serves the desired lane, so a
    /// reservation on a completed pallet is not pulled onto a newer open one.
    async fn desired_pallet(&self, current: &ReservationWithItems, pickup_zone_id: Uuid) -> EngineResult<Option<Uuid>> {
        let reservation = &current.reservation;
        let Some(delivery_zone_id) = reservation.delivery_zone_id else {
            return Ok(None);
        };
        if let Some(pallet_id) = reservation.pallet_id {
            if let Some(pallet) = self.store.pallet(pallet_id).await? {
                if pallet.pickup_zone_id == pickup_zone_id && pallet.delivery_zone_id == delivery_zone_id {
                    return Ok(Some(pallet.id));
                }
            }
        }
        let pallet = self
            .pallets
            .resolve_pallet(pickup_zone_id, delivery_zone_id)
            .await?;
        Ok(pallet.map(|p| p.id))
    }

    /// Records a pickup-zone problem without touching the assignment.
    async fn flag(&self, current: &ReservationWithItems, issue: ZoneIssue) -> EngineResult<()> {
        let reservation = &current.reservation;
        if reservation.zone_issue == Some(issue) {
            return Ok(());
        }
        let assignment = reservation.assignment();
        self.write(reservation.id, assignment, assignment, Some(issue)).await
    }

    async fn write(
        &self,
        reservation_id: Uuid,
        expected: Assignment,
        next: Assignment,
        zone_issue: Option<ZoneIssue>,
    ) -> EngineResult<()> {
        let applied = self
            .store
            .reassign_reservation(
                reservation_id,
                Reassignment {
                    expected,
                    next,
                    zone_issue,
                    at: self.clock.now(),
                },
            )
            .await?;
        if applied {
            Ok(())
        } else {
            Err(EngineError::ConcurrencyConflict {
                entity: "reservation",
                id: reservation_id,
            })
        }
    }
}
