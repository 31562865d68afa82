use serde::{Deserialize, Serialize};
use shared::{Lane, Pallet, ZoneKind};
use shared::clock::Clock;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::actor::Actor;
use crate::error::{EngineError, EngineResult};
use crate::store::ReservationStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaneRequest {
    pub pickup_zone_id: Uuid,
    pub delivery_zone_id: Uuid,
    pub bottle_capacity: i32,
}

/// Maps a lane to the one open pallet aggregating its reservations.
pub struct PalletResolver {
    store: Arc<dyn ReservationStore>,
    clock: Arc<dyn Clock>,
    /// Capacity for pallets opened implicitly by the first reservation of a
    /// lane. `None` leaves new lanes waiting for an operator.
    auto_create_capacity: Option<i32>,
}

impl PalletResolver {
    pub fn new(
        store: Arc<dyn ReservationStore>,
        clock: Arc<dyn Clock>,
        auto_create_capacity: Option<i32>,
    ) -> Self {
        Self {
            store,
            clock,
            auto_create_capacity,
        }
    }

    /// The open pallet for the lane, if one exists or may be opened.
    pub async fn resolve_pallet(
        &self,
        pickup_zone_id: Uuid,
        delivery_zone_id: Uuid,
    ) -> EngineResult<Option<Pallet>> {
        let lane = Lane {
            pickup_zone_id,
            delivery_zone_id,
        };
        match self.auto_create_capacity {
            Some(capacity) => {
                let pallet = self
                    .store
                    .get_or_create_open_pallet(lane, capacity, self.clock.now())
                    .await?;
                Ok(Some(pallet))
            }
            None => Ok(self.store.open_pallet(lane).await?),
        }
    }

    /// Resolves when both zones are known; any missing zone is a normal
    /// waiting condition, not an error.
    pub async fn resolve_optional(
        &self,
        pickup_zone_id: Option<Uuid>,
        delivery_zone_id: Option<Uuid>,
    ) -> EngineResult<Option<Pallet>> {
        match (pickup_zone_id, delivery_zone_id) {
            (Some(pickup), Some(delivery)) => self.resolve_pallet(pickup, delivery).await,
            _ => Ok(None),
        }
    }

    /// Explicitly opens a lane, or returns the lane's existing open pallet.
    pub async fn get_or_create_lane(&self, actor: &Actor, request: LaneRequest) -> EngineResult<Pallet> {
        actor.require_admin("opening a lane")?;
        if request.bottle_capacity <= 0 {
            return Err(EngineError::validation("bottle capacity must be positive"));
        }
        self.require_zone(request.pickup_zone_id, ZoneKind::Pickup).await?;
        self.require_zone(request.delivery_zone_id, ZoneKind::Delivery).await?;

        let lane = Lane {
            pickup_zone_id: request.pickup_zone_id,
            delivery_zone_id: request.delivery_zone_id,
        };
        let pallet = self
            .store
            .get_or_create_open_pallet(lane, request.bottle_capacity, self.clock.now())
            .await?;
        info!(
            pallet_id = %pallet.id,
            capacity = pallet.bottle_capacity,
            "lane {} -> {} served by pallet",
            lane.pickup_zone_id,
            lane.delivery_zone_id
        );
        Ok(pallet)
    }

    async fn require_zone(&self, id: Uuid, kind: ZoneKind) -> EngineResult<()> {
        let zone = self
            .store
            .zone(id)
            .await?
            .ok_or_else(|| EngineError::not_found("zone", id))?;
        if zone.kind != kind {
            return Err(EngineError::validation(format!(
                "zone {id} is a {} zone, expected {kind}",
                zone.kind
            )));
        }
        Ok(())
    }
}
