use serde::Serialize;
use shared::rules::fill_percentage;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};
use crate::store::ReservationStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PalletFill {
    pub pallet_id: Uuid,
    pub total: i64,
    pub capacity: i32,
    pub percentage: u8,
    pub remaining: i64,
}

impl PalletFill {
    pub fn new(pallet_id: Uuid, total: i64, capacity: i32) -> Self {
        Self {
            pallet_id,
            total,
            capacity,
            percentage: fill_percentage(total, capacity),
            remaining: (i64::from(capacity) - total).max(0),
        }
    }

    pub fn is_full(&self) -> bool {
        self.total >= i64::from(self.capacity)
    }
}

pub struct CapacityTracker {
    store: Arc<dyn ReservationStore>,
}

impl CapacityTracker {
    pub fn new(store: Arc<dyn ReservationStore>) -> Self {
        Self { store }
    }

    /// Bottles held by the pallet's placed, approved, partly approved,
    /// payment-pending and confirmed reservations.
    pub async fn total_reserved_bottles(&self, pallet_id: Uuid) -> EngineResult<i64> {
        Ok(self.store.total_reserved_bottles(pallet_id).await?)
    }

    pub async fn fill(&self, pallet_id: Uuid) -> EngineResult<PalletFill> {
        let pallet = self
            .store
            .pallet(pallet_id)
            .await?
            .ok_or_else(|| EngineError::not_found("pallet", pallet_id))?;
        let total = self.total_reserved_bottles(pallet_id).await?;
        Ok(PalletFill::new(pallet.id, total, pallet.bottle_capacity))
    }
}
