use std::sync::Arc;
use std::time::Duration;
use tokio::time;
use tracing::error;

use crate::reservations::ReservationService;

/// Periodic release of payment-pending reservations past their deadline.
pub struct ReleaseSweep {
    reservations: Arc<ReservationService>,
    interval: Duration,
}

impl ReleaseSweep {
    pub fn new(reservations: Arc<ReservationService>, interval: Duration) -> Self {
        Self {
            reservations,
            interval,
        }
    }

    pub async fn run(&self) {
        let mut interval = time::interval(self.interval);

        loop {
            interval.tick().await;

            if let Err(e) = self.reservations.sweep_expired().await {
                error!("Error releasing expired reservations: {}", e);
            }
        }
    }
}
