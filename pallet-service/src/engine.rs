use shared::clock::Clock;
use std::sync::Arc;
use std::time::Duration;

use crate::capacity::CapacityTracker;
use crate::completion::CompletionTrigger;
use crate::decisions::DecisionWorkflow;
use crate::geocoder::Geocoder;
use crate::pallets::PalletResolver;
use crate::repair::RepairJob;
use crate::reservations::ReservationService;
use crate::store::ReservationStore;
use crate::zones::ZoneMatcher;

#[derive(Debug, Clone, Copy)]
pub struct EngineSettings {
    pub geocode_timeout: Duration,
    pub payment_window: chrono::Duration,
    pub default_pallet_capacity: Option<i32>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            geocode_timeout: Duration::from_secs(5),
            payment_window: chrono::Duration::days(shared::rules::DEFAULT_PAYMENT_WINDOW_DAYS),
            default_pallet_capacity: None,
        }
    }
}

/// Every engine component wired to one store and one clock.
#[derive(Clone)]
pub struct Engine {
    pub store: Arc<dyn ReservationStore>,
    pub zones: Arc<ZoneMatcher>,
    pub pallets: Arc<PalletResolver>,
    pub capacity: Arc<CapacityTracker>,
    pub completion: Arc<CompletionTrigger>,
    pub decisions: Arc<DecisionWorkflow>,
    pub repair: Arc<RepairJob>,
    pub reservations: Arc<ReservationService>,
}

impl Engine {
    pub fn new(
        store: Arc<dyn ReservationStore>,
        geocoder: Arc<dyn Geocoder>,
        clock: Arc<dyn Clock>,
        settings: EngineSettings,
    ) -> Self {
        let zones = Arc::new(ZoneMatcher::new(
            store.clone(),
            geocoder,
            settings.geocode_timeout,
        ));
        let pallets = Arc::new(PalletResolver::new(
            store.clone(),
            clock.clone(),
            settings.default_pallet_capacity,
        ));
        let capacity = Arc::new(CapacityTracker::new(store.clone()));
        let completion = Arc::new(CompletionTrigger::new(
            store.clone(),
            clock.clone(),
            settings.payment_window,
        ));
        let decisions = Arc::new(DecisionWorkflow::new(
            store.clone(),
            completion.clone(),
            clock.clone(),
        ));
        let repair = Arc::new(RepairJob::new(
            store.clone(),
            pallets.clone(),
            completion.clone(),
            clock.clone(),
        ));
        let reservations = Arc::new(ReservationService::new(
            store.clone(),
            zones.clone(),
            pallets.clone(),
            completion.clone(),
            clock,
        ));

        Self {
            store,
            zones,
            pallets,
            capacity,
            completion,
            decisions,
            repair,
            reservations,
        }
    }
}
