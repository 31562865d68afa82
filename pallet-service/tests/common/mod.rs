//! Shared fixture: two pickup zones, one delivery zone, a handful of
//! producers and wines, and an engine over the in-memory store.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use pallet_service::geocoder::{Address, GeocodeError, Geocoder, StaticGeocoder};
use pallet_service::pallets::LaneRequest;
use pallet_service::reservations::{CreateReservation, ReservationLine, ReservationReceipt};
use pallet_service::store::{
    CompletionCommit, DecisionCommit, InsertCommit, MemoryStore, NewReservation, Reassignment,
    ReservationStore, RevertCommit, StoreError, StoreResult, Transition, TransitionCommit,
};
use pallet_service::{Actor, Engine, EngineSettings};
use shared::clock::{Clock, FixedClock};
use shared::{
    EventEnvelope, GeoPoint, ItemDecision, Lane, Pallet, Producer, Reservation,
    ReservationWithItems, WineOrigin, Zone, ZoneKind,
};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

pub struct Fixture {
    pub store: Arc<MemoryStore>,
    pub clock: Arc<FixedClock>,
    pub geocoder: Arc<dyn Geocoder>,
    pub settings: EngineSettings,
    pub engine: Engine,
    pub mosel: Zone,
    pub rheingau: Zone,
    pub berlin: Zone,
    pub producer_a: Uuid,
    pub producer_b: Uuid,
    pub producer_c: Uuid,
    /// Two wines of producer A.
    pub riesling: Uuid,
    pub spaetburgunder: Uuid,
    /// Producer B, Rheingau.
    pub sekt: Uuid,
    /// Producer C, Mosel until a test moves it.
    pub elbling: Uuid,
    pub customer: Uuid,
    pub berlin_address: Address,
    pub remote_address: Address,
}

/// Geocoder that is always unreachable.
pub struct DownGeocoder;

#[async_trait]
impl Geocoder for DownGeocoder {
    async fn geocode(&self, _query: &str) -> Result<Option<GeoPoint>, GeocodeError> {
        Err(GeocodeError::Malformed("connection refused".to_string()))
    }
}

fn zone(name: &str, lat: f64, lon: f64, radius_km: f64, kind: ZoneKind) -> Zone {
    Zone {
        id: Uuid::new_v4(),
        name: name.to_string(),
        center_lat: lat,
        center_lon: lon,
        radius_km,
        kind,
        country_code: "DE".to_string(),
    }
}

fn address(street: &str, postcode: &str, city: &str) -> Address {
    Address {
        street: street.to_string(),
        postcode: postcode.to_string(),
        city: city.to_string(),
        country_code: "DE".to_string(),
    }
}

impl Fixture {
    pub async fn new() -> Self {
        Self::build(EngineSettings::default(), None).await
    }

    pub async fn with_settings(settings: EngineSettings) -> Self {
        Self::build(settings, None).await
    }

    pub async fn with_geocoder(geocoder: Arc<dyn Geocoder>) -> Self {
        Self::build(EngineSettings::default(), Some(geocoder)).await
    }

    async fn build(settings: EngineSettings, geocoder: Option<Arc<dyn Geocoder>>) -> Self {
        let store = Arc::new(MemoryStore::new());
        let start = Utc.with_ymd_and_hms(2025, 5, 1, 9, 0, 0).unwrap();
        let clock = Arc::new(FixedClock::new(start));

        let mosel = zone("Mosel", 49.95, 7.10, 40.0, ZoneKind::Pickup);
        let rheingau = zone("Rheingau", 50.00, 8.05, 25.0, ZoneKind::Pickup);
        let berlin = zone("Berlin", 52.52, 13.405, 30.0, ZoneKind::Delivery);
        for z in [&mosel, &rheingau, &berlin] {
            store.insert_zone(z.clone()).await;
        }

        let producer_a = Uuid::new_v4();
        let producer_b = Uuid::new_v4();
        let producer_c = Uuid::new_v4();
        for (id, name, zone_id) in [
            (producer_a, "Weingut A", mosel.id),
            (producer_b, "Weingut B", rheingau.id),
            (producer_c, "Weingut C", mosel.id),
        ] {
            store
                .insert_producer(Producer {
                    id,
                    name: name.to_string(),
                    pickup_zone_id: Some(zone_id),
                })
                .await;
        }

        let riesling = Uuid::new_v4();
        let spaetburgunder = Uuid::new_v4();
        let sekt = Uuid::new_v4();
        let elbling = Uuid::new_v4();
        store.insert_wine(riesling, producer_a).await;
        store.insert_wine(spaetburgunder, producer_a).await;
        store.insert_wine(sekt, producer_b).await;
        store.insert_wine(elbling, producer_c).await;

        let berlin_address = address("Torstr. 1", "10119", "Berlin");
        let remote_address = address("Marktplatz 2", "80331", "Muenchen");
        let geocoder: Arc<dyn Geocoder> = match geocoder {
            Some(geocoder) => geocoder,
            None => Arc::new(
                StaticGeocoder::new()
                    .with(&berlin_address, GeoPoint { lat: 52.53, lon: 13.40 })
                    .with(&remote_address, GeoPoint { lat: 48.14, lon: 11.58 }),
            ),
        };

        let engine = Engine::new(store.clone(), geocoder.clone(), clock.clone(), settings);

        Self {
            store,
            clock,
            geocoder,
            settings,
            engine,
            mosel,
            rheingau,
            berlin,
            producer_a,
            producer_b,
            producer_c,
            riesling,
            spaetburgunder,
            sekt,
            elbling,
            customer: Uuid::new_v4(),
            berlin_address,
            remote_address,
        }
    }

    pub async fn lane(&self, pickup: &Zone, capacity: i32) -> Pallet {
        self.engine
            .pallets
            .get_or_create_lane(
                &Actor::admin(),
                LaneRequest {
                    pickup_zone_id: pickup.id,
                    delivery_zone_id: self.berlin.id,
                    bottle_capacity: capacity,
                },
            )
            .await
            .unwrap()
    }

    /// A second engine sharing this fixture's clock and geocoder, over a
    /// store that usually wraps `self.store`.
    pub fn engine_over(&self, store: Arc<dyn ReservationStore>) -> Engine {
        Engine::new(store, self.geocoder.clone(), self.clock.clone(), self.settings)
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub async fn store_pallet(&self, id: Uuid) -> Pallet {
        self.store.pallet(id).await.unwrap().unwrap()
    }

    pub fn request(&self, lines: &[(Uuid, i32)]) -> CreateReservation {
        CreateReservation {
            user_id: self.customer,
            customer_email: "kunde@example.com".to_string(),
            address: self.berlin_address.clone(),
            items: lines
                .iter()
                .map(|(wine_id, quantity)| ReservationLine {
                    wine_id: *wine_id,
                    quantity: *quantity,
                })
                .collect(),
        }
    }

    pub async fn reserve(&self, lines: &[(Uuid, i32)]) -> ReservationReceipt {
        self.engine
            .reservations
            .create_reservation(&Actor::customer(self.customer), self.request(lines))
            .await
            .unwrap()
    }
}

/// Delegates to a `MemoryStore`, stalling inserts before they reach it or
/// failing capacity reads.
pub struct InterceptingStore {
    inner: Arc<MemoryStore>,
    insert_delay: fn(&NewReservation) -> Duration,
    fail_totals: bool,
}

impl InterceptingStore {
    pub fn delaying_inserts(inner: Arc<MemoryStore>, insert_delay: fn(&NewReservation) -> Duration) -> Self {
        Self {
            inner,
            insert_delay,
            fail_totals: false,
        }
    }

    pub fn failing_totals(inner: Arc<MemoryStore>) -> Self {
        Self {
            inner,
            insert_delay: |_| Duration::ZERO,
            fail_totals: true,
        }
    }
}

#[async_trait]
impl ReservationStore for InterceptingStore {
    async fn zones(&self, kind: ZoneKind) -> StoreResult<Vec<Zone>> {
        self.inner.zones(kind).await
    }

    async fn zone(&self, id: Uuid) -> StoreResult<Option<Zone>> {
        self.inner.zone(id).await
    }

    async fn producer_pickup_zone(&self, producer_id: Uuid) -> StoreResult<Option<Option<Uuid>>> {
        self.inner.producer_pickup_zone(producer_id).await
    }

    async fn wine_origins(&self, wine_ids: &[Uuid]) -> StoreResult<Vec<WineOrigin>> {
        self.inner.wine_origins(wine_ids).await
    }

    async fn pallet(&self, id: Uuid) -> StoreResult<Option<Pallet>> {
        self.inner.pallet(id).await
    }

    async fn pallets(&self) -> StoreResult<Vec<Pallet>> {
        self.inner.pallets().await
    }

    async fn open_pallet(&self, lane: Lane) -> StoreResult<Option<Pallet>> {
        self.inner.open_pallet(lane).await
    }

    async fn get_or_create_open_pallet(
        &self,
        lane: Lane,
        bottle_capacity: i32,
        at: DateTime<Utc>,
    ) -> StoreResult<Pallet> {
        self.inner.get_or_create_open_pallet(lane, bottle_capacity, at).await
    }

    async fn total_reserved_bottles(&self, pallet_id: Uuid) -> StoreResult<i64> {
        if self.fail_totals {
            return Err(StoreError::Pool("timed out waiting for connection".to_string()));
        }
        self.inner.total_reserved_bottles(pallet_id).await
    }

    async fn complete_pallet(
        &self,
        pallet_id: Uuid,
        completed_at: DateTime<Utc>,
        payment_deadline: DateTime<Utc>,
    ) -> StoreResult<CompletionCommit> {
        self.inner.complete_pallet(pallet_id, completed_at, payment_deadline).await
    }

    async fn revert_pallet_completion(&self, pallet_id: Uuid, at: DateTime<Utc>) -> StoreResult<RevertCommit> {
        self.inner.revert_pallet_completion(pallet_id, at).await
    }

    async fn insert_reservation(&self, new: NewReservation) -> StoreResult<InsertCommit> {
        tokio::time::sleep((self.insert_delay)(&new)).await;
        self.inner.insert_reservation(new).await
    }

    async fn reservation(&self, id: Uuid) -> StoreResult<Option<ReservationWithItems>> {
        self.inner.reservation(id).await
    }

    async fn apply_decisions(
        &self,
        reservation_id: Uuid,
        deciding_producer: Option<Uuid>,
        decisions: &[ItemDecision],
        at: DateTime<Utc>,
    ) -> StoreResult<DecisionCommit> {
        self.inner
            .apply_decisions(reservation_id, deciding_producer, decisions, at)
            .await
    }

    async fn transition_reservation(
        &self,
        reservation_id: Uuid,
        transition: Transition,
    ) -> StoreResult<TransitionCommit> {
        self.inner.transition_reservation(reservation_id, transition).await
    }

    async fn active_reservation_ids(&self) -> StoreResult<Vec<Uuid>> {
        self.inner.active_reservation_ids().await
    }

    async fn reassign_reservation(&self, reservation_id: Uuid, reassignment: Reassignment) -> StoreResult<bool> {
        self.inner.reassign_reservation(reservation_id, reassignment).await
    }

    async fn release_expired(&self, now: DateTime<Utc>) -> StoreResult<Vec<Reservation>> {
        self.inner.release_expired(now).await
    }

    async fn flagged_reservations(&self) -> StoreResult<Vec<Reservation>> {
        self.inner.flagged_reservations().await
    }

    async fn unprocessed_events(&self, limit: i64) -> StoreResult<Vec<EventEnvelope>> {
        self.inner.unprocessed_events(limit).await
    }

    async fn mark_event_processed(&self, id: Uuid) -> StoreResult<()> {
        self.inner.mark_event_processed(id).await
    }
}
