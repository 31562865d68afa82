use shared::geo::nearest_containing_zone;
use shared::rules::resolve_pickup_zone;
use shared::{PickupZoneResolution, WineOrigin, Zone, ZoneKind};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};
use crate::geocoder::{Address, Geocoder};
use crate::store::ReservationStore;

/// Outcome of placing an address in the served area.
#[derive(Debug, Clone, PartialEq)]
pub enum DeliveryMatch {
    Matched(Zone),
    /// The address is outside every delivery zone.
    OutsideServedArea,
    /// The geocoder could not be reached in time.
    Unavailable(String),
}

pub struct ZoneMatcher {
    store: Arc<dyn ReservationStore>,
    geocoder: Arc<dyn Geocoder>,
    geocode_timeout: Duration,
}

impl ZoneMatcher {
    pub fn new(
        store: Arc<dyn ReservationStore>,
        geocoder: Arc<dyn Geocoder>,
        geocode_timeout: Duration,
    ) -> Self {
        Self {
            store,
            geocoder,
            geocode_timeout,
        }
    }

    /// Finds the delivery zone for an address, or `None` when the address
    /// is outside the served area.
    ///
    /// Geocoder failures surface as `TransientDependency`.
    pub async fn resolve_delivery_zone(&self, address: &Address) -> EngineResult<Option<Zone>> {
        let query = address.query();
        let located = tokio::time::timeout(self.geocode_timeout, self.geocoder.geocode(&query))
            .await
            .map_err(|_| EngineError::TransientDependency {
                service: "geocoder",
                message: format!("timed out after {:?}", self.geocode_timeout),
            })?
            .map_err(|e| EngineError::TransientDependency {
                service: "geocoder",
                message: e.to_string(),
            })?;

        let Some(point) = located else {
            debug!("address {:?} could not be geocoded", query);
            return Ok(None);
        };

        let zones = self.store.zones(ZoneKind::Delivery).await?;
        Ok(nearest_containing_zone(&zones, ZoneKind::Delivery, Some(&address.country_code), point).cloned())
    }

    /// Like [`Self::resolve_delivery_zone`], folding dependency failures into
    /// a waiting state instead of an error.
    pub async fn match_delivery(&self, address: &Address) -> EngineResult<DeliveryMatch> {
        match self.resolve_delivery_zone(address).await {
            Ok(Some(zone)) => Ok(DeliveryMatch::Matched(zone)),
            Ok(None) => Ok(DeliveryMatch::OutsideServedArea),
            Err(EngineError::TransientDependency { message, .. }) => {
                warn!("delivery zone left unresolved, geocoder unavailable: {}", message);
                Ok(DeliveryMatch::Unavailable(message))
            }
            Err(e) => Err(e),
        }
    }

    /// The producer's fixed pickup zone; `None` until an operator sets one.
    pub async fn resolve_pickup_zone(&self, producer_id: Uuid) -> EngineResult<Option<Uuid>> {
        self.store
            .producer_pickup_zone(producer_id)
            .await?
            .ok_or_else(|| EngineError::not_found("producer", producer_id))
    }

    /// Loads the current origin of every wine, failing on unknown wines.
    pub async fn wine_origins(&self, wine_ids: &[Uuid]) -> EngineResult<HashMap<Uuid, WineOrigin>> {
        let origins: HashMap<Uuid, WineOrigin> = self
            .store
            .wine_origins(wine_ids)
            .await?
            .into_iter()
            .map(|o| (o.wine_id, o))
            .collect();

        if let Some(missing) = wine_ids.iter().find(|id| !origins.contains_key(id)) {
            return Err(EngineError::not_found("wine", *missing));
        }
        Ok(origins)
    }

    /// The single pickup zone a set of wines ships from.
    pub async fn resolve_pickup_zone_for_wines(
        &self,
        wine_ids: &[Uuid],
    ) -> EngineResult<PickupZoneResolution> {
        let origins = self.wine_origins(wine_ids).await?;
        Ok(resolve_pickup_zone(
            wine_ids.iter().map(|id| origins.get(id).and_then(|o| o.pickup_zone_id)),
        ))
    }
}
