use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use shared::GeoPoint;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub street: String,
    pub postcode: String,
    pub city: String,
    pub country_code: String,
}

impl Address {
    pub fn query(&self) -> String {
        format!(
            "{}, {} {}, {}",
            self.street, self.postcode, self.city, self.country_code
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum GeocodeError {
    #[error("geocoder request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("geocoder returned an unreadable coordinate: {0}")]
    Malformed(String),
}

#[async_trait]
pub trait Geocoder: Send + Sync {
    /// `Ok(None)` when the address cannot be located.
    async fn geocode(&self, query: &str) -> Result<Option<GeoPoint>, GeocodeError>;
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    lat: String,
    lon: String,
}

/// Nominatim-compatible `/search` client.
#[derive(Debug, Clone)]
pub struct HttpGeocoder {
    client: reqwest::Client,
    base_url: String,
}

impl HttpGeocoder {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, GeocodeError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent("pallet-service")
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }
}

#[async_trait]
impl Geocoder for HttpGeocoder {
    async fn geocode(&self, query: &str) -> Result<Option<GeoPoint>, GeocodeError> {
        let url = format!("{}/search", self.base_url.trim_end_matches('/'));
        let hits: Vec<SearchHit> = self
            .client
            .get(url)
            .query(&[("q", query), ("format", "json"), ("limit", "1")])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let Some(hit) = hits.into_iter().next() else {
            debug!("geocoder found nothing for {:?}", query);
            return Ok(None);
        };
        let lat = hit.lat.parse().map_err(|_| GeocodeError::Malformed(hit.lat.clone()))?;
        let lon = hit.lon.parse().map_err(|_| GeocodeError::Malformed(hit.lon.clone()))?;
        Ok(Some(GeoPoint { lat, lon }))
    }
}

/// Fixed lookup table, for tests and offline runs.
#[derive(Debug, Clone, Default)]
pub struct StaticGeocoder {
    points: HashMap<String, GeoPoint>,
}

impl StaticGeocoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, address: &Address, point: GeoPoint) -> Self {
        self.points.insert(address.query(), point);
        self
    }
}

#[async_trait]
impl Geocoder for StaticGeocoder {
    async fn geocode(&self, query: &str) -> Result<Option<GeoPoint>, GeocodeError> {
        Ok(self.points.get(query).copied())
    }
}
