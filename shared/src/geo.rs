use crate::model::{GeoPoint, Zone, ZoneKind};
use std::cmp::Ordering;

pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Great-circle distance between two points (haversine).
pub fn distance_km(a: GeoPoint, b: GeoPoint) -> f64 {
    let (lat1, lat2) = (a.lat.to_radians(), b.lat.to_radians());
    let d_lat = (b.lat - a.lat).to_radians();
    let d_lon = (b.lon - a.lon).to_radians();

    let h = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * h.sqrt().min(1.0).asin()
}

impl Zone {
    pub fn center(&self) -> GeoPoint {
        GeoPoint {
            lat: self.center_lat,
            lon: self.center_lon,
        }
    }

    pub fn distance_to(&self, point: GeoPoint) -> f64 {
        distance_km(self.center(), point)
    }

    pub fn contains(&self, point: GeoPoint) -> bool {
        self.distance_to(point) <= self.radius_km
    }
}

/// Picks the zone of `kind` that contains `point` and whose center is
/// nearest; equal distances go to the lowest zone id. When `country_code`
/// is given only zones of that country are candidates.
pub fn nearest_containing_zone<'a>(
    zones: &'a [Zone],
    kind: ZoneKind,
    country_code: Option<&str>,
    point: GeoPoint,
) -> Option<&'a Zone> {
    zones
        .iter()
        .filter(|z| z.kind == kind)
        .filter(|z| country_code.map_or(true, |cc| z.country_code.eq_ignore_ascii_case(cc)))
        .map(|z| (z, z.distance_to(point)))
        .filter(|(z, d)| *d <= z.radius_km)
        .min_by(|(za, da), (zb, db)| {
            da.partial_cmp(db)
                .unwrap_or(Ordering::Equal)
                .then_with(|| za.id.cmp(&zb.id))
        })
        .map(|(z, _)| z)
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn zone(id: u128, lat: f64, lon: f64, radius_km: f64, kind: ZoneKind) -> Zone {
        Zone {
            id: Uuid::from_u128(id),
            name: format!("zone-{id}"),
            center_lat: lat,
            center_lon: lon,
            radius_km,
            kind,
            country_code: "FR".to_string(),
        }
    }

    #[test]
    fn paris_to_lyon_is_roughly_392_km() {
        let paris = GeoPoint { lat: 48.8566, lon: 2.3522 };
        let lyon = GeoPoint { lat: 45.7640, lon: 4.8357 };
        let d = distance_km(paris, lyon);
        assert!((d - 392.0).abs() < 5.0, "got {d}");
    }

    #[test]
    fn point_on_the_radius_is_inside() {
        let z = zone(1, 0.0, 0.0, distance_km(GeoPoint { lat: 0.0, lon: 0.0 }, GeoPoint { lat: 0.0, lon: 1.0 }), ZoneKind::Delivery);
        assert!(z.contains(GeoPoint { lat: 0.0, lon: 1.0 }));
        assert!(!z.contains(GeoPoint { lat: 0.0, lon: 1.01 }));
    }

    #[test]
    fn overlapping_zones_resolve_to_nearest_center() {
        let zones = vec![
            zone(1, 48.80, 2.30, 50.0, ZoneKind::Delivery),
            zone(2, 48.86, 2.35, 50.0, ZoneKind::Delivery),
            zone(3, 48.86, 2.35, 50.0, ZoneKind::Pickup),
        ];
        let point = GeoPoint { lat: 48.8566, lon: 2.3522 };
        let chosen = nearest_containing_zone(&zones, ZoneKind::Delivery, None, point);
        assert_eq!(chosen.map(|z| z.id), Some(Uuid::from_u128(2)));
    }

    #[test]
    fn equidistant_zones_resolve_to_lowest_id() {
        let zones = vec![
            zone(9, 10.0, 10.0, 100.0, ZoneKind::Delivery),
            zone(4, 10.0, 10.0, 100.0, ZoneKind::Delivery),
        ];
        let chosen = nearest_containing_zone(&zones, ZoneKind::Delivery, None, GeoPoint { lat: 10.1, lon: 10.0 });
        assert_eq!(chosen.map(|z| z.id), Some(Uuid::from_u128(4)));
    }

    #[test]
    fn point_outside_every_zone_matches_nothing() {
        let zones = vec![zone(1, 48.86, 2.35, 10.0, ZoneKind::Delivery)];
        let marseille = GeoPoint { lat: 43.2965, lon: 5.3698 };
        assert!(nearest_containing_zone(&zones, ZoneKind::Delivery, None, marseille).is_none());
    }

    #[test]
    fn country_filter_excludes_foreign_zones() {
        let zones = vec![zone(1, 48.86, 2.35, 50.0, ZoneKind::Delivery)];
        let point = GeoPoint { lat: 48.8566, lon: 2.3522 };
        assert!(nearest_containing_zone(&zones, ZoneKind::Delivery, Some("de"), point).is_none());
        assert!(nearest_containing_zone(&zones, ZoneKind::Delivery, Some("fr"), point).is_some());
    }
}
