//! In-process geospatial store with Redis GEO semantics.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use super::{CacheError, GeoMember, GeoStore, RadiusQuery, StoreFuture};
use crate::coordinate::Coordinate;

/// Earth radius Redis uses for GEO distance calculations, in kilometres.
const EARTH_RADIUS_KM: f64 = 6372.797560856;

/// Redis rejects latitudes beyond the Web Mercator limits.
const MAX_LATITUDE: f64 = 85.05112878;

/// A [`GeoStore`] kept in memory.
///
/// Mirrors what Redis does for `GEOADD` / `GEORADIUS_RO`: haversine distances,
/// unique member names per index, and rejection of polar latitudes. Nothing
/// survives a restart.
#[derive(Debug, Default)]
pub struct MemoryGeoStore {
    indexes: Mutex<HashMap<String, HashMap<String, Coordinate>>>,
}

impl MemoryGeoStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of members under `key`.
    pub fn len(&self, key: &str) -> usize {
        self.lock().get(key).map_or(0, HashMap::len)
    }

    /// Location of `member` under `key`, if present.
    pub fn position(&self, key: &str, member: &str) -> Option<Coordinate> {
        self.lock().get(key)?.get(member).copied()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, HashMap<String, Coordinate>>> {
        self.indexes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn search(&self, key: &str, query: RadiusQuery) -> Vec<GeoMember> {
        let indexes = self.lock();
        let Some(index) = indexes.get(key) else {
            return Vec::new();
        };

        let mut hits: Vec<GeoMember> = index
            .iter()
            .map(|(name, at)| GeoMember {
                name: name.clone(),
                distance_km: haversine_km(query.center, *at),
            })
            .filter(|m| m.distance_km <= query.radius_km)
            .collect();

        hits.sort_by(|a, b| {
            a.distance_km
                .total_cmp(&b.distance_km)
                .then_with(|| a.name.cmp(&b.name))
        });
        hits.truncate(query.limit);
        hits
    }
}

impl GeoStore for MemoryGeoStore {
    fn radius<'a>(&'a self, key: &'a str, query: RadiusQuery) -> StoreFuture<'a, Vec<GeoMember>> {
        Box::pin(async move { Ok(self.search(key, query)) })
    }

    fn add<'a>(
        &'a self,
        key: &'a str,
        location: Coordinate,
        member: &'a str,
    ) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            if location.latitude().abs() > MAX_LATITUDE {
                return Err(CacheError::Unindexable(location));
            }
            self.lock()
                .entry(key.to_owned())
                .or_default()
                .insert(member.to_owned(), location);
            Ok(())
        })
    }
}

/// Great-circle distance between two points.
pub fn haversine_km(a: Coordinate, b: Coordinate) -> f64 {
    let (lat1, lat2) = (a.latitude().to_radians(), b.latitude().to_radians());
    let dlat = lat2 - lat1;
    let dlon = (b.longitude() - a.longitude()).to_radians();

    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * h.sqrt().asin()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(lat: f64, lon: f64) -> Coordinate {
        Coordinate::new(lat, lon).unwrap()
    }

    fn query(center: Coordinate, radius_km: f64, limit: usize) -> RadiusQuery {
        RadiusQuery {
            center,
            radius_km,
            limit,
        }
    }

    #[test]
    fn haversine_known_distance() {
        // Bengaluru to Chennai is roughly 290 km as the crow flies.
        let d = haversine_km(at(12.9716, 77.5946), at(13.0827, 80.2707));
        assert!((285.0..295.0).contains(&d), "got {d}");
        assert_eq!(haversine_km(at(1.0, 1.0), at(1.0, 1.0)), 0.0);
    }

    #[tokio::test]
    async fn radius_orders_and_limits() {
        let store = MemoryGeoStore::new();
        store.add("idx", at(0.0, 0.005), "far").await.unwrap();
        store.add("idx", at(0.0, 0.001), "near").await.unwrap();
        store.add("idx", at(0.0, 0.003), "mid").await.unwrap();

        let hits = store.radius("idx", query(at(0.0, 0.0), 1.0, 2)).await.unwrap();
        let names: Vec<_> = hits.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, ["near", "mid"]);
        assert!(hits[0].distance_km < hits[1].distance_km);
    }

    #[tokio::test]
    async fn indexes_are_isolated() {
        let store = MemoryGeoStore::new();
        store.add("a", at(10.0, 10.0), "111111").await.unwrap();
        assert!(store.radius("b", query(at(10.0, 10.0), 1.0, 1)).await.unwrap().is_empty());
        assert_eq!(store.len("a"), 1);
        assert_eq!(store.len("b"), 0);
    }

    #[tokio::test]
    async fn re_adding_a_member_moves_it() {
        let store = MemoryGeoStore::new();
        store.add("idx", at(10.0, 10.0), "111111").await.unwrap();
        store.add("idx", at(20.0, 20.0), "111111").await.unwrap();
        assert_eq!(store.len("idx"), 1);
        assert_eq!(store.position("idx", "111111"), Some(at(20.0, 20.0)));
    }

    #[tokio::test]
    async fn polar_latitudes_are_rejected() {
        let store = MemoryGeoStore::new();
        let err = store.add("idx", at(89.0, 0.0), "9999").await.unwrap_err();
        assert!(matches!(err, CacheError::Unindexable(_)));
        assert_eq!(store.len("idx"), 0);
    }
}
