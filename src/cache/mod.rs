//! Geo-cache gateway: previously resolved pincodes indexed by location.
//!
//! [`GeoCache`] sits in front of a [`GeoStore`] (Redis in production, the
//! in-process [`MemoryGeoStore`] for local runs and tests). Reads degrade: a
//! store that errors or times out looks like an empty cache. Writes do not:
//! a failed write is reported to the caller.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, warn};

use crate::config::CacheConfig;
use crate::coordinate::Coordinate;

pub mod memory;
pub mod redis;

pub use self::memory::MemoryGeoStore;
pub use self::redis::RedisGeoStore;

/// Errors raised by a geospatial store.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("redis: {0}")]
    Redis(#[from] ::redis::RedisError),

    #[error("store did not answer within {0:?}")]
    Timeout(Duration),

    #[error("location {0} cannot be indexed")]
    Unindexable(Coordinate),
}

/// Boxed future returned by [`GeoStore`] operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, CacheError>> + Send + 'a>>;

/// Parameters of a proximity query. Results always come back nearest first.
#[derive(Debug, Clone, Copy)]
pub struct RadiusQuery {
    pub center: Coordinate,
    pub radius_km: f64,
    pub limit: usize,
}

/// A member returned by a proximity query.
#[derive(Debug, Clone, PartialEq)]
pub struct GeoMember {
    pub name: String,
    pub distance_km: f64,
}

/// A store of named points under a named index.
///
/// Member names are unique per index: adding an existing name moves it.
pub trait GeoStore: Send + Sync + 'static {
    /// Members within `query.radius_km` of `query.center`, nearest first, at
    /// most `query.limit` of them.
    fn radius<'a>(&'a self, key: &'a str, query: RadiusQuery) -> StoreFuture<'a, Vec<GeoMember>>;

    /// Adds `member` at `location` under `key`.
    fn add<'a>(
        &'a self,
        key: &'a str,
        location: Coordinate,
        member: &'a str,
    ) -> StoreFuture<'a, ()>;
}

/// Opens the store named by `config.url`.
pub fn open_store(config: &CacheConfig) -> Result<Arc<dyn GeoStore>, CacheError> {
    if config.url.starts_with("memory://") {
        return Ok(Arc::new(MemoryGeoStore::new()));
    }
    Ok(Arc::new(RedisGeoStore::open(&config.url)?))
}

/// The cache gateway used by the lookup pipeline.
#[derive(Clone)]
pub struct GeoCache {
    store: Arc<dyn GeoStore>,
    key: String,
    radius_km: f64,
    limit: usize,
    timeout: Duration,
}

impl GeoCache {
    pub fn new(store: Arc<dyn GeoStore>, config: &CacheConfig) -> Self {
        Self {
            store,
            key: config.key.clone(),
            radius_km: config.radius_km,
            limit: config.limit,
            timeout: config.timeout,
        }
    }

    /// Returns the pincode of the nearest record within the search radius.
    ///
    /// `None` covers both "nothing nearby" and "store unavailable".
    pub async fn lookup(&self, at: Coordinate) -> Option<String> {
        let query = RadiusQuery {
            center: at,
            radius_km: self.radius_km,
            limit: self.limit,
        };

        let search = self.store.radius(&self.key, query);
        let members = match tokio::time::timeout(self.timeout, search).await {
            Ok(Ok(members)) => members,
            Ok(Err(e)) => {
                warn!(coordinate = %at, error = %e, "cache lookup failed, treating as miss");
                return None;
            }
            Err(_) => {
                warn!(
                    coordinate = %at,
                    timeout = ?self.timeout,
                    "cache lookup timed out, treating as miss"
                );
                return None;
            }
        };

        match members.into_iter().next() {
            Some(nearest) => {
                debug!(
                    coordinate = %at,
                    pincode = %nearest.name,
                    distance_km = nearest.distance_km,
                    "cache hit"
                );
                Some(nearest.name)
            }
            None => {
                debug!(coordinate = %at, "cache miss");
                None
            }
        }
    }

    /// Records `pincode` at `at`.
    pub async fn store(&self, at: Coordinate, pincode: &str) -> Result<(), CacheError> {
        tokio::time::timeout(self.timeout, self.store.add(&self.key, at, pincode))
            .await
            .map_err(|_| CacheError::Timeout(self.timeout))??;
        debug!(coordinate = %at, %pincode, "cached pincode");
        Ok(())
    }
}
