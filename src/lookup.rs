//! The pincode lookup pipeline: cache first, provider on a miss, then cache
//! the answer.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::cache::{CacheError, GeoCache};
use crate::coordinate::Coordinate;
use crate::geocode::{GeocodeError, Geocoder, Resolution};

/// Body returned when the provider has no postal code for a location.
pub const NOT_FOUND_MESSAGE: &str = "Cannot find pincode corresponding to coordinates";

/// Successful outcomes of [`PincodeService::lookup`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    /// Served from a record within the search radius.
    Cached(String),
    /// Fetched from the provider and written to the cache.
    Resolved(String),
    /// The provider had no postal code. Nothing was cached.
    NotFound,
}

impl Lookup {
    pub fn pincode(&self) -> Option<&str> {
        match self {
            Lookup::Cached(code) | Lookup::Resolved(code) => Some(code),
            Lookup::NotFound => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum LookupError {
    #[error(transparent)]
    Geocode(#[from] GeocodeError),

    #[error("pincode {pincode} was resolved but could not be cached: {source}")]
    CacheWrite {
        pincode: String,
        #[source]
        source: CacheError,
    },

    /// Failure of a resolution this request was coalesced into.
    #[error("{0}")]
    Shared(Arc<LookupError>),
}

impl LookupError {
    /// The failure with any [`LookupError::Shared`] wrapping removed.
    pub fn root(&self) -> &LookupError {
        match self {
            LookupError::Shared(inner) => inner.root(),
            other => other,
        }
    }
}

type Outcome = Result<Lookup, Arc<LookupError>>;

/// Resolutions currently running, keyed by [`Coordinate::key`].
#[derive(Default)]
struct InFlight {
    pending: Mutex<HashMap<String, Arc<OnceCell<Outcome>>>>,
}

impl InFlight {
    fn join(&self, key: &str) -> Arc<OnceCell<Outcome>> {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        pending.entry(key.to_owned()).or_default().clone()
    }

    fn finish(&self, key: &str, cell: &Arc<OnceCell<Outcome>>) {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        if pending.get(key).is_some_and(|current| Arc::ptr_eq(current, cell)) {
            pending.remove(key);
        }
    }
}

/// Cache-then-provider pincode lookup.
///
/// Without coalescing, two concurrent misses for the same spot both call the
/// provider and both write. With coalescing, they share one call and one
/// write.
pub struct PincodeService {
    cache: GeoCache,
    geocoder: Arc<dyn Geocoder>,
    in_flight: Option<InFlight>,
}

impl PincodeService {
    pub fn new(cache: GeoCache, geocoder: Arc<dyn Geocoder>, coalesce_misses: bool) -> Self {
        Self {
            cache,
            geocoder,
            in_flight: coalesce_misses.then(InFlight::default),
        }
    }

    /// Looks up the pincode at `at`.
    ///
    /// # Errors
    ///
    /// Provider failures and failed cache writes. Cache read failures are not
    /// errors; they count as misses.
    pub async fn lookup(&self, at: Coordinate) -> Result<Lookup, LookupError> {
        if let Some(code) = self.cache.lookup(at).await {
            return Ok(Lookup::Cached(code));
        }

        match &self.in_flight {
            None => self.resolve(at).await,
            Some(in_flight) => self.resolve_shared(in_flight, at).await,
        }
    }

    async fn resolve(&self, at: Coordinate) -> Result<Lookup, LookupError> {
        match self.geocoder.reverse(at).await? {
            Resolution::NotFound => {
                info!(coordinate = %at, "provider has no pincode for location");
                Ok(Lookup::NotFound)
            }
            Resolution::Found(pincode) => {
                if let Err(source) = self.cache.store(at, &pincode).await {
                    return Err(LookupError::CacheWrite { pincode, source });
                }
                info!(coordinate = %at, %pincode, "resolved and cached pincode");
                Ok(Lookup::Resolved(pincode))
            }
        }
    }

    async fn resolve_shared(
        &self,
        in_flight: &InFlight,
        at: Coordinate,
    ) -> Result<Lookup, LookupError> {
        let key = at.key();
        let cell = in_flight.join(&key);

        let mut ran = false;
        let ran_here = &mut ran;
        let outcome = cell
            .get_or_init(|| async move {
                *ran_here = true;
                self.resolve(at).await.map_err(Arc::new)
            })
            .await
            .clone();
        in_flight.finish(&key, &cell);

        if !ran {
            debug!(coordinate = %at, "joined in-flight resolution");
        }
        outcome.map_err(LookupError::Shared)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{GeoMember, GeoStore, MemoryGeoStore, RadiusQuery, StoreFuture};
    use crate::config::CacheConfig;
    use crate::geocode::GeocodeFuture;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    const KEY: &str = "test-index";

    /// Provider double that counts calls and answers with a fixed outcome.
    struct FakeGeocoder {
        calls: AtomicUsize,
        answer: fn() -> Result<Resolution, GeocodeError>,
        delay: Duration,
    }

    impl FakeGeocoder {
        fn new(answer: fn() -> Result<Resolution, GeocodeError>) -> Arc<Self> {
            Self::slow(answer, Duration::ZERO)
        }

        fn slow(answer: fn() -> Result<Resolution, GeocodeError>, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                answer,
                delay,
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl Geocoder for FakeGeocoder {
        fn reverse(&self, _at: Coordinate) -> GeocodeFuture<'_> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move {
                tokio::time::sleep(self.delay).await;
                (self.answer)()
            })
        }
    }

    struct ReadOnlyStore;

    impl GeoStore for ReadOnlyStore {
        fn radius<'a>(
            &'a self,
            _key: &'a str,
            _query: RadiusQuery,
        ) -> StoreFuture<'a, Vec<GeoMember>> {
            Box::pin(async { Ok::<_, CacheError>(Vec::<GeoMember>::new()) })
        }

        fn add<'a>(
            &'a self,
            _key: &'a str,
            location: Coordinate,
            _member: &'a str,
        ) -> StoreFuture<'a, ()> {
            Box::pin(async move { Err::<(), _>(CacheError::Unindexable(location)) })
        }
    }

    fn found() -> Result<Resolution, GeocodeError> {
        Ok(Resolution::Found("560001".to_owned()))
    }

    fn not_found() -> Result<Resolution, GeocodeError> {
        Ok(Resolution::NotFound)
    }

    fn status_error() -> Result<Resolution, GeocodeError> {
        Err(GeocodeError::Status(503))
    }

    fn cache_config() -> CacheConfig {
        CacheConfig {
            url: "memory://".to_owned(),
            key: KEY.to_owned(),
            radius_km: 1.0,
            limit: 1,
            timeout: Duration::from_secs(1),
        }
    }

    fn service(
        store: Arc<dyn GeoStore>,
        geocoder: Arc<FakeGeocoder>,
        coalesce: bool,
    ) -> PincodeService {
        PincodeService::new(GeoCache::new(store, &cache_config()), geocoder, coalesce)
    }

    fn bangalore() -> Coordinate {
        Coordinate::new(12.9716, 77.5946).unwrap()
    }

    #[tokio::test]
    async fn hit_skips_the_provider() {
        let store = Arc::new(MemoryGeoStore::new());
        store.add(KEY, bangalore(), "560001").await.unwrap();
        let geocoder = FakeGeocoder::new(status_error);
        let service = service(store, geocoder.clone(), false);

        let nearby = Coordinate::new(12.9720, 77.5950).unwrap();
        assert_eq!(service.lookup(nearby).await.unwrap(), Lookup::Cached("560001".to_owned()));
        assert_eq!(geocoder.calls(), 0);
    }

    #[tokio::test]
    async fn miss_resolves_once_and_caches() {
        let store = Arc::new(MemoryGeoStore::new());
        let geocoder = FakeGeocoder::new(found);
        let service = service(store.clone(), geocoder.clone(), false);

        let first = service.lookup(bangalore()).await.unwrap();
        assert_eq!(first, Lookup::Resolved("560001".to_owned()));
        assert_eq!(geocoder.calls(), 1);
        assert_eq!(store.len(KEY), 1);
        assert_eq!(store.position(KEY, "560001"), Some(bangalore()));

        let second = service.lookup(bangalore()).await.unwrap();
        assert_eq!(second, Lookup::Cached("560001".to_owned()));
        assert_eq!(second.pincode(), Some("560001"));
        assert_eq!(geocoder.calls(), 1);
    }

    #[tokio::test]
    async fn not_found_writes_nothing() {
        let store = Arc::new(MemoryGeoStore::new());
        let geocoder = FakeGeocoder::new(not_found);
        let service = service(store.clone(), geocoder.clone(), false);

        assert_eq!(service.lookup(bangalore()).await.unwrap(), Lookup::NotFound);
        assert_eq!(store.len(KEY), 0);

        // Not-found answers are not cached, so the provider is asked again.
        service.lookup(bangalore()).await.unwrap();
        assert_eq!(geocoder.calls(), 2);
    }

    #[tokio::test]
    async fn provider_failure_is_an_error() {
        let store = Arc::new(MemoryGeoStore::new());
        let service = service(store.clone(), FakeGeocoder::new(status_error), false);

        let err = service.lookup(bangalore()).await.unwrap_err();
        assert!(matches!(err, LookupError::Geocode(GeocodeError::Status(503))));
        assert_eq!(store.len(KEY), 0);
    }

    #[tokio::test]
    async fn failed_write_fails_the_lookup() {
        let service = service(Arc::new(ReadOnlyStore), FakeGeocoder::new(found), false);

        let err = service.lookup(bangalore()).await.unwrap_err();
        match err {
            LookupError::CacheWrite { pincode, .. } => assert_eq!(pincode, "560001"),
            other => panic!("expected CacheWrite, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn concurrent_misses_call_provider_twice_without_coalescing() {
        let store = Arc::new(MemoryGeoStore::new());
        let geocoder = FakeGeocoder::slow(found, Duration::from_millis(50));
        let service = service(store, geocoder.clone(), false);

        let (a, b) = tokio::join!(service.lookup(bangalore()), service.lookup(bangalore()));
        assert_eq!(a.unwrap(), Lookup::Resolved("560001".to_owned()));
        assert_eq!(b.unwrap(), Lookup::Resolved("560001".to_owned()));
        assert_eq!(geocoder.calls(), 2);
    }

    #[tokio::test]
    async fn concurrent_misses_share_one_call_when_coalescing() {
        let store = Arc::new(MemoryGeoStore::new());
        let geocoder = FakeGeocoder::slow(found, Duration::from_millis(50));
        let service = service(store.clone(), geocoder.clone(), true);

        let (a, b, c) = tokio::join!(
            service.lookup(bangalore()),
            service.lookup(bangalore()),
            service.lookup(bangalore())
        );
        for outcome in [a, b, c] {
            assert_eq!(outcome.unwrap().pincode(), Some("560001"));
        }
        assert_eq!(geocoder.calls(), 1);
        assert_eq!(store.len(KEY), 1);
    }

    #[tokio::test]
    async fn coalesced_failures_are_shared_then_forgotten() {
        let store = Arc::new(MemoryGeoStore::new());
        let geocoder = FakeGeocoder::slow(status_error, Duration::from_millis(20));
        let service = service(store, geocoder.clone(), true);

        let (a, b) = tokio::join!(service.lookup(bangalore()), service.lookup(bangalore()));
        for err in [a.unwrap_err(), b.unwrap_err()] {
            assert!(matches!(err.root(), LookupError::Geocode(GeocodeError::Status(503))));
        }
        assert_eq!(geocoder.calls(), 1);

        // The failed entry is dropped, so the next request tries again.
        let _ = service.lookup(bangalore()).await;
        assert_eq!(geocoder.calls(), 2);
    }
}
