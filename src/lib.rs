//! # geopin
//!
//! A reverse-geocoding pincode service. `GET /<lat>/<long>` answers with the
//! postal code at that location, served from a Redis geospatial cache when a
//! record lies within the search radius and fetched from a Nominatim-style
//! provider (then cached) when none does.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use geopin::cache::{GeoCache, open_store};
//! use geopin::geocode::NominatimGeocoder;
//! use geopin::{Config, PincodeService, Server, app};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_env()?;
//!     let cache = GeoCache::new(open_store(&config.cache)?, &config.cache);
//!     let geocoder = Arc::new(NominatimGeocoder::new(&config.geocoder)?);
//!     let service = Arc::new(PincodeService::new(cache, geocoder, config.coalesce_misses));
//!
//!     let server = Server::bind(&config.listen_addr).await?;
//!     let router = app::router(service, &config.listen_addr);
//!     server.run(router.into_service()).await?;
//!     Ok(())
//! }
//! ```

// ── HTTP plumbing ─────────────────────────────────────────────────────────────
pub mod context;
pub mod http;
pub mod middleware;
pub mod router;
pub mod server;

// ── Pincode lookup ────────────────────────────────────────────────────────────
pub mod app;
pub mod cache;
pub mod config;
pub mod coordinate;
pub mod geocode;
pub mod lookup;

// ── Convenience re-exports ────────────────────────────────────────────────────
pub use config::Config;
pub use coordinate::Coordinate;
pub use http::{Headers, Method, Request, Response, StatusCode};
pub use lookup::{Lookup, LookupError, PincodeService};
pub use router::{Router, RouterService};
pub use server::{Server, ServerError};
