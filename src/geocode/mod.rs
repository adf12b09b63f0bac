//! Reverse geocoding: coordinate to postal code.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::coordinate::Coordinate;

pub mod nominatim;

pub use nominatim::NominatimGeocoder;

/// Outcome of a successful provider round trip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Found(String),
    /// The provider answered but had no postal code for the location.
    NotFound,
}

/// Provider failures that fail the request.
#[derive(Debug, Error)]
pub enum GeocodeError {
    #[error("geocoding request failed: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("geocoding provider did not answer within {0:?}")]
    Timeout(Duration),

    #[error("geocoding provider returned status {0}")]
    Status(u16),

    #[error("failed to parse geocoding response: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Boxed future returned by [`Geocoder::reverse`].
pub type GeocodeFuture<'a> =
    Pin<Box<dyn Future<Output = Result<Resolution, GeocodeError>> + Send + 'a>>;

/// A reverse-geocoding provider.
pub trait Geocoder: Send + Sync + 'static {
    fn reverse(&self, at: Coordinate) -> GeocodeFuture<'_>;
}

#[derive(Deserialize)]
struct ReverseBody {
    #[serde(default)]
    error: Option<serde_json::Value>,
    #[serde(default)]
    address: Option<serde_json::Value>,
}

/// Extracts the postal code from a Nominatim-style `jsonv2` reverse response.
///
/// The body must be a JSON object; beyond that every field is optional. A
/// non-null `error`, a missing or non-object `address`, and a missing or
/// non-string `address.postcode` all mean [`Resolution::NotFound`].
///
/// # Examples
///
/// ```
/// use geopin::geocode::{Resolution, decode_reverse};
///
/// let found = decode_reverse(br#"{"address":{"postcode":"560001"}}"#).unwrap();
/// assert_eq!(found, Resolution::Found("560001".to_owned()));
///
/// let missing = decode_reverse(br#"{"error":"Unable to geocode"}"#).unwrap();
/// assert_eq!(missing, Resolution::NotFound);
///
/// assert!(decode_reverse(b"<html>").is_err());
/// ```
pub fn decode_reverse(body: &[u8]) -> Result<Resolution, GeocodeError> {
    let body: ReverseBody = serde_json::from_slice(body)?;

    if body.error.is_some_and(|e| !e.is_null()) {
        return Ok(Resolution::NotFound);
    }

    let postcode = body
        .address
        .as_ref()
        .and_then(|address| address.get("postcode"))
        .and_then(serde_json::Value::as_str)
        .map(str::trim)
        .filter(|code| !code.is_empty());

    Ok(match postcode {
        Some(code) => Resolution::Found(code.to_owned()),
        None => Resolution::NotFound,
    })
}
