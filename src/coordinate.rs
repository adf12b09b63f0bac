//! Latitude/longitude pairs parsed from request path segments.

use std::fmt;

use thiserror::Error;

/// Why a latitude/longitude pair was rejected.
#[derive(Debug, Error, PartialEq)]
pub enum CoordinateError {
    #[error("{axis} `{input}` is not a number")]
    NotANumber { axis: &'static str, input: String },

    #[error("{axis} {value} is outside [{min}, {max}]")]
    OutOfRange {
        axis: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },
}

/// A validated WGS84 coordinate.
///
/// # Examples
///
/// ```
/// use geopin::Coordinate;
///
/// let c = Coordinate::parse("12.9716", "77.5946").unwrap();
/// assert_eq!(c.latitude(), 12.9716);
/// assert_eq!(c.longitude(), 77.5946);
///
/// assert!(Coordinate::parse("north", "77.5946").is_err());
/// assert!(Coordinate::parse("91", "0").is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coordinate {
    latitude: f64,
    longitude: f64,
}

impl Coordinate {
    /// Builds a coordinate, rejecting non-finite or out-of-range values.
    pub fn new(latitude: f64, longitude: f64) -> Result<Self, CoordinateError> {
        Ok(Self {
            latitude: check("latitude", latitude, 90.0)?,
            longitude: check("longitude", longitude, 180.0)?,
        })
    }

    /// Parses the `lat` and `long` path segments.
    pub fn parse(latitude: &str, longitude: &str) -> Result<Self, CoordinateError> {
        Self::new(
            parse_axis("latitude", latitude)?,
            parse_axis("longitude", longitude)?,
        )
    }

    pub fn latitude(&self) -> f64 {
        self.latitude
    }

    pub fn longitude(&self) -> f64 {
        self.longitude
    }

    /// Stable key for grouping requests for the same spot, rounded to six
    /// decimal places (about 11 cm).
    pub fn key(&self) -> String {
        format!("{:.6},{:.6}", self.latitude, self.longitude)
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.latitude, self.longitude)
    }
}

fn parse_axis(axis: &'static str, input: &str) -> Result<f64, CoordinateError> {
    input.trim().parse().map_err(|_| CoordinateError::NotANumber {
        axis,
        input: input.to_owned(),
    })
}

fn check(axis: &'static str, value: f64, bound: f64) -> Result<f64, CoordinateError> {
    if value.is_finite() && (-bound..=bound).contains(&value) {
        Ok(value)
    } else {
        Err(CoordinateError::OutOfRange {
            axis,
            value,
            min: -bound,
            max: bound,
        })
    }
}
