//! Service configuration.
//!
//! Everything is read from `GEOPIN_*` environment variables, falling back to
//! defaults that match a local Redis and the public Nominatim instance.
//!
//! | Variable                     | Default                               |
//! |------------------------------|---------------------------------------|
//! | `GEOPIN_LISTEN_ADDR`         | `0.0.0.0:3000`                        |
//! | `GEOPIN_CACHE_URL`           | `redis://127.0.0.1:6379`              |
//! | `GEOPIN_CACHE_KEY`           | `citymall`                            |
//! | `GEOPIN_SEARCH_RADIUS_KM`    | `1`                                   |
//! | `GEOPIN_RESULT_LIMIT`        | `1`                                   |
//! | `GEOPIN_CACHE_TIMEOUT_MS`    | `2000`                                |
//! | `GEOPIN_GEOCODER_URL`        | `https://nominatim.openstreetmap.org` |
//! | `GEOPIN_USER_AGENT`          | `geopin/<version>`                    |
//! | `GEOPIN_GEOCODER_TIMEOUT_MS` | `10000`                               |
//! | `GEOPIN_COALESCE_MISSES`     | `false`                               |
//!
//! `GEOPIN_CACHE_URL=memory://` swaps Redis for the in-process store.

use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{var}=`{value}` is invalid: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

/// Geospatial cache settings.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Connection URL; `memory://` selects the in-process store.
    pub url: String,
    /// Name of the geospatial index all records live under.
    pub key: String,
    /// How close a cached record must be to count as a hit.
    pub radius_km: f64,
    /// Candidates fetched per lookup; only the nearest is used.
    pub limit: usize,
    pub timeout: Duration,
}

/// Reverse-geocoding provider settings.
#[derive(Debug, Clone)]
pub struct GeocoderConfig {
    /// Base URL of a Nominatim-compatible API, without the `/reverse` path.
    pub base_url: String,
    /// Nominatim's usage policy requires an identifying User-Agent.
    pub user_agent: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub listen_addr: String,
    pub cache: CacheConfig,
    pub geocoder: GeocoderConfig,
    /// Share one upstream call between concurrent misses for the same spot.
    pub coalesce_misses: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:3000".to_owned(),
            cache: CacheConfig {
                url: "redis://127.0.0.1:6379".to_owned(),
                key: "citymall".to_owned(),
                radius_km: 1.0,
                limit: 1,
                timeout: Duration::from_millis(2000),
            },
            geocoder: GeocoderConfig {
                base_url: "https://nominatim.openstreetmap.org".to_owned(),
                user_agent: concat!("geopin/", env!("CARGO_PKG_VERSION")).to_owned(),
                timeout: Duration::from_millis(10_000),
            },
            coalesce_misses: false,
        }
    }
}

impl Config {
    /// Loads configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Loads configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let get = |var: &str| lookup(var).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("GEOPIN_LISTEN_ADDR") {
            config.listen_addr = v;
        }
        if let Some(v) = get("GEOPIN_CACHE_URL") {
            config.cache.url = v;
        }
        if let Some(v) = get("GEOPIN_CACHE_KEY") {
            config.cache.key = v;
        }
        if let Some(v) = get("GEOPIN_SEARCH_RADIUS_KM") {
            config.cache.radius_km = parse("GEOPIN_SEARCH_RADIUS_KM", &v)?;
            if !(config.cache.radius_km.is_finite() && config.cache.radius_km > 0.0) {
                return Err(invalid("GEOPIN_SEARCH_RADIUS_KM", &v, "must be a positive number"));
            }
        }
        if let Some(v) = get("GEOPIN_RESULT_LIMIT") {
            config.cache.limit = parse("GEOPIN_RESULT_LIMIT", &v)?;
            if config.cache.limit == 0 {
                return Err(invalid("GEOPIN_RESULT_LIMIT", &v, "must be at least 1"));
            }
        }
        if let Some(v) = get("GEOPIN_CACHE_TIMEOUT_MS") {
            config.cache.timeout = parse_millis("GEOPIN_CACHE_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = get("GEOPIN_GEOCODER_URL") {
            config.geocoder.base_url = v.trim_end_matches('/').to_owned();
        }
        if let Some(v) = get("GEOPIN_USER_AGENT") {
            config.geocoder.user_agent = v;
        }
        if let Some(v) = get("GEOPIN_GEOCODER_TIMEOUT_MS") {
            config.geocoder.timeout = parse_millis("GEOPIN_GEOCODER_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = get("GEOPIN_COALESCE_MISSES") {
            config.coalesce_misses = match v.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" => false,
                _ => return Err(invalid("GEOPIN_COALESCE_MISSES", &v, "expected true or false")),
            };
        }

        Ok(config)
    }
}

fn invalid(var: &'static str, value: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        var,
        value: value.to_owned(),
        reason: reason.into(),
    }
}

fn parse<T>(var: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| invalid(var, value, e.to_string()))
}

fn parse_millis(var: &'static str, value: &str) -> Result<Duration, ConfigError> {
    match parse::<u64>(var, value)? {
        0 => Err(invalid(var, value, "must be greater than zero")),
        ms => Ok(Duration::from_millis(ms)),
    }
}
