//! Client for Nominatim-compatible `/reverse` endpoints.

use std::time::Duration;

use tracing::debug;

use super::{GeocodeError, GeocodeFuture, Geocoder, decode_reverse};
use crate::config::GeocoderConfig;
use crate::coordinate::Coordinate;

/// Reverse geocoder backed by OpenStreetMap Nominatim (or anything that
/// speaks its `format=jsonv2` reverse API).
#[derive(Debug, Clone)]
pub struct NominatimGeocoder {
    client: reqwest::Client,
    endpoint: String,
    timeout: Duration,
}

impl NominatimGeocoder {
    pub fn new(config: &GeocoderConfig) -> Result<Self, GeocodeError> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.as_str())
            .timeout(config.timeout)
            .build()
            .map_err(GeocodeError::Transport)?;

        Ok(Self {
            client,
            endpoint: format!("{}/reverse", config.base_url.trim_end_matches('/')),
            timeout: config.timeout,
        })
    }

    fn transport(&self, e: reqwest::Error) -> GeocodeError {
        if e.is_timeout() {
            GeocodeError::Timeout(self.timeout)
        } else {
            GeocodeError::Transport(e)
        }
    }

    async fn fetch(&self, at: Coordinate) -> Result<super::Resolution, GeocodeError> {
        let response = self
            .client
            .get(&self.endpoint)
            .query(&[
                ("format", "jsonv2".to_owned()),
                ("lat", at.latitude().to_string()),
                ("lon", at.longitude().to_string()),
            ])
            .send()
            .await
            .map_err(|e| self.transport(e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(GeocodeError::Status(status.as_u16()));
        }

        let body = response.bytes().await.map_err(|e| self.transport(e))?;
        let resolution = decode_reverse(&body)?;
        debug!(coordinate = %at, ?resolution, "reverse geocoded");
        Ok(resolution)
    }
}

impl Geocoder for NominatimGeocoder {
    fn reverse(&self, at: Coordinate) -> GeocodeFuture<'_> {
        Box::pin(self.fetch(at))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;
    use crate::geocode::Resolution;
    use crate::{Response, Router, Server, StatusCode};

    // Stands in for Nominatim, keyed on the requested latitude.
    async fn spawn_provider() -> String {
        let mut router = Router::new();
        router.get("/reverse", |ctx: Context| async move {
            let req = ctx.request();
            let agent_ok = req
                .headers()
                .get("user-agent")
                .is_some_and(|ua| ua.starts_with("geopin-test"));
            if req.query_param("format") != Some("jsonv2") || !agent_ok {
                return Response::new(StatusCode::BadRequest);
            }

            match req.query_param("lat").unwrap_or_default() {
                "12.9716" => Response::new(StatusCode::Ok)
                    .header("Content-Type", "application/json")
                    .body(r#"{"address":{"postcode":"560001"}}"#),
                "0" => Response::new(StatusCode::Ok).body(r#"{"error":"Unable to geocode"}"#),
                "1" => Response::new(StatusCode::InternalServerError),
                "2" => Response::new(StatusCode::Ok).body("<html>rate limited</html>"),
                _ => {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Response::new(StatusCode::Ok).body("{}")
                }
            }
        });

        let server = Server::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", server.local_addr());
        tokio::spawn(server.run(router.into_service()));
        base
    }

    async fn geocoder() -> NominatimGeocoder {
        NominatimGeocoder::new(&GeocoderConfig {
            base_url: spawn_provider().await,
            user_agent: "geopin-test/0".to_owned(),
            timeout: Duration::from_millis(300),
        })
        .unwrap()
    }

    fn at(lat: f64) -> Coordinate {
        Coordinate::new(lat, 77.5946).unwrap()
    }

    #[tokio::test]
    async fn resolves_postcode() {
        let resolution = geocoder().await.reverse(at(12.9716)).await.unwrap();
        assert_eq!(resolution, Resolution::Found("560001".to_owned()));
    }

    #[tokio::test]
    async fn provider_error_is_not_found() {
        let resolution = geocoder().await.reverse(at(0.0)).await.unwrap();
        assert_eq!(resolution, Resolution::NotFound);
    }

    #[tokio::test]
    async fn non_success_status_is_an_error() {
        let err = geocoder().await.reverse(at(1.0)).await.unwrap_err();
        assert!(matches!(err, GeocodeError::Status(500)));
    }

    #[tokio::test]
    async fn non_json_body_is_an_error() {
        let err = geocoder().await.reverse(at(2.0)).await.unwrap_err();
        assert!(matches!(err, GeocodeError::Decode(_)));
    }

    #[tokio::test]
    async fn slow_provider_times_out() {
        let err = geocoder().await.reverse(at(3.0)).await.unwrap_err();
        assert!(matches!(err, GeocodeError::Timeout(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn unreachable_provider_is_a_transport_error() {
        let geocoder = NominatimGeocoder::new(&GeocoderConfig {
            base_url: "http://127.0.0.1:1".to_owned(),
            user_agent: "geopin-test/0".to_owned(),
            timeout: Duration::from_millis(300),
        })
        .unwrap();
        let err = geocoder.reverse(at(12.9716)).await.unwrap_err();
        assert!(matches!(err, GeocodeError::Transport(_)), "got {err:?}");
    }
}
