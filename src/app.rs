//! HTTP surface: the two routes and how lookup outcomes become responses.

use std::sync::Arc;

use serde::Serialize;
use tracing::error;

use crate::context::Context;
use crate::coordinate::Coordinate;
use crate::geocode::GeocodeError;
use crate::lookup::{Lookup, LookupError, NOT_FOUND_MESSAGE, PincodeService};
use crate::middleware::LoggerMiddleware;
use crate::{Response, Router, StatusCode};

#[derive(Serialize)]
struct PincodeBody<'a> {
    #[serde(rename = "Pincode")]
    pincode: &'a str,
}

/// Builds the service router.
///
/// - `GET /` answers with a status line naming `listen_addr`.
/// - `GET /:lat/:long` answers `{"Pincode": "..."}`, the not-found message,
///   or an error.
pub fn router(service: Arc<PincodeService>, listen_addr: &str) -> Router {
    let mut router = Router::new();
    router.layer(LoggerMiddleware);

    let banner = format!("Running server on {listen_addr}");
    router.get("/", move |_ctx: Context| {
        let banner = banner.clone();
        async move { Response::text(StatusCode::Ok, banner) }
    });

    router.get("/:lat/:long", move |ctx: Context| {
        let service = Arc::clone(&service);
        async move { pincode(&service, &ctx).await }
    });

    router
}

async fn pincode(service: &PincodeService, ctx: &Context) -> Response {
    let at = match Coordinate::parse(ctx.param("lat"), ctx.param("long")) {
        Ok(at) => at,
        Err(e) => return Response::text(StatusCode::BadRequest, e.to_string()),
    };

    match service.lookup(at).await {
        Ok(Lookup::Cached(code) | Lookup::Resolved(code)) => {
            Response::json(StatusCode::Ok, &PincodeBody { pincode: &code })
        }
        Ok(Lookup::NotFound) => Response::text(StatusCode::Ok, NOT_FOUND_MESSAGE),
        Err(e) => {
            error!(coordinate = %at, error = %e, "pincode lookup failed");
            Response::text(status_for(&e), e.to_string())
        }
    }
}

fn status_for(err: &LookupError) -> StatusCode {
    match err.root() {
        LookupError::Geocode(GeocodeError::Timeout(_)) => StatusCode::GatewayTimeout,
        LookupError::Geocode(_) => StatusCode::BadGateway,
        _ => StatusCode::InternalServerError,
    }
}
