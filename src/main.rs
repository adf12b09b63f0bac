use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use geopin::cache::{GeoCache, open_store};
use geopin::geocode::NominatimGeocoder;
use geopin::{Config, PincodeService, Server, app};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = Config::from_env()?;
    info!(
        listen = %config.listen_addr,
        cache = %config.cache.url,
        index = %config.cache.key,
        radius_km = config.cache.radius_km,
        geocoder = %config.geocoder.base_url,
        coalesce_misses = config.coalesce_misses,
        "starting geopin"
    );

    let cache = GeoCache::new(open_store(&config.cache)?, &config.cache);
    let geocoder = Arc::new(NominatimGeocoder::new(&config.geocoder)?);
    let service = Arc::new(PincodeService::new(cache, geocoder, config.coalesce_misses));

    let server = Server::bind(&config.listen_addr).await?;
    let router = app::router(service, &server.local_addr().to_string());
    server.serve(router.into_service(), shutdown_signal()).await?;

    info!("geopin stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for ctrl-c, running until killed");
        std::future::pending::<()>().await;
    }
}
