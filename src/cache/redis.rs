//! Redis-backed geospatial store.

use redis::aio::ConnectionManager;
use tokio::sync::OnceCell;
use tracing::info;

use super::{CacheError, GeoMember, GeoStore, RadiusQuery, StoreFuture};
use crate::coordinate::Coordinate;

/// A [`GeoStore`] on top of Redis `GEOADD` and `GEORADIUS_RO`.
///
/// The connection is opened on first use and then shared: an unreachable
/// Redis at startup does not stop the service, it only turns lookups into
/// misses until Redis comes back.
pub struct RedisGeoStore {
    client: redis::Client,
    conn: OnceCell<ConnectionManager>,
}

impl RedisGeoStore {
    /// Validates `url` without connecting.
    pub fn open(url: &str) -> Result<Self, CacheError> {
        Ok(Self {
            client: redis::Client::open(url)?,
            conn: OnceCell::new(),
        })
    }

    async fn connection(&self) -> Result<ConnectionManager, CacheError> {
        let conn = self
            .conn
            .get_or_try_init(|| async {
                let conn = ConnectionManager::new(self.client.clone()).await?;
                info!(addr = ?self.client.get_connection_info().addr, "connected to redis");
                Ok::<_, CacheError>(conn)
            })
            .await?;
        Ok(conn.clone())
    }
}

/// `GEORADIUS_RO key lon lat radius km WITHDIST COUNT n ASC`
fn radius_cmd(key: &str, query: &RadiusQuery) -> redis::Cmd {
    let mut cmd = redis::cmd("GEORADIUS_RO");
    cmd.arg(key)
        .arg(query.center.longitude())
        .arg(query.center.latitude())
        .arg(query.radius_km)
        .arg("km")
        .arg("WITHDIST")
        .arg("COUNT")
        .arg(query.limit)
        .arg("ASC");
    cmd
}

/// `GEOADD key lon lat member`
fn add_cmd(key: &str, location: Coordinate, member: &str) -> redis::Cmd {
    let mut cmd = redis::cmd("GEOADD");
    cmd.arg(key)
        .arg(location.longitude())
        .arg(location.latitude())
        .arg(member);
    cmd
}

/// Decodes a `WITHDIST` reply: an array of `[name, distance]` pairs.
fn decode_members(reply: &redis::Value) -> Result<Vec<GeoMember>, CacheError> {
    let hits: Vec<(String, f64)> = redis::from_redis_value(reply)?;
    Ok(hits
        .into_iter()
        .map(|(name, distance_km)| GeoMember { name, distance_km })
        .collect())
}

impl GeoStore for RedisGeoStore {
    fn radius<'a>(&'a self, key: &'a str, query: RadiusQuery) -> StoreFuture<'a, Vec<GeoMember>> {
        Box::pin(async move {
            let mut conn = self.connection().await?;
            let reply: redis::Value = radius_cmd(key, &query).query_async(&mut conn).await?;
            decode_members(&reply)
        })
    }

    fn add<'a>(
        &'a self,
        key: &'a str,
        location: Coordinate,
        member: &'a str,
    ) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let mut conn = self.connection().await?;
            let _added: i64 = add_cmd(key, location, member)
                .query_async(&mut conn)
                .await?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use redis::Value;

    /// Arguments of a packed RESP command, in order.
    fn args(cmd: &redis::Cmd) -> Vec<String> {
        let packed = String::from_utf8(cmd.get_packed_command()).unwrap();
        packed
            .split("\r\n")
            .filter(|line| !line.is_empty() && !line.starts_with('*') && !line.starts_with('$'))
            .map(str::to_owned)
            .collect()
    }

    #[test]
    fn radius_query_puts_longitude_first() {
        let query = RadiusQuery {
            center: Coordinate::new(12.9716, 77.5946).unwrap(),
            radius_km: 1.5,
            limit: 1,
        };
        assert_eq!(
            args(&radius_cmd("citymall", &query)),
            [
                "GEORADIUS_RO", "citymall", "77.5946", "12.9716", "1.5", "km", "WITHDIST",
                "COUNT", "1", "ASC",
            ]
        );
    }

    #[test]
    fn add_puts_longitude_first() {
        let at = Coordinate::new(12.9716, 77.5946).unwrap();
        assert_eq!(
            args(&add_cmd("citymall", at, "560001")),
            ["GEOADD", "citymall", "77.5946", "12.9716", "560001"]
        );
    }

    #[test]
    fn decodes_withdist_reply() {
        let reply = Value::Array(vec![
            Value::Array(vec![
                Value::BulkString(b"560001".to_vec()),
                Value::BulkString(b"0.1234".to_vec()),
            ]),
            Value::Array(vec![
                Value::BulkString(b"560002".to_vec()),
                Value::BulkString(b"0.9000".to_vec()),
            ]),
        ]);
        let members = decode_members(&reply).unwrap();
        assert_eq!(
            members,
            [
                GeoMember { name: "560001".to_owned(), distance_km: 0.1234 },
                GeoMember { name: "560002".to_owned(), distance_km: 0.9 },
            ]
        );
        assert!(decode_members(&Value::Array(vec![])).unwrap().is_empty());
    }

    #[test]
    fn malformed_reply_is_an_error() {
        let reply = Value::Array(vec![Value::Array(vec![
            Value::BulkString(b"560001".to_vec()),
            Value::BulkString(b"far".to_vec()),
        ])]);
        assert!(matches!(decode_members(&reply), Err(CacheError::Redis(_))));
    }

    #[test]
    fn open_accepts_redis_urls() {
        assert!(RedisGeoStore::open("redis://127.0.0.1:6379").is_ok());
        assert!(RedisGeoStore::open("redis://cache.internal:6380/2").is_ok());
    }

    #[test]
    fn open_rejects_garbage() {
        assert!(matches!(
            RedisGeoStore::open("not a url"),
            Err(CacheError::Redis(_))
        ));
    }
}
