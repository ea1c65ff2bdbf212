use crate::Storage;
use async_trait::async_trait;
use logbus_core::{BusError, LogSession, Route};
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use std::time::Duration;
use tracing::info;

const ROUTES_KEY: &str = "routes";

/// Redis backend: routes live in one list, sessions as TTL'd keys.
pub struct RedisStorage {
    conn: MultiplexedConnection,
}

impl RedisStorage {
    pub async fn connect(url: &str) -> Result<Self, BusError> {
        let client =
            redis::Client::open(url).map_err(|e| BusError::Storage(e.to_string()))?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| BusError::Storage(e.to_string()))?;
        info!(url = %url, "Connected to redis");
        Ok(RedisStorage { conn })
    }
}

#[async_trait]
impl Storage for RedisStorage {
    async fn health_check(&self) -> Result<(), BusError> {
        let mut conn = self.conn.clone();
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map(|_| ())
            .map_err(|e| BusError::Storage(e.to_string()))
    }

    async fn add_route(&self, route: Route) -> Result<(), BusError> {
        let mut conn = self.conn.clone();
        let payload = serde_json::to_string(&route)?;
        conn.rpush::<_, _, ()>(ROUTES_KEY, payload)
            .await
            .map_err(|e| BusError::Storage(e.to_string()))
    }

    async fn remove_route(&self, route: &Route) -> Result<(), BusError> {
        let mut conn = self.conn.clone();
        // Routes are stored as their JSON encoding; LREM matches on the
        // exact stored value.
        let payload = serde_json::to_string(route)?;
        conn.lrem::<_, _, ()>(ROUTES_KEY, 1, payload)
            .await
            .map_err(|e| BusError::Storage(e.to_string()))
    }

    async fn get_routes(&self) -> Result<Vec<Route>, BusError> {
        let mut conn = self.conn.clone();
        let raw: Vec<String> = conn
            .lrange(ROUTES_KEY, 0, -1)
            .await
            .map_err(|e| BusError::Storage(e.to_string()))?;
        let mut routes = Vec::with_capacity(raw.len());
        for entry in raw {
            match serde_json::from_str::<Route>(&entry) {
                Ok(route) => routes.push(route),
                Err(e) => {
                    tracing::warn!(error = %e, "Skipping bad route entry in storage");
                }
            }
        }
        Ok(routes)
    }

    async fn get_route_by_id(&self, id: &str) -> Result<Route, BusError> {
        self.get_routes()
            .await?
            .into_iter()
            .find(|r| r.id == id)
            .ok_or_else(|| BusError::RouteNotFound(id.to_string()))
    }

    async fn set_session(
        &self,
        key: &str,
        value: LogSession,
        ttl: Duration,
    ) -> Result<(), BusError> {
        let mut conn = self.conn.clone();
        let payload = serde_json::to_string(&value)?;
        conn.set_ex::<_, _, ()>(key, payload, ttl.as_secs())
            .await
            .map_err(|e| BusError::Storage(e.to_string()))
    }

    async fn get_session(&self, key: &str) -> Result<LogSession, BusError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn
            .get(key)
            .await
            .map_err(|e| BusError::Storage(e.to_string()))?;
        let raw = raw.ok_or_else(|| BusError::SessionNotFound(key.to_string()))?;
        Ok(serde_json::from_str(&raw)?)
    }
}
