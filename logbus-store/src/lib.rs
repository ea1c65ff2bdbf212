pub mod memory;
pub mod postgres;
pub mod redis;

use async_trait::async_trait;
use logbus_core::{BusError, LogSession, Route};
use std::time::Duration;

pub use memory::MemoryStorage;
pub use postgres::PostgresStorage;
pub use redis::RedisStorage;

/// The route + session repository the routing plane reconciles against.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn health_check(&self) -> Result<(), BusError>;

    async fn add_route(&self, route: Route) -> Result<(), BusError>;

    async fn remove_route(&self, route: &Route) -> Result<(), BusError>;

    async fn get_routes(&self) -> Result<Vec<Route>, BusError>;

    async fn get_route_by_id(&self, id: &str) -> Result<Route, BusError>;

    async fn set_session(
        &self,
        key: &str,
        value: LogSession,
        ttl: Duration,
    ) -> Result<(), BusError>;

    async fn get_session(&self, key: &str) -> Result<LogSession, BusError>;
}
