use crate::Storage;
use async_trait::async_trait;
use logbus_core::{BusError, LogSession, Route};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// In-memory backend used by tests; sessions expire by wall clock.
#[derive(Default)]
pub struct MemoryStorage {
    routes: Mutex<Vec<Route>>,
    sessions: Mutex<HashMap<String, (LogSession, Instant)>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn health_check(&self) -> Result<(), BusError> {
        Ok(())
    }

    async fn add_route(&self, route: Route) -> Result<(), BusError> {
        self.routes.lock().unwrap().push(route);
        Ok(())
    }

    async fn remove_route(&self, route: &Route) -> Result<(), BusError> {
        let mut routes = self.routes.lock().unwrap();
        if let Some(pos) = routes.iter().position(|r| r.id == route.id) {
            routes.remove(pos);
        }
        Ok(())
    }

    async fn get_routes(&self) -> Result<Vec<Route>, BusError> {
        Ok(self.routes.lock().unwrap().clone())
    }

    async fn get_route_by_id(&self, id: &str) -> Result<Route, BusError> {
        self.routes
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.id == id)
            .cloned()
            .ok_or_else(|| BusError::RouteNotFound(id.to_string()))
    }

    async fn set_session(
        &self,
        key: &str,
        value: LogSession,
        ttl: Duration,
    ) -> Result<(), BusError> {
        self.sessions
            .lock()
            .unwrap()
            .insert(key.to_string(), (value, Instant::now() + ttl));
        Ok(())
    }

    async fn get_session(&self, key: &str) -> Result<LogSession, BusError> {
        let mut sessions = self.sessions.lock().unwrap();
        match sessions.get(key) {
            Some((session, expires)) if *expires > Instant::now() => Ok(session.clone()),
            Some(_) => {
                sessions.remove(key);
                Err(BusError::SessionNotFound(key.to_string()))
            }
            None => Err(BusError::SessionNotFound(key.to_string())),
        }
    }
}
