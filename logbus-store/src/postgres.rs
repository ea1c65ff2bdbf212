use crate::Storage;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use logbus_core::{BusError, LogSession, Route};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use std::time::Duration;
use tracing::{info, warn};

const SESSION_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Postgres backend over the `drains` and `sessions` tables. A background
/// task deletes expired session rows every minute.
pub struct PostgresStorage {
    pool: PgPool,
}

impl PostgresStorage {
    pub async fn connect(url: &str) -> Result<Self, BusError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(url)
            .await
            .map_err(|e| BusError::Storage(e.to_string()))?;

        sqlx::query(
            "create table if not exists drains (
                drain varchar(128) not null primary key,
                app text not null,
                space text not null,
                site text not null default '',
                created timestamptz,
                updated timestamptz,
                destination text not null
            )",
        )
        .execute(&pool)
        .await
        .map_err(|e| BusError::Storage(e.to_string()))?;

        sqlx::query(
            "create table if not exists sessions (
                session varchar(128) not null primary key,
                app text not null,
                space text not null,
                site text not null default '',
                lines int,
                tail boolean,
                expiration timestamptz default now()
            )",
        )
        .execute(&pool)
        .await
        .map_err(|e| BusError::Storage(e.to_string()))?;

        info!("Connected to postgres");

        let sweeper = pool.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(SESSION_SWEEP_INTERVAL);
            loop {
                tick.tick().await;
                if let Err(e) = sqlx::query("delete from sessions where expiration < now()")
                    .execute(&sweeper)
                    .await
                {
                    warn!(error = %e, "Session sweep failed");
                }
            }
        });

        Ok(PostgresStorage { pool })
    }
}

fn route_from_row(row: &sqlx::postgres::PgRow) -> Result<Route, sqlx::Error> {
    Ok(Route {
        id: row.try_get("drain")?,
        app: row.try_get("app")?,
        space: row.try_get("space")?,
        site: row.try_get("site")?,
        created: row
            .try_get::<Option<DateTime<Utc>>, _>("created")?
            .unwrap_or_else(Utc::now),
        updated: row
            .try_get::<Option<DateTime<Utc>>, _>("updated")?
            .unwrap_or_else(Utc::now),
        destination_url: row.try_get("destination")?,
    })
}

#[async_trait]
impl Storage for PostgresStorage {
    async fn health_check(&self) -> Result<(), BusError> {
        sqlx::query("select true")
            .fetch_one(&self.pool)
            .await
            .map(|_| ())
            .map_err(|e| BusError::Storage(e.to_string()))
    }

    async fn add_route(&self, route: Route) -> Result<(), BusError> {
        sqlx::query(
            "insert into drains (drain, app, space, site, created, updated, destination)
             values ($1, $2, $3, $4, $5, $6, $7) on conflict do nothing",
        )
        .bind(&route.id)
        .bind(&route.app)
        .bind(&route.space)
        .bind(&route.site)
        .bind(route.created)
        .bind(route.updated)
        .bind(&route.destination_url)
        .execute(&self.pool)
        .await
        .map(|_| ())
        .map_err(|e| BusError::Storage(e.to_string()))
    }

    async fn remove_route(&self, route: &Route) -> Result<(), BusError> {
        sqlx::query("delete from drains where drain = $1")
            .bind(&route.id)
            .execute(&self.pool)
            .await
            .map(|_| ())
            .map_err(|e| BusError::Storage(e.to_string()))
    }

    async fn get_routes(&self) -> Result<Vec<Route>, BusError> {
        let rows = sqlx::query(
            "select drain, app, space, site, created, updated, destination from drains",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| BusError::Storage(e.to_string()))?;
        rows.iter()
            .map(|row| route_from_row(row).map_err(|e| BusError::Storage(e.to_string())))
            .collect()
    }

    async fn get_route_by_id(&self, id: &str) -> Result<Route, BusError> {
        let row = sqlx::query(
            "select drain, app, space, site, created, updated, destination
             from drains where drain = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| BusError::Storage(e.to_string()))?
        .ok_or_else(|| BusError::RouteNotFound(id.to_string()))?;
        route_from_row(&row).map_err(|e| BusError::Storage(e.to_string()))
    }

    async fn set_session(
        &self,
        key: &str,
        value: LogSession,
        ttl: Duration,
    ) -> Result<(), BusError> {
        let expiration = Utc::now() + chrono::Duration::from_std(ttl).unwrap_or_default();
        sqlx::query(
            "insert into sessions (session, app, space, site, lines, tail, expiration)
             values ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(key)
        .bind(&value.app)
        .bind(&value.space)
        .bind(&value.site)
        .bind(value.lines)
        .bind(value.tail)
        .bind(expiration)
        .execute(&self.pool)
        .await
        .map(|_| ())
        .map_err(|e| BusError::Storage(e.to_string()))
    }

    async fn get_session(&self, key: &str) -> Result<LogSession, BusError> {
        let row = sqlx::query(
            "select app, space, site, lines, tail from sessions
             where session = $1 and expiration >= now()",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| BusError::Storage(e.to_string()))?
        .ok_or_else(|| BusError::SessionNotFound(key.to_string()))?;
        Ok(LogSession {
            app: row
                .try_get("app")
                .map_err(|e| BusError::Storage(e.to_string()))?,
            space: row
                .try_get("space")
                .map_err(|e| BusError::Storage(e.to_string()))?,
            site: row
                .try_get("site")
                .map_err(|e| BusError::Storage(e.to_string()))?,
            lines: row.try_get("lines").unwrap_or(0),
            tail: row.try_get("tail").unwrap_or(false),
        })
    }
}
