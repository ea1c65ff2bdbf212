use figment::providers::Env;
use figment::Figment;
use serde::{Deserialize, Serialize};

/// Runtime configuration for Logbus, read from the environment.
///
/// Presence-style switches (`TEST_MODE`, `RUN_SESSION`, ...) keep the
/// set-and-non-empty semantics their consumers expect, so they are stored
/// as raw strings with boolean accessors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    /// HTTP listener port for the admin/session surface
    #[serde(default = "default_port")]
    pub port: u16,

    /// Comma-separated Kafka broker list
    #[serde(default)]
    pub kafka_hosts: String,

    /// Static bearer token required on protected endpoints; compared
    /// byte-for-byte with the Authorization header, so it is read raw
    #[serde(skip)]
    pub auth_key: String,

    /// External base URL returned in `logplex_url` for new sessions
    #[serde(default)]
    pub session_url: String,

    /// Redis storage backend (exactly one of redis/postgres must be set)
    #[serde(default)]
    pub redis_url: Option<String>,

    /// Postgres storage backend
    #[serde(default)]
    pub postgres_url: Option<String>,

    /// Override for the syslog pool connection cap (clamped to [1, 1024])
    #[serde(default)]
    pub max_syslog_connections: Option<u32>,

    #[serde(skip)]
    pub test_mode: Option<String>,

    #[serde(skip)]
    pub run_session: Option<String>,

    #[serde(skip)]
    pub run_istio_als: Option<String>,

    #[serde(skip)]
    pub debug_session: Option<String>,
}

impl BusConfig {
    /// Load configuration from environment variables. The presence-style
    /// switches bypass type inference so `TEST_MODE=1` and `TEST_MODE=on`
    /// behave identically.
    pub fn load() -> anyhow::Result<Self> {
        let mut config: Self = Figment::new()
            .merge(Env::raw().only(&[
                "PORT",
                "KAFKA_HOSTS",
                "SESSION_URL",
                "REDIS_URL",
                "POSTGRES_URL",
                "MAX_SYSLOG_CONNECTIONS",
            ]))
            .extract()?;
        config.auth_key = std::env::var("AUTH_KEY").unwrap_or_default();
        config.test_mode = std::env::var("TEST_MODE").ok();
        config.run_session = std::env::var("RUN_SESSION").ok();
        config.run_istio_als = std::env::var("RUN_ISTIO_ALS").ok();
        config.debug_session = std::env::var("DEBUG_SESSION").ok();
        Ok(config)
    }

    pub fn brokers(&self) -> Vec<String> {
        self.kafka_hosts
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }

    pub fn is_test_mode(&self) -> bool {
        flag_set(&self.test_mode)
    }

    pub fn is_session_mode(&self) -> bool {
        flag_set(&self.run_session)
    }

    pub fn run_istio_als(&self) -> bool {
        flag_set(&self.run_istio_als)
    }

    /// Consumer group for the shuttle; tests run under a separate group so
    /// offsets never collide with a production shuttle.
    pub fn consumer_group(&self) -> &'static str {
        if self.is_test_mode() {
            "logbus-testing"
        } else {
            "logbus"
        }
    }

    pub fn max_syslog_connections(&self) -> Option<u32> {
        self.max_syslog_connections
            .filter(|n| (1..=1024).contains(n))
    }
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            kafka_hosts: String::new(),
            auth_key: String::new(),
            session_url: String::new(),
            redis_url: None,
            postgres_url: None,
            max_syslog_connections: None,
            test_mode: None,
            run_session: None,
            run_istio_als: None,
            debug_session: None,
        }
    }
}

fn flag_set(value: &Option<String>) -> bool {
    value.as_deref().is_some_and(|v| !v.is_empty())
}

fn default_port() -> u16 {
    5000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let cfg = BusConfig::default();
        assert_eq!(cfg.port, 5000);
        assert!(!cfg.is_test_mode());
        assert!(!cfg.is_session_mode());
        assert_eq!(cfg.consumer_group(), "logbus");
        assert!(cfg.brokers().is_empty());
    }

    #[test]
    fn test_broker_list_split() {
        let cfg = BusConfig {
            kafka_hosts: "k1:9092, k2:9092 ,".into(),
            ..Default::default()
        };
        assert_eq!(cfg.brokers(), vec!["k1:9092", "k2:9092"]);
    }

    #[test]
    fn test_mode_flags_require_non_empty_values() {
        let mut cfg = BusConfig {
            test_mode: Some(String::new()),
            ..Default::default()
        };
        assert!(!cfg.is_test_mode());
        cfg.test_mode = Some("1".into());
        assert!(cfg.is_test_mode());
        assert_eq!(cfg.consumer_group(), "logbus-testing");
    }

    #[test]
    fn test_syslog_connection_override_clamped() {
        let mut cfg = BusConfig::default();
        assert_eq!(cfg.max_syslog_connections(), None);
        cfg.max_syslog_connections = Some(0);
        assert_eq!(cfg.max_syslog_connections(), None);
        cfg.max_syslog_connections = Some(2000);
        assert_eq!(cfg.max_syslog_connections(), None);
        cfg.max_syslog_connections = Some(64);
        assert_eq!(cfg.max_syslog_connections(), Some(64));
    }
}
