use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A persistent mapping from an app/space or site key to a drain URL.
///
/// Exactly one of `(app, space)` or `site` is set. Site routes match by
/// HTTP host rather than container.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Route {
    pub id: String,

    #[serde(default)]
    pub app: String,

    #[serde(default)]
    pub space: String,

    #[serde(default)]
    pub site: String,

    #[serde(default = "Utc::now")]
    pub created: DateTime<Utc>,

    #[serde(default = "Utc::now")]
    pub updated: DateTime<Utc>,

    #[serde(rename = "url")]
    pub destination_url: String,
}

impl Route {
    /// Routing-table key: site routes are namespaced with a `site:` prefix
    /// so a site domain can never collide with an `app + space` key.
    pub fn route_key(&self) -> String {
        if !self.site.is_empty() {
            format!("site:{}", self.site)
        } else {
            format!("{}{}", self.app, self.space)
        }
    }

    /// Human-readable form for log lines.
    pub fn describe(&self) -> String {
        if !self.site.is_empty() {
            format!("{} -> {}", self.site, self.destination_url)
        } else {
            format!("{}-{} -> {}", self.app, self.space, self.destination_url)
        }
    }
}

/// Key for a site-routed message, matching [`Route::route_key`].
pub fn site_key(site: &str) -> String {
    format!("site:{}", site)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn app_route() -> Route {
        serde_json::from_value(serde_json::json!({
            "id": "r1",
            "app": "app",
            "space": "space",
            "url": "syslog://10.0.0.1:514"
        }))
        .unwrap()
    }

    #[test]
    fn test_app_route_key() {
        assert_eq!(app_route().route_key(), "appspace");
    }

    #[test]
    fn test_site_route_key_is_prefixed() {
        let route: Route = serde_json::from_value(serde_json::json!({
            "id": "r2",
            "site": "foobar.example",
            "url": "syslog+tcp://10.0.0.1:514"
        }))
        .unwrap();
        assert_eq!(route.route_key(), "site:foobar.example");
        assert_eq!(route.route_key(), site_key("foobar.example"));
    }

    #[test]
    fn test_route_serde_roundtrip_uses_url_field() {
        let route = app_route();
        let bytes = serde_json::to_vec(&route).unwrap();
        let text = String::from_utf8(bytes.clone()).unwrap();
        assert!(text.contains("\"url\""), "wire field must be `url`");
        let decoded: Route = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(decoded.id, "r1");
        assert_eq!(decoded.destination_url, "syslog://10.0.0.1:514");
    }
}
