use super::ParseError;
use crate::envelope::LogEnvelope;
use chrono::{DateTime, Utc};
use serde::Deserialize;

/// Pre-digested access-log record published by older mesh adapters.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct IstioLog {
    #[serde(default = "Utc::now")]
    pub time: DateTime<Utc>,

    #[serde(default)]
    pub severity: String,

    #[serde(default)]
    pub bytes: i64,

    #[serde(default)]
    pub method: String,

    #[serde(default)]
    pub source: String,

    #[serde(default)]
    pub space: String,

    #[serde(default)]
    pub path: String,

    #[serde(default)]
    pub request_id: String,

    #[serde(default)]
    pub from: String,

    #[serde(default)]
    pub host: String,

    #[serde(default)]
    pub app: String,

    #[serde(default)]
    pub fwd: String,

    #[serde(default)]
    pub status: i32,

    #[serde(default)]
    pub service: String,

    #[serde(default)]
    pub dyno: String,

    #[serde(default)]
    pub total: String,
}

// ── Envoy ALS entry, as jsonpb renders HTTPAccessLogEntry ──

#[derive(Debug, Deserialize)]
struct AlsEntry {
    common_properties: Option<AlsCommonProperties>,
    request: Option<AlsRequest>,
    response: Option<AlsResponse>,
    #[serde(default)]
    protocol_version: String,
}

#[derive(Debug, Deserialize)]
struct AlsCommonProperties {
    #[serde(default)]
    upstream_cluster: String,
    tls_properties: Option<AlsTlsProperties>,
    /// jsonpb renders protobuf Durations as strings like "0.004s"
    time_to_last_upstream_tx_byte: Option<String>,
    time_to_last_rx_byte: Option<String>,
    start_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize, Default)]
struct AlsTlsProperties {
    #[serde(default)]
    tls_version: String,

    #[serde(default)]
    tls_sni_hostname: String,
}

#[derive(Debug, Deserialize)]
struct AlsRequest {
    #[serde(default)]
    request_method: String,

    #[serde(default)]
    authority: String,

    #[serde(default)]
    path: String,

    #[serde(default)]
    original_path: String,

    #[serde(default)]
    request_id: String,

    #[serde(default)]
    forwarded_for: String,

    /// uint64s arrive as decimal strings
    #[serde(default)]
    request_headers_bytes: String,
}

#[derive(Debug, Deserialize)]
struct AlsResponse {
    response_code: Option<u32>,

    #[serde(default)]
    response_headers_bytes: String,

    #[serde(default)]
    response_body_bytes: String,

    #[serde(default)]
    response_flags: AlsResponseFlags,
}

#[derive(Debug, Deserialize, Default)]
struct AlsResponseFlags {
    #[serde(default)]
    downstream_connection_termination: bool,
}

/// Decode an access-log record from the mesh topic. The envoy ALS shape is
/// tried first; records from the older adapters fall back to [`IstioLog`].
pub fn parse_istio_log(data: &[u8]) -> Result<LogEnvelope, ParseError> {
    if let Ok(entry) = serde_json::from_slice::<AlsEntry>(data) {
        if entry.common_properties.is_some() {
            return envelope_from_als(entry);
        }
    }
    let simple: IstioLog = serde_json::from_slice(data)?;
    envelope_from_simple(simple)
}

/// Decode only the pre-digested shape (used by tail sessions, which format
/// these records directly).
pub fn parse_simple_istio_log(data: &[u8]) -> Result<IstioLog, ParseError> {
    Ok(serde_json::from_slice(data)?)
}

fn envelope_from_als(entry: AlsEntry) -> Result<LogEnvelope, ParseError> {
    let common = entry
        .common_properties
        .ok_or(ParseError::MissingField("common_properties"))?;
    let request = entry.request.ok_or(ParseError::MissingField("request"))?;
    let response = entry.response.ok_or(ParseError::MissingField("response"))?;
    let service = common
        .time_to_last_upstream_tx_byte
        .as_deref()
        .and_then(duration_ms)
        .ok_or(ParseError::MissingField("time_to_last_upstream_tx_byte"))?;
    let total = common
        .time_to_last_rx_byte
        .as_deref()
        .and_then(duration_ms)
        .ok_or(ParseError::MissingField("time_to_last_rx_byte"))?;

    // A connection the client tore down before the response was written has
    // no response code; surface it the way routers do, as 499.
    let status = match response.response_code {
        Some(code) => code,
        None if response.response_flags.downstream_connection_termination => 499,
        None => return Err(ParseError::MissingField("response_code")),
    };

    // upstream_cluster: "outbound|80||app.space.svc.cluster.local"
    let (app, space) = common
        .upstream_cluster
        .split('|')
        .nth(3)
        .and_then(|fqdn| {
            let mut parts = fqdn.split('.');
            Some((parts.next()?.to_string(), parts.next()?.to_string()))
        })
        .filter(|(app, space)| !app.is_empty() && !space.is_empty())
        .ok_or(ParseError::MissingField("upstream_cluster"))?;

    let tls = common.tls_properties.unwrap_or_default();
    let orig_path = if request.original_path.is_empty() {
        request.path.clone()
    } else {
        request.original_path.clone()
    };

    let log = format!(
        "bytes={} request_size={} response_size={} method={} request_id={} fwd={} \
         authority={} origin=https://{}{} protocol={} tls={} status={} service={}ms \
         total={}ms dyno={}-{}",
        zero_if_empty(&response.response_body_bytes),
        zero_if_empty(&request.request_headers_bytes),
        zero_if_empty(&response.response_headers_bytes),
        request.request_method,
        request.request_id,
        request.forwarded_for,
        request.authority,
        tls.tls_sni_hostname,
        orig_path,
        entry.protocol_version.to_lowercase(),
        tls.tls_version,
        status,
        service,
        total,
        app,
        space,
    );

    Ok(LogEnvelope {
        log,
        stream: String::new(),
        time: common.start_time.unwrap_or_else(Utc::now),
        space: space.clone(),
        site: String::new(),
        site_path: String::new(),
        path: request.path,
        container_name: app,
        pod_name: "akkeris/router".to_string(),
        topic: space,
        tag: String::new(),
    })
}

fn envelope_from_simple(msg: IstioLog) -> Result<LogEnvelope, ParseError> {
    if msg.app.is_empty() || msg.space.is_empty() {
        return Err(ParseError::MissingApp);
    }
    let log = format!(
        "bytes={} method={} path={} request_id={} host={} fwd={} status={} service={} total={}",
        msg.bytes,
        msg.method,
        msg.path,
        msg.request_id,
        msg.host,
        msg.fwd,
        msg.status,
        msg.service,
        msg.total,
    );
    Ok(LogEnvelope {
        log,
        stream: String::new(),
        time: msg.time,
        space: msg.space.clone(),
        site: String::new(),
        site_path: String::new(),
        path: msg.path,
        container_name: msg.app,
        pod_name: "akkeris/router".to_string(),
        topic: msg.space,
        tag: String::new(),
    })
}

/// "0.004s" → 4. Sub-millisecond values round to the nearest ms.
fn duration_ms(raw: &str) -> Option<i64> {
    let secs: f64 = raw.strip_suffix('s')?.parse().ok()?;
    Some((secs * 1000.0).round() as i64)
}

fn zero_if_empty(raw: &str) -> &str {
    if raw.is_empty() { "0" } else { raw }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn als_entry() -> serde_json::Value {
        serde_json::json!({
            "common_properties": {
                "upstream_cluster": "outbound|80||shop.prod.svc.cluster.local",
                "tls_properties": {
                    "tls_version": "TLSv1_2",
                    "tls_sni_hostname": "shop.example.com"
                },
                "time_to_last_upstream_tx_byte": "0.004s",
                "time_to_last_rx_byte": "0.0061s",
                "start_time": "2024-03-01T10:00:00Z"
            },
            "request": {
                "request_method": "GET",
                "authority": "shop.example.com",
                "path": "/cart",
                "request_id": "req-1",
                "forwarded_for": "1.2.3.4",
                "request_headers_bytes": "412"
            },
            "response": {
                "response_code": 200,
                "response_headers_bytes": "180",
                "response_body_bytes": "5120"
            },
            "protocol_version": "HTTP11"
        })
    }

    #[test]
    fn test_als_entry_derives_app_space_from_upstream_cluster() {
        let env = parse_istio_log(als_entry().to_string().as_bytes()).unwrap();
        assert_eq!(env.container_name, "shop");
        assert_eq!(env.space, "prod");
        assert_eq!(env.topic, "prod");
        assert_eq!(env.pod_name, "akkeris/router");
    }

    #[test]
    fn test_als_line_format() {
        let env = parse_istio_log(als_entry().to_string().as_bytes()).unwrap();
        assert_eq!(
            env.log,
            "bytes=5120 request_size=412 response_size=180 method=GET request_id=req-1 \
             fwd=1.2.3.4 authority=shop.example.com origin=https://shop.example.com/cart \
             protocol=http11 tls=TLSv1_2 status=200 service=4ms total=6ms dyno=shop-prod"
        );
    }

    #[test]
    fn test_als_client_disconnect_synthesizes_499() {
        let mut entry = als_entry();
        entry["response"] = serde_json::json!({
            "response_flags": {"downstream_connection_termination": true}
        });
        let env = parse_istio_log(entry.to_string().as_bytes()).unwrap();
        assert!(env.log.contains("status=499"), "log: {}", env.log);
    }

    #[test]
    fn test_als_missing_durations_fails() {
        let mut entry = als_entry();
        entry["common_properties"]
            .as_object_mut()
            .unwrap()
            .remove("time_to_last_rx_byte");
        assert!(parse_istio_log(entry.to_string().as_bytes()).is_err());
    }

    #[test]
    fn test_simple_variant_fallback() {
        let raw = serde_json::json!({
            "time": "2024-03-01T10:00:00Z",
            "bytes": 12,
            "method": "GET",
            "space": "prod",
            "path": "/x",
            "request_id": "r-2",
            "host": "shop.example.com",
            "app": "shop",
            "fwd": "1.1.1.1",
            "status": 404,
            "service": "2ms",
            "dyno": "shop-prod",
            "total": "3ms"
        });
        let env = parse_istio_log(raw.to_string().as_bytes()).unwrap();
        assert_eq!(env.container_name, "shop");
        assert!(env.log.contains("status=404"));
        assert!(env.log.contains("host=shop.example.com"));
    }

    #[test]
    fn test_simple_variant_without_app_fails() {
        let raw = serde_json::json!({"space": "prod", "status": 200});
        assert!(parse_istio_log(raw.to_string().as_bytes()).is_err());
    }

    #[test]
    fn test_duration_parse() {
        assert_eq!(duration_ms("0.004s"), Some(4));
        assert_eq!(duration_ms("1.5s"), Some(1500));
        assert_eq!(duration_ms("garbage"), None);
        assert_eq!(duration_ms("4"), None);
    }
}
