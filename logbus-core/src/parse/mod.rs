pub mod build;
pub mod istio;
pub mod router;

use crate::envelope::{LogEnvelope, LogSpec};
use thiserror::Error;

pub use build::parse_build_log;
pub use istio::parse_istio_log;
pub use router::parse_router_log;

/// Parse failures are counted and the record dropped; the pipeline never
/// stops for one bad message.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("line held a token without a key=value form")]
    MalformedLine,

    #[error("record resolved to no application")]
    MissingApp,

    #[error("access log entry missing required field: {0}")]
    MissingField(&'static str),

    #[error("JSON decode failed: {0}")]
    Json(#[from] serde_json::Error),
}

/// Decode an application log record (collector JSON) into an envelope.
/// The topic the event arrived on wins when the payload carries none.
pub fn parse_app_log(data: &[u8], topic: &str) -> Result<LogEnvelope, ParseError> {
    let spec: LogSpec = serde_json::from_slice(data)?;
    let mut env = LogEnvelope::from(spec);
    if env.topic.is_empty() {
        env.topic = topic.to_string();
    }
    Ok(env)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_app_log_passes_fields_through() {
        let raw = serde_json::json!({
            "log": "ready",
            "stream": "stdout",
            "kubernetes": {"container_name": "api", "pod_name": "api-web-7x"},
            "topic": "prod"
        });
        let env = parse_app_log(raw.to_string().as_bytes(), "prod").unwrap();
        assert_eq!(env.container_name, "api");
        assert_eq!(env.pod_name, "api-web-7x");
        assert_eq!(env.topic, "prod");
    }

    #[test]
    fn test_parse_app_log_fills_topic_from_event() {
        let raw = serde_json::json!({
            "log": "ready",
            "kubernetes": {"container_name": "api"}
        });
        let env = parse_app_log(raw.to_string().as_bytes(), "staging").unwrap();
        assert_eq!(env.topic, "staging");
    }

    #[test]
    fn test_parse_app_log_rejects_non_json() {
        assert!(parse_app_log(b"definitely not json", "t").is_err());
    }
}
