use super::ParseError;
use crate::envelope::LogEnvelope;
use chrono::Utc;
use regex::Regex;
use serde::Deserialize;
use std::sync::LazyLock;

/// Build `ARG` steps leak their values into the build log; redact them.
static ARG_STEP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(Step \d+/\d+ : ARG [0-9A-Za-z_]+=).*").unwrap());

#[derive(Debug, Deserialize)]
struct BuildLogSpec {
    #[serde(default)]
    metadata: String,

    #[serde(default)]
    #[allow(dead_code)]
    build: i64,

    #[serde(default)]
    #[allow(dead_code)]
    job: String,

    #[serde(default)]
    message: String,
}

/// Decode one build-system record. `metadata` is `app-space` (space
/// defaulting to `default` when the dash is absent).
pub fn parse_build_log(data: &[u8]) -> Result<LogEnvelope, ParseError> {
    let bmsg: BuildLogSpec = serde_json::from_slice(data)?;

    let (app, space) = match bmsg.metadata.split_once('-') {
        Some((app, space)) => (app.to_string(), space.to_string()),
        None => (bmsg.metadata.clone(), "default".to_string()),
    };
    if app.is_empty() || space.is_empty() {
        return Err(ParseError::MissingApp);
    }

    let message = ARG_STEP.replace_all(&bmsg.message, "${1}...").into_owned();

    Ok(LogEnvelope {
        log: message,
        stream: String::new(),
        time: Utc::now(),
        space: space.clone(),
        site: String::new(),
        site_path: String::new(),
        path: String::new(),
        container_name: app,
        pod_name: "akkeris/build".to_string(),
        topic: space,
        tag: String::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_json(metadata: &str, message: &str) -> Vec<u8> {
        serde_json::json!({
            "metadata": metadata,
            "build": 7,
            "job": "deploy",
            "message": message
        })
        .to_string()
        .into_bytes()
    }

    #[test]
    fn test_metadata_splits_app_and_space() {
        let env = parse_build_log(&build_json("blog-perf", "Step 1/9 : FROM alpine")).unwrap();
        assert_eq!(env.container_name, "blog");
        assert_eq!(env.space, "perf");
        assert_eq!(env.topic, "perf");
        assert_eq!(env.pod_name, "akkeris/build");
    }

    #[test]
    fn test_metadata_without_dash_defaults_space() {
        let env = parse_build_log(&build_json("blog", "pushing image")).unwrap();
        assert_eq!(env.container_name, "blog");
        assert_eq!(env.space, "default");
    }

    #[test]
    fn test_arg_values_redacted() {
        let env = parse_build_log(&build_json(
            "blog-perf",
            "Step 3/9 : ARG SECRET_TOKEN=hunter2",
        ))
        .unwrap();
        assert_eq!(env.log, "Step 3/9 : ARG SECRET_TOKEN=...");
    }

    #[test]
    fn test_non_arg_steps_untouched() {
        let env =
            parse_build_log(&build_json("blog-perf", "Step 4/9 : RUN make build")).unwrap();
        assert_eq!(env.log, "Step 4/9 : RUN make build");
    }

    #[test]
    fn test_empty_metadata_fails() {
        assert!(parse_build_log(&build_json("", "msg")).is_err());
    }

    #[test]
    fn test_invalid_json_fails() {
        assert!(parse_build_log(b"not json at all").is_err());
    }
}
