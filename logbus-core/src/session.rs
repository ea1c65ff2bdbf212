use serde::{Deserialize, Serialize};

/// An ephemeral tail-session request, persisted with a TTL of at most five
/// minutes. Either `(app, space)` or `site` selects the stream to follow.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LogSession {
    #[serde(default)]
    pub app: String,

    #[serde(default)]
    pub space: String,

    #[serde(default)]
    pub site: String,

    #[serde(default)]
    pub lines: i32,

    #[serde(default)]
    pub tail: bool,
}

/// Sessions expire out of storage after this long.
pub const SESSION_TTL_SECS: u64 = 5 * 60;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_decodes_minimal_body() {
        let sess: LogSession =
            serde_json::from_str(r#"{"app":"web","space":"prod"}"#).unwrap();
        assert_eq!(sess.app, "web");
        assert_eq!(sess.space, "prod");
        assert_eq!(sess.site, "");
        assert_eq!(sess.lines, 0);
        assert!(!sess.tail);
    }

    #[test]
    fn test_session_roundtrip() {
        let sess = LogSession {
            app: "a".into(),
            space: "s".into(),
            site: String::new(),
            lines: 100,
            tail: true,
        };
        let decoded: LogSession =
            serde_json::from_slice(&serde_json::to_vec(&sess).unwrap()).unwrap();
        assert_eq!(decoded.lines, 100);
        assert!(decoded.tail);
    }
}
