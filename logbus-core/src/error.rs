use thiserror::Error;

/// Unified error type for Logbus.
#[derive(Error, Debug)]
pub enum BusError {
    #[error("Invalid host provided")]
    EmptyDrainUrl,

    #[error("Host failed to properly connect")]
    QuarantinedHost,

    #[error("The specified scheme format is invalid or not supported: {0}")]
    UnsupportedScheme(String),

    #[error("Unable to establish connection to {0}")]
    DrainUnreachable(String),

    #[error("No such log drain or app found: {0}")]
    RouteNotFound(String),

    #[error("No such log session found: {0}")]
    SessionNotFound(String),

    #[error("Malformed request: {0}")]
    InvalidRequest(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Broker error: {0}")]
    Broker(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Internal: {0}")]
    Internal(String),
}

impl BusError {
    /// Map to HTTP status code for the admin surface.
    pub fn status_code(&self) -> u16 {
        match self {
            BusError::RouteNotFound(_) => 404,
            BusError::SessionNotFound(_) => 404,
            BusError::InvalidRequest(_) => 400,
            BusError::EmptyDrainUrl => 400,
            BusError::UnsupportedScheme(_) => 400,
            BusError::Unauthorized => 401,
            _ => 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(BusError::RouteNotFound("x".into()).status_code(), 404);
        assert_eq!(BusError::SessionNotFound("x".into()).status_code(), 404);
        assert_eq!(BusError::InvalidRequest("x".into()).status_code(), 400);
        assert_eq!(BusError::EmptyDrainUrl.status_code(), 400);
        assert_eq!(BusError::UnsupportedScheme("ftp://".into()).status_code(), 400);
        assert_eq!(BusError::Unauthorized.status_code(), 401);
        assert_eq!(BusError::Storage("down".into()).status_code(), 500);
        assert_eq!(BusError::Internal("x".into()).status_code(), 500);
    }

    #[test]
    fn test_display_messages() {
        assert_eq!(BusError::EmptyDrainUrl.to_string(), "Invalid host provided");
        assert_eq!(
            BusError::QuarantinedHost.to_string(),
            "Host failed to properly connect"
        );
        assert_eq!(
            BusError::DrainUnreachable("syslog://h:1".into()).to_string(),
            "Unable to establish connection to syslog://h:1"
        );
    }
}
