use super::ParseError;
use crate::envelope::LogEnvelope;
use chrono::Utc;

/// Decode one HTTP-router access line (`k=v` tokens separated by spaces).
///
/// `hostname=` carries the routed host; its first label splits on the first
/// dash into app and space (`foo-bar.example` → app `foo`, space `bar`).
/// `source=` is URL-decoded and re-emitted as `fwd="..."`. `timestamp=` is
/// dropped. `site_domain=`, `site_path=`, and `path=` move into dedicated
/// envelope fields instead of the reformatted line.
pub fn parse_router_log(data: &[u8]) -> Result<LogEnvelope, ParseError> {
    let message = String::from_utf8_lossy(data);
    let mut app = String::new();
    let mut space = String::new();
    let mut site = String::new();
    let mut site_path = String::new();
    let mut path = String::new();
    let mut reformatted = String::new();

    for block in message.split_whitespace() {
        let Some((key, value)) = block.split_once('=') else {
            return Err(ParseError::MalformedLine);
        };
        match key {
            "hostname" => {
                let label = value.split('.').next().unwrap_or(value);
                match label.split_once('-') {
                    Some((a, s)) => {
                        app = a.to_string();
                        space = s.to_string();
                    }
                    None => {
                        app = label.to_string();
                        space = "default".to_string();
                    }
                }
            }
            "source" => {
                let trimmed = value.trim();
                let decoded = urlencoding::decode(trimmed)
                    .map(|c| c.into_owned())
                    .unwrap_or_else(|_| trimmed.to_string());
                reformatted.push_str(&format!("fwd=\"{}\" ", decoded));
            }
            "path" => path = value.to_string(),
            "site_domain" => site = value.to_string(),
            "site_path" => site_path = value.to_string(),
            "timestamp" => {}
            _ => reformatted.push_str(&format!("{}={} ", key, value)),
        }
    }

    if app.is_empty() || space.is_empty() {
        return Err(ParseError::MissingApp);
    }

    Ok(LogEnvelope {
        log: reformatted.trim_end().to_string(),
        stream: String::new(),
        time: Utc::now(),
        space: space.clone(),
        site,
        site_path,
        path,
        container_name: app,
        pod_name: "akkeris/router".to_string(),
        topic: space,
        tag: String::new(),
    })
}
