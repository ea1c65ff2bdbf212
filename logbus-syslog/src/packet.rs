use chrono::{DateTime, SecondsFormat, Utc};

/// Syslog severity (RFC 5424 §6.2.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Emerg = 0,
    Alert = 1,
    Crit = 2,
    Err = 3,
    Warning = 4,
    Notice = 5,
    Info = 6,
    Debug = 7,
}

/// Syslog facility; the bus only ever emits user-level records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Facility {
    Kern = 0,
    User = 1,
    Mail = 2,
    Daemon = 3,
}

/// One outbound syslog record.
#[derive(Debug, Clone)]
pub struct Packet {
    pub severity: Severity,
    pub facility: Facility,
    pub hostname: String,
    pub tag: String,
    pub time: DateTime<Utc>,
    pub message: String,
}

impl Packet {
    pub fn priority(&self) -> u8 {
        (self.facility as u8) * 8 + self.severity as u8
    }

    /// Render the RFC 5424 frame:
    /// `<PRI>1 TIMESTAMP HOSTNAME TAG - - - MSG`.
    ///
    /// When `max_size > 0` and the frame would exceed it, the message is
    /// truncated (on a char boundary) so the frame fits.
    pub fn generate(&self, max_size: usize) -> String {
        let ts = self.time.to_rfc3339_opts(SecondsFormat::Secs, true);
        let frame = format!(
            "<{}>1 {} {} {} - - - {}",
            self.priority(),
            ts,
            nil_if_empty(&self.hostname),
            nil_if_empty(&self.tag),
            self.message
        );
        if max_size == 0 || frame.len() <= max_size {
            return frame;
        }
        let overflow = frame.len() - max_size;
        let keep = self.message.len().saturating_sub(overflow);
        let mut boundary = keep;
        while boundary > 0 && !self.message.is_char_boundary(boundary) {
            boundary -= 1;
        }
        format!(
            "<{}>1 {} {} {} - - - {}",
            self.priority(),
            ts,
            nil_if_empty(&self.hostname),
            nil_if_empty(&self.tag),
            &self.message[..boundary]
        )
    }

    /// Octet-counted framing for stream transports (RFC 6587):
    /// `LEN SP FRAME`.
    pub fn framed(&self, max_size: usize) -> String {
        let frame = self.generate(max_size);
        format!("{} {}", frame.len(), frame)
    }
}

fn nil_if_empty(value: &str) -> &str {
    if value.is_empty() { "-" } else { value }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn packet(severity: Severity, message: &str) -> Packet {
        Packet {
            severity,
            facility: Facility::User,
            hostname: "app-space".into(),
            tag: "web.1234".into(),
            time: Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap(),
            message: message.into(),
        }
    }

    #[test]
    fn test_priority_math() {
        assert_eq!(packet(Severity::Info, "x").priority(), 14);
        assert_eq!(packet(Severity::Err, "x").priority(), 11);
    }

    #[test]
    fn test_generate_rfc5424_shape() {
        let frame = packet(Severity::Info, "Oh hello.").generate(4096);
        assert_eq!(
            frame,
            "<14>1 2024-03-01T10:00:00Z app-space web.1234 - - - Oh hello."
        );
    }

    #[test]
    fn test_generate_nil_values_for_empty_fields() {
        let mut p = packet(Severity::Info, "m");
        p.hostname = String::new();
        p.tag = String::new();
        let frame = p.generate(0);
        assert!(frame.contains(" - - - - - m"), "frame: {}", frame);
    }

    #[test]
    fn test_generate_truncates_to_max_size() {
        let p = packet(Severity::Info, &"x".repeat(200));
        let frame = p.generate(120);
        assert_eq!(frame.len(), 120);
        assert!(frame.starts_with("<14>1 "));
    }

    #[test]
    fn test_generate_zero_max_means_unbounded() {
        let p = packet(Severity::Info, &"y".repeat(100));
        assert!(p.generate(0).len() > 100);
    }

    #[test]
    fn test_framed_prefixes_octet_count() {
        let p = packet(Severity::Info, "Oh hello.");
        let frame = p.generate(4096);
        let framed = p.framed(4096);
        assert_eq!(framed, format!("{} {}", frame.len(), frame));
    }
}
