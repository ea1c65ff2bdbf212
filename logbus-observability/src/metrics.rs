use prometheus::{
    Encoder, GaugeVec, IntCounter, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder,
};

/// Metrics collector for the bus.
///
/// Fan-out counters and per-drain delivery metrics, exposed as Prometheus
/// text on the admin listener. The 60 s `[metrics]` report lines are
/// emitted separately by the components that own the raw counters.
pub struct MetricsCollector {
    registry: Registry,

    /// Records fanned out to drains
    pub logs_sent: IntCounter,

    /// Records pulled off the broker lanes
    pub logs_received: IntCounter,

    /// Records dropped because a parser rejected them
    pub failed_decode: IntCounter,

    /// Per-drain delivery counters
    pub drain_sent: IntCounterVec,
    pub drain_errors: IntCounterVec,

    /// Per-drain back-pressure (EWMA of channel fullness, 0..1)
    pub drain_pressure: GaugeVec,

    /// Per-drain open connection count
    pub drain_connections: IntGaugeVec,
}

impl MetricsCollector {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let logs_sent =
            IntCounter::with_opts(Opts::new("logbus_logs_sent_total", "Records fanned out"))?;
        let logs_received = IntCounter::with_opts(Opts::new(
            "logbus_logs_received_total",
            "Records consumed from the broker",
        ))?;
        let failed_decode = IntCounter::with_opts(Opts::new(
            "logbus_failed_decode_total",
            "Records dropped by parsers",
        ))?;

        let drain_sent = IntCounterVec::new(
            Opts::new("logbus_drain_sent_total", "Records delivered per drain"),
            &["url"],
        )?;
        let drain_errors = IntCounterVec::new(
            Opts::new("logbus_drain_errors_total", "Delivery failures per drain"),
            &["url"],
        )?;
        let drain_pressure = GaugeVec::new(
            Opts::new("logbus_drain_pressure", "Ingress back-pressure per drain"),
            &["url"],
        )?;
        let drain_connections = IntGaugeVec::new(
            Opts::new("logbus_drain_connections", "Open connections per drain"),
            &["url"],
        )?;

        registry.register(Box::new(logs_sent.clone()))?;
        registry.register(Box::new(logs_received.clone()))?;
        registry.register(Box::new(failed_decode.clone()))?;
        registry.register(Box::new(drain_sent.clone()))?;
        registry.register(Box::new(drain_errors.clone()))?;
        registry.register(Box::new(drain_pressure.clone()))?;
        registry.register(Box::new(drain_connections.clone()))?;

        Ok(Self {
            registry,
            logs_sent,
            logs_received,
            failed_decode,
            drain_sent,
            drain_errors,
            drain_pressure,
            drain_connections,
        })
    }

    /// Prometheus text exposition.
    pub fn gather_text(&self) -> String {
        let encoder = TextEncoder::new();
        let metrics = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metrics, &mut buffer).unwrap_or_default();
        String::from_utf8(buffer).unwrap_or_default()
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new().expect("Failed to create metrics collector")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_show_in_exposition() {
        let collector = MetricsCollector::new().unwrap();
        collector.logs_received.inc();
        collector.logs_sent.inc_by(3);
        collector.failed_decode.inc();
        collector
            .drain_sent
            .with_label_values(&["syslog://h:1"])
            .inc_by(2);

        let text = collector.gather_text();
        assert!(text.contains("logbus_logs_received_total 1"));
        assert!(text.contains("logbus_logs_sent_total 3"));
        assert!(text.contains("logbus_failed_decode_total 1"));
        assert!(text.contains("logbus_drain_sent_total"));
    }

    #[test]
    fn test_pressure_gauge_set() {
        let collector = MetricsCollector::new().unwrap();
        collector
            .drain_pressure
            .with_label_values(&["syslog://h:1"])
            .set(0.25);
        assert!(collector.gather_text().contains("logbus_drain_pressure"));
    }
}
