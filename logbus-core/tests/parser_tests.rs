use logbus_core::envelope::{container_to_proc, is_app_match};
use logbus_core::parse::{parse_build_log, parse_istio_log, parse_router_log};

// ── Router line round-trip ──────────────────────────────────
//
// Parsing and re-serializing a router line must preserve every k=v pair
// except `timestamp`, with `source` renamed to `fwd` (URL-decoded) and the
// routing fields lifted out of the line.

#[test]
fn router_round_trip_preserves_pairs() {
    let line = "hostname=shop-prod.example.io timestamp=1709290800 method=GET \
                status=200 bytes=512 source=10.0.0.1%2C10.0.0.2 path=/checkout \
                user_agent=curl/8.0";
    let env = parse_router_log(line.as_bytes()).unwrap();

    assert!(env.log.contains("method=GET"));
    assert!(env.log.contains("status=200"));
    assert!(env.log.contains("bytes=512"));
    assert!(env.log.contains("user_agent=curl/8.0"));
    assert!(env.log.contains("fwd=\"10.0.0.1,10.0.0.2\""));
    assert!(!env.log.contains("timestamp"));
    assert!(!env.log.contains("source="));
    assert!(!env.log.contains("hostname="));
    // `path` routes through its own field, not the line.
    assert!(!env.log.contains("path=/checkout"));
    assert_eq!(env.path, "/checkout");
    assert_eq!(env.container_name, "shop");
    assert_eq!(env.space, "prod");
}

#[test]
fn router_line_field_order_is_stable() {
    let env1 = parse_router_log(b"hostname=a-b.x method=GET status=200").unwrap();
    let env2 = parse_router_log(b"hostname=a-b.x method=GET status=200").unwrap();
    assert_eq!(env1.log, env2.log);
}

#[test]
fn router_line_with_equals_in_value_keeps_remainder() {
    let env = parse_router_log(b"hostname=a-b.x query=foo=bar").unwrap();
    assert!(env.log.contains("query=foo=bar"), "log: {}", env.log);
}

// ── Process derivation invariants ───────────────────────────

#[test]
fn container_to_proc_invariants() {
    let proc = container_to_proc("x");
    assert_eq!((proc.app.as_str(), proc.r#type.as_str()), ("x", "web"));
    let proc = container_to_proc("x--y");
    assert_eq!((proc.app.as_str(), proc.r#type.as_str()), ("x", "y"));
    // Only the first separator splits.
    let proc = container_to_proc("x--y--z");
    assert_eq!((proc.app.as_str(), proc.r#type.as_str()), ("x", "y--z"));
}

#[test]
fn app_match_invariants() {
    assert!(is_app_match("app", "app"));
    assert!(is_app_match("app--worker", "app"));
    assert!(!is_app_match("z", "zz"));
    assert!(!is_app_match("app-worker", "app"));
}

// ── Build log redaction across steps ────────────────────────

#[test]
fn build_redaction_only_touches_arg_steps() {
    let cases = [
        ("Step 2/10 : ARG DATABASE_URL=postgres://u:p@h/db", "Step 2/10 : ARG DATABASE_URL=..."),
        ("Step 3/10 : ENV PORT=5000", "Step 3/10 : ENV PORT=5000"),
        ("Successfully built abc123", "Successfully built abc123"),
    ];
    for (input, expected) in cases {
        let payload = serde_json::json!({"metadata": "app-space", "message": input}).to_string();
        let env = parse_build_log(payload.as_bytes()).unwrap();
        assert_eq!(env.log, expected, "input: {}", input);
    }
}

// ── Envoy ALS edge cases ────────────────────────────────────

#[test]
fn als_rejects_unparsable_upstream_cluster() {
    let entry = serde_json::json!({
        "common_properties": {
            "upstream_cluster": "garbage-without-pipes",
            "time_to_last_upstream_tx_byte": "0.001s",
            "time_to_last_rx_byte": "0.002s"
        },
        "request": {"request_method": "GET"},
        "response": {"response_code": 200}
    });
    assert!(parse_istio_log(entry.to_string().as_bytes()).is_err());
}

#[test]
fn als_prefers_original_path_for_origin() {
    let entry = serde_json::json!({
        "common_properties": {
            "upstream_cluster": "outbound|80||shop.prod.svc.cluster.local",
            "tls_properties": {"tls_sni_hostname": "www.example.com", "tls_version": "TLSv1_3"},
            "time_to_last_upstream_tx_byte": "0.001s",
            "time_to_last_rx_byte": "0.002s"
        },
        "request": {
            "request_method": "GET",
            "path": "/rewritten",
            "original_path": "/original",
            "request_id": "r9"
        },
        "response": {"response_code": 301}
    });
    let env = parse_istio_log(entry.to_string().as_bytes()).unwrap();
    assert!(
        env.log.contains("origin=https://www.example.com/original"),
        "log: {}",
        env.log
    );
    // The envelope path stays the effective request path.
    assert_eq!(env.path, "/rewritten");
}
