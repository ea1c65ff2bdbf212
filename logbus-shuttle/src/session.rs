use crate::{BUILD_TOPIC, ISTIO_TOPIC, WEB_ROUTER_TOPIC};
use chrono::{DateTime, SecondsFormat, Utc};
use logbus_core::envelope::{container_to_proc, is_app_match, syslog_tag};
use logbus_core::humanize::pod_phase_to_human_readable;
use logbus_core::parse::istio::parse_simple_istio_log;
use logbus_core::parse::{parse_app_log, parse_build_log, parse_router_log};
use logbus_core::LogSession;
use rand::Rng;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::{ClientConfig, Message};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, error, info};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// 600 consecutive empty polls at 100 ms ≈ 60 s of silence.
const SILENCE_LIMIT: u32 = 600;

const GROUP_ID_LEN: usize = 16;
const GROUP_ID_LETTERS: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// An ephemeral, filtered, human-readable tail over one application's or
/// site's logs. Each session runs its own consumer under a throwaway group
/// id so it always starts at the live tail.
pub struct TailSession {
    app: String,
    space: String,
    site: String,
    group: String,
}

impl TailSession {
    pub fn new(session: &LogSession) -> TailSession {
        TailSession {
            app: session.app.clone(),
            space: session.space.clone(),
            site: session.site.clone(),
            group: random_group_id(),
        }
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    /// Consume and stream formatted lines into `out` until the client
    /// disconnects (the receiver drops), the broker errors, or the session
    /// sees nothing for the silence limit.
    pub async fn run(self, brokers: &[String], out: mpsc::Sender<String>) {
        if !self.site.is_empty() {
            info!(site = %self.site, "Listening for logs on site");
        } else {
            info!(app = %self.app, space = %self.space, "Listening for logs");
        }

        let consumer: StreamConsumer = match ClientConfig::new()
            .set("bootstrap.servers", brokers.join(","))
            .set("group.id", &self.group)
            .set("enable.auto.commit", "true")
            .set("auto.commit.interval.ms", "1000")
            .set("session.timeout.ms", "30000")
            .set("socket.keepalive.enable", "true")
            .create()
        {
            Ok(consumer) => consumer,
            Err(e) => {
                error!(error = %e, "Session consumer failed to connect");
                return;
            }
        };

        let topics: Vec<&str> = if self.site.is_empty() && !self.space.is_empty() {
            vec![&self.space, WEB_ROUTER_TOPIC, ISTIO_TOPIC, BUILD_TOPIC]
        } else if !self.site.is_empty() {
            vec![WEB_ROUTER_TOPIC, ISTIO_TOPIC]
        } else {
            return;
        };
        if let Err(e) = consumer.subscribe(&topics) {
            error!(error = %e, "Session subscribe failed");
            return;
        }

        let mut silent_polls: u32 = 0;
        loop {
            if silent_polls > SILENCE_LIMIT {
                debug!(group = %self.group, "Session timed out after silence");
                break;
            }
            let message = match timeout(POLL_INTERVAL, consumer.recv()).await {
                Err(_) => {
                    silent_polls += 1;
                    continue;
                }
                Ok(Err(e)) => {
                    error!(error = %e, "Session broker error");
                    break;
                }
                Ok(Ok(m)) => m,
            };
            let event_time = message
                .timestamp()
                .to_millis()
                .and_then(|ms| chrono::TimeZone::timestamp_millis_opt(&Utc, ms).single())
                .unwrap_or_else(Utc::now);
            let line = self.respond(
                message.topic(),
                message.payload().unwrap_or_default(),
                event_time,
            );
            drop(message);
            // Only matching lines reset the silence clock; records for
            // other apps pass through without touching it.
            if let Some(line) = line {
                silent_polls = 0;
                if out.send(line).await.is_err() {
                    // Client went away; close gracefully.
                    break;
                }
            }
        }

        if !self.site.is_empty() {
            info!(site = %self.site, "Closing site listener");
        } else {
            info!(app = %self.app, space = %self.space, "Closing listener");
        }
    }

    /// Dispatch one broker record to the responder for its topic; returns
    /// the formatted line when the record matches this session's filter.
    pub fn respond(&self, topic: &str, payload: &[u8], event_time: DateTime<Utc>) -> Option<String> {
        if !self.space.is_empty() && topic == self.space {
            self.respond_app_log(payload)
        } else if topic == WEB_ROUTER_TOPIC {
            self.respond_web_log(payload)
        } else if topic == ISTIO_TOPIC {
            self.respond_istio_log(payload, event_time)
        } else if !self.space.is_empty() && topic == BUILD_TOPIC {
            self.respond_build_log(payload)
        } else {
            None
        }
    }

    fn respond_app_log(&self, payload: &[u8]) -> Option<String> {
        let env = parse_app_log(payload, &self.space).ok()?;
        if !is_app_match(&env.container_name, &self.app) || env.topic != self.space {
            return None;
        }
        let proc = container_to_proc(&env.container_name);
        Some(format!(
            "{} {}-{} app[{}]: {}\n",
            rfc3339(env.time),
            self.app,
            self.space,
            syslog_tag(&proc, &env.pod_name),
            pod_phase_to_human_readable(env.log.trim())
        ))
    }

    fn respond_web_log(&self, payload: &[u8]) -> Option<String> {
        let env = parse_router_log(payload).ok()?;
        let app_hit = is_app_match(&env.container_name, &self.app) && env.topic == self.space;
        let site_hit = !env.site.is_empty() && env.site == self.site;
        if !app_hit && !site_hit {
            return None;
        }
        if env.site.is_empty() {
            Some(format!(
                "{} {}-{} akkeris/router: {} host={} path={}\n",
                rfc3339(env.time),
                self.app,
                self.space,
                env.log,
                env.container_name,
                env.path
            ))
        } else {
            Some(format!(
                "{} {} akkeris/router: {} host={} path={}\n",
                rfc3339(env.time),
                env.site,
                env.log,
                env.site,
                env.site_path
            ))
        }
    }

    fn respond_istio_log(&self, payload: &[u8], event_time: DateTime<Utc>) -> Option<String> {
        let msg = parse_simple_istio_log(payload).ok()?;
        if msg.app.is_empty() || msg.app != self.app || msg.space != self.space {
            return None;
        }
        Some(format!(
            "{} {}-{} akkeris/router[{}]: bytes={} method={} path={} request_id={} host={} \
             fwd={} status={} service={} total={} source={}\n",
            rfc3339(event_time),
            self.app,
            self.space,
            msg.dyno,
            msg.bytes,
            msg.method,
            msg.path,
            msg.request_id,
            msg.host,
            msg.fwd,
            msg.status,
            msg.service,
            msg.total,
            msg.source
        ))
    }

    fn respond_build_log(&self, payload: &[u8]) -> Option<String> {
        let env = parse_build_log(payload).ok()?;
        if !is_app_match(&env.container_name, &self.app) || env.topic != self.space {
            return None;
        }
        Some(format!(
            "{} {}-{} akkeris/build: {}\n",
            rfc3339(env.time),
            self.app,
            self.space,
            env.log
        ))
    }
}

fn rfc3339(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn random_group_id() -> String {
    let mut rng = rand::rng();
    (0..GROUP_ID_LEN)
        .map(|_| GROUP_ID_LETTERS[rng.random_range(0..GROUP_ID_LETTERS.len())] as char)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(app: &str, space: &str, site: &str) -> TailSession {
        TailSession::new(&LogSession {
            app: app.into(),
            space: space.into(),
            site: site.into(),
            lines: 0,
            tail: true,
        })
    }

    fn app_payload(container: &str, pod: &str, topic: &str, log: &str) -> Vec<u8> {
        serde_json::json!({
            "log": log,
            "stream": "stdout",
            "time": "2024-03-01T10:00:00Z",
            "kubernetes": {"container_name": container, "pod_name": pod},
            "topic": topic
        })
        .to_string()
        .into_bytes()
    }

    #[test]
    fn test_group_ids_are_sixteen_letters() {
        let s = session("a", "b", "");
        assert_eq!(s.group().len(), 16);
        assert!(s.group().chars().all(|c| c.is_ascii_alphabetic()));
        assert_ne!(s.group(), session("a", "b", "").group());
    }

    #[test]
    fn test_app_log_line_format() {
        let s = session("blog", "perf", "");
        let line = s
            .respond(
                "perf",
                &app_payload("blog", "blog-web-1234", "perf", "hello there"),
                Utc::now(),
            )
            .unwrap();
        assert_eq!(
            line,
            "2024-03-01T10:00:00Z blog-perf app[web.1234]: hello there\n"
        );
    }

    #[test]
    fn test_app_log_filters_other_apps_and_spaces() {
        let s = session("blog", "perf", "");
        assert!(s
            .respond(
                "perf",
                &app_payload("other", "other-web-1", "perf", "x"),
                Utc::now()
            )
            .is_none());
        assert!(s
            .respond(
                "prod",
                &app_payload("blog", "blog-web-1", "prod", "x"),
                Utc::now()
            )
            .is_none());
    }

    #[test]
    fn test_app_log_matches_typed_processes() {
        let s = session("blog", "perf", "");
        let line = s
            .respond(
                "perf",
                &app_payload("blog--worker", "blog-worker-9z", "perf", "crunching"),
                Utc::now(),
            )
            .unwrap();
        assert!(line.contains("app[worker.9z]"), "line: {}", line);
    }

    #[test]
    fn test_web_log_app_variant() {
        let s = session("a55", "s55", "");
        let line = s
            .respond(
                WEB_ROUTER_TOPIC,
                b"hostname=a55-s55.example source=1.1.1.1 path=/s method=GET",
                Utc::now(),
            )
            .unwrap();
        assert!(line.contains(" a55-s55 akkeris/router: "), "line: {}", line);
        assert!(line.contains("host=a55"), "line: {}", line);
        assert!(line.contains("path=/s"), "line: {}", line);
    }

    #[test]
    fn test_web_log_site_variant() {
        let s = session("", "", "foobar.example");
        let line = s
            .respond(
                WEB_ROUTER_TOPIC,
                b"hostname=a55-s55.example site_domain=foobar.example site_path=/o source=1.1.1.1 path=/s",
                Utc::now(),
            )
            .unwrap();
        assert!(line.contains(" foobar.example akkeris/router: "), "line: {}", line);
        assert!(line.contains("host=foobar.example"));
        assert!(line.contains("path=/o"));
    }

    #[test]
    fn test_istio_log_line() {
        let s = session("shop", "prod", "");
        let payload = serde_json::json!({
            "time": "2024-03-01T10:00:00Z",
            "bytes": 55,
            "method": "GET",
            "path": "/cart",
            "request_id": "r1",
            "host": "shop.example.com",
            "app": "shop",
            "space": "prod",
            "fwd": "1.2.3.4",
            "status": 200,
            "service": "2ms",
            "dyno": "web.1",
            "total": "4ms",
            "source": "router"
        })
        .to_string();
        let when = chrono::TimeZone::with_ymd_and_hms(&Utc, 2024, 3, 1, 10, 0, 1).unwrap();
        let line = s.respond(ISTIO_TOPIC, payload.as_bytes(), when).unwrap();
        assert!(line.starts_with("2024-03-01T10:00:01Z shop-prod akkeris/router[web.1]: "));
        assert!(line.contains("status=200"));
        assert!(line.contains("source=router"));
    }

    #[test]
    fn test_build_log_line() {
        let s = session("blog", "perf", "");
        let payload = serde_json::json!({
            "metadata": "blog-perf",
            "message": "Step 1/9 : FROM alpine"
        })
        .to_string();
        let line = s.respond(BUILD_TOPIC, payload.as_bytes(), Utc::now()).unwrap();
        assert!(line.contains(" blog-perf akkeris/build: Step 1/9 : FROM alpine\n"));
    }

    #[test]
    fn test_build_log_ignored_for_site_sessions() {
        let s = session("", "", "foobar.example");
        let payload = serde_json::json!({
            "metadata": "blog-perf",
            "message": "irrelevant"
        })
        .to_string();
        assert!(s.respond(BUILD_TOPIC, payload.as_bytes(), Utc::now()).is_none());
    }
}
