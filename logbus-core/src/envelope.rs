use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Wire format of one log record on the broker (and on `POST /log-events`).
///
/// The nested kubernetes/docker shape is what the container log collectors
/// publish; [`LogEnvelope`] is the flat in-memory view the bus works with.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LogSpec {
    #[serde(default)]
    pub log: String,

    /// "stdout", "stderr", or "" for records with no container stream
    #[serde(default)]
    pub stream: String,

    #[serde(default = "Utc::now")]
    pub time: DateTime<Utc>,

    #[serde(default)]
    pub space: String,

    #[serde(default)]
    pub site: String,

    #[serde(default)]
    pub site_path: String,

    #[serde(default)]
    pub path: String,

    #[serde(default)]
    pub docker: DockerSpec,

    #[serde(default)]
    pub kubernetes: KubernetesSpec,

    #[serde(default)]
    pub topic: String,

    #[serde(default)]
    pub tag: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DockerSpec {
    #[serde(default)]
    pub container_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct KubernetesSpec {
    #[serde(default)]
    pub namespace_name: String,

    #[serde(default)]
    pub pod_id: String,

    #[serde(default)]
    pub pod_name: String,

    #[serde(default)]
    pub container_name: String,

    #[serde(default)]
    pub labels: LabelsSpec,

    #[serde(default)]
    pub host: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LabelsSpec {
    #[serde(default)]
    pub name: String,

    #[serde(default, rename = "pod-template-hash")]
    pub pod_template_hash: String,
}

/// Flat record produced by every parser; lives for one shuttle iteration.
#[derive(Debug, Clone, Default)]
pub struct LogEnvelope {
    pub log: String,
    pub stream: String,
    pub time: DateTime<Utc>,
    pub space: String,
    pub site: String,
    pub site_path: String,
    pub path: String,
    pub container_name: String,
    pub pod_name: String,
    /// Origin stream: typically the space name, or one of the literal
    /// `web-router-logs` / `build-logs` / `istio-access-logs` topics.
    pub topic: String,
    pub tag: String,
}

impl From<LogSpec> for LogEnvelope {
    fn from(spec: LogSpec) -> Self {
        LogEnvelope {
            log: spec.log,
            stream: spec.stream,
            time: spec.time,
            space: spec.space,
            site: spec.site,
            site_path: spec.site_path,
            path: spec.path,
            container_name: spec.kubernetes.container_name,
            pod_name: spec.kubernetes.pod_name,
            topic: spec.topic,
            tag: spec.tag,
        }
    }
}

impl LogEnvelope {
    /// Re-wrap as the broker wire format (used by `POST /log-events`).
    pub fn to_spec(&self) -> LogSpec {
        LogSpec {
            log: self.log.clone(),
            stream: self.stream.clone(),
            time: self.time,
            space: self.space.clone(),
            site: self.site.clone(),
            site_path: self.site_path.clone(),
            path: self.path.clone(),
            docker: DockerSpec::default(),
            kubernetes: KubernetesSpec {
                namespace_name: self.space.clone(),
                container_name: self.container_name.clone(),
                pod_name: self.pod_name.clone(),
                ..Default::default()
            },
            topic: self.topic.clone(),
            tag: self.tag.clone(),
        }
    }
}

/// A container name decomposed into the application and process type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Process {
    pub app: String,
    pub r#type: String,
}

/// `"worker--jobs"` → `{app: "worker", type: "jobs"}`; a name without the
/// `--` separator is the app's web process.
pub fn container_to_proc(container: &str) -> Process {
    match container.split_once("--") {
        Some((app, r#type)) => Process {
            app: app.to_string(),
            r#type: r#type.to_string(),
        },
        None => Process {
            app: container.to_string(),
            r#type: "web".to_string(),
        },
    }
}

/// Whether a container name belongs to an application: exact match or any
/// `app--<type>` process of it.
pub fn is_app_match(potential: &str, app_name: &str) -> bool {
    potential == app_name || potential.starts_with(&format!("{}--", app_name))
}

/// Syslog tag for a record: `<type>.<pod suffix>`, where the pod name has
/// the `-<type>-` and `<app>-` fragments stripped. Synthetic pod names
/// (`akkeris/...`) are used verbatim.
pub fn syslog_tag(proc: &Process, pod_name: &str) -> String {
    if pod_name.starts_with("akkeris/") {
        return pod_name.to_string();
    }
    let suffix = pod_name
        .replacen(&format!("-{}-", proc.r#type), "", 1)
        .replacen(&format!("{}-", proc.app), "", 1);
    format!("{}.{}", proc.r#type, suffix)
}
