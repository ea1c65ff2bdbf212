use regex::Regex;
use std::sync::LazyLock;

static EXIT_CODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new("exitCode=([1-9]+)").unwrap());

/// Rewrite orchestrator pod-phase messages into the operator-facing lines
/// subscribers expect. Anything that is not a phase message passes through
/// untouched.
pub fn pod_phase_to_human_readable(message: &str) -> String {
    if !message.starts_with("Phase: ") {
        return message.to_string();
    }
    if message.starts_with("Phase: Creating -- ") {
        "Creating Dyno".to_string()
    } else if message.starts_with("Phase: Pending/ --")
        || message.starts_with("Phase: Pending/waiting --")
    {
        "Waiting on Dyno".to_string()
    } else if message.starts_with("Phase: Running/waiting --") {
        "at=error code=H10 desc=\"App crashed\"".to_string()
    } else if message.starts_with("Phase: Running/running --") {
        "Checking Dyno Health".to_string()
    } else if message.starts_with("Phase: Running/terminated --") {
        let code = EXIT_CODE
            .find(message)
            .map(|m| m.as_str().replacen("exitCode=", "exit code ", 1))
            .unwrap_or_default();
        format!("Dyno exited ({})", code)
    } else if message.starts_with("Phase: Deleting -- pod") {
        "Deleting Dyno".to_string()
    } else {
        message.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_non_phase_messages_pass_through() {
        assert_eq!(pod_phase_to_human_readable("hello world"), "hello world");
        assert_eq!(pod_phase_to_human_readable(""), "");
    }

    #[test]
    fn test_phase_rewrites() {
        assert_eq!(
            pod_phase_to_human_readable("Phase: Creating -- Creating pod blog-1050769379-6ktnc"),
            "Creating Dyno"
        );
        assert_eq!(
            pod_phase_to_human_readable("Phase: Pending/waiting --  reason=ContainerCreating"),
            "Waiting on Dyno"
        );
        assert_eq!(
            pod_phase_to_human_readable("Phase: Running/waiting --  reason=CrashLoopBackOff"),
            "at=error code=H10 desc=\"App crashed\""
        );
        assert_eq!(
            pod_phase_to_human_readable("Phase: Running/running --  startedAt=2017-06-16T16:16:30"),
            "Checking Dyno Health"
        );
        assert_eq!(
            pod_phase_to_human_readable("Phase: Deleting -- pod blog-472348638-9tzlx in space default"),
            "Deleting Dyno"
        );
    }

    #[test]
    fn test_terminated_phase_extracts_exit_code() {
        let msg = "Phase: Running/terminated --  reason=Error exitCode=137";
        assert_eq!(pod_phase_to_human_readable(msg), "Dyno exited (exit code 137)");
    }

    #[test]
    fn test_unknown_phase_passes_through() {
        let msg = "Phase: Unknown -- something";
        assert_eq!(pod_phase_to_human_readable(msg), msg);
    }
}
