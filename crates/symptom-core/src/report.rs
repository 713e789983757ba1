//! Session report and the files consolidated into the session directory.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{
    ErrorEvent, ExerciseOutcome, SessionWarning, StateTransition, TaskRecord, TaskState,
};
use crate::preflight::DeploymentReadiness;
use crate::timefmt::format_duration;

pub const REPORT_SCHEMA_VERSION: &str = "1.0";
pub const REPORT_JSON: &str = "report.json";
pub const REPORT_MD: &str = "report.md";
pub const EVENTS_LOG: &str = "events.log";

/// Everything known about a closed session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionReport {
    pub schema_version: String,
    pub session_id: Uuid,
    pub namespace: String,
    pub fragments: Vec<String>,
    pub targets: Vec<DeploymentReadiness>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
    /// The exerciser did not finish before the session timeout.
    pub timed_out: bool,
    pub exercise: Option<ExerciseOutcome>,
    /// Events received by the aggregator.
    pub total_events: u64,
    /// Events the producers reported as sent. Equal to `total_events`
    /// unless something was lost.
    pub emitted_events: u64,
    pub event_counts: BTreeMap<String, u64>,
    pub events: Vec<ErrorEvent>,
    pub tasks: Vec<TaskRecord>,
    pub warnings: Vec<SessionWarning>,
    pub artifacts: Vec<PathBuf>,
    pub states: Vec<StateTransition>,
    pub output_dir: PathBuf,
}

impl SessionReport {
    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.duration_ms)
    }

    /// Sources with at least one event.
    pub fn active_sources(&self) -> Vec<&str> {
        self.event_counts
            .iter()
            .filter(|(_, n)| **n > 0)
            .map(|(s, _)| s.as_str())
            .collect()
    }

    pub fn all_tasks_stopped(&self) -> bool {
        self.tasks.iter().all(|t| t.state == TaskState::Stopped)
    }

    /// Short operator-facing summary, one fact per line.
    pub fn summary_lines(&self) -> Vec<String> {
        let mut lines = vec![
            format!("Session {} ({})", self.session_id, self.namespace),
            format!("Duration: {}", format_duration(self.duration())),
            format!(
                "Exerciser: {}",
                self.exercise
                    .as_ref()
                    .map(ToString::to_string)
                    .unwrap_or_else(|| "not run".to_string())
            ),
            format!("Error events: {}", self.total_events),
        ];
        for (source, count) in self.event_counts.iter().filter(|(_, n)| **n > 0) {
            lines.push(format!("  {}: {}", source, count));
        }
        if !self.warnings.is_empty() {
            lines.push(format!("Warnings: {}", self.warnings.len()));
            for warning in &self.warnings {
                lines.push(format!("  - {}", warning));
            }
        }
        lines.push(format!("Output: {}", self.output_dir.display()));
        lines
    }
}

/// Create the session directory. Fails if it already exists.
pub fn create_session_dir(base: &Path, name: &str) -> std::io::Result<PathBuf> {
    std::fs::create_dir_all(base)?;
    let dir = base.join(name);
    std::fs::create_dir(&dir)?;
    Ok(dir)
}

/// Write report.json in pretty JSON format.
pub fn write_report_json(path: &Path, report: &SessionReport) -> Result<()> {
    let content = serde_json::to_string_pretty(report).context("serialize session report")?;
    std::fs::write(path, content).with_context(|| format!("write {:?}", path))?;
    Ok(())
}

/// Render the human-readable summary.
pub fn render_report_md(report: &SessionReport) -> String {
    let mut out = String::new();
    out.push_str("# Symptom Collection Report\n\n");
    out.push_str(&format!(
        "- session: `{}`\n- namespace: `{}`\n- fragments: {}\n- started: {}\n- duration: {}\n- timed out: {}\n",
        report.session_id,
        report.namespace,
        report.fragments.join(", "),
        report.started_at.to_rfc3339(),
        format_duration(report.duration()),
        report.timed_out,
    ));
    if let Some(exercise) = &report.exercise {
        out.push_str(&format!("- exerciser: {}\n", exercise));
    }
    out.push('\n');

    out.push_str("## Targets\n\n| fragment | deployment | ready |\n|---|---|---|\n");
    for t in &report.targets {
        out.push_str(&format!(
            "| {} | {} | {}/{} |\n",
            t.fragment, t.deployment, t.ready, t.desired
        ));
    }
    out.push('\n');

    out.push_str(&format!("## Error Events ({})\n\n", report.total_events));
    out.push_str("| source | events |\n|---|---|\n");
    for (source, count) in &report.event_counts {
        out.push_str(&format!("| `{}` | {} |\n", source, count));
    }
    out.push('\n');

    if !report.warnings.is_empty() {
        out.push_str("## Warnings\n\n");
        for w in &report.warnings {
            out.push_str(&format!("- {}\n", w));
        }
        out.push('\n');
    }

    out.push_str("## Tasks\n\n| task | kind | state | failure |\n|---|---|---|---|\n");
    for t in &report.tasks {
        out.push_str(&format!(
            "| {} | {} | {:?} | {} |\n",
            t.name,
            t.kind,
            t.state,
            t.failure.as_deref().unwrap_or("")
        ));
    }

    if !report.artifacts.is_empty() {
        out.push_str("\n## Artifacts\n\n");
        for a in &report.artifacts {
            out.push_str(&format!("- `{}`\n", a.display()));
        }
    }
    out
}

pub fn write_report_md(path: &Path, report: &SessionReport) -> Result<()> {
    let md = render_report_md(report);
    std::fs::write(path, md).with_context(|| format!("write {:?}", path))?;
    Ok(())
}

/// One line per event, in arrival order.
pub fn write_events_log(path: &Path, events: &[ErrorEvent]) -> Result<()> {
    let mut content = String::new();
    for event in events {
        content.push_str(&event.log_line());
        content.push('\n');
    }
    std::fs::write(path, content).with_context(|| format!("write {:?}", path))?;
    Ok(())
}

/// Write report.json, report.md and events.log into `dir`.
pub fn write_session_files(dir: &Path, report: &SessionReport) -> Result<Vec<PathBuf>> {
    let json = dir.join(REPORT_JSON);
    let md = dir.join(REPORT_MD);
    let log = dir.join(EVENTS_LOG);
    write_events_log(&log, &report.events)?;
    write_report_md(&md, report)?;
    write_report_json(&json, report)?;
    Ok(vec![json, md, log])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{SessionState, TaskKind};
    use serde_json::json;

    fn report(dir: &Path) -> SessionReport {
        let at = DateTime::parse_from_rfc3339("2026-03-01T10:00:00Z")
            .expect("parse RFC3339")
            .with_timezone(&Utc);
        let mut counts = BTreeMap::new();
        counts.insert("/cmconfig.log".to_string(), 1);
        counts.insert("/Envoy".to_string(), 0);
        SessionReport {
            schema_version: REPORT_SCHEMA_VERSION.to_string(),
            session_id: Uuid::parse_str("11111111-1111-1111-1111-111111111111")
                .expect("valid UUID"),
            namespace: "miniudm".to_string(),
            fragments: vec!["uecm".to_string()],
            targets: vec![DeploymentReadiness {
                fragment: "uecm".to_string(),
                deployment: "uecm-deployment".to_string(),
                ready: 2,
                desired: 2,
            }],
            started_at: at,
            finished_at: at + chrono::Duration::seconds(12),
            duration_ms: 12_340,
            timed_out: false,
            exercise: Some(ExerciseOutcome::Passed { duration_ms: 12_000 }),
            total_events: 1,
            emitted_events: 1,
            event_counts: counts,
            events: vec![ErrorEvent {
                timestamp: at,
                source: "/cmconfig.log".to_string(),
                message: "ERROR bad config".to_string(),
            }],
            tasks: vec![TaskRecord {
                id: 0,
                kind: TaskKind::LogWatcher,
                name: "/cmconfig.log".to_string(),
                state: TaskState::Stopped,
                failure: None,
            }],
            warnings: vec![SessionWarning::Watch {
                path: "/Envoy".to_string(),
                detail: "/Envoy does not exist".to_string(),
            }],
            artifacts: Vec::new(),
            states: vec![StateTransition {
                state: SessionState::Closed,
                at,
            }],
            output_dir: dir.to_path_buf(),
        }
    }

    #[test]
    fn test_report_json_has_expected_keys() {
        let report = report(Path::new("/tmp/out"));
        let raw = serde_json::to_value(&report).expect("serialize report");
        assert_eq!(raw["schema_version"], json!("1.0"));
        assert_eq!(raw["event_counts"]["/cmconfig.log"], json!(1));
        assert_eq!(raw["exercise"]["status"], json!("passed"));
        assert_eq!(raw["warnings"][0]["kind"], json!("watch"));
        assert_eq!(raw["states"][0]["state"], json!("closed"));
    }

    #[test]
    fn test_markdown_lists_sources_and_warnings() {
        let md = render_report_md(&report(Path::new("/tmp/out")));
        assert!(md.contains("| `/cmconfig.log` | 1 |"));
        assert!(md.contains("| `/Envoy` | 0 |"));
        assert!(md.contains("- duration: 12.34s"));
        assert!(md.contains("watch /Envoy"));
    }

    #[test]
    fn test_session_files_written() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = create_session_dir(tmp.path(), "miniudm-20260301-100000-11111111").unwrap();
        let report = report(&dir);

        let written = write_session_files(&dir, &report).unwrap();
        assert_eq!(written.len(), 3);

        let log = std::fs::read_to_string(dir.join(EVENTS_LOG)).unwrap();
        assert_eq!(log, "2026-03-01T10:00:00.000Z [/cmconfig.log] ERROR bad config\n");

        let parsed: SessionReport =
            serde_json::from_str(&std::fs::read_to_string(dir.join(REPORT_JSON)).unwrap())
                .unwrap();
        assert_eq!(parsed, report);

        assert!(create_session_dir(tmp.path(), "miniudm-20260301-100000-11111111").is_err());
    }

    #[test]
    fn test_summary_lines() {
        let lines = report(Path::new("/tmp/out")).summary_lines();
        assert!(lines.contains(&"Error events: 1".to_string()));
        assert!(lines.contains(&"  /cmconfig.log: 1".to_string()));
        assert!(lines.iter().any(|l| l.starts_with("Warnings: 1")));
    }
}
