//! Run report: the ordered record of what happened to each step.

use std::fmt::Write as _;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::artifact::{ArtifactKind, GeneratedArtifact};
use super::step::{Criticality, StepResult, StepState};

/// One entry in the report. Never mutated once appended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRecord {
    pub step_id: String,
    pub description: String,
    pub criticality: Criticality,

    /// Probe answer; `None` when the step was never probed
    pub state: Option<StepState>,

    pub result: StepResult,
    pub duration_ms: u64,
}

/// Digest of an artifact as rendered for this run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactDigest {
    pub kind: ArtifactKind,
    pub target: PathBuf,
    pub sha256: String,
}

impl From<&GeneratedArtifact> for ArtifactDigest {
    fn from(artifact: &GeneratedArtifact) -> Self {
        Self {
            kind: artifact.kind,
            target: artifact.target.clone(),
            sha256: artifact.digest(),
        }
    }
}

/// Report of one provisioning run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub service_name: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub steps: Vec<StepRecord>,

    #[serde(default)]
    pub artifacts: Vec<ArtifactDigest>,

    /// Step that stopped the run, if any
    pub aborted_at: Option<String>,

    pub success: bool,
}

impl RunReport {
    pub fn new(run_id: Uuid, service_name: impl Into<String>) -> Self {
        Self {
            run_id,
            service_name: service_name.into(),
            started_at: Utc::now(),
            finished_at: None,
            steps: Vec::new(),
            artifacts: Vec::new(),
            aborted_at: None,
            success: true,
        }
    }

    /// Append a step record
    pub fn record(&mut self, record: StepRecord) {
        self.steps.push(record);
    }

    /// Mark the run failed at `step_id`; no further records follow
    pub fn abort(&mut self, step_id: &str) {
        self.aborted_at = Some(step_id.to_string());
        self.success = false;
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    pub fn is_finished(&self) -> bool {
        self.finished_at.is_some()
    }

    /// Result recorded for a step
    pub fn result_of(&self, step_id: &str) -> Option<&StepResult> {
        self.steps
            .iter()
            .find(|r| r.step_id == step_id)
            .map(|r| &r.result)
    }

    /// Advisory steps that failed without stopping the run
    pub fn advisory_failures(&self) -> impl Iterator<Item = &StepRecord> {
        self.steps
            .iter()
            .filter(|r| r.criticality == Criticality::Advisory && r.result.is_failure())
    }

    /// Human-readable summary printed at the end of a run
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Provisioning report for {} (run {})", self.service_name, self.run_id);
        let _ = writeln!(out);

        for record in &self.steps {
            let _ = writeln!(
                out,
                "  [{:>12}] {:<22} {}",
                record.result.label(),
                record.step_id,
                record.description
            );
            if let StepResult::Failed { cause, output } = &record.result {
                let _ = writeln!(out, "                 cause: {}", cause);
                if let Some(output) = output.as_deref().filter(|o| !o.trim().is_empty()) {
                    for line in output.trim_end().lines() {
                        let _ = writeln!(out, "                 | {}", line);
                    }
                }
            }
        }

        let _ = writeln!(out);
        match (&self.aborted_at, self.success) {
            (Some(step), _) => {
                let _ = writeln!(
                    out,
                    "Run FAILED at step '{}'. Fix the cause and re-run; completed steps will be detected and skipped.",
                    step
                );
            }
            (None, true) => {
                let advisory = self.advisory_failures().count();
                if advisory > 0 {
                    let _ = writeln!(
                        out,
                        "Run completed with {} advisory failure(s).",
                        advisory
                    );
                } else {
                    let _ = writeln!(out, "Run completed successfully.");
                }
            }
            (None, false) => {
                let _ = writeln!(out, "Run FAILED.");
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, criticality: Criticality, result: StepResult) -> StepRecord {
        StepRecord {
            step_id: id.to_string(),
            description: format!("{} description", id),
            criticality,
            state: Some(StepState::NotStarted),
            result,
            duration_ms: 0,
        }
    }

    #[test]
    fn test_new_report_is_successful_until_aborted() {
        let mut report = RunReport::new(Uuid::new_v4(), "sc-download-gate");
        assert!(report.success);
        report.record(record("firewall", Criticality::HardFail, StepResult::Succeeded));
        report.abort("firewall");
        assert!(!report.success);
        assert_eq!(report.aborted_at.as_deref(), Some("firewall"));
    }

    #[test]
    fn test_render_includes_captured_output() {
        let mut report = RunReport::new(Uuid::new_v4(), "sc-download-gate");
        report.record(record(
            "system-packages",
            Criticality::HardFail,
            StepResult::Failed {
                cause: "dnf exited with status 1".to_string(),
                output: Some("Error: Unable to find a match: nginx".to_string()),
            },
        ));
        report.abort("system-packages");

        let text = report.render();
        assert!(text.contains("system-packages"));
        assert!(text.contains("| Error: Unable to find a match: nginx"));
        assert!(text.contains("Run FAILED at step 'system-packages'"));
    }

    #[test]
    fn test_advisory_failure_keeps_run_successful() {
        let mut report = RunReport::new(Uuid::new_v4(), "svc");
        report.record(record(
            "certificate-renewal",
            Criticality::Advisory,
            StepResult::Failed {
                cause: "dry run failed".to_string(),
                output: None,
            },
        ));
        assert!(report.success);
        assert_eq!(report.advisory_failures().count(), 1);
        assert!(report.render().contains("1 advisory failure"));
    }
}
