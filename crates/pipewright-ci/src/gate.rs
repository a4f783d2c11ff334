//! Run gate evaluation for pass/fail criteria.

use serde::{Deserialize, Serialize};

use crate::job::JobStatus;
use crate::pipeline::RunReport;

/// Gate evaluation verdict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateVerdict {
    /// Whether the gate passed.
    pub passed: bool,

    /// Violations that caused failure (empty if passed).
    pub violations: Vec<String>,

    /// Summary message.
    pub message: String,
}

/// Run gate rules.
pub struct RunGate;

impl RunGate {
    /// Evaluate a finished run.
    ///
    /// Gate rule:
    /// - A run that was not triggered passes (nothing ran, nothing failed)
    /// - Every required job instance must have succeeded
    /// - Failed or cancelled `continue-on-error` instances are tolerated
    pub fn evaluate(report: &RunReport) -> GateVerdict {
        if !report.triggered() {
            return GateVerdict {
                passed: true,
                violations: Vec::new(),
                message: format!("Pipeline not triggered ({:?})", report.decision),
            };
        }

        let mut violations = Vec::new();
        for job in report.jobs.iter().filter(|j| j.required) {
            match job.status {
                JobStatus::Succeeded => {}
                JobStatus::Failed => violations.push(match &job.error {
                    Some(error) => format!("Job '{}' failed: {}", job.id, error),
                    None => format!("Job '{}' failed", job.id),
                }),
                JobStatus::Cancelled => {
                    violations.push(format!("Job '{}' was cancelled", job.id))
                }
            }
        }

        let passed = violations.is_empty();
        let message = if passed {
            format!("All {} job(s) passed", report.jobs.len())
        } else {
            format!("Gate failed with {} violation(s)", violations.len())
        };

        GateVerdict {
            passed,
            violations,
            message,
        }
    }
}
