use std::fmt;

use serde::Serialize;
use tracing::{info, warn};

use crate::tlsa::TlsaResult;

use super::traits::DnssecKey;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum StepStatus {
    Applied,
    Failed(String),
    Skipped(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepOutcome {
    pub step: String,
    #[serde(flatten)]
    pub status: StepStatus,
}

/// Outcome of every remote mutation an operation attempted.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProvisionReport {
    pub operation: &'static str,
    pub steps: Vec<StepOutcome>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub dnssec_keys: Vec<DnssecKey>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tlsa: Vec<TlsaResult>,
    /// Set when the default mailbox was created with a generated password.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generated_password: Option<String>,
}

impl ProvisionReport {
    pub fn new(operation: &'static str) -> Self {
        Self {
            operation,
            ..Self::default()
        }
    }

    /// Record the result of one step; returns whether it succeeded.
    pub fn record<E: fmt::Display>(&mut self, step: impl Into<String>, result: Result<(), E>) -> bool {
        let step = step.into();
        let status = match result {
            Ok(()) => {
                info!(operation = self.operation, "{step}: done");
                StepStatus::Applied
            }
            Err(e) => {
                warn!(operation = self.operation, "{step}: {e}");
                StepStatus::Failed(e.to_string())
            }
        };
        let ok = status == StepStatus::Applied;
        self.steps.push(StepOutcome { step, status });
        ok
    }

    pub fn applied(&mut self, step: impl Into<String>) {
        self.record(step, Ok::<(), &str>(()));
    }

    pub fn skip(&mut self, step: impl Into<String>, reason: impl Into<String>) {
        let step = step.into();
        let reason = reason.into();
        info!(operation = self.operation, "{step}: skipped ({reason})");
        self.steps.push(StepOutcome {
            step,
            status: StepStatus::Skipped(reason),
        });
    }

    pub fn failures(&self) -> impl Iterator<Item = &StepOutcome> {
        self.steps
            .iter()
            .filter(|s| matches!(s.status, StepStatus::Failed(_)))
    }

    /// No step failed.
    pub fn is_complete(&self) -> bool {
        self.failures().next().is_none()
    }
}

impl fmt::Display for ProvisionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}:", self.operation)?;
        for outcome in &self.steps {
            match &outcome.status {
                StepStatus::Applied => writeln!(f, "  ok      {}", outcome.step)?,
                StepStatus::Failed(e) => writeln!(f, "  FAILED  {}: {e}", outcome.step)?,
                StepStatus::Skipped(r) => writeln!(f, "  skipped {}: {r}", outcome.step)?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracks_failures() {
        let mut report = ProvisionReport::new("test");
        assert!(report.record("first", Ok::<(), String>(())));
        assert!(!report.record("second", Err("boom")));
        report.skip("third", "second failed");

        assert!(!report.is_complete());
        let failed: Vec<_> = report.failures().map(|s| s.step.as_str()).collect();
        assert_eq!(failed, vec!["second"]);
        assert_eq!(report.steps[2].status, StepStatus::Skipped("second failed".into()));
    }

    #[test]
    fn serializes_status_inline() {
        let mut report = ProvisionReport::new("test");
        report.record("delete zone", Err("404"));
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(
            json["steps"][0],
            serde_json::json!({ "step": "delete zone", "status": "failed", "detail": "404" })
        );
        assert!(json.get("generated_password").is_none());
    }
}
