use crate::{principal::SaslIdentity, probe::ProbeResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Display;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepOutcome {
    pub step: String,
    pub expected: String,
    pub actual: String,
    pub passed: bool,
    /// Response body or error text, kept for failed steps only.
    pub detail: Option<String>,
    pub at: DateTime<Utc>,
}

/// Append-only record of a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScenarioResult {
    outcomes: Vec<StepOutcome>,
}

impl ScenarioResult {
    pub fn outcomes(&self) -> &[StepOutcome] {
        &self.outcomes
    }

    pub fn passed(&self) -> bool {
        self.outcomes.iter().fold(true, |acc, o| acc && o.passed)
    }

    pub fn failures(&self) -> impl Iterator<Item = &StepOutcome> {
        self.outcomes.iter().filter(|o| !o.passed)
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    fn push(&mut self, outcome: StepOutcome) {
        if outcome.passed {
            tracing::info!(step = %outcome.step, actual = %outcome.actual, "PASS");
        } else {
            tracing::warn!(
                step = %outcome.step,
                expected = %outcome.expected,
                actual = %outcome.actual,
                "FAIL"
            );
        }
        self.outcomes.push(outcome);
    }
}

/// Compares probe results against expectations. Never aborts: a mismatch is
/// recorded and the run goes on.
#[derive(Debug, Default)]
pub struct Verifier {
    result: ScenarioResult,
    failed: bool,
}

impl Verifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn check(&mut self, step: impl Into<String>, actual: &ProbeResult, expected: u16) -> bool {
        let passed = actual.status == expected;
        self.record(StepOutcome {
            step: step.into(),
            expected: expected.to_string(),
            actual: actual.status.to_string(),
            passed,
            detail: (!passed).then(|| actual.body.clone()),
            at: Utc::now(),
        })
    }

    /// Exact match of the response body against the identity the backend must observe.
    pub fn check_identity(&mut self, step: impl Into<String>, actual: &ProbeResult, expected: &SaslIdentity) -> bool {
        let observed = actual.body.trim_end();
        let passed = observed == expected.to_string();
        self.record(StepOutcome {
            step: step.into(),
            expected: expected.to_string(),
            actual: observed.to_string(),
            passed,
            detail: (!passed).then(|| actual.body.clone()),
            at: Utc::now(),
        })
    }

    /// A controller step that completed.
    pub fn record_ok(&mut self, step: impl Into<String>, what: impl Display) {
        self.record(StepOutcome {
            step: step.into(),
            expected: "ok".to_string(),
            actual: what.to_string(),
            passed: true,
            detail: None,
            at: Utc::now(),
        });
    }

    pub fn record_error(&mut self, step: impl Into<String>, error: impl Display) {
        self.record(StepOutcome {
            step: step.into(),
            expected: "ok".to_string(),
            actual: "error".to_string(),
            passed: false,
            detail: Some(error.to_string()),
            at: Utc::now(),
        });
    }

    pub fn failed(&self) -> bool {
        self.failed
    }

    pub fn result(&self) -> &ScenarioResult {
        &self.result
    }

    pub fn into_result(self) -> ScenarioResult {
        self.result
    }

    fn record(&mut self, outcome: StepOutcome) -> bool {
        let passed = outcome.passed;
        self.failed |= !passed;
        self.result.push(outcome);
        passed
    }
}

#[cfg(test)]
mod tests {
    use super::Verifier;
    use crate::{principal::SaslIdentity, probe::ProbeResult};

    #[test]
    fn test_check_matches_status_only() {
        let mut verifier = Verifier::new();
        assert!(verifier.check("plain", &ProbeResult::new(200, "anything"), 200));
        assert!(!verifier.failed());
        assert!(verifier.result().outcomes()[0].detail.is_none());
    }

    #[test]
    fn test_mismatch_keeps_body_and_continues() {
        let mut verifier = Verifier::new();
        assert!(!verifier.check("strict", &ProbeResult::new(500, "Internal Server Error"), 200));
        assert!(verifier.check("plain", &ProbeResult::new(200, ""), 200));

        assert!(verifier.failed());
        let result = verifier.into_result();
        assert_eq!(result.len(), 2);
        assert!(!result.passed());
        let failures: Vec<_> = result.failures().collect();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].detail.as_deref(), Some("Internal Server Error"));
    }

    #[test]
    fn test_transport_failure_never_matches() {
        let mut verifier = Verifier::new();
        assert!(!verifier.check("delegate", &ProbeResult::transport_failure(), 401));
        assert!(!verifier.check("delegate", &ProbeResult::transport_failure(), 500));
    }

    #[test]
    fn test_check_identity() {
        let mut verifier = Verifier::new();
        let alice = SaslIdentity::new("alice");
        assert!(verifier.check_identity("id", &ProbeResult::new(200, "dn:uid=alice,cn=gss-spnego,cn=auth\n"), &alice));
        assert!(!verifier.check_identity(
            "id",
            &ProbeResult::new(200, "dn:uid=HTTP/www.example.com,cn=gss-spnego,cn=auth"),
            &alice
        ));
        assert!(verifier.failed());
    }

    #[test]
    fn test_record_error_fails_run() {
        let mut verifier = Verifier::new();
        verifier.record_ok("acquire alice", "credential for alice");
        assert!(verifier.result().passed());
        verifier.record_error("acquire mallory", "kinit: Password incorrect");
        assert!(!verifier.result().passed());
    }

    #[test]
    fn test_empty_result_passes() {
        assert!(Verifier::new().result().passed());
    }
}
