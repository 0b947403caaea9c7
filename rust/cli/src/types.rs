use chrono::{DateTime, Utc};
use delegation::{
    matrix::{Attempt, Endpoint, ExpectationEntry},
    policy::DelegationPolicy,
    principal::Roles,
    verifier::{ScenarioResult, StepOutcome},
};
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug)]
pub(crate) struct RunReport {
    #[serde(rename = "GeneratedAt")]
    generated_at: DateTime<Utc>,
    #[serde(rename = "Passed")]
    passed: bool,
    #[serde(rename = "Aborted")]
    aborted: Option<String>,
    #[serde(rename = "Steps")]
    steps: Vec<StepOutcome>,
}

impl RunReport {
    pub fn completed(result: &ScenarioResult) -> Self {
        Self {
            generated_at: Utc::now(),
            passed: result.passed(),
            aborted: None,
            steps: result.outcomes().to_vec(),
        }
    }

    pub fn aborted(result: &ScenarioResult, reason: impl Into<String>) -> Self {
        Self {
            passed: false,
            aborted: Some(reason.into()),
            ..Self::completed(result)
        }
    }
}

#[derive(Serialize, Deserialize, Debug)]
pub(crate) struct MatrixRow {
    #[serde(rename = "Endpoint")]
    endpoint: Endpoint,
    #[serde(rename = "Path")]
    path: String,
    #[serde(rename = "Credential")]
    credential: String,
    #[serde(rename = "Delegation")]
    delegation: DelegationPolicy,
    #[serde(rename = "Attempt")]
    attempt: String,
    #[serde(rename = "Expected")]
    expected: u16,
}

impl MatrixRow {
    /// Names the credential column after the configured principal holding the role.
    pub fn describe(entry: ExpectationEntry, roles: &Roles) -> Self {
        Self {
            endpoint: entry.endpoint,
            path: entry.endpoint.path().to_string(),
            credential: match entry.holder {
                Some(role) => format!("{} ({role})", roles.get(role)),
                None => "none".to_string(),
            },
            delegation: entry.policy,
            attempt: match entry.attempt {
                Attempt::Anonymous => "none".to_string(),
                other => other.to_string(),
            },
            expected: entry.expected,
        }
    }
}
