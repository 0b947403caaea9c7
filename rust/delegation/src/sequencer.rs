use crate::{
    credential::CredentialController,
    matrix::{self, Attempt, Endpoint},
    policy::{DelegationPolicy, PolicyController, PolicyError},
    principal::{Role, Roles},
    probe::{AuthMode, Probe},
    verifier::{ScenarioResult, Verifier},
};
use std::fmt::Display;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SequenceError {
    #[error("delegation policy mutation failed, remaining expectations are void")]
    Policy {
        #[source]
        source: PolicyError,
        completed: ScenarioResult,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Acquire(Role),
    Release,
    SetDelegation(bool),
    /// Anonymous and negotiate probe of each endpoint under the current state.
    Verify(Vec<Endpoint>),
    /// Wrong then correct basic credentials of the basic-capable principal.
    VerifyBasic(Endpoint),
}

impl Display for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Step::Acquire(role) => write!(f, "acquire {role} credential"),
            Step::Release => write!(f, "release credential"),
            Step::SetDelegation(true) => write!(f, "allow delegation"),
            Step::SetDelegation(false) => write!(f, "forbid delegation"),
            Step::Verify(endpoints) => write!(f, "verify {} endpoint(s)", endpoints.len()),
            Step::VerifyBasic(endpoint) => write!(f, "verify basic fallback on {endpoint}"),
        }
    }
}

/// The fixed walk through credential and policy states.
pub fn script() -> Vec<Step> {
    let all = Endpoint::ALL.to_vec();
    let delegation_sensitive: Vec<_> = Endpoint::ALL.into_iter().filter(|e| e.is_delegation_sensitive()).collect();

    vec![
        Step::Release,
        Step::SetDelegation(true),
        Step::Verify(all.clone()),
        Step::Acquire(Role::Authorized),
        Step::Verify(all.clone()),
        Step::Acquire(Role::Unauthorized),
        Step::Verify(all.clone()),
        // the basic-capable principal authenticates without a ticket
        Step::Release,
        Step::VerifyBasic(Endpoint::Fallback),
        Step::SetDelegation(false),
        Step::Verify(delegation_sensitive.clone()),
        Step::Acquire(Role::Authorized),
        Step::Verify(delegation_sensitive.clone()),
        Step::Acquire(Role::Unauthorized),
        Step::Verify(delegation_sensitive.clone()),
        Step::SetDelegation(true),
        Step::Acquire(Role::Authorized),
        Step::Verify(delegation_sensitive),
        Step::Release,
    ]
}

pub struct Sequencer<C, P, H> {
    credentials: C,
    policy: P,
    probe: H,
    roles: Roles,
    front_end: String,
    back_end: String,
    delegation: DelegationPolicy,
    verifier: Verifier,
}

impl<C, P, H> Sequencer<C, P, H>
where
    C: CredentialController,
    P: PolicyController,
    H: Probe,
{
    pub fn new(
        credentials: C,
        policy: P,
        probe: H,
        roles: Roles,
        front_end: impl Into<String>,
        back_end: impl Into<String>,
    ) -> Self {
        Self {
            credentials,
            policy,
            probe,
            roles,
            front_end: front_end.into(),
            back_end: back_end.into(),
            delegation: DelegationPolicy::Present,
            verifier: Verifier::new(),
        }
    }

    pub async fn run(self) -> Result<ScenarioResult, SequenceError> {
        self.run_script(script()).await
    }

    /// Runs every step in order. Only a failed policy mutation stops the walk.
    pub async fn run_script(mut self, steps: Vec<Step>) -> Result<ScenarioResult, SequenceError> {
        for (index, step) in steps.iter().enumerate() {
            tracing::info!(step = index + 1, total = steps.len(), "{step}");
            let outcome = self.execute(step).await;
            if let Err(source) = outcome {
                tracing::error!(error = %source, "aborting scenario");
                return Err(SequenceError::Policy {
                    source,
                    completed: self.verifier.into_result(),
                });
            }
        }
        Ok(self.verifier.into_result())
    }

    async fn execute(&mut self, step: &Step) -> Result<(), PolicyError> {
        match step {
            Step::Acquire(role) => {
                let principal = self.roles.get(*role).clone();
                let label = format!("acquire credential for {principal}");
                match self.credentials.acquire(&principal).await {
                    Ok(()) => self.verifier.record_ok(label, self.credentials.state()),
                    Err(e) => self.verifier.record_error(label, e),
                }
            }
            Step::Release => match self.credentials.release().await {
                Ok(()) => self.verifier.record_ok("release credential", self.credentials.state()),
                Err(e) => self.verifier.record_error("release credential", e),
            },
            Step::SetDelegation(enabled) => {
                self.policy
                    .set_delegation(&self.front_end, &self.back_end, *enabled)
                    .await?;
                self.delegation = DelegationPolicy::from(*enabled);
                self.verifier.record_ok(
                    format!("{} -> {}", self.front_end, self.back_end),
                    self.delegation,
                );
            }
            Step::Verify(endpoints) => {
                for endpoint in endpoints {
                    self.verify(*endpoint, Attempt::Anonymous).await;
                    self.verify(*endpoint, Attempt::Negotiate).await;
                }
            }
            Step::VerifyBasic(endpoint) => {
                self.verify(*endpoint, Attempt::Basic { correct_password: false }).await;
                self.verify(*endpoint, Attempt::Basic { correct_password: true }).await;
            }
        }
        Ok(())
    }

    async fn verify(&mut self, endpoint: Endpoint, attempt: Attempt) {
        let state = self.credentials.state().clone();
        let holder = state.holder().and_then(|name| self.roles.role_of(name).map(|role| (role, name)));
        let label = format!("[{}, {}] GET {} ({})", self.delegation, state, endpoint.path(), attempt);

        let Some(expected) = matrix::expected_status(endpoint, holder.map(|(role, _)| role), self.delegation, attempt)
        else {
            tracing::debug!(%label, "combination not exercised");
            return;
        };

        let mode = match self.auth_mode(attempt) {
            Ok(mode) => mode,
            Err(e) => {
                self.verifier.record_error(label, e);
                return;
            }
        };

        let actual = self.probe.request(endpoint, &mode, &state).await;
        let passed = self.verifier.check(label.clone(), &actual, expected);

        if let Some(identity) = matrix::expected_identity(endpoint, holder, self.delegation, attempt) {
            if passed {
                self.verifier.check_identity(format!("{label} identity"), &actual, &identity);
            }
        }
    }

    fn auth_mode(&self, attempt: Attempt) -> Result<AuthMode, String> {
        match attempt {
            Attempt::Anonymous => Ok(AuthMode::None),
            Attempt::Negotiate => Ok(AuthMode::Negotiate),
            Attempt::Basic { correct_password } => {
                let principal = &self.roles.basic;
                let Some(password) = principal.password() else {
                    return Err(format!("{principal} has no password for basic authentication"));
                };
                let password = if correct_password {
                    password.to_string()
                } else {
                    format!("{password}-wrong")
                };
                Ok(AuthMode::Basic {
                    user: principal.name.clone(),
                    password,
                })
            }
        }
    }
}
