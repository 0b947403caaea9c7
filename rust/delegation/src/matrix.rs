//! Expected outcome of every exercised (endpoint, credential, policy, attempt) combination.

use crate::{
    policy::DelegationPolicy,
    principal::{Role, SaslIdentity},
    sequencer::Step,
};
use serde::{Deserialize, Serialize};
use std::{fmt::Display, str::FromStr};

pub const OK: u16 = 200;
pub const UNAUTHORIZED: u16 = 401;
pub const FORBIDDEN: u16 = 403;
/// What the front end answers when it may not obtain a delegated ticket for the backend.
pub const DELEGATION_REFUSED: u16 = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AuthPolicy {
    NoAuth,
    NegotiateRequired,
    NegotiateWithBasicFallback,
    NegotiateWithDelegation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Endpoint {
    Fallback,
    Plain,
    Strict,
    Delegate,
}

impl Endpoint {
    pub const ALL: [Endpoint; 4] = [Endpoint::Fallback, Endpoint::Plain, Endpoint::Strict, Endpoint::Delegate];

    pub fn path(&self) -> &'static str {
        match self {
            Endpoint::Fallback => "/fallback/",
            Endpoint::Plain => "/plain/",
            Endpoint::Strict => "/strict/",
            Endpoint::Delegate => "/delegate/",
        }
    }

    pub fn auth_policy(&self) -> AuthPolicy {
        match self {
            Endpoint::Fallback => AuthPolicy::NegotiateWithBasicFallback,
            Endpoint::Plain => AuthPolicy::NoAuth,
            Endpoint::Strict => AuthPolicy::NegotiateRequired,
            Endpoint::Delegate => AuthPolicy::NegotiateWithDelegation,
        }
    }

    /// The only role the front end lets through once authenticated.
    pub fn authorized_role(&self) -> Option<Role> {
        match self {
            Endpoint::Fallback => Some(Role::Basic),
            Endpoint::Plain => None,
            Endpoint::Strict | Endpoint::Delegate => Some(Role::Authorized),
        }
    }

    pub fn is_delegation_sensitive(&self) -> bool {
        self.auth_policy() == AuthPolicy::NegotiateWithDelegation
    }
}

impl Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Endpoint::Fallback => "fallback",
            Endpoint::Plain => "plain",
            Endpoint::Strict => "strict",
            Endpoint::Delegate => "delegate",
        };
        write!(f, "{name}")
    }
}

impl FromStr for Endpoint {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Endpoint::ALL
            .into_iter()
            .find(|e| e.to_string() == s.trim_matches('/'))
            .ok_or_else(|| format!("unknown endpoint {s}, expected one of fallback, plain, strict, delegate"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Attempt {
    /// Request without any Authorization header.
    Anonymous,
    Negotiate,
    Basic { correct_password: bool },
}

impl Display for Attempt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Attempt::Anonymous => write!(f, "no negotiate"),
            Attempt::Negotiate => write!(f, "negotiate"),
            Attempt::Basic { correct_password: true } => write!(f, "basic, correct password"),
            Attempt::Basic { correct_password: false } => write!(f, "basic, wrong password"),
        }
    }
}

/// Expected status, or `None` when the combination is never exercised.
///
/// `holder` is the role whose ticket is in the cache, if any.
pub fn expected_status(endpoint: Endpoint, holder: Option<Role>, policy: DelegationPolicy, attempt: Attempt) -> Option<u16> {
    if endpoint.auth_policy() == AuthPolicy::NoAuth {
        return Some(OK);
    }

    match attempt {
        Attempt::Anonymous => Some(UNAUTHORIZED),
        Attempt::Basic { correct_password } => match endpoint.auth_policy() {
            AuthPolicy::NegotiateWithBasicFallback if correct_password => Some(OK),
            AuthPolicy::NegotiateWithBasicFallback => Some(UNAUTHORIZED),
            _ => None,
        },
        Attempt::Negotiate => match holder {
            None => Some(UNAUTHORIZED),
            // the basic-capable principal never holds a ticket in the scenario
            Some(Role::Basic) => None,
            Some(role) if endpoint.authorized_role() != Some(role) => Some(FORBIDDEN),
            Some(_) if endpoint.is_delegation_sensitive() && policy == DelegationPolicy::Absent => {
                Some(DELEGATION_REFUSED)
            }
            Some(_) => Some(OK),
        },
    }
}

/// Identity the backend must report when delegation succeeds.
pub fn expected_identity(
    endpoint: Endpoint,
    holder: Option<(Role, &str)>,
    policy: DelegationPolicy,
    attempt: Attempt,
) -> Option<SaslIdentity> {
    let (role, name) = holder?;
    if !endpoint.is_delegation_sensitive() || attempt != Attempt::Negotiate {
        return None;
    }
    match expected_status(endpoint, Some(role), policy, attempt) {
        Some(OK) => Some(SaslIdentity::new(name)),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpectationEntry {
    pub endpoint: Endpoint,
    pub holder: Option<Role>,
    pub policy: DelegationPolicy,
    pub attempt: Attempt,
    pub expected: u16,
}

/// Flattened view of [`expected_status`] over the states a script walks through.
pub struct ExpectationMatrix;

impl ExpectationMatrix {
    /// One row per distinct combination `steps` verifies, in first-seen order.
    /// Acquisitions are assumed to succeed.
    pub fn rows(steps: &[Step]) -> Vec<ExpectationEntry> {
        let mut holder = None;
        let mut policy = DelegationPolicy::Present;
        let mut rows: Vec<ExpectationEntry> = vec![];

        for step in steps {
            let checks: Vec<(Endpoint, Attempt)> = match step {
                Step::Acquire(role) => {
                    holder = Some(*role);
                    continue;
                }
                Step::Release => {
                    holder = None;
                    continue;
                }
                Step::SetDelegation(enabled) => {
                    policy = DelegationPolicy::from(*enabled);
                    continue;
                }
                Step::Verify(endpoints) => endpoints
                    .iter()
                    .flat_map(|&e| [(e, Attempt::Anonymous), (e, Attempt::Negotiate)])
                    .collect(),
                Step::VerifyBasic(endpoint) => vec![
                    (*endpoint, Attempt::Basic { correct_password: false }),
                    (*endpoint, Attempt::Basic { correct_password: true }),
                ],
            };

            for (endpoint, attempt) in checks {
                let Some(expected) = expected_status(endpoint, holder, policy, attempt) else {
                    continue;
                };
                let row = ExpectationEntry {
                    endpoint,
                    holder,
                    policy,
                    attempt,
                    expected,
                };
                if !rows.contains(&row) {
                    rows.push(row);
                }
            }
        }
        rows
    }
}
