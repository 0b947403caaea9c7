use serde::{Deserialize, Serialize};
use std::{
    fmt::{Debug, Display},
    path::PathBuf,
    str::FromStr,
};
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum ParseError {
    #[error("identity is not a gss-spnego authorization identity")]
    UnexpectedMechanism,
    #[error("cannot parse uid")]
    MissingUid,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CredentialSource {
    Password(String),
    Keytab(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Principal {
    pub name: String,
    pub source: CredentialSource,
}

impl Principal {
    pub fn new(name: impl Into<String>, source: CredentialSource) -> Self {
        Principal {
            name: name.into(),
            source,
        }
    }

    pub fn password(&self) -> Option<&str> {
        match &self.source {
            CredentialSource::Password(secret) => Some(secret),
            CredentialSource::Keytab(_) => None,
        }
    }
}

impl Display for Principal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Authorized,
    Unauthorized,
    Basic,
}

impl Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Authorized => write!(f, "authorized"),
            Role::Unauthorized => write!(f, "unauthorized"),
            Role::Basic => write!(f, "basic"),
        }
    }
}

/// The three principals every scenario is built around.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Roles {
    /// Allowed on the strict and delegate endpoints.
    pub authorized: Principal,
    /// Holds a valid ticket but is not allowed on the strict and delegate endpoints.
    pub unauthorized: Principal,
    /// Authenticates with basic credentials on the fallback endpoint.
    pub basic: Principal,
}

impl Roles {
    pub fn all(&self) -> [&Principal; 3] {
        [&self.authorized, &self.unauthorized, &self.basic]
    }

    pub fn find(&self, name: &str) -> Option<&Principal> {
        self.all().into_iter().find(|p| p.name == name)
    }

    pub fn get(&self, role: Role) -> &Principal {
        match role {
            Role::Authorized => &self.authorized,
            Role::Unauthorized => &self.unauthorized,
            Role::Basic => &self.basic,
        }
    }

    pub fn role_of(&self, name: &str) -> Option<Role> {
        [Role::Authorized, Role::Unauthorized, Role::Basic]
            .into_iter()
            .find(|&role| self.get(role).name == name)
    }
}

/// Authorization identity the backend directory reports for a SASL/GSSAPI bind,
/// e.g. `dn:uid=alice,cn=gss-spnego,cn=auth`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaslIdentity(String);

const IDENTITY_PREFIX: &str = "dn:uid=";
const IDENTITY_SUFFIX: &str = ",cn=gss-spnego,cn=auth";

impl SaslIdentity {
    pub fn new(uid: impl Into<String>) -> Self {
        SaslIdentity(uid.into())
    }

    pub fn uid(&self) -> &str {
        &self.0
    }
}

impl FromStr for SaslIdentity {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let Some(rest) = s.trim_end().strip_prefix(IDENTITY_PREFIX) else {
            return Err(ParseError::UnexpectedMechanism);
        };

        let Some(uid) = rest.strip_suffix(IDENTITY_SUFFIX) else {
            return Err(ParseError::UnexpectedMechanism);
        };

        if uid.is_empty() || uid.contains(',') {
            return Err(ParseError::MissingUid);
        }

        Ok(SaslIdentity(uid.to_string()))
    }
}

impl Display for SaslIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{IDENTITY_PREFIX}{uid}{IDENTITY_SUFFIX}", uid = self.0)
    }
}
