#![allow(dead_code)]
//! In-memory stand-ins for the KDC, the directory and the front end.

use delegation::{
    credential::{CredentialController, CredentialError, CredentialState},
    matrix::Endpoint,
    policy::{PolicyController, PolicyError},
    principal::{CredentialSource, Principal, Roles},
    probe::{AuthMode, Probe, ProbeResult},
};
use std::{
    cell::RefCell,
    collections::{HashMap, HashSet},
    rc::Rc,
};

pub const FRONT_END: &str = "HTTP/www.example.com";
pub const BACK_END: &str = "ldap/ldap.example.com";

/// Behaviour of the simulated deployment. The defaults describe a correctly
/// configured realm.
#[derive(Debug)]
pub struct Realm {
    /// Passwords the KDC accepts.
    pub passwords: HashMap<String, String>,
    /// Principals with a readable keytab.
    pub keytabs: HashSet<String>,
    /// `front-end -> back-end` delegation relation.
    pub delegation: HashSet<(String, String)>,
    pub reject_policy_writes: bool,
    pub front_end_down: bool,
    /// Front end delegates even when the directory forbids it.
    pub ignores_delegation_policy: bool,
    /// Front end lets any authenticated principal through on the strict endpoint.
    pub strict_allows_everyone: bool,
    /// Front end forwards its own service identity instead of the client's.
    pub forwards_service_identity: bool,
    pub tickets_issued: usize,
    pub policy_writes: usize,
    pub probes: usize,
}

impl Default for Realm {
    fn default() -> Self {
        Self {
            passwords: HashMap::from([
                ("alice".to_string(), "alice-secret".to_string()),
                ("mallory".to_string(), "mallory-secret".to_string()),
                ("bob".to_string(), "bob-secret".to_string()),
            ]),
            keytabs: HashSet::new(),
            delegation: HashSet::new(),
            reject_policy_writes: false,
            front_end_down: false,
            ignores_delegation_policy: false,
            strict_allows_everyone: false,
            forwards_service_identity: false,
            tickets_issued: 0,
            policy_writes: 0,
            probes: 0,
        }
    }
}

pub type SharedRealm = Rc<RefCell<Realm>>;

pub fn realm() -> SharedRealm {
    Rc::new(RefCell::new(Realm::default()))
}

pub fn roles() -> Roles {
    Roles {
        authorized: Principal::new("alice", CredentialSource::Password("alice-secret".into())),
        unauthorized: Principal::new("mallory", CredentialSource::Password("mallory-secret".into())),
        basic: Principal::new("bob", CredentialSource::Password("bob-secret".into())),
    }
}

pub struct FakeKdc {
    realm: SharedRealm,
    state: CredentialState,
}

impl FakeKdc {
    pub fn new(realm: SharedRealm) -> Self {
        Self {
            realm,
            state: CredentialState::NoCredential,
        }
    }
}

impl CredentialController for FakeKdc {
    fn state(&self) -> &CredentialState {
        &self.state
    }

    async fn acquire(&mut self, principal: &Principal) -> Result<(), CredentialError> {
        self.release().await?;
        let mut realm = self.realm.borrow_mut();
        match &principal.source {
            CredentialSource::Keytab(path) if !realm.keytabs.contains(&principal.name) => {
                return Err(CredentialError::SourceUnavailable {
                    principal: principal.name.clone(),
                    reason: format!("{} unreadable", path.display()),
                })
            }
            CredentialSource::Password(password) if realm.passwords.get(&principal.name) != Some(password) => {
                return Err(CredentialError::RejectedByService {
                    principal: principal.name.clone(),
                    reason: "Password incorrect while getting initial credentials".to_string(),
                })
            }
            _ => {}
        }
        realm.tickets_issued += 1;
        self.state = CredentialState::CredentialFor(principal.name.clone());
        Ok(())
    }

    async fn release(&mut self) -> Result<(), CredentialError> {
        self.state = CredentialState::NoCredential;
        Ok(())
    }
}

pub struct FakeDirectory {
    realm: SharedRealm,
}

impl FakeDirectory {
    pub fn new(realm: SharedRealm) -> Self {
        Self { realm }
    }
}

impl PolicyController for FakeDirectory {
    async fn set_delegation(&mut self, front_end: &str, back_end: &str, enabled: bool) -> Result<(), PolicyError> {
        let mut realm = self.realm.borrow_mut();
        if realm.reject_policy_writes {
            return Err(PolicyError::WriteRejected {
                entry: front_end.to_string(),
                reason: "insufficient access".to_string(),
            });
        }
        realm.policy_writes += 1;
        let relation = (front_end.to_string(), back_end.to_string());
        if enabled {
            realm.delegation.insert(relation);
        } else {
            realm.delegation.remove(&relation);
        }
        Ok(())
    }
}

/// Front end configured with `fallback` restricted to bob and `strict` /
/// `delegate` restricted to alice.
pub struct FakeFrontEnd {
    realm: SharedRealm,
}

impl FakeFrontEnd {
    pub fn new(realm: SharedRealm) -> Self {
        Self { realm }
    }
}

impl Probe for FakeFrontEnd {
    async fn request(&self, endpoint: Endpoint, mode: &AuthMode, credential: &CredentialState) -> ProbeResult {
        let mut realm = self.realm.borrow_mut();
        realm.probes += 1;
        if realm.front_end_down {
            return ProbeResult::transport_failure();
        }

        let user = match (endpoint, mode) {
            (Endpoint::Plain, _) => return ProbeResult::new(200, "plain"),
            (Endpoint::Fallback, AuthMode::Basic { user, password }) => {
                if realm.passwords.get(user) == Some(password) {
                    user.clone()
                } else {
                    return ProbeResult::new(401, "Unauthorized");
                }
            }
            (_, AuthMode::Negotiate) => match credential.holder() {
                Some(name) => name.to_string(),
                None => return ProbeResult::new(401, "Unauthorized"),
            },
            _ => return ProbeResult::new(401, "Unauthorized"),
        };

        match endpoint {
            Endpoint::Fallback if user == "bob" => ProbeResult::new(200, "fallback"),
            Endpoint::Strict if user == "alice" || realm.strict_allows_everyone => ProbeResult::new(200, "strict"),
            Endpoint::Delegate if user == "alice" => {
                let allowed = realm.delegation.contains(&(FRONT_END.to_string(), BACK_END.to_string()));
                if !allowed && !realm.ignores_delegation_policy {
                    return ProbeResult::new(500, "Internal Server Error");
                }
                let uid = if realm.forwards_service_identity { FRONT_END } else { user.as_str() };
                ProbeResult::new(200, format!("dn:uid={uid},cn=gss-spnego,cn=auth"))
            }
            _ => ProbeResult::new(403, "Forbidden"),
        }
    }
}
