use crate::attrs;
use ldap3::{LdapConnAsync, LdapConnSettings, Mod, Scope, SearchEntry};
use serde::{Deserialize, Serialize};
use std::{collections::HashSet, fmt::Display, time::Duration};
use thiserror::Error;

const LDAP_NO_SUCH_ATTRIBUTE: u32 = 16;

#[derive(Error, Debug)]
pub enum PolicyError {
    #[error("directory rejected delegation write on {entry}: {reason}")]
    WriteRejected { entry: String, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DelegationPolicy {
    Present,
    Absent,
}

impl From<bool> for DelegationPolicy {
    fn from(enabled: bool) -> Self {
        if enabled {
            DelegationPolicy::Present
        } else {
            DelegationPolicy::Absent
        }
    }
}

impl Display for DelegationPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DelegationPolicy::Present => write!(f, "delegation present"),
            DelegationPolicy::Absent => write!(f, "delegation absent"),
        }
    }
}

pub trait PolicyController {
    /// Returns only once the directory acknowledged the write and the new
    /// relation is observable.
    fn set_delegation(
        &mut self,
        front_end: &str,
        back_end: &str,
        enabled: bool,
    ) -> impl std::future::Future<Output = Result<(), PolicyError>>;
}

#[derive(Debug, Clone)]
pub struct LdapSettings {
    pub url: String,
    pub bind_dn: String,
    pub bind_password: String,
    pub base_dn: String,
    pub realm: String,
    pub timeout: Duration,
    pub confirm_attempts: u32,
    pub confirm_interval: Duration,
}

/// Mutates `krbAllowedToDelegateTo` on the front-end principal entry of an
/// LDAP-backed KDC.
pub struct LdapPolicyController {
    settings: LdapSettings,
}

impl LdapPolicyController {
    pub fn new(settings: LdapSettings) -> Self {
        Self { settings }
    }

    async fn connect(&self) -> anyhow::Result<ldap3::Ldap> {
        let conn_settings = LdapConnSettings::new().set_conn_timeout(self.settings.timeout);
        let (conn, mut ldap) = LdapConnAsync::with_settings(conn_settings, &self.settings.url).await?;
        tokio::spawn(async move {
            if let Err(e) = conn.drive().await {
                tracing::warn!(error = %e, "directory connection closed");
            }
        });

        ldap.with_timeout(self.settings.timeout)
            .simple_bind(&self.settings.bind_dn, &self.settings.bind_password)
            .await?
            .success()?;
        Ok(ldap)
    }

    async fn write(&self, ldap: &mut ldap3::Ldap, entry: &str, target: &str, enabled: bool) -> anyhow::Result<()> {
        let modification = if enabled {
            Mod::Replace(attrs::ATTR_ALLOWED_TO_DELEGATE_TO, HashSet::from([target]))
        } else {
            Mod::Delete(attrs::ATTR_ALLOWED_TO_DELEGATE_TO, HashSet::new())
        };

        let result = ldap
            .with_timeout(self.settings.timeout)
            .modify(entry, vec![modification])
            .await?;

        write_outcome(result.rc, &result.text, enabled)
    }

    async fn observed(&self, ldap: &mut ldap3::Ldap, entry: &str) -> anyhow::Result<Vec<String>> {
        let (entries, _) = ldap
            .with_timeout(self.settings.timeout)
            .search(entry, Scope::Base, "(objectClass=*)", vec![attrs::ATTR_ALLOWED_TO_DELEGATE_TO])
            .await?
            .success()?;

        let values = entries
            .into_iter()
            .map(SearchEntry::construct)
            .flat_map(|mut e| e.attrs.remove(attrs::ATTR_ALLOWED_TO_DELEGATE_TO).unwrap_or_default())
            .collect();
        Ok(values)
    }

    async fn apply(&self, entry: &str, target: &str, enabled: bool) -> anyhow::Result<()> {
        let mut ldap = self.connect().await?;
        self.write(&mut ldap, entry, target, enabled).await?;

        let attempts = self.settings.confirm_attempts.max(1);
        let mut confirmed = false;
        for attempt in 1..=attempts {
            let values = self.observed(&mut ldap, entry).await?;
            if is_observed(&values, target, enabled) {
                confirmed = true;
                break;
            }
            tracing::debug!(attempt, entry, "delegation change not yet observable");
            if attempt < attempts {
                tokio::time::sleep(self.settings.confirm_interval).await;
            }
        }

        let _ = ldap.unbind().await;
        if !confirmed {
            anyhow::bail!("write acknowledged but never observed");
        }
        Ok(())
    }
}

impl PolicyController for LdapPolicyController {
    async fn set_delegation(&mut self, front_end: &str, back_end: &str, enabled: bool) -> Result<(), PolicyError> {
        let entry = attrs::principal_dn(front_end, &self.settings.realm, &self.settings.base_dn);
        let target = attrs::qualified(back_end, &self.settings.realm);

        self.apply(&entry, &target, enabled)
            .await
            .map_err(|e| PolicyError::WriteRejected {
                entry: entry.clone(),
                reason: format!("{e:#}"),
            })?;

        tracing::info!(front_end, back_end, policy = %DelegationPolicy::from(enabled), "delegation policy applied");
        Ok(())
    }
}

/// Maps the result code of a modify. Removing a relation that is already
/// gone is not an error.
fn write_outcome(rc: u32, text: &str, enabled: bool) -> anyhow::Result<()> {
    match rc {
        0 => Ok(()),
        LDAP_NO_SUCH_ATTRIBUTE if !enabled => Ok(()),
        rc => Err(anyhow::anyhow!("rc={rc} {text}")),
    }
}

fn is_observed(values: &[String], target: &str, enabled: bool) -> bool {
    values.iter().any(|v| v == target) == enabled
}

#[cfg(test)]
mod tests {
    use super::{is_observed, write_outcome, DelegationPolicy, LDAP_NO_SUCH_ATTRIBUTE};

    const BACK_END: &str = "ldap/ldap.example.com@EXAMPLE.COM";

    #[test]
    fn test_write_success() {
        assert!(write_outcome(0, "", true).is_ok());
        assert!(write_outcome(0, "", false).is_ok());
    }

    #[test]
    fn test_missing_attribute_tolerated_only_when_removing() {
        assert!(write_outcome(LDAP_NO_SUCH_ATTRIBUTE, "", false).is_ok());
        assert!(write_outcome(LDAP_NO_SUCH_ATTRIBUTE, "", true).is_err());
    }

    #[test]
    fn test_other_codes_are_rejected() {
        // insufficientAccessRights
        let err = write_outcome(50, "no write access", true).unwrap_err();
        assert_eq!(err.to_string(), "rc=50 no write access");
        assert!(write_outcome(32, "no such object", false).is_err());
    }

    #[test]
    fn test_enabled_relation_observed() {
        let values = vec!["cifs/files.example.com@EXAMPLE.COM".to_string(), BACK_END.to_string()];
        assert!(is_observed(&values, BACK_END, true));
        assert!(!is_observed(&values, BACK_END, false));
    }

    #[test]
    fn test_removed_relation_observed() {
        assert!(is_observed(&[], BACK_END, false));
        assert!(!is_observed(&[], BACK_END, true));
        let others = vec!["cifs/files.example.com@EXAMPLE.COM".to_string()];
        assert!(is_observed(&others, BACK_END, false));
    }

    #[test]
    fn test_policy_from_bool() {
        assert_eq!(DelegationPolicy::from(true), DelegationPolicy::Present);
        assert_eq!(DelegationPolicy::from(false), DelegationPolicy::Absent);
    }
}
