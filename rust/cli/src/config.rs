use delegation::{
    policy::LdapSettings,
    principal::{CredentialSource, Principal, Roles},
};
use serde::{Deserialize, Serialize};
use std::{
    path::{Path, PathBuf},
    time::Duration,
};
use thiserror::Error;

const DEFAULT_CONFIG_PATH: &str = "gssctl.toml";

#[derive(Error, Debug)]
pub(crate) enum SetupError {
    #[error("cannot read configuration {path}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed configuration {path}: {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub(crate) struct Configuration {
    pub realm: String,
    /// Front end base URL, the endpoint paths are appended to it.
    pub base_url: String,
    /// Service principal of the front end (unqualified).
    pub front_end: String,
    /// Service principal of the backend the front end delegates to.
    pub back_end: String,
    pub ccache: PathBuf,
    pub krb5_config: Option<PathBuf>,
    pub probe_timeout_secs: u64,
    pub curl: String,
    pub directory: DirectoryConfig,
    pub principals: Roles,
    /// Service logs dumped when a run fails.
    pub log_files: Vec<PathBuf>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub(crate) struct DirectoryConfig {
    pub url: String,
    pub bind_dn: String,
    pub bind_password: String,
    pub base_dn: String,
    pub timeout_secs: u64,
    pub confirm_attempts: u32,
    pub confirm_interval_ms: u64,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            url: "ldap://ldap.example.com".to_string(),
            bind_dn: "cn=admin,dc=example,dc=com".to_string(),
            bind_password: "admin".to_string(),
            base_dn: "dc=example,dc=com".to_string(),
            timeout_secs: 10,
            confirm_attempts: 10,
            confirm_interval_ms: 200,
        }
    }
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            realm: "EXAMPLE.COM".to_string(),
            base_url: "http://www.example.com".to_string(),
            front_end: "HTTP/www.example.com".to_string(),
            back_end: "ldap/ldap.example.com".to_string(),
            ccache: std::env::temp_dir().join("gssctl").join("ccache"),
            krb5_config: None,
            probe_timeout_secs: 60,
            curl: "curl".to_string(),
            directory: DirectoryConfig::default(),
            principals: Roles {
                authorized: Principal::new("alice", CredentialSource::Password("alice-password".to_string())),
                unauthorized: Principal::new("mallory", CredentialSource::Password("mallory-password".to_string())),
                basic: Principal::new("bob", CredentialSource::Password("bob-password".to_string())),
            },
            log_files: vec![],
        }
    }
}

impl Configuration {
    /// Reads `path`, or `gssctl.toml` in the working directory when present.
    /// Without either, the built-in defaults apply.
    pub fn load(path: Option<PathBuf>) -> Result<Self, SetupError> {
        let path = match path {
            Some(path) => path,
            None if Path::new(DEFAULT_CONFIG_PATH).exists() => PathBuf::from(DEFAULT_CONFIG_PATH),
            None => return Ok(Self::default()),
        };

        let raw = std::fs::read_to_string(&path).map_err(|source| SetupError::Unreadable {
            path: path.clone(),
            source,
        })?;
        let config = Self::parse(&raw).map_err(|source| SetupError::Malformed {
            path: path.clone(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    fn parse(raw: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(raw)
    }

    fn validate(&self) -> Result<(), SetupError> {
        if self.probe_timeout_secs == 0 {
            return Err(SetupError::Invalid("probe_timeout_secs must be positive".to_string()));
        }
        if self.directory.timeout_secs == 0 {
            return Err(SetupError::Invalid("directory.timeout_secs must be positive".to_string()));
        }
        let names: Vec<_> = self.principals.all().into_iter().map(|p| p.name.as_str()).collect();
        if names[0] == names[1] || names[1] == names[2] || names[0] == names[2] {
            return Err(SetupError::Invalid(format!("scenario principals must be distinct, got {names:?}")));
        }
        if self.principals.basic.password().is_none() {
            return Err(SetupError::Invalid(format!(
                "{} needs a password for basic authentication",
                self.principals.basic
            )));
        }
        Ok(())
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    pub fn ldap_settings(&self) -> LdapSettings {
        LdapSettings {
            url: self.directory.url.clone(),
            bind_dn: self.directory.bind_dn.clone(),
            bind_password: self.directory.bind_password.clone(),
            base_dn: self.directory.base_dn.clone(),
            realm: self.realm.clone(),
            timeout: Duration::from_secs(self.directory.timeout_secs),
            confirm_attempts: self.directory.confirm_attempts,
            confirm_interval: Duration::from_millis(self.directory.confirm_interval_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Configuration, SetupError};
    use delegation::principal::CredentialSource;
    use std::{io::Write, path::PathBuf, time::Duration};

    #[test]
    fn test_parse_partial_config() {
        let config = Configuration::parse(
            r#"
            realm = "TEST.LOCAL"
            base_url = "http://www.test.local:8080"
            log_files = ["/var/log/httpd/error_log"]

            [directory]
            url = "ldap://127.0.0.1:3890"

            [principals.authorized]
            name = "alice"
            source = { password = "s3cret" }

            [principals.unauthorized]
            name = "mallory"
            source = { keytab = "/etc/mallory.keytab" }

            [principals.basic]
            name = "bob"
            source = { password = "hunter2" }
            "#,
        )
        .unwrap();

        assert_eq!(config.realm, "TEST.LOCAL");
        assert_eq!(config.directory.url, "ldap://127.0.0.1:3890");
        assert_eq!(config.directory.base_dn, "dc=example,dc=com");
        assert_eq!(config.probe_timeout(), Duration::from_secs(60));
        assert_eq!(
            config.principals.unauthorized.source,
            CredentialSource::Keytab(PathBuf::from("/etc/mallory.keytab"))
        );
        assert_eq!(config.log_files.len(), 1);
        assert_eq!(config.ldap_settings().realm, "TEST.LOCAL");
    }

    #[test]
    fn test_unknown_field_is_rejected() {
        assert!(Configuration::parse("relam = \"TYPO\"").is_err());
    }

    #[test]
    fn test_load_validates() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "probe_timeout_secs = 0").unwrap();
        let err = Configuration::load(Some(file.path().to_path_buf())).unwrap_err();
        assert!(matches!(err, SetupError::Invalid(_)));
    }

    #[test]
    fn test_zero_directory_timeout_is_rejected() {
        let config = Configuration::parse("[directory]\ntimeout_secs = 0").unwrap();
        let err = config.validate().unwrap_err();
        assert!(matches!(err, SetupError::Invalid(ref reason) if reason.contains("directory.timeout_secs")));
    }

    #[test]
    fn test_load_missing_file() {
        let err = Configuration::load(Some(PathBuf::from("/nonexistent/gssctl.toml"))).unwrap_err();
        assert!(matches!(err, SetupError::Unreadable { .. }));
    }

    #[test]
    fn test_defaults_are_valid() {
        assert!(Configuration::default().validate().is_ok());
    }
}
