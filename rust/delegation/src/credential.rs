use crate::{
    attrs,
    principal::{CredentialSource, Principal},
};
use serde::{Deserialize, Serialize};
use std::{
    fmt::Display,
    path::{Path, PathBuf},
    process::{Output, Stdio},
};
use thiserror::Error;
use tokio::{io::AsyncWriteExt, process::Command};

#[derive(Error, Debug)]
pub enum CredentialError {
    #[error("secret material for {principal} is unavailable: {reason}")]
    SourceUnavailable { principal: String, reason: String },
    #[error("authentication service rejected {principal}: {reason}")]
    RejectedByService { principal: String, reason: String },
    #[error("cannot manage credential cache: {0:?}")]
    InternalError(#[from] anyhow::Error),
}

/// The single process-wide ticket slot.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CredentialState {
    #[default]
    NoCredential,
    CredentialFor(String),
}

impl CredentialState {
    pub fn holder(&self) -> Option<&str> {
        match self {
            CredentialState::NoCredential => None,
            CredentialState::CredentialFor(name) => Some(name),
        }
    }
}

impl Display for CredentialState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CredentialState::NoCredential => write!(f, "no credential"),
            CredentialState::CredentialFor(name) => write!(f, "credential for {name}"),
        }
    }
}

pub trait CredentialController {
    fn state(&self) -> &CredentialState;
    fn acquire(&mut self, principal: &Principal) -> impl std::future::Future<Output = Result<(), CredentialError>>;
    fn release(&mut self) -> impl std::future::Future<Output = Result<(), CredentialError>>;
}

/// Acquires tickets with the MIT `kinit`/`kdestroy` tools into a dedicated cache.
pub struct KinitCredentialController {
    realm: String,
    ccache: PathBuf,
    krb5_config: Option<PathBuf>,
    kinit: String,
    kdestroy: String,
    state: CredentialState,
}

impl KinitCredentialController {
    pub fn new(realm: impl Into<String>, ccache: impl Into<PathBuf>) -> Self {
        Self {
            realm: realm.into(),
            ccache: ccache.into(),
            krb5_config: None,
            kinit: "kinit".to_string(),
            kdestroy: "kdestroy".to_string(),
            state: CredentialState::NoCredential,
        }
    }

    pub fn with_tools(mut self, kinit: impl Into<String>, kdestroy: impl Into<String>) -> Self {
        self.kinit = kinit.into();
        self.kdestroy = kdestroy.into();
        self
    }

    pub fn with_krb5_config(mut self, path: impl Into<PathBuf>) -> Self {
        self.krb5_config = Some(path.into());
        self
    }

    pub fn ccache(&self) -> &Path {
        &self.ccache
    }

    /// Value for `KRB5CCNAME` pointing at this controller's cache.
    pub fn ccache_name(&self) -> String {
        format!("FILE:{}", self.ccache.display())
    }

    fn command(&self, program: &str) -> Command {
        let mut cmd = Command::new(program);
        cmd.env("KRB5CCNAME", self.ccache_name())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(config) = &self.krb5_config {
            cmd.env("KRB5_CONFIG", config);
        }
        cmd
    }

    async fn destroy(&self) -> Result<(), CredentialError> {
        let output = self
            .command(&self.kdestroy)
            .output()
            .await
            .map_err(|e| CredentialError::InternalError(anyhow::Error::new(e).context("spawn kdestroy")))?;

        // kdestroy exits non-zero when there is no cache to destroy.
        if !output.status.success() && tokio::fs::try_exists(&self.ccache).await.unwrap_or(false) {
            return Err(CredentialError::InternalError(anyhow::anyhow!(
                "kdestroy failed: {}",
                stderr_of(&output)
            )));
        }
        Ok(())
    }

    async fn kinit(&self, principal: &Principal) -> Result<Output, CredentialError> {
        let qualified = attrs::qualified(&principal.name, &self.realm);
        let spawn_error = |e: std::io::Error| CredentialError::InternalError(anyhow::Error::new(e).context("spawn kinit"));

        match &principal.source {
            CredentialSource::Keytab(keytab) => {
                if !tokio::fs::try_exists(keytab).await.unwrap_or(false) {
                    return Err(CredentialError::SourceUnavailable {
                        principal: principal.name.clone(),
                        reason: format!("keytab {} not found", keytab.display()),
                    });
                }
                self.command(&self.kinit)
                    .arg("-k")
                    .arg("-t")
                    .arg(keytab)
                    .arg(&qualified)
                    .output()
                    .await
                    .map_err(spawn_error)
            }
            CredentialSource::Password(password) => {
                if password.is_empty() {
                    return Err(CredentialError::SourceUnavailable {
                        principal: principal.name.clone(),
                        reason: "empty password".to_string(),
                    });
                }
                let mut child = self
                    .command(&self.kinit)
                    .arg(&qualified)
                    .stdin(Stdio::piped())
                    .spawn()
                    .map_err(spawn_error)?;
                let mut stdin = child
                    .stdin
                    .take()
                    .ok_or_else(|| CredentialError::InternalError(anyhow::anyhow!("kinit stdin unavailable")))?;
                match stdin.write_all(format!("{password}\n").as_bytes()).await {
                    // kinit may exit before reading the prompt; its status decides
                    Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {}
                    Err(e) => return Err(CredentialError::InternalError(e.into())),
                    Ok(()) => {}
                }
                drop(stdin);
                child
                    .wait_with_output()
                    .await
                    .map_err(|e| CredentialError::InternalError(e.into()))
            }
        }
    }
}

impl CredentialController for KinitCredentialController {
    fn state(&self) -> &CredentialState {
        &self.state
    }

    async fn acquire(&mut self, principal: &Principal) -> Result<(), CredentialError> {
        self.release().await?;

        let output = self.kinit(principal).await?;
        if !output.status.success() {
            return Err(CredentialError::RejectedByService {
                principal: principal.name.clone(),
                reason: stderr_of(&output),
            });
        }

        tracing::debug!(principal = %principal, ccache = %self.ccache.display(), "ticket acquired");
        self.state = CredentialState::CredentialFor(principal.name.clone());
        Ok(())
    }

    async fn release(&mut self) -> Result<(), CredentialError> {
        self.destroy().await?;
        if let Some(previous) = self.state.holder() {
            tracing::debug!(principal = previous, "ticket released");
        }
        self.state = CredentialState::NoCredential;
        Ok(())
    }
}

fn stderr_of(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).trim().to_string()
}
