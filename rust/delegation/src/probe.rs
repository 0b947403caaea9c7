use crate::{credential::CredentialState, matrix::Endpoint};
use serde::{Deserialize, Serialize};
use std::{
    fmt::Display,
    path::PathBuf,
    process::Stdio,
    time::Duration,
};
use tokio::process::Command;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthMode {
    None,
    Negotiate,
    Basic { user: String, password: String },
}

impl Display for AuthMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthMode::None => write!(f, "no auth"),
            AuthMode::Negotiate => write!(f, "negotiate"),
            AuthMode::Basic { user, .. } => write!(f, "basic as {user}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProbeResult {
    pub status: u16,
    pub body: String,
}

impl ProbeResult {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// Status `0` stands for any failure to get an HTTP response at all.
    pub fn transport_failure() -> Self {
        Self::default()
    }

    pub fn is_transport_failure(&self) -> bool {
        self.status == 0
    }
}

pub trait Probe {
    /// Transport errors are folded into [`ProbeResult::transport_failure`].
    fn request(
        &self,
        endpoint: Endpoint,
        mode: &AuthMode,
        credential: &CredentialState,
    ) -> impl std::future::Future<Output = ProbeResult>;
}

/// Probes the front end over HTTP.
///
/// Anonymous and basic requests go through `reqwest`. Negotiate requests are
/// handed to `curl --negotiate`, which drives the SPNEGO exchange with the
/// system GSSAPI library against the ticket cache given in `ccache_name`.
pub struct HttpProbe {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
    ccache_name: String,
    krb5_config: Option<PathBuf>,
    curl: String,
}

impl HttpProbe {
    pub fn new(base_url: impl Into<String>, timeout: Duration, ccache_name: impl Into<String>) -> reqwest::Result<Self> {
        // curl is run without --location, both paths report the first answer
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            timeout,
            ccache_name: ccache_name.into(),
            krb5_config: None,
            curl: "curl".to_string(),
        })
    }

    pub fn with_curl(mut self, program: impl Into<String>) -> Self {
        self.curl = program.into();
        self
    }

    /// Realm configuration for the GSSAPI library curl loads, the one `kinit` used.
    pub fn with_krb5_config(mut self, path: impl Into<PathBuf>) -> Self {
        self.krb5_config = Some(path.into());
        self
    }

    pub fn url(&self, endpoint: Endpoint) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            endpoint.path().trim_start_matches('/')
        )
    }

    async fn plain_request(&self, url: &str, mode: &AuthMode) -> reqwest::Result<ProbeResult> {
        let mut request = self.client.get(url);
        if let AuthMode::Basic { user, password } = mode {
            request = request.basic_auth(user, Some(password));
        }

        let response = request.send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        Ok(ProbeResult { status, body })
    }

    async fn negotiate_request(&self, url: &str) -> anyhow::Result<ProbeResult> {
        let mut cmd = Command::new(&self.curl);
        cmd.args(["--silent", "--show-error", "--negotiate", "--user", ":"])
            .arg("--max-time")
            .arg(self.timeout.as_secs().max(1).to_string())
            .args(["--output", "-", "--write-out", "\n%{http_code}"])
            .arg(url)
            .env("KRB5CCNAME", &self.ccache_name)
            .stdin(Stdio::null())
            .kill_on_drop(true);
        if let Some(config) = &self.krb5_config {
            cmd.env("KRB5_CONFIG", config);
        }

        // curl enforces --max-time itself; this only guards against a wedged child.
        let output = tokio::time::timeout(self.timeout + Duration::from_secs(5), cmd.output()).await??;
        if !output.status.success() {
            anyhow::bail!("curl failed: {}", String::from_utf8_lossy(&output.stderr).trim());
        }
        parse_curl_output(&String::from_utf8_lossy(&output.stdout))
    }
}

impl Probe for HttpProbe {
    async fn request(&self, endpoint: Endpoint, mode: &AuthMode, credential: &CredentialState) -> ProbeResult {
        let url = self.url(endpoint);
        let result = match mode {
            AuthMode::Negotiate => self.negotiate_request(&url).await,
            _ => self.plain_request(&url, mode).await.map_err(anyhow::Error::from),
        };

        match result {
            Ok(result) => {
                tracing::debug!(%url, %mode, %credential, status = result.status, "probe completed");
                result
            }
            Err(e) => {
                let error = format!("{e:#}");
                tracing::warn!(%url, %mode, %credential, %error, "probe transport failure");
                ProbeResult::transport_failure()
            }
        }
    }
}

/// Splits `<body>\n<http_code>` as produced by `--write-out "\n%{http_code}"`.
fn parse_curl_output(stdout: &str) -> anyhow::Result<ProbeResult> {
    let Some((body, code)) = stdout.rsplit_once('\n') else {
        anyhow::bail!("curl output carries no status line");
    };
    let status = code.trim().parse::<u16>()?;
    Ok(ProbeResult::new(status, body))
}
