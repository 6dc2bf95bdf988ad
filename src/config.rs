use anyhow::{Context, Result, bail};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::region::Region;
use crate::util::strip_quotes;

/// API key and secret of an Amplitude project, sent as HTTP basic auth.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    api_key: String,
    secret: String,
}

impl Credentials {
    pub fn new(api_key: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            secret: secret.into(),
        }
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    pub(crate) fn secret(&self) -> &str {
        &self.secret
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &self.api_key)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Proxy URLs keyed by the scheme of the target URL.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProxyConfig {
    /// Proxy used for `http://` requests.
    pub http: Option<String>,
    /// Proxy used for `https://` requests.
    pub https: Option<String>,
}

impl ProxyConfig {
    pub fn is_empty(&self) -> bool {
        self.http.is_none() && self.https.is_none()
    }
}

/// Read timeout for a single request or body chunk.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(600);

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub credentials: Credentials,
    pub region: Region,
    pub proxy: ProxyConfig,
    /// Whether to verify TLS certificates.
    pub verify: bool,
    /// Applied to connecting and to every read of a response body.
    pub timeout: Duration,
}

impl ClientConfig {
    pub fn new(credentials: Credentials, region: Region) -> Self {
        Self {
            credentials,
            region,
            proxy: ProxyConfig::default(),
            verify: true,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

#[derive(Debug, Default)]
struct RcConfig {
    key: Option<String>,
    secret: Option<String>,
    region: Option<String>,
    http_proxy: Option<String>,
    https_proxy: Option<String>,
    verify: Option<bool>,
}

/// Resolves configuration from environment variables, then from the first rc file found.
///
/// Environment: `AMPLITUDE_API_KEY`, `AMPLITUDE_SECRET_KEY`, `AMPLITUDE_REGION`,
/// `AMPLITUDE_HTTP_PROXY`, `AMPLITUDE_HTTPS_PROXY`.
/// Files: `AMPLITUDE_RC`, or `.amplituderc` in the working directory then the home directory.
pub(crate) fn load_config() -> Result<ClientConfig> {
    load_config_with(|name| std::env::var(name).ok(), &rc_candidates())
}

fn load_config_with<F>(env: F, rc_candidates: &[PathBuf]) -> Result<ClientConfig>
where
    F: Fn(&str) -> Option<String>,
{
    let mut key = env("AMPLITUDE_API_KEY");
    let mut secret = env("AMPLITUDE_SECRET_KEY");
    let mut region = env("AMPLITUDE_REGION");
    let mut http_proxy = env("AMPLITUDE_HTTP_PROXY");
    let mut https_proxy = env("AMPLITUDE_HTTPS_PROXY");
    let mut verify: Option<bool> = None;

    for rc_path in rc_candidates {
        if rc_path.exists() {
            let cfg = read_rc(rc_path).with_context(|| {
                format!("failed to read configuration file {}", rc_path.display())
            })?;

            key = key.or(cfg.key);
            secret = secret.or(cfg.secret);
            region = region.or(cfg.region);
            http_proxy = http_proxy.or(cfg.http_proxy);
            https_proxy = https_proxy.or(cfg.https_proxy);
            verify = cfg.verify;
            break;
        }
    }

    let searched = || {
        if rc_candidates.is_empty() {
            "create .amplituderc".to_string()
        } else {
            format!(
                "or add it to one of: {}",
                rc_candidates
                    .iter()
                    .map(|p| p.display().to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            )
        }
    };

    let Some(key) = key else {
        bail!("Missing configuration: key (set AMPLITUDE_API_KEY {})", searched());
    };
    let Some(secret) = secret else {
        bail!(
            "Missing configuration: secret (set AMPLITUDE_SECRET_KEY {})",
            searched()
        );
    };

    let region = match region {
        Some(r) => r
            .parse::<Region>()
            .context("invalid AMPLITUDE_REGION / region setting")?,
        None => Region::default(),
    };

    let mut cfg = ClientConfig::new(Credentials::new(key, secret), region);
    cfg.proxy = ProxyConfig {
        http: http_proxy,
        https: https_proxy,
    };
    cfg.verify = verify.unwrap_or(true);
    Ok(cfg)
}

fn read_rc(path: &Path) -> Result<RcConfig> {
    let text = std::fs::read_to_string(path)?;
    Ok(parse_rc(&text))
}

fn parse_rc(text: &str) -> RcConfig {
    let mut cfg = RcConfig::default();

    for raw in text.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        // Proxy URLs contain ':' themselves, so only the first one separates key and value.
        let Some((k, v)) = line.split_once(':') else {
            continue;
        };
        let v = strip_quotes(v.trim());
        if v.is_empty() {
            continue;
        }
        match k.trim() {
            "key" | "api_key" => cfg.key = Some(v.to_string()),
            "secret" => cfg.secret = Some(v.to_string()),
            "region" => cfg.region = Some(v.to_string()),
            "http_proxy" => cfg.http_proxy = Some(v.to_string()),
            "https_proxy" => cfg.https_proxy = Some(v.to_string()),
            "verify" => cfg.verify = Some(v != "0" && !v.eq_ignore_ascii_case("false")),
            _ => {}
        }
    }

    cfg
}

fn rc_candidates() -> Vec<PathBuf> {
    if let Ok(p) = std::env::var("AMPLITUDE_RC") {
        return vec![PathBuf::from(p)];
    }

    let mut v = Vec::new();
    if let Ok(cwd) = std::env::current_dir() {
        v.push(cwd.join(".amplituderc"));
    }
    if let Some(home) = dirs::home_dir() {
        v.push(home.join(".amplituderc"));
    }
    v
}
