//! Process configuration.
//!
//! A [`Config`] is built once at startup (from the environment or a TOML file)
//! and shared by reference with the credential orchestrator and the sync
//! gateway. Nothing in the crate reads the environment after that point.

use crate::credentials::GrantFlow;
use reqwest::Url;
use serde::Deserialize;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;


/// Scopes requested when `SCOPES` is not set.
pub const DEFAULT_SCOPES: &[&str] = &["Mail.Read", "Mail.ReadWrite", "Mail.Send", "User.Read"];

/// Upper bound for `RENEWAL_WINDOW_MINUTES` (one week)
pub const MAX_RENEWAL_WINDOW_MINUTES: i64 = 7 * 24 * 60;

/// Complete mailsync configuration
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Application (client) id registered with the identity provider
    #[serde(default)]
    pub client_id: String,

    /// Client secret for the confidential client
    #[serde(default)]
    pub client_secret: String,

    /// Tenant segment of the authority URL
    #[serde(default = "default_tenant_id")]
    pub tenant_id: String,

    /// Redirect URI registered for the interactive flow
    #[serde(default = "default_redirect_uri")]
    pub redirect_uri: String,

    /// Listener port used when the redirect URI carries no explicit port
    #[serde(default = "default_auth_port")]
    pub auth_port: u16,

    /// Delegated scopes requested by the user flows
    #[serde(default = "default_scopes")]
    pub scopes: Vec<String>,

    /// Location of the serialized credential cache
    #[serde(default = "default_token_cache_file")]
    pub token_cache_file: PathBuf,

    /// Location of the resource -> cursor table
    #[serde(default = "default_cursor_file")]
    pub cursor_file: PathBuf,

    /// Flow used when the caller does not pick one
    #[serde(default)]
    pub default_auth_method: GrantFlow,

    /// Identity provider host, e.g. `https://login.microsoftonline.com`
    #[serde(default = "default_authority_host")]
    pub authority_host: String,

    /// Mail API host, e.g. `https://graph.microsoft.com`
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    /// Mail API version segment
    #[serde(default = "default_api_version")]
    pub api_version: String,

    /// Credentials expiring within this window are renewed before use
    #[serde(default = "default_renewal_window_minutes")]
    pub renewal_window_minutes: i64,

    /// How long the interactive flow waits for the browser redirect
    #[serde(default = "default_auth_timeout_seconds")]
    pub auth_timeout_seconds: u64,

    /// Optional base64 32-byte key; enables encryption of the credential cache
    #[serde(default)]
    pub token_cache_key: Option<String>,
}

fn default_tenant_id() -> String {
    "common".to_string()
}

fn default_redirect_uri() -> String {
    "http://localhost:8000".to_string()
}

fn default_auth_port() -> u16 {
    5000
}

fn default_scopes() -> Vec<String> {
    DEFAULT_SCOPES.iter().map(|s| s.to_string()).collect()
}

fn default_token_cache_file() -> PathBuf {
    PathBuf::from(".mailsync/token_cache.json")
}

fn default_cursor_file() -> PathBuf {
    PathBuf::from(".mailsync/delta_links.json")
}

fn default_authority_host() -> String {
    "https://login.microsoftonline.com".to_string()
}

fn default_api_base_url() -> String {
    "https://graph.microsoft.com".to_string()
}

fn default_api_version() -> String {
    "v1.0".to_string()
}

fn default_renewal_window_minutes() -> i64 {
    30
}

fn default_auth_timeout_seconds() -> u64 {
    300
}

impl Default for Config {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            tenant_id: default_tenant_id(),
            redirect_uri: default_redirect_uri(),
            auth_port: default_auth_port(),
            scopes: default_scopes(),
            token_cache_file: default_token_cache_file(),
            cursor_file: default_cursor_file(),
            default_auth_method: GrantFlow::default(),
            authority_host: default_authority_host(),
            api_base_url: default_api_base_url(),
            api_version: default_api_version(),
            renewal_window_minutes: default_renewal_window_minutes(),
            auth_timeout_seconds: default_auth_timeout_seconds(),
            token_cache_key: None,
        }
    }
}

impl Config {
    /// Builds the configuration from process environment variables and
    /// validates it.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup.
    ///
    /// Blank values are treated as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let mut config = Config::default();

        if let Some(v) = get("CLIENT_ID") {
            config.client_id = v;
        }
        if let Some(v) = get("CLIENT_SECRET") {
            config.client_secret = v;
        }
        if let Some(v) = get("TENANT_ID") {
            config.tenant_id = v;
        }
        if let Some(v) = get("REDIRECT_URI") {
            config.redirect_uri = v;
        }
        if let Some(v) = get("AUTH_PORT") {
            config.auth_port = parse_value("AUTH_PORT", &v)?;
        }
        if let Some(v) = get("SCOPES") {
            config.scopes = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(v) = get("TOKEN_CACHE_FILE") {
            config.token_cache_file = PathBuf::from(v);
        }
        if let Some(v) = get("DELTA_LINK_FILE") {
            config.cursor_file = PathBuf::from(v);
        }
        if let Some(v) = get("DEFAULT_AUTH_METHOD") {
            config.default_auth_method = GrantFlow::from_str(&v).map_err(|reason| {
                ConfigError::Invalid {
                    key: "DEFAULT_AUTH_METHOD",
                    reason,
                }
            })?;
        }
        if let Some(v) = get("AUTHORITY_HOST") {
            config.authority_host = v;
        }
        if let Some(v) = get("API_BASE_URL") {
            config.api_base_url = v;
        }
        if let Some(v) = get("API_VERSION") {
            config.api_version = v;
        }
        if let Some(v) = get("RENEWAL_WINDOW_MINUTES") {
            config.renewal_window_minutes = parse_value("RENEWAL_WINDOW_MINUTES", &v)?;
        }
        if let Some(v) = get("AUTH_TIMEOUT_SECONDS") {
            config.auth_timeout_seconds = parse_value("AUTH_TIMEOUT_SECONDS", &v)?;
        }
        config.token_cache_key = get("TOKEN_CACHE_KEY");

        config.validate()?;
        Ok(config)
    }

    /// Checks that every required identity setting is present and that the
    /// redirect URI is usable. All missing keys are reported together.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut missing = Vec::new();
        if self.client_id.is_empty() {
            missing.push("CLIENT_ID");
        }
        if self.client_secret.is_empty() {
            missing.push("CLIENT_SECRET");
        }
        if self.tenant_id.is_empty() {
            missing.push("TENANT_ID");
        }
        if self.redirect_uri.is_empty() {
            missing.push("REDIRECT_URI");
        }
        if !missing.is_empty() {
            return Err(ConfigError::Missing(missing));
        }

        let uri = Url::parse(&self.redirect_uri).map_err(|e| ConfigError::Invalid {
            key: "REDIRECT_URI",
            reason: e.to_string(),
        })?;
        if uri.host_str().is_none() {
            return Err(ConfigError::Invalid {
                key: "REDIRECT_URI",
                reason: "redirect URI has no host".to_string(),
            });
        }

        if !(0..=MAX_RENEWAL_WINDOW_MINUTES).contains(&self.renewal_window_minutes) {
            return Err(ConfigError::Invalid {
                key: "RENEWAL_WINDOW_MINUTES",
                reason: format!(
                    "{} is outside 0..={}",
                    self.renewal_window_minutes, MAX_RENEWAL_WINDOW_MINUTES
                ),
            });
        }
        Ok(())
    }

    /// Port the loopback listener binds: the redirect URI's explicit port,
    /// falling back to `auth_port`.
    pub fn listener_port(&self) -> u16 {
        Url::parse(&self.redirect_uri)
            .ok()
            .and_then(|u| u.port())
            .unwrap_or(self.auth_port)
    }

    /// Path the loopback listener serves (`/` when the redirect URI has none).
    pub fn callback_path(&self) -> String {
        Url::parse(&self.redirect_uri)
            .map(|u| u.path().to_string())
            .ok()
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| "/".to_string())
    }

    /// `https://<provider-host>/<tenant>`
    pub fn authority_url(&self) -> String {
        format!(
            "{}/{}",
            self.authority_host.trim_end_matches('/'),
            self.tenant_id
        )
    }

    /// Versioned mail API root, e.g. `https://graph.microsoft.com/v1.0`
    pub fn api_url(&self) -> String {
        format!(
            "{}/{}",
            self.api_base_url.trim_end_matches('/'),
            self.api_version
        )
    }

    /// Application-wide scope used by the client-credential grant.
    pub fn default_app_scope(&self) -> String {
        format!("{}/.default", self.api_base_url.trim_end_matches('/'))
    }

    /// Clamped to `0..=MAX_RENEWAL_WINDOW_MINUTES` for configs built without
    /// [`validate`](Self::validate).
    pub fn renewal_window(&self) -> chrono::Duration {
        let minutes = self
            .renewal_window_minutes
            .clamp(0, MAX_RENEWAL_WINDOW_MINUTES);
        chrono::Duration::try_minutes(minutes).unwrap_or_else(chrono::Duration::zero)
    }

    pub fn auth_timeout(&self) -> Duration {
        Duration::from_secs(self.auth_timeout_seconds)
    }
}

fn parse_value<T: FromStr>(key: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    raw.parse::<T>().map_err(|e| ConfigError::Invalid {
        key,
        reason: format!("'{}': {}", raw, e),
    })
}

/// Load configuration from TOML file
pub fn load_config(path: &str) -> anyhow::Result<Config> {
    use anyhow::Context;

    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path))?;
    let config: Config = toml::from_str(&contents).context("Failed to parse config file")?;
    config.validate()?;
    Ok(config)
}

/// Configuration errors. Fatal at startup, never retried.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// Required settings that were absent
    Missing(Vec<&'static str>),
    /// A setting was present but unusable
    Invalid { key: &'static str, reason: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Missing(keys) => write!(
                f,
                "Required configuration is missing: {}",
                keys.join(", ")
            ),
            ConfigError::Invalid { key, reason } => {
                write!(f, "Invalid value for {}: {}", key, reason)
            }
        }
    }
}

impl std::error::Error for ConfigError {}
