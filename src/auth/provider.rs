//! HTTP client for the identity provider's OAuth2 endpoints.
//!
//! Endpoints live under `https://<provider-host>/<tenant>/oauth2/v2.0/`:
//! `authorize` (browser only), `token`, and `devicecode`. The profile lookup
//! goes to the mail API (`GET {api}/me`).

use super::AuthError;
use crate::config::Config;
use crate::credentials::{Credential, GrantFlow, UserProfile};
use chrono::{TimeDelta, Utc};
use reqwest::Client;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, warn};

/// Scopes added to every user flow so that refresh and identity tokens are
/// issued alongside the access token.
pub const RESERVED_SCOPES: &[&str] = &["offline_access", "openid", "profile"];

const DEVICE_CODE_GRANT: &str = "urn:ietf:params:oauth:grant-type:device_code";

/// Longest error body kept in [`AuthError::Http`]
const MAX_ERROR_BODY: usize = 512;

/// Standard OAuth2 token response
#[derive(Deserialize, Debug)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub ext_expires_in: Option<i64>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub id_token: Option<String>,
    /// Space-separated granted scopes
    #[serde(default)]
    pub scope: Option<String>,
}

impl TokenResponse {
    /// Converts the response into a [`Credential`], stamping the expiry
    /// relative to `acquired_at`. A lifetime that cannot be represented is
    /// [`AuthError::Malformed`].
    pub fn into_credential(
        self,
        method: GrantFlow,
        requested: &[String],
        acquired_at: chrono::DateTime<Utc>,
    ) -> Result<Credential, AuthError> {
        let expires_at = match self.expires_in {
            Some(seconds) => Some(
                TimeDelta::try_seconds(seconds)
                    .and_then(|lifetime| acquired_at.checked_add_signed(lifetime))
                    .ok_or_else(|| {
                        AuthError::Malformed(format!("expires_in out of range: {}", seconds))
                    })?,
            ),
            None => None,
        };

        let scopes = match self.scope {
            Some(scope) if !scope.trim().is_empty() => {
                scope.split_whitespace().map(str::to_string).collect()
            }
            _ => requested.to_vec(),
        };

        Ok(Credential {
            access_token: self.access_token,
            token_type: self.token_type.unwrap_or_else(|| "Bearer".to_string()),
            expires_in: self.expires_in.unwrap_or(0),
            ext_expires_in: self.ext_expires_in,
            refresh_token: self.refresh_token,
            id_token: self.id_token,
            scopes,
            expires_at,
            method,
        })
    }
}

/// Device authorization response (RFC 8628)
#[derive(Clone, Debug, Deserialize)]
pub struct DeviceCodeResponse {
    pub device_code: String,
    pub user_code: String,
    pub verification_uri: String,
    /// Seconds until `device_code` expires
    #[serde(default = "default_device_expiry")]
    pub expires_in: u64,
    /// Minimum seconds between token polls
    #[serde(default = "default_poll_interval")]
    pub interval: u64,
    /// Ready-made instructions for the user
    #[serde(default)]
    pub message: Option<String>,
}

fn default_device_expiry() -> u64 {
    900
}

fn default_poll_interval() -> u64 {
    5
}

impl DeviceCodeResponse {
    pub fn instructions(&self) -> String {
        match &self.message {
            Some(message) if !message.is_empty() => message.clone(),
            _ => format!(
                "To sign in, open {} and enter the code {}",
                self.verification_uri, self.user_code
            ),
        }
    }
}

#[derive(Deserialize)]
struct ProviderErrorBody {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

/// Client for the authorization server plus the profile endpoint.
pub struct IdentityProvider {
    http_client: Client,
    config: Arc<Config>,
}

impl IdentityProvider {
    pub fn new(config: Arc<Config>) -> Self {
        let http_client = Client::builder()
            .user_agent(concat!("mailsync/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            http_client,
            config,
        }
    }

    pub fn authorize_url(&self) -> String {
        format!("{}/oauth2/v2.0/authorize", self.config.authority_url())
    }

    pub fn token_url(&self) -> String {
        format!("{}/oauth2/v2.0/token", self.config.authority_url())
    }

    pub fn device_code_url(&self) -> String {
        format!("{}/oauth2/v2.0/devicecode", self.config.authority_url())
    }

    /// Configured scopes plus [`RESERVED_SCOPES`], without duplicates.
    pub fn user_scopes(&self) -> Vec<String> {
        let mut scopes = self.config.scopes.clone();
        for reserved in RESERVED_SCOPES {
            if !scopes.iter().any(|s| s.eq_ignore_ascii_case(reserved)) {
                scopes.push(reserved.to_string());
            }
        }
        scopes
    }

    /// Browser URL for the authorization-code flow. Forces the account picker.
    pub fn build_auth_url(&self, state: &str) -> String {
        let scopes = self.user_scopes().join(" ");
        format!(
            "{}?client_id={}&response_type=code&redirect_uri={}&response_mode=query&scope={}&state={}&prompt=select_account",
            self.authorize_url(),
            urlencoding::encode(&self.config.client_id),
            urlencoding::encode(&self.config.redirect_uri),
            urlencoding::encode(&scopes),
            urlencoding::encode(state)
        )
    }

    /// Redeems an authorization code.
    pub async fn exchange_code(&self, code: &str) -> Result<Credential, AuthError> {
        let scopes = self.user_scopes();
        let scope = scopes.join(" ");
        let form = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.config.redirect_uri.as_str()),
            ("scope", scope.as_str()),
        ];
        debug!("Exchanging authorization code for token");
        self.request_token(&form, GrantFlow::Interactive, &scopes)
            .await
    }

    /// Uses a refresh token to obtain a new credential for `method`.
    pub async fn refresh(
        &self,
        refresh_token: &str,
        method: GrantFlow,
    ) -> Result<Credential, AuthError> {
        let scopes = self.user_scopes();
        let scope = scopes.join(" ");
        let form = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("scope", scope.as_str()),
        ];
        debug!(flow = %method, "Refreshing credential");
        self.request_token(&form, method, &scopes).await
    }

    /// Client credential grant against the API's application-wide scope.
    pub async fn client_credentials(&self) -> Result<Credential, AuthError> {
        let scope = self.config.default_app_scope();
        let form = [
            ("grant_type", "client_credentials"),
            ("scope", scope.as_str()),
        ];
        debug!("Requesting client credential token");
        self.request_token(&form, GrantFlow::ClientCredential, &[scope.clone()])
            .await
    }

    /// Starts the device authorization grant.
    pub async fn request_device_code(&self) -> Result<DeviceCodeResponse, AuthError> {
        let scope = self.user_scopes().join(" ");
        let response = self
            .http_client
            .post(self.device_code_url())
            .header("Accept", "application/json")
            .form(&[
                ("client_id", self.config.client_id.as_str()),
                ("scope", scope.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if let Some(err) = provider_error(&body) {
            return Err(err);
        }
        if !status.is_success() {
            return Err(http_error(status, &body));
        }
        serde_json::from_str(&body)
            .map_err(|e| AuthError::Malformed(format!("device code response: {}", e)))
    }

    /// One token poll for a pending device code. `authorization_pending`
    /// and `slow_down` come back as [`AuthError::Provider`].
    pub async fn redeem_device_code(&self, device_code: &str) -> Result<Credential, AuthError> {
        let form = [("grant_type", DEVICE_CODE_GRANT), ("device_code", device_code)];
        self.request_token(&form, GrantFlow::Device, &self.user_scopes())
            .await
    }

    /// Profile of the signed-in user.
    ///
    /// A missing or unreadable profile is `Ok(None)`; only transport failures
    /// are errors.
    pub async fn fetch_profile(&self, access_token: &str) -> Result<Option<UserProfile>, AuthError> {
        let url = format!("{}/me", self.config.api_url());
        let response = self
            .http_client
            .get(&url)
            .bearer_auth(access_token)
            .header("Accept", "application/json")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            warn!(status = status.as_u16(), "Profile lookup returned an error status");
            return Ok(None);
        }

        match response.json::<UserProfile>().await {
            Ok(profile) => Ok(Some(profile)),
            Err(e) => {
                warn!(error = %e, "Profile response could not be decoded");
                Ok(None)
            }
        }
    }

    async fn request_token(
        &self,
        grant: &[(&str, &str)],
        method: GrantFlow,
        requested: &[String],
    ) -> Result<Credential, AuthError> {
        let mut form: Vec<(&str, &str)> = vec![
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
        ];
        form.extend_from_slice(grant);

        let acquired_at = Utc::now();
        let response = self
            .http_client
            .post(self.token_url())
            .header("Accept", "application/json")
            .form(&form)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if let Some(err) = provider_error(&body) {
            return Err(err);
        }
        if !status.is_success() {
            return Err(http_error(status, &body));
        }

        let token: TokenResponse = serde_json::from_str(&body)
            .map_err(|e| AuthError::Malformed(format!("token response: {}", e)))?;

        debug!(
            flow = %method,
            has_refresh_token = token.refresh_token.is_some(),
            expires_in = ?token.expires_in,
            "Token request successful"
        );
        token.into_credential(method, requested, acquired_at)
    }
}

fn provider_error(body: &str) -> Option<AuthError> {
    let parsed: ProviderErrorBody = serde_json::from_str(body).ok()?;
    Some(AuthError::Provider {
        code: parsed.error,
        description: parsed.error_description,
    })
}

fn http_error(status: reqwest::StatusCode, body: &str) -> AuthError {
    let mut body = body.trim().to_string();
    if body.len() > MAX_ERROR_BODY {
        let mut cut = MAX_ERROR_BODY;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
        body.push_str("...");
    }
    AuthError::Http {
        status: status.as_u16(),
        body,
    }
}
