//! Credential data model and the on-disk credential cache.
//!
//! The orchestrator keeps a [`TokenCache`] in memory and serializes it to a
//! [`CacheBlob`] whenever a grant or renewal succeeds. [`CredentialStore`]
//! only ever sees the blob: it loads and saves it, optionally sealed with
//! AES-256-GCM (see [`CacheCipher`]), and never looks inside.
//!
//! # Layout
//!
//! ```text
//! CredentialOrchestrator ── TokenCache (account, user credential, app credential)
//!          │  to_blob / from_blob
//!          ▼
//!    CredentialStore ── CacheCipher (optional) ── token_cache.json
//! ```

use crate::storage::StorageError;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

mod encryption;
mod store;

pub use encryption::{decrypt, encrypt, validate_key, CacheCipher};
pub use store::CredentialStore;

/// The three supported OAuth2 grant flows.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantFlow {
    /// Authorization code with a loopback redirect
    #[default]
    Interactive,
    /// Device authorization grant (RFC 8628)
    Device,
    /// Client credential grant, no user involved
    #[serde(rename = "client_credentials", alias = "client_credential")]
    ClientCredential,
}

impl GrantFlow {
    pub fn as_str(&self) -> &'static str {
        match self {
            GrantFlow::Interactive => "interactive",
            GrantFlow::Device => "device",
            GrantFlow::ClientCredential => "client_credentials",
        }
    }

    /// Whether the flow signs in a user (and therefore yields an account).
    pub fn is_user_flow(&self) -> bool {
        !matches!(self, GrantFlow::ClientCredential)
    }
}

impl std::fmt::Display for GrantFlow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GrantFlow {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "interactive" | "browser" => Ok(GrantFlow::Interactive),
            "device" | "device_code" => Ok(GrantFlow::Device),
            "client_credentials" | "client_credential" | "client-credentials" => {
                Ok(GrantFlow::ClientCredential)
            }
            other => Err(format!(
                "unknown authentication method '{}' (expected interactive, device or client_credentials)",
                other
            )),
        }
    }
}

/// An access token plus everything needed to decide when to renew it.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct Credential {
    pub access_token: String,

    #[serde(default = "default_token_type")]
    pub token_type: String,

    /// Lifetime in seconds as reported by the provider
    #[serde(default)]
    pub expires_in: i64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ext_expires_in: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,

    #[serde(default)]
    pub scopes: Vec<String>,

    /// Absolute expiry, always `acquired_at + expires_in`
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,

    pub method: GrantFlow,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

impl Credential {
    /// A credential without an expiry counts as expired.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(at) => at <= now,
            None => true,
        }
    }

    /// True when the credential expires within `window` of `now`.
    pub fn needs_renewal(&self, now: DateTime<Utc>, window: Duration) -> bool {
        match self.expires_at {
            Some(at) => at <= now + window,
            None => true,
        }
    }
}

// Tokens never reach log output, only their presence
impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("token_type", &self.token_type)
            .field("expires_in", &self.expires_in)
            .field("has_refresh_token", &self.refresh_token.is_some())
            .field("has_id_token", &self.id_token.is_some())
            .field("scopes", &self.scopes)
            .field("expires_at", &self.expires_at)
            .field("method", &self.method)
            .finish()
    }
}

/// Profile of the signed-in user as returned by `GET /me`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub user_principal_name: Option<String>,
    #[serde(default)]
    pub given_name: Option<String>,
    #[serde(default)]
    pub surname: Option<String>,
    #[serde(default)]
    pub mail: Option<String>,
    #[serde(default)]
    pub mail_nickname: Option<String>,
    #[serde(default)]
    pub job_title: Option<String>,
    #[serde(default)]
    pub office_location: Option<String>,
    #[serde(default)]
    pub business_phones: Vec<String>,
    #[serde(default)]
    pub mobile_phone: Option<String>,
    #[serde(default)]
    pub preferred_language: Option<String>,
}

/// The signed-in principal. At most one per cache; never present for
/// client-credential sessions.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AccountRecord {
    /// Provider-issued account identifier (`<oid>.<tid>` when known)
    pub home_account_id: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub tenant_id: Option<String>,
    #[serde(default)]
    pub profile: Option<UserProfile>,
}

/// Claims read from an identity token. The signature is not verified; the
/// token came straight from the token endpoint over TLS.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct IdTokenClaims {
    #[serde(default)]
    pub oid: Option<String>,
    #[serde(default)]
    pub tid: Option<String>,
    #[serde(default)]
    pub sub: Option<String>,
    #[serde(default)]
    pub preferred_username: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

impl IdTokenClaims {
    /// `<oid>.<tid>` when both are present, else `sub`.
    pub fn account_id(&self) -> Option<String> {
        match (&self.oid, &self.tid) {
            (Some(oid), Some(tid)) => Some(format!("{}.{}", oid, tid)),
            _ => self.sub.clone(),
        }
    }
}

/// Decodes the payload segment of a JWT. Returns `None` for anything that
/// is not a three-part token with a JSON payload.
pub fn decode_id_token_claims(id_token: &str) -> Option<IdTokenClaims> {
    let mut parts = id_token.split('.');
    let (_header, payload, _signature) = (parts.next()?, parts.next()?, parts.next()?);
    if parts.next().is_some() {
        return None;
    }
    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    serde_json::from_slice(&bytes).ok()
}

/// Serialized credential cache, opaque to the store.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct CacheBlob(String);

impl CacheBlob {
    pub fn new(contents: impl Into<String>) -> Self {
        CacheBlob(contents.into())
    }

    pub fn empty() -> Self {
        CacheBlob(String::new())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }

    /// Semantically empty: blank, `null`, or an object with no keys.
    pub fn is_empty(&self) -> bool {
        let trimmed = self.0.trim();
        if trimmed.is_empty() || trimmed == "null" {
            return true;
        }
        matches!(
            serde_json::from_str::<serde_json::Value>(trimmed),
            Ok(serde_json::Value::Object(map)) if map.is_empty()
        )
    }
}

impl std::fmt::Debug for CacheBlob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "CacheBlob({} bytes)", self.0.len())
    }
}

/// In-memory working copy of the credential cache.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenCache {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account: Option<AccountRecord>,

    /// Credential issued to the signed-in user (interactive or device)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_credential: Option<Credential>,

    /// Credential issued to the application itself (client credential)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_credential: Option<Credential>,
}

impl TokenCache {
    pub fn is_empty(&self) -> bool {
        self.account.is_none() && self.user_credential.is_none() && self.app_credential.is_none()
    }

    /// Cached credential for the family `flow` belongs to.
    pub fn credential_for(&self, flow: GrantFlow) -> Option<&Credential> {
        if flow.is_user_flow() {
            self.user_credential.as_ref()
        } else {
            self.app_credential.as_ref()
        }
    }

    pub fn to_blob(&self) -> Result<CacheBlob, StorageError> {
        serde_json::to_string(self)
            .map(CacheBlob)
            .map_err(|e| StorageError::Corrupted {
                path: "credential cache".to_string(),
                reason: e.to_string(),
            })
    }

    pub fn from_blob(blob: &CacheBlob) -> Result<Self, StorageError> {
        if blob.is_empty() {
            return Ok(TokenCache::default());
        }
        serde_json::from_str(blob.as_str()).map_err(|e| StorageError::Corrupted {
            path: "credential cache".to_string(),
            reason: e.to_string(),
        })
    }
}
