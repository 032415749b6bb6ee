//! Credential lifecycle: acquisition, caching, silent renewal, sign-out.
//!
//! [`CredentialOrchestrator`] is the only entry point callers need. It picks
//! a [`GrantStrategy`] for the requested [`GrantFlow`], persists results
//! through the [`CredentialStore`](crate::credentials::CredentialStore), and
//! hands access tokens to the sync gateway through [`AccessTokenSource`].

use crate::credentials::{Credential, GrantFlow, UserProfile};
use crate::storage::StorageError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

mod flows;
mod loopback;
mod orchestrator;
mod prompt;
mod provider;

#[cfg(test)]
mod tests;

pub use flows::{
    strategy_for, ClientCredentialGrant, DeviceCodeGrant, FlowContext, GrantStrategy,
    InteractiveGrant,
};
pub use loopback::{callback_router, CallbackOutcome, LoopbackListener};
pub use orchestrator::CredentialOrchestrator;
pub use prompt::{SystemPrompt, UserPrompt};
pub use provider::{DeviceCodeResponse, IdentityProvider, TokenResponse, RESERVED_SCOPES};

/// Read-only projection of the current session.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct AuthStatus {
    pub is_authenticated: bool,
    pub user: Option<UserProfile>,
    pub scopes: Vec<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub method: Option<GrantFlow>,
}

impl AuthStatus {
    pub fn unauthenticated() -> Self {
        Self::default()
    }

    pub fn authenticated(credential: &Credential, user: Option<UserProfile>) -> Self {
        Self {
            is_authenticated: true,
            user,
            scopes: credential.scopes.clone(),
            expires_at: credential.expires_at,
            method: Some(credential.method),
        }
    }
}

/// Outcome of an `authenticate*` call. Failures carry a readable message,
/// never a raw provider error object.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AuthResult {
    pub success: bool,
    pub status: AuthStatus,
    pub error_message: Option<String>,
}

impl AuthResult {
    pub fn ok(status: AuthStatus) -> Self {
        Self {
            success: true,
            status,
            error_message: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            status: AuthStatus::unauthenticated(),
            error_message: Some(message.into()),
        }
    }
}

/// Orchestrator state machine.
#[derive(Clone, Debug, PartialEq)]
pub enum AuthState {
    NoCredential,
    Authenticating(GrantFlow),
    Authenticated(GrantFlow),
    Failed(String),
}

impl std::fmt::Display for AuthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthState::NoCredential => write!(f, "no credential"),
            AuthState::Authenticating(flow) => write!(f, "authenticating ({})", flow),
            AuthState::Authenticated(flow) => write!(f, "authenticated ({})", flow),
            AuthState::Failed(msg) => write!(f, "failed: {}", msg),
        }
    }
}

/// Grant flow failures
#[derive(Debug, Clone, PartialEq)]
pub enum AuthError {
    /// The identity provider answered with an OAuth error payload
    Provider {
        code: String,
        description: Option<String>,
    },
    /// Non-success status without a recognizable error payload
    Http { status: u16, body: String },
    /// The request never got a response
    Transport(String),
    /// A response could not be decoded
    Malformed(String),
    /// A deadline elapsed before the user finished signing in
    Timeout(String),
    /// The browser redirect carried an error instead of a code
    CallbackDenied {
        error: String,
        description: Option<String>,
    },
    /// The redirect's `state` did not match the request
    StateMismatch,
    /// The loopback listener could not be started
    Listener(String),
    Storage(StorageError),
}

impl std::fmt::Display for AuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthError::Provider {
                code,
                description: Some(description),
            } => write!(f, "{} ({})", description, code),
            AuthError::Provider {
                code,
                description: None,
            } => write!(f, "Identity provider returned error: {}", code),
            AuthError::Http { status, body } => {
                write!(f, "Token request failed with status {}: {}", status, body)
            }
            AuthError::Transport(msg) => write!(f, "Request to identity provider failed: {}", msg),
            AuthError::Malformed(msg) => write!(f, "Malformed response: {}", msg),
            AuthError::Timeout(msg) => write!(f, "Authentication timed out: {}", msg),
            AuthError::CallbackDenied {
                error,
                description: Some(description),
            } => write!(f, "Authorization was denied: {} ({})", description, error),
            AuthError::CallbackDenied {
                error,
                description: None,
            } => write!(f, "Authorization was denied: {}", error),
            AuthError::StateMismatch => {
                write!(f, "Authorization response state does not match the request")
            }
            AuthError::Listener(msg) => write!(f, "Callback listener error: {}", msg),
            AuthError::Storage(e) => write!(f, "Credential cache error: {}", e),
        }
    }
}

impl std::error::Error for AuthError {}

impl From<StorageError> for AuthError {
    fn from(e: StorageError) -> Self {
        AuthError::Storage(e)
    }
}

impl From<reqwest::Error> for AuthError {
    fn from(e: reqwest::Error) -> Self {
        AuthError::Transport(e.to_string())
    }
}

/// Supplies bearer tokens to API clients.
#[async_trait]
pub trait AccessTokenSource: Send + Sync {
    /// A usable access token, or `None` when the caller must authenticate.
    async fn access_token(&self) -> Option<String>;
}

/// Fixed token, for tests and for callers that manage tokens themselves.
pub struct StaticToken(pub String);

#[async_trait]
impl AccessTokenSource for StaticToken {
    async fn access_token(&self) -> Option<String> {
        Some(self.0.clone())
    }
}
