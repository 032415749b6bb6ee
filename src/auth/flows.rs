//! The three grant flows as interchangeable strategies.
//!
//! Each strategy only acquires a [`Credential`]. Checking the cache first,
//! persisting the result and fetching the profile are shared steps done by
//! the orchestrator.

use super::loopback::{CallbackOutcome, LoopbackListener};
use super::{AuthError, IdentityProvider, UserPrompt};
use crate::config::Config;
use crate::credentials::{Credential, GrantFlow};
use async_trait::async_trait;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Extra delay added to the poll interval on every `slow_down` answer
const SLOW_DOWN_STEP: Duration = Duration::from_secs(5);

/// Everything a strategy may touch while acquiring a credential.
pub struct FlowContext<'a> {
    pub config: &'a Config,
    pub provider: &'a IdentityProvider,
    pub prompt: &'a dyn UserPrompt,
}

#[async_trait]
pub trait GrantStrategy: Send + Sync {
    fn flow(&self) -> GrantFlow;

    async fn acquire(&self, ctx: &FlowContext<'_>) -> Result<Credential, AuthError>;
}

/// Strategy implementing `flow`.
pub fn strategy_for(flow: GrantFlow) -> Box<dyn GrantStrategy> {
    match flow {
        GrantFlow::Interactive => Box::new(InteractiveGrant),
        GrantFlow::Device => Box::new(DeviceCodeGrant),
        GrantFlow::ClientCredential => Box::new(ClientCredentialGrant),
    }
}

/// Authorization code flow with a loopback redirect.
pub struct InteractiveGrant;

#[async_trait]
impl GrantStrategy for InteractiveGrant {
    fn flow(&self) -> GrantFlow {
        GrantFlow::Interactive
    }

    async fn acquire(&self, ctx: &FlowContext<'_>) -> Result<Credential, AuthError> {
        let state = Uuid::new_v4().to_string();
        let timeout = ctx.config.auth_timeout();

        // Listen before the browser can possibly redirect
        let listener =
            LoopbackListener::bind(ctx.config.listener_port(), &ctx.config.callback_path()).await?;

        let auth_url = ctx.provider.build_auth_url(&state);
        info!(
            port = listener.port(),
            timeout_secs = timeout.as_secs(),
            "Waiting for browser sign-in"
        );
        if let Err(e) = ctx.prompt.open_url(&auth_url) {
            warn!(error = %e, url = %auth_url, "Could not open a browser; visit the URL manually");
        }

        match listener.wait(timeout).await {
            CallbackOutcome::Code {
                code,
                state: returned,
            } => {
                if returned.as_deref() != Some(state.as_str()) {
                    warn!("Callback state does not match the authorization request");
                    return Err(AuthError::StateMismatch);
                }
                ctx.provider.exchange_code(&code).await
            }
            CallbackOutcome::Denied { error, description } => {
                Err(AuthError::CallbackDenied { error, description })
            }
            CallbackOutcome::TimedOut => Err(AuthError::Timeout(format!(
                "no authorization code received within {} seconds",
                timeout.as_secs()
            ))),
        }
    }
}

/// Device authorization grant: show a code, poll until the user finishes.
pub struct DeviceCodeGrant;

#[async_trait]
impl GrantStrategy for DeviceCodeGrant {
    fn flow(&self) -> GrantFlow {
        GrantFlow::Device
    }

    async fn acquire(&self, ctx: &FlowContext<'_>) -> Result<Credential, AuthError> {
        let device = ctx.provider.request_device_code().await?;
        ctx.prompt.show_device_code(&device);

        let deadline = Instant::now()
            .checked_add(Duration::from_secs(device.expires_in))
            .ok_or_else(|| {
                AuthError::Malformed(format!(
                    "device code expires_in out of range: {}",
                    device.expires_in
                ))
            })?;
        let mut interval = Duration::from_secs(device.interval.max(1));
        debug!(
            expires_in = device.expires_in,
            interval_secs = interval.as_secs(),
            "Polling for device code completion"
        );

        loop {
            tokio::time::sleep(interval).await;

            if Instant::now() >= deadline {
                return Err(AuthError::Timeout(
                    "device code expired before sign-in completed".to_string(),
                ));
            }

            match ctx.provider.redeem_device_code(&device.device_code).await {
                Ok(credential) => return Ok(credential),
                Err(AuthError::Provider { code, .. }) if code == "authorization_pending" => {
                    continue;
                }
                Err(AuthError::Provider { code, .. }) if code == "slow_down" => {
                    interval += SLOW_DOWN_STEP;
                    debug!(interval_secs = interval.as_secs(), "Provider asked to slow down");
                }
                // expired_token, access_denied and anything else end the flow as-is
                Err(e) => return Err(e),
            }
        }
    }
}

/// Client credential grant for unattended use. Never yields a profile.
pub struct ClientCredentialGrant;

#[async_trait]
impl GrantStrategy for ClientCredentialGrant {
    fn flow(&self) -> GrantFlow {
        GrantFlow::ClientCredential
    }

    async fn acquire(&self, ctx: &FlowContext<'_>) -> Result<Credential, AuthError> {
        ctx.provider.client_credentials().await
    }
}
