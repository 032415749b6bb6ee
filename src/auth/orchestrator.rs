use super::flows::{strategy_for, ClientCredentialGrant, FlowContext, GrantStrategy};
use super::{
    AccessTokenSource, AuthError, AuthResult, AuthState, AuthStatus, IdentityProvider,
    SystemPrompt, UserPrompt,
};
use crate::config::Config;
use crate::credentials::{
    decode_id_token_claims, AccountRecord, CacheCipher, Credential, CredentialStore, GrantFlow,
    TokenCache, UserProfile,
};
use crate::storage::StorageError;
use async_trait::async_trait;
use chrono::Utc;
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Owns the credential lifecycle for one process.
///
/// The in-memory [`TokenCache`] is the working copy; it is written back to
/// the [`CredentialStore`] after every successful grant or renewal.
pub struct CredentialOrchestrator {
    config: Arc<Config>,
    store: CredentialStore,
    cache: Mutex<TokenCache>,
    provider: IdentityProvider,
    prompt: Arc<dyn UserPrompt>,
    state: Mutex<AuthState>,
}

impl CredentialOrchestrator {
    /// Loads the persisted cache. A corrupted cache is an error; it is never
    /// silently replaced.
    pub fn new(
        config: Arc<Config>,
        store: CredentialStore,
        prompt: Arc<dyn UserPrompt>,
    ) -> Result<Self, StorageError> {
        let cache = TokenCache::from_blob(&store.load()?)?;
        let state = match (&cache.user_credential, &cache.app_credential) {
            (Some(credential), _) | (None, Some(credential)) => {
                AuthState::Authenticated(credential.method)
            }
            (None, None) => AuthState::NoCredential,
        };
        debug!(
            has_account = cache.account.is_some(),
            encrypted = store.is_encrypted(),
            state = %state,
            "Credential cache loaded"
        );

        Ok(Self {
            provider: IdentityProvider::new(config.clone()),
            config,
            store,
            cache: Mutex::new(cache),
            prompt,
            state: Mutex::new(state),
        })
    }

    /// File-backed orchestrator using the system browser and stdout.
    pub fn from_config(config: Arc<Config>) -> Result<Self, StorageError> {
        let cipher = config
            .token_cache_key
            .as_deref()
            .map(CacheCipher::from_base64)
            .transpose()?;
        let store = CredentialStore::open(&config.token_cache_file, cipher);
        Self::new(config, store, Arc::new(SystemPrompt))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn state(&self) -> AuthState {
        self.state.lock().unwrap().clone()
    }

    fn set_state(&self, state: AuthState) {
        *self.state.lock().unwrap() = state;
    }

    /// Runs `flow`, unless the cached credential for that flow family is
    /// still outside the renewal window. Never returns an error: failures
    /// come back as a failed [`AuthResult`].
    pub async fn authenticate(&self, flow: GrantFlow) -> AuthResult {
        if let Some(status) = self.fresh_status(flow) {
            debug!(flow = %flow, "Cached credential still fresh, skipping grant");
            return AuthResult::ok(status);
        }

        self.set_state(AuthState::Authenticating(flow));
        info!(flow = %flow, "Starting authentication");

        let strategy = strategy_for(flow);
        match self.run_grant(strategy.as_ref()).await {
            Ok(status) => {
                self.set_state(AuthState::Authenticated(flow));
                info!(flow = %flow, expires_at = ?status.expires_at, "Authentication complete");
                AuthResult::ok(status)
            }
            Err(e) => {
                error!(flow = %flow, error = %e, "Authentication failed");
                let message = e.to_string();
                self.set_state(AuthState::Failed(message.clone()));
                AuthResult::failed(message)
            }
        }
    }

    pub async fn authenticate_interactive(&self) -> AuthResult {
        self.authenticate(GrantFlow::Interactive).await
    }

    pub async fn authenticate_device(&self) -> AuthResult {
        self.authenticate(GrantFlow::Device).await
    }

    pub async fn authenticate_client_credentials(&self) -> AuthResult {
        self.authenticate(GrantFlow::ClientCredential).await
    }

    fn fresh_status(&self, flow: GrantFlow) -> Option<AuthStatus> {
        let now = Utc::now();
        let cache = self.cache.lock().unwrap();
        let credential = cache
            .credential_for(flow)
            .filter(|c| !c.needs_renewal(now, self.config.renewal_window()))?;

        let profile = if flow.is_user_flow() {
            cache.account.as_ref().and_then(|a| a.profile.clone())
        } else {
            None
        };
        Some(AuthStatus::authenticated(credential, profile))
    }

    async fn run_grant(&self, strategy: &dyn GrantStrategy) -> Result<AuthStatus, AuthError> {
        let ctx = FlowContext {
            config: &self.config,
            provider: &self.provider,
            prompt: self.prompt.as_ref(),
        };
        let credential = strategy.acquire(&ctx).await?;

        if !strategy.flow().is_user_flow() {
            let status = AuthStatus::authenticated(&credential, None);
            self.update_cache(|cache| cache.app_credential = Some(credential))?;
            return Ok(status);
        }

        let profile = self.provider.fetch_profile(&credential.access_token).await?;
        if profile.is_none() {
            warn!("Signed in without a user profile");
        }

        let account = account_for(&credential, profile.clone());
        info!(account = %account.home_account_id, "Account signed in");
        let status = AuthStatus::authenticated(&credential, profile);
        self.update_cache(|cache| {
            cache.account = Some(account);
            cache.user_credential = Some(credential);
        })?;
        Ok(status)
    }

    /// Persists the working copy with `change` applied, then commits it in
    /// memory. On a storage error the working copy is left as it was.
    fn update_cache<F>(&self, change: F) -> Result<(), StorageError>
    where
        F: FnOnce(&mut TokenCache),
    {
        let mut next = self.cache.lock().unwrap().clone();
        change(&mut next);
        self.store.save(&next.to_blob()?)?;
        *self.cache.lock().unwrap() = next;
        Ok(())
    }

    /// Commits `change` in memory, then persists it. A storage error is only
    /// logged; the in-memory copy keeps a rotated refresh token usable.
    fn remember<F>(&self, change: F, what: &str)
    where
        F: FnOnce(&mut TokenCache),
    {
        let blob = {
            let mut cache = self.cache.lock().unwrap();
            change(&mut cache);
            cache.to_blob()
        };
        if let Err(e) = blob.and_then(|blob| self.store.save(&blob)) {
            warn!(error = %e, "{} could not be persisted", what);
        }
    }

    /// Silent acquisition for the cached account.
    ///
    /// Returns the cached credential while it is outside the renewal window,
    /// otherwise renews it with the refresh token. `None` means there is no
    /// account or renewal failed; the caller must run an explicit flow.
    pub async fn get_credential(&self) -> Option<Credential> {
        let credential = {
            let cache = self.cache.lock().unwrap();
            cache.account.as_ref()?;
            cache.user_credential.clone()?
        };

        if !credential.needs_renewal(Utc::now(), self.config.renewal_window()) {
            return Some(credential);
        }

        let Some(refresh_token) = credential.refresh_token.clone() else {
            debug!("Credential is expiring and has no refresh token");
            return None;
        };

        let method = credential.method;
        self.set_state(AuthState::Authenticating(method));
        match self.provider.refresh(&refresh_token, method).await {
            Ok(mut renewed) => {
                // Providers may not rotate the refresh token
                if renewed.refresh_token.is_none() {
                    renewed.refresh_token = Some(refresh_token);
                }
                if renewed.id_token.is_none() {
                    renewed.id_token = credential.id_token.clone();
                }

                let result = renewed.clone();
                self.remember(
                    |cache| cache.user_credential = Some(renewed),
                    "Renewed credential",
                );
                self.set_state(AuthState::Authenticated(method));
                info!(flow = %method, expires_at = ?result.expires_at, "Credential renewed");
                Some(result)
            }
            Err(e) => {
                warn!(flow = %method, error = %e, "Silent renewal failed");
                self.set_state(AuthState::Failed(e.to_string()));
                None
            }
        }
    }

    /// True when an account is cached, or, without one, when a client
    /// credential is cached and unexpired or can be obtained right now.
    pub async fn is_authenticated(&self) -> bool {
        {
            let cache = self.cache.lock().unwrap();
            if cache.account.is_some() {
                return true;
            }
            if let Some(app) = &cache.app_credential {
                if !app.is_expired(Utc::now()) {
                    return true;
                }
            }
        }

        let ctx = FlowContext {
            config: &self.config,
            provider: &self.provider,
            prompt: self.prompt.as_ref(),
        };
        match ClientCredentialGrant.acquire(&ctx).await {
            Ok(credential) => {
                self.remember(
                    |cache| cache.app_credential = Some(credential),
                    "Client credential",
                );
                self.set_state(AuthState::Authenticated(GrantFlow::ClientCredential));
                true
            }
            Err(e) => {
                debug!(error = %e, "No client credential available");
                false
            }
        }
    }

    /// Forgets every cached account and deletes the cache file. Returns
    /// `false` only when the file could not be removed.
    pub fn logout(&self) -> bool {
        let had_account = {
            let mut cache = self.cache.lock().unwrap();
            let had_account = cache.account.is_some();
            *cache = TokenCache::default();
            had_account
        };
        self.set_state(AuthState::NoCredential);

        match self.store.clear() {
            Ok(removed) => {
                info!(had_account, cache_removed = removed, "Signed out");
                true
            }
            Err(e) => {
                error!(error = %e, "Failed to delete credential cache");
                false
            }
        }
    }

    /// Current status, renewing the user credential first if needed.
    pub async fn auth_status(&self) -> AuthStatus {
        if let Some(credential) = self.get_credential().await {
            let profile = self.cached_profile();
            return AuthStatus::authenticated(&credential, profile);
        }

        let cache = self.cache.lock().unwrap();
        match &cache.app_credential {
            Some(app) if !app.is_expired(Utc::now()) => AuthStatus::authenticated(app, None),
            _ => AuthStatus::unauthenticated(),
        }
    }

    /// Profile of the signed-in user, fetched and cached on first use.
    pub async fn user_profile(&self) -> Option<UserProfile> {
        let credential = self.get_credential().await?;
        if let Some(profile) = self.cached_profile() {
            return Some(profile);
        }

        let profile = match self.provider.fetch_profile(&credential.access_token).await {
            Ok(profile) => profile?,
            Err(e) => {
                warn!(error = %e, "Profile lookup failed");
                return None;
            }
        };

        let stored = profile.clone();
        self.remember(
            |cache| {
                if let Some(account) = cache.account.as_mut() {
                    account.profile = Some(stored);
                }
            },
            "Profile",
        );
        Some(profile)
    }

    fn cached_profile(&self) -> Option<UserProfile> {
        let cache = self.cache.lock().unwrap();
        cache.account.as_ref().and_then(|a| a.profile.clone())
    }

    fn app_access_token(&self) -> Option<String> {
        let cache = self.cache.lock().unwrap();
        cache
            .app_credential
            .as_ref()
            .filter(|c| !c.is_expired(Utc::now()))
            .map(|c| c.access_token.clone())
    }
}

#[async_trait]
impl AccessTokenSource for CredentialOrchestrator {
    async fn access_token(&self) -> Option<String> {
        if let Some(credential) = self.get_credential().await {
            return Some(credential.access_token);
        }

        if self.config.default_auth_method == GrantFlow::ClientCredential {
            let result = self.authenticate(GrantFlow::ClientCredential).await;
            if result.success {
                return self.app_access_token();
            }
        }
        None
    }
}

/// Builds the account record for a freshly signed-in user.
fn account_for(credential: &Credential, profile: Option<UserProfile>) -> AccountRecord {
    let claims = credential
        .id_token
        .as_deref()
        .and_then(decode_id_token_claims)
        .unwrap_or_default();

    let home_account_id = claims
        .account_id()
        .or_else(|| profile.as_ref().map(|p| p.id.clone()))
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let username = claims.preferred_username.clone().or_else(|| {
        profile
            .as_ref()
            .and_then(|p| p.user_principal_name.clone().or_else(|| p.mail.clone()))
    });

    AccountRecord {
        home_account_id,
        username,
        tenant_id: claims.tid,
        profile,
    }
}
