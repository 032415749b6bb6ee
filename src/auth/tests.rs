use super::*;
use crate::config::Config;
use crate::credentials::{AccountRecord, CacheBlob, CredentialStore, TokenCache};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::Duration;
use mockito::{Matcher, Server, ServerGuard};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tempfile::TempDir;

const TOKEN_PATH: &str = "/common/oauth2/v2.0/token";
const DEVICE_PATH: &str = "/common/oauth2/v2.0/devicecode";

/// Prompt that records what it was asked to show and optionally plays the
/// browser by calling the redirect URI itself.
#[derive(Default)]
struct ScriptedPrompt {
    /// Query to send back to the redirect URI; `{state}` is substituted
    callback_query: Option<String>,
    opened: Mutex<Vec<String>>,
    device_codes: Mutex<Vec<String>>,
}

impl ScriptedPrompt {
    fn replying(query: &str) -> Self {
        Self {
            callback_query: Some(query.to_string()),
            ..Self::default()
        }
    }
}

impl UserPrompt for ScriptedPrompt {
    fn open_url(&self, url: &str) -> std::io::Result<()> {
        self.opened.lock().unwrap().push(url.to_string());

        let Some(query) = &self.callback_query else {
            return Ok(());
        };
        let parsed = reqwest::Url::parse(url).unwrap();
        let param = |name: &str| {
            parsed
                .query_pairs()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.into_owned())
                .unwrap()
        };
        let callback = format!(
            "{}?{}",
            param("redirect_uri"),
            query.replace("{state}", &param("state"))
        );
        tokio::spawn(async move {
            let _ = reqwest::get(&callback).await;
        });
        Ok(())
    }

    fn show_device_code(&self, device: &DeviceCodeResponse) {
        self.device_codes
            .lock()
            .unwrap()
            .push(device.user_code.clone());
    }
}

fn config_for(server: &ServerGuard) -> Config {
    Config {
        client_id: "client-1".to_string(),
        client_secret: "secret-1".to_string(),
        authority_host: server.url(),
        api_base_url: server.url(),
        scopes: vec!["Mail.Read".to_string()],
        ..Config::default()
    }
}

fn free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

fn credential(method: GrantFlow, expires_in_minutes: i64) -> Credential {
    Credential {
        access_token: format!("cached-{}", method),
        token_type: "Bearer".to_string(),
        expires_in: expires_in_minutes * 60,
        ext_expires_in: None,
        refresh_token: method.is_user_flow().then(|| "rt-1".to_string()),
        id_token: None,
        scopes: vec!["Mail.Read".to_string()],
        expires_at: Some(Utc::now() + Duration::minutes(expires_in_minutes)),
        method,
    }
}

fn account() -> AccountRecord {
    AccountRecord {
        home_account_id: "oid.tid".to_string(),
        username: Some("ada@contoso.com".to_string()),
        tenant_id: Some("tid".to_string()),
        profile: Some(UserProfile {
            id: "user-1".to_string(),
            display_name: Some("Ada Lovelace".to_string()),
            ..UserProfile::default()
        }),
    }
}

fn seeded_store(cache: &TokenCache) -> CredentialStore {
    let store = CredentialStore::in_memory();
    store.save(&cache.to_blob().unwrap()).unwrap();
    store
}

fn orchestrator(
    config: Config,
    store: CredentialStore,
    prompt: Arc<dyn UserPrompt>,
) -> CredentialOrchestrator {
    CredentialOrchestrator::new(Arc::new(config), store, prompt).unwrap()
}

fn token_body(access_token: &str) -> String {
    let claims = URL_SAFE_NO_PAD.encode(
        r#"{"oid":"oid-1","tid":"tid-1","preferred_username":"ada@contoso.com"}"#,
    );
    serde_json::json!({
        "token_type": "Bearer",
        "scope": "Mail.Read openid profile offline_access",
        "expires_in": 3600,
        "access_token": access_token,
        "refresh_token": "rt-new",
        "id_token": format!("eyJhbGciOiJub25lIn0.{}.", claims),
    })
    .to_string()
}

async fn mock_profile(server: &mut ServerGuard) -> mockito::Mock {
    server
        .mock("GET", "/v1.0/me")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"id":"user-1","displayName":"Ada Lovelace","userPrincipalName":"ada@contoso.com"}"#)
        .create_async()
        .await
}

mod short_circuit {
    use super::*;

    #[tokio::test]
    async fn fresh_user_credential_skips_network() {
        let mut server = Server::new_async().await;
        let token = server
            .mock("POST", Matcher::Any)
            .expect(0)
            .create_async()
            .await;

        let cache = TokenCache {
            account: Some(account()),
            user_credential: Some(credential(GrantFlow::Interactive, 45)),
            app_credential: None,
        };
        let orch = orchestrator(
            config_for(&server),
            seeded_store(&cache),
            Arc::new(ScriptedPrompt::default()),
        );

        for flow in [GrantFlow::Interactive, GrantFlow::Device] {
            let result = orch.authenticate(flow).await;
            assert!(result.success);
            assert!(result.status.is_authenticated);
            assert_eq!(result.status.method, Some(GrantFlow::Interactive));
            assert_eq!(
                result.status.user.as_ref().and_then(|u| u.display_name.as_deref()),
                Some("Ada Lovelace")
            );
        }

        token.assert_async().await;
    }

    #[tokio::test]
    async fn fresh_app_credential_skips_network() {
        let mut server = Server::new_async().await;
        let token = server
            .mock("POST", Matcher::Any)
            .expect(0)
            .create_async()
            .await;

        let cache = TokenCache {
            app_credential: Some(credential(GrantFlow::ClientCredential, 55)),
            ..TokenCache::default()
        };
        let orch = orchestrator(
            config_for(&server),
            seeded_store(&cache),
            Arc::new(ScriptedPrompt::default()),
        );

        let result = orch.authenticate_client_credentials().await;
        assert!(result.success);
        assert!(result.status.user.is_none());
        token.assert_async().await;
    }

    #[tokio::test]
    async fn credential_inside_renewal_window_is_not_fresh() {
        let mut server = Server::new_async().await;
        let token = server
            .mock("POST", TOKEN_PATH)
            .match_body(Matcher::UrlEncoded(
                "grant_type".into(),
                "client_credentials".into(),
            ))
            .with_status(200)
            .with_body(r#"{"access_token":"app-new","expires_in":3599}"#)
            .expect(1)
            .create_async()
            .await;

        let cache = TokenCache {
            app_credential: Some(credential(GrantFlow::ClientCredential, 10)),
            ..TokenCache::default()
        };
        let orch = orchestrator(
            config_for(&server),
            seeded_store(&cache),
            Arc::new(ScriptedPrompt::default()),
        );

        assert!(orch.authenticate_client_credentials().await.success);
        token.assert_async().await;
    }
}

mod client_credentials {
    use super::*;

    #[tokio::test]
    async fn acquires_and_persists_app_credential() {
        let mut server = Server::new_async().await;
        let scope = format!("{}/.default", server.url());
        let token = server
            .mock("POST", TOKEN_PATH)
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("grant_type".into(), "client_credentials".into()),
                Matcher::UrlEncoded("scope".into(), scope),
                Matcher::UrlEncoded("client_secret".into(), "secret-1".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"token_type":"Bearer","expires_in":3599,"access_token":"app-token"}"#)
            .create_async()
            .await;

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cache.json");
        let orch = orchestrator(
            config_for(&server),
            CredentialStore::open(&path, None),
            Arc::new(ScriptedPrompt::default()),
        );
        assert_eq!(orch.state(), AuthState::NoCredential);

        let result = orch.authenticate(GrantFlow::ClientCredential).await;

        token.assert_async().await;
        assert!(result.success, "{:?}", result.error_message);
        assert!(result.status.user.is_none());
        assert_eq!(result.status.method, Some(GrantFlow::ClientCredential));
        assert_eq!(orch.state(), AuthState::Authenticated(GrantFlow::ClientCredential));

        let persisted = CredentialStore::open(&path, None).load().unwrap();
        let cache = TokenCache::from_blob(&persisted).unwrap();
        assert!(cache.account.is_none());
        assert_eq!(cache.app_credential.unwrap().access_token, "app-token");
    }

    #[tokio::test]
    async fn unsaved_credential_is_not_reused() {
        let mut server = Server::new_async().await;
        let token = server
            .mock("POST", TOKEN_PATH)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"token_type":"Bearer","expires_in":3599,"access_token":"app-token"}"#)
            .expect(2)
            .create_async()
            .await;

        let dir = TempDir::new().unwrap();
        let cache_dir = dir.path().join("state");
        let orch = orchestrator(
            config_for(&server),
            CredentialStore::open(cache_dir.join("cache.json"), None),
            Arc::new(ScriptedPrompt::default()),
        );
        // A plain file where the cache directory should go makes saves fail
        std::fs::write(&cache_dir, "").unwrap();

        let first = orch.authenticate_client_credentials().await;
        assert!(!first.success);
        assert!(first.error_message.unwrap().contains("Credential cache error"));

        // No short-circuit from the credential that was never saved
        let second = orch.authenticate_client_credentials().await;
        assert!(!second.success);
        token.assert_async().await;
    }

    #[tokio::test]
    async fn provider_error_becomes_failed_result() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", TOKEN_PATH)
            .with_status(401)
            .with_body(
                r#"{"error":"invalid_client","error_description":"AADSTS7000215: Invalid client secret provided."}"#,
            )
            .create_async()
            .await;

        let orch = orchestrator(
            config_for(&server),
            CredentialStore::in_memory(),
            Arc::new(ScriptedPrompt::default()),
        );
        let result = orch.authenticate_client_credentials().await;

        assert!(!result.success);
        assert!(!result.status.is_authenticated);
        let message = result.error_message.unwrap();
        assert!(message.contains("AADSTS7000215"));
        assert!(matches!(orch.state(), AuthState::Failed(_)));
    }
}

mod device {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    async fn mock_device_code(server: &mut ServerGuard, expires_in: u64) -> mockito::Mock {
        server
            .mock("POST", DEVICE_PATH)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                serde_json::json!({
                    "device_code": "dc-1",
                    "user_code": "ABCD-1234",
                    "verification_uri": "https://microsoft.com/devicelogin",
                    "expires_in": expires_in,
                    "interval": 1,
                    "message": "To sign in, use a web browser to open https://microsoft.com/devicelogin and enter the code ABCD-1234."
                })
                .to_string(),
            )
            .create_async()
            .await
    }

    #[tokio::test]
    async fn polls_until_authorized() {
        let mut server = Server::new_async().await;
        mock_device_code(&mut server, 60).await;
        mock_profile(&mut server).await;

        let polls = Arc::new(AtomicUsize::new(0));
        let counter = polls.clone();
        server
            .mock("POST", TOKEN_PATH)
            .match_body(Matcher::UrlEncoded("device_code".into(), "dc-1".into()))
            .with_status(200)
            .with_body_from_request(move |_| {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    br#"{"error":"authorization_pending","error_description":"pending"}"#.to_vec()
                } else {
                    token_body("device-token").into_bytes()
                }
            })
            .create_async()
            .await;

        let prompt = Arc::new(ScriptedPrompt::default());
        let orch = orchestrator(
            config_for(&server),
            CredentialStore::in_memory(),
            prompt.clone(),
        );

        let result = orch.authenticate_device().await;

        assert!(result.success, "{:?}", result.error_message);
        assert_eq!(polls.load(Ordering::SeqCst), 2);
        assert_eq!(*prompt.device_codes.lock().unwrap(), vec!["ABCD-1234"]);
        assert_eq!(result.status.method, Some(GrantFlow::Device));
        assert_eq!(
            result.status.user.unwrap().user_principal_name.as_deref(),
            Some("ada@contoso.com")
        );

        let credential = orch.get_credential().await.unwrap();
        assert_eq!(credential.access_token, "device-token");
        assert!(orch.is_authenticated().await);
    }

    #[tokio::test]
    async fn provider_denial_is_propagated() {
        let mut server = Server::new_async().await;
        mock_device_code(&mut server, 60).await;
        server
            .mock("POST", TOKEN_PATH)
            .with_status(400)
            .with_body(
                r#"{"error":"access_denied","error_description":"The user declined the sign-in request."}"#,
            )
            .create_async()
            .await;

        let orch = orchestrator(
            config_for(&server),
            CredentialStore::in_memory(),
            Arc::new(ScriptedPrompt::default()),
        );
        let result = orch.authenticate_device().await;

        assert!(!result.success);
        let message = result.error_message.unwrap();
        assert!(message.contains("access_denied"));
        assert!(message.contains("The user declined the sign-in request."));
    }

    #[tokio::test]
    async fn expired_device_code_times_out() {
        let mut server = Server::new_async().await;
        mock_device_code(&mut server, 1).await;
        let token = server
            .mock("POST", TOKEN_PATH)
            .expect(0)
            .create_async()
            .await;

        let orch = orchestrator(
            config_for(&server),
            CredentialStore::in_memory(),
            Arc::new(ScriptedPrompt::default()),
        );
        let result = orch.authenticate_device().await;

        assert!(!result.success);
        assert!(result.error_message.unwrap().contains("timed out"));
        token.assert_async().await;
    }

    #[tokio::test]
    async fn unrepresentable_expiry_fails_without_polling() {
        let mut server = Server::new_async().await;
        mock_device_code(&mut server, u64::MAX).await;
        let token = server
            .mock("POST", TOKEN_PATH)
            .expect(0)
            .create_async()
            .await;

        let orch = orchestrator(
            config_for(&server),
            CredentialStore::in_memory(),
            Arc::new(ScriptedPrompt::default()),
        );
        let result = orch.authenticate_device().await;

        assert!(!result.success);
        assert!(result.error_message.unwrap().contains("expires_in out of range"));
        assert!(matches!(orch.state(), AuthState::Failed(_)));
        token.assert_async().await;
    }
}

mod interactive {
    use super::*;

    fn interactive_config(server: &ServerGuard, port: u16) -> Config {
        Config {
            redirect_uri: format!("http://127.0.0.1:{}/callback", port),
            auth_timeout_seconds: 5,
            ..config_for(server)
        }
    }

    #[tokio::test]
    async fn captures_code_and_signs_in() {
        let mut server = Server::new_async().await;
        let token = server
            .mock("POST", TOKEN_PATH)
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("grant_type".into(), "authorization_code".into()),
                Matcher::UrlEncoded("code".into(), "abc123".into()),
            ]))
            .with_status(200)
            .with_body(token_body("user-token"))
            .create_async()
            .await;
        mock_profile(&mut server).await;

        let port = free_port();
        let prompt = Arc::new(ScriptedPrompt::replying("code=abc123&state={state}"));
        let orch = orchestrator(
            interactive_config(&server, port),
            CredentialStore::in_memory(),
            prompt.clone(),
        );

        let result = orch.authenticate_interactive().await;

        token.assert_async().await;
        assert!(result.success, "{:?}", result.error_message);
        assert_eq!(
            result.status.user.unwrap().display_name.as_deref(),
            Some("Ada Lovelace")
        );
        assert_eq!(orch.state(), AuthState::Authenticated(GrantFlow::Interactive));

        let opened = prompt.opened.lock().unwrap().clone();
        assert_eq!(opened.len(), 1);
        assert!(opened[0].contains("prompt=select_account"));

        // The listener released its port
        assert!(tokio::net::TcpListener::bind(("127.0.0.1", port)).await.is_ok());

        // Account identity comes from the identity token claims
        let profile = orch.user_profile().await.unwrap();
        assert_eq!(profile.id, "user-1");
        assert!(orch.is_authenticated().await);
    }

    #[tokio::test]
    async fn rejects_forged_state() {
        let mut server = Server::new_async().await;
        let token = server
            .mock("POST", TOKEN_PATH)
            .expect(0)
            .create_async()
            .await;

        let port = free_port();
        let orch = orchestrator(
            interactive_config(&server, port),
            CredentialStore::in_memory(),
            Arc::new(ScriptedPrompt::replying("code=abc123&state=forged")),
        );

        let result = orch.authenticate_interactive().await;

        assert!(!result.success);
        assert!(result.error_message.unwrap().contains("state"));
        token.assert_async().await;
    }

    #[tokio::test]
    async fn reports_denied_callback() {
        let server = Server::new_async().await;
        let port = free_port();
        let orch = orchestrator(
            interactive_config(&server, port),
            CredentialStore::in_memory(),
            Arc::new(ScriptedPrompt::replying(
                "error=access_denied&error_description=User+cancelled&state={state}",
            )),
        );

        let result = orch.authenticate_interactive().await;

        assert!(!result.success);
        let message = result.error_message.unwrap();
        assert!(message.contains("access_denied"));
        assert!(message.contains("User cancelled"));
    }

    #[tokio::test]
    async fn times_out_without_callback() {
        let server = Server::new_async().await;
        let port = free_port();
        let config = Config {
            auth_timeout_seconds: 1,
            ..interactive_config(&server, port)
        };
        let orch = orchestrator(
            config,
            CredentialStore::in_memory(),
            Arc::new(ScriptedPrompt::default()),
        );

        let started = Instant::now();
        let result = orch.authenticate_interactive().await;

        assert!(started.elapsed() >= std::time::Duration::from_secs(1));
        assert!(!result.success);
        assert!(result.error_message.unwrap().contains("timed out"));
        assert!(tokio::net::TcpListener::bind(("127.0.0.1", port)).await.is_ok());
    }
}

mod renewal {
    use super::*;

    fn expiring_cache() -> TokenCache {
        TokenCache {
            account: Some(account()),
            user_credential: Some(credential(GrantFlow::Device, 5)),
            app_credential: None,
        }
    }

    #[tokio::test]
    async fn no_account_means_no_credential() {
        let server = Server::new_async().await;
        let orch = orchestrator(
            config_for(&server),
            CredentialStore::in_memory(),
            Arc::new(ScriptedPrompt::default()),
        );
        assert!(orch.get_credential().await.is_none());
    }

    #[tokio::test]
    async fn renews_and_keeps_refresh_token() {
        let mut server = Server::new_async().await;
        let refresh = server
            .mock("POST", TOKEN_PATH)
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("grant_type".into(), "refresh_token".into()),
                Matcher::UrlEncoded("refresh_token".into(), "rt-1".into()),
            ]))
            .with_status(200)
            .with_body(r#"{"access_token":"renewed","expires_in":3600}"#)
            .expect(1)
            .create_async()
            .await;

        let store = seeded_store(&expiring_cache());
        let orch = orchestrator(
            config_for(&server),
            store,
            Arc::new(ScriptedPrompt::default()),
        );

        let credential = orch.get_credential().await.unwrap();
        assert_eq!(credential.access_token, "renewed");
        assert_eq!(credential.refresh_token.as_deref(), Some("rt-1"));
        assert_eq!(credential.method, GrantFlow::Device);
        assert_eq!(orch.state(), AuthState::Authenticated(GrantFlow::Device));

        // Second call uses the renewed credential without another request
        assert_eq!(orch.get_credential().await.unwrap().access_token, "renewed");
        refresh.assert_async().await;
    }

    #[tokio::test]
    async fn failed_renewal_returns_none() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", TOKEN_PATH)
            .with_status(400)
            .with_body(r#"{"error":"invalid_grant","error_description":"AADSTS700082: The refresh token has expired."}"#)
            .create_async()
            .await;

        let orch = orchestrator(
            config_for(&server),
            seeded_store(&expiring_cache()),
            Arc::new(ScriptedPrompt::default()),
        );

        assert!(orch.get_credential().await.is_none());
        assert!(matches!(orch.state(), AuthState::Failed(_)));
        // The account is still cached, so the process counts as signed in
        assert!(orch.is_authenticated().await);
    }

    #[tokio::test]
    async fn auth_status_reflects_renewal() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", TOKEN_PATH)
            .with_status(200)
            .with_body(r#"{"access_token":"renewed","expires_in":3600,"scope":"Mail.Read User.Read"}"#)
            .create_async()
            .await;

        let orch = orchestrator(
            config_for(&server),
            seeded_store(&expiring_cache()),
            Arc::new(ScriptedPrompt::default()),
        );

        let status = orch.auth_status().await;
        assert!(status.is_authenticated);
        assert_eq!(status.scopes, vec!["Mail.Read", "User.Read"]);
        assert_eq!(status.user.unwrap().id, "user-1");
    }
}

mod is_authenticated {
    use super::*;

    #[tokio::test]
    async fn live_client_credential_counts() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", TOKEN_PATH)
            .with_status(200)
            .with_body(r#"{"access_token":"app","expires_in":3600}"#)
            .create_async()
            .await;

        let orch = orchestrator(
            config_for(&server),
            CredentialStore::in_memory(),
            Arc::new(ScriptedPrompt::default()),
        );
        assert!(orch.is_authenticated().await);
        // Cached now, and handed out as the access token
        assert_eq!(orch.auth_status().await.method, Some(GrantFlow::ClientCredential));
    }

    #[tokio::test]
    async fn unreachable_provider_is_not_authenticated() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", TOKEN_PATH)
            .with_status(401)
            .with_body(r#"{"error":"unauthorized_client"}"#)
            .create_async()
            .await;

        let orch = orchestrator(
            config_for(&server),
            CredentialStore::in_memory(),
            Arc::new(ScriptedPrompt::default()),
        );
        assert!(!orch.is_authenticated().await);
    }
}

mod logout {
    use super::*;

    #[tokio::test]
    async fn removes_cache_file_and_is_idempotent() {
        let server = Server::new_async().await;
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cache.json");

        let cache = TokenCache {
            account: Some(account()),
            user_credential: Some(credential(GrantFlow::Interactive, 45)),
            app_credential: None,
        };
        CredentialStore::open(&path, None)
            .save(&cache.to_blob().unwrap())
            .unwrap();

        let orch = orchestrator(
            config_for(&server),
            CredentialStore::open(&path, None),
            Arc::new(ScriptedPrompt::default()),
        );
        assert!(orch.get_credential().await.is_some());

        assert!(orch.logout());
        assert!(!path.exists());
        assert_eq!(orch.state(), AuthState::NoCredential);
        assert!(orch.get_credential().await.is_none());

        assert!(orch.logout());
    }

    #[test]
    fn corrupted_cache_is_not_replaced() {
        let store = CredentialStore::in_memory();
        store.save(&CacheBlob::new(r#"{"account": 42}"#)).unwrap();

        let result = CredentialOrchestrator::new(
            Arc::new(Config::default()),
            store,
            Arc::new(ScriptedPrompt::default()),
        );
        assert!(result.is_err());
    }
}

mod token_source {
    use super::*;

    #[tokio::test]
    async fn client_credential_default_method_supplies_app_token() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", TOKEN_PATH)
            .with_status(200)
            .with_body(r#"{"access_token":"app-token","expires_in":3600}"#)
            .expect(1)
            .create_async()
            .await;

        let config = Config {
            default_auth_method: GrantFlow::ClientCredential,
            ..config_for(&server)
        };
        let orch = orchestrator(
            config,
            CredentialStore::in_memory(),
            Arc::new(ScriptedPrompt::default()),
        );

        assert_eq!(orch.access_token().await.as_deref(), Some("app-token"));
        // Cached on the second call
        assert_eq!(orch.access_token().await.as_deref(), Some("app-token"));
    }

    #[tokio::test]
    async fn interactive_default_without_account_has_no_token() {
        let server = Server::new_async().await;
        let orch = orchestrator(
            config_for(&server),
            CredentialStore::in_memory(),
            Arc::new(ScriptedPrompt::default()),
        );
        assert!(orch.access_token().await.is_none());
        assert!(StaticToken("t".to_string()).access_token().await.is_some());
    }
}
