use std::fmt;
use std::sync::{Arc, Mutex as SyncMutex, PoisonError, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use reqwest::Response;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::base::{AuthStateListener, AuthStateNotifier, Listeners, Subscription, UserHandle};
use super::error::IdentityError;

/// Cached ID tokens with less than this much validity left are refreshed.
const REFRESH_MARGIN_SECS: i64 = 5 * 60;

/// Web-app settings for a Firebase project.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq, JsonSchema)]
pub struct FirebaseConfig {
    pub api_key: String,
    pub auth_domain: String,
    pub project_id: String,
    #[serde(default)]
    pub storage_bucket: Option<String>,
    #[serde(default)]
    pub messaging_sender_id: Option<String>,
    #[serde(default)]
    pub app_id: Option<String>,
    /// Base URL of the Identity Toolkit REST API.
    #[serde(default = "default_identity_url")]
    pub identity_url: String,
    /// Base URL of the Secure Token REST API.
    #[serde(default = "default_token_url")]
    pub token_url: String,
}

fn default_identity_url() -> String {
    "https://identitytoolkit.googleapis.com".to_string()
}

fn default_token_url() -> String {
    "https://securetoken.googleapis.com".to_string()
}

impl FirebaseConfig {
    fn sign_in_endpoint(&self) -> String {
        format!(
            "{}/v1/accounts:signInWithPassword",
            self.identity_url.trim_end_matches('/')
        )
    }

    fn token_endpoint(&self) -> String {
        format!("{}/v1/token", self.token_url.trim_end_matches('/'))
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SignInRequest<'a> {
    email: &'a str,
    password: &'a str,
    return_secure_token: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignInResponse {
    local_id: String,
    #[serde(default)]
    email: Option<String>,
    id_token: String,
    refresh_token: String,
    expires_in: String,
}

#[derive(Deserialize)]
struct RefreshResponse {
    id_token: String,
    refresh_token: String,
    expires_in: String,
}

/// Parses Firebase's string-encoded `expiresIn` into an absolute deadline.
fn expiry_from(expires_in: &str) -> Result<DateTime<Utc>, IdentityError> {
    let secs: i64 = expires_in.trim().parse().map_err(|_| {
        IdentityError::MalformedResponse(format!("invalid expires_in '{}'", expires_in))
    })?;
    TimeDelta::try_seconds(secs)
        .and_then(|lifetime| Utc::now().checked_add_signed(lifetime))
        .ok_or_else(|| {
            IdentityError::MalformedResponse(format!("expires_in '{}' is out of range", expires_in))
        })
}

/// Turns a non-2xx response into `Rejected`, pulling `error.message` out of
/// the body when there is one, and decodes successful bodies as `T`.
async fn read_json<T: DeserializeOwned>(resp: Response) -> Result<T, IdentityError> {
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(IdentityError::Rejected {
            status,
            message: error_message(&body),
        });
    }

    resp.json::<T>()
        .await
        .map_err(|e| IdentityError::MalformedResponse(e.to_string()))
}

fn error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(str::to_string))
        .unwrap_or_else(|| body.to_string())
}

struct CachedToken {
    id_token: String,
    refresh_token: String,
    expires_at: DateTime<Utc>,
}

impl CachedToken {
    fn is_fresh(&self) -> bool {
        self.expires_at - Utc::now() > TimeDelta::seconds(REFRESH_MARGIN_SECS)
    }
}

/// A signed-in Firebase account.
pub struct FirebaseUser {
    uid: String,
    email: Option<String>,
    config: Arc<FirebaseConfig>,
    http: reqwest::Client,
    // Async so that concurrent callers wait on a single refresh.
    token: Mutex<CachedToken>,
}

impl FirebaseUser {
    pub fn email(&self) -> Option<&str> {
        self.email.as_deref()
    }

    /// Exchanges the refresh token for a new ID token regardless of the
    /// cached token's age.
    pub async fn refresh(&self) -> Result<String, IdentityError> {
        let mut cached = self.token.lock().await;
        self.refresh_locked(&mut cached).await
    }

    async fn refresh_locked(&self, cached: &mut CachedToken) -> Result<String, IdentityError> {
        debug!("Refreshing ID token for uid='{}'", self.uid);

        let resp = self
            .http
            .post(self.config.token_endpoint())
            .query(&[("key", self.config.api_key.as_str())])
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", cached.refresh_token.as_str()),
            ])
            .send()
            .await?;
        let refreshed: RefreshResponse = read_json(resp).await?;

        cached.expires_at = expiry_from(&refreshed.expires_in)?;
        cached.id_token = refreshed.id_token;
        cached.refresh_token = refreshed.refresh_token;
        Ok(cached.id_token.clone())
    }
}

impl fmt::Debug for FirebaseUser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FirebaseUser")
            .field("uid", &self.uid)
            .field("email", &self.email)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl UserHandle for FirebaseUser {
    fn uid(&self) -> &str {
        &self.uid
    }

    async fn get_id_token(&self) -> Result<String, IdentityError> {
        let mut cached = self.token.lock().await;
        if cached.is_fresh() {
            return Ok(cached.id_token.clone());
        }
        self.refresh_locked(&mut cached).await
    }
}

/// Email/password sign-in against the Firebase Auth REST API, with
/// sign-in state change notifications.
pub struct FirebaseIdentity {
    config: Arc<FirebaseConfig>,
    http: reqwest::Client,
    current: RwLock<Option<Arc<FirebaseUser>>>,
    // Held across store-and-notify so listeners see changes in the order
    // they were made. `current` stays readable from inside a listener.
    transition: SyncMutex<()>,
    listeners: Listeners,
}

impl FirebaseIdentity {
    pub fn new(config: &FirebaseConfig) -> Self {
        Self::with_client(config, reqwest::Client::new())
    }

    pub fn with_client(config: &FirebaseConfig, http: reqwest::Client) -> Self {
        info!(
            "Creating FirebaseIdentity for project '{}' ({})",
            config.project_id, config.auth_domain
        );
        Self {
            config: Arc::new(config.clone()),
            http,
            current: RwLock::new(None),
            transition: SyncMutex::new(()),
            listeners: Listeners::new(),
        }
    }

    pub fn config(&self) -> &FirebaseConfig {
        &self.config
    }

    /// Signs in and makes the account the current user. Listeners have been
    /// notified by the time this returns.
    pub async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Arc<FirebaseUser>, IdentityError> {
        debug!("Signing in '{}' with password", email);

        let resp = self
            .http
            .post(self.config.sign_in_endpoint())
            .query(&[("key", self.config.api_key.as_str())])
            .json(&SignInRequest {
                email,
                password,
                return_secure_token: true,
            })
            .send()
            .await?;

        let signed_in: SignInResponse = match read_json(resp).await {
            Ok(body) => body,
            Err(e) => {
                warn!("Sign-in for '{}' failed: {}", email, e);
                return Err(e);
            }
        };

        let user = Arc::new(FirebaseUser {
            uid: signed_in.local_id,
            email: signed_in.email,
            config: self.config.clone(),
            http: self.http.clone(),
            token: Mutex::new(CachedToken {
                expires_at: expiry_from(&signed_in.expires_in)?,
                id_token: signed_in.id_token,
                refresh_token: signed_in.refresh_token,
            }),
        });

        info!("Signed in uid='{}'", user.uid);
        self.set_current(Some(user.clone()));
        Ok(user)
    }

    /// Forgets the current user and notifies listeners.
    pub fn sign_out(&self) {
        if let Some(user) = self.current_firebase_user() {
            info!("Signing out uid='{}'", user.uid);
        }
        self.set_current(None);
    }

    pub fn current_firebase_user(&self) -> Option<Arc<FirebaseUser>> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Listeners must not sign in or out from inside their callback.
    fn set_current(&self, user: Option<Arc<FirebaseUser>>) {
        let _transition = self
            .transition
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = user.clone();
        self.listeners
            .notify(user.map(|u| u as Arc<dyn UserHandle>));
    }
}

impl AuthStateNotifier for FirebaseIdentity {
    fn current_user(&self) -> Option<Arc<dyn UserHandle>> {
        self.current_firebase_user()
            .map(|u| u as Arc<dyn UserHandle>)
    }

    fn on_auth_state_changed(&self, listener: AuthStateListener) -> Subscription {
        let subscription = self.listeners.add(listener.clone());
        listener(self.current_user());
        subscription
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AuthConfig;
    use crate::session::SessionStore;
    use mockito::{Matcher, Server, ServerGuard};
    use reqwest::StatusCode;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn test_config(server: &ServerGuard) -> FirebaseConfig {
        FirebaseConfig {
            api_key: "test-key".to_string(),
            auth_domain: "demo.firebaseapp.com".to_string(),
            project_id: "demo".to_string(),
            storage_bucket: None,
            messaging_sender_id: None,
            app_id: None,
            identity_url: server.url(),
            token_url: server.url(),
        }
    }

    fn sign_in_body(id_token: &str, expires_in: &str) -> String {
        format!(
            r#"{{"localId": "uid-1", "email": "ada@example.com", "idToken": "{}", "refreshToken": "refresh-1", "expiresIn": "{}"}}"#,
            id_token, expires_in
        )
    }

    async fn mock_sign_in(server: &mut ServerGuard, id_token: &str, expires_in: &str) -> mockito::Mock {
        server
            .mock("POST", "/v1/accounts:signInWithPassword")
            .match_query(Matcher::UrlEncoded("key".into(), "test-key".into()))
            .match_body(Matcher::PartialJson(serde_json::json!({
                "email": "ada@example.com",
                "returnSecureToken": true
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(sign_in_body(id_token, expires_in))
            .create_async()
            .await
    }

    #[tokio::test]
    async fn test_sign_in_sets_current_user() {
        let mut server = Server::new_async().await;
        let m = mock_sign_in(&mut server, "tok123", "3600").await;

        let identity = FirebaseIdentity::new(&test_config(&server));
        let user = identity
            .sign_in_with_password("ada@example.com", "secret")
            .await
            .expect("sign-in should succeed");
        m.assert_async().await;

        assert_eq!(user.uid(), "uid-1");
        assert_eq!(user.email(), Some("ada@example.com"));
        let current = identity.current_user().expect("user should be current");
        assert_eq!(current.uid(), "uid-1");
    }

    #[tokio::test]
    async fn test_fresh_token_is_served_from_cache() {
        let mut server = Server::new_async().await;
        let _sign_in = mock_sign_in(&mut server, "tok123", "3600").await;
        let refresh = server
            .mock("POST", "/v1/token")
            .match_query(Matcher::Any)
            .expect(0)
            .create_async()
            .await;

        let identity = FirebaseIdentity::new(&test_config(&server));
        let user = identity
            .sign_in_with_password("ada@example.com", "secret")
            .await
            .unwrap();

        assert_eq!(user.get_id_token().await.unwrap(), "tok123");
        assert_eq!(user.get_id_token().await.unwrap(), "tok123");
        refresh.assert_async().await;
    }

    #[tokio::test]
    async fn test_stale_token_is_refreshed() {
        let mut server = Server::new_async().await;
        let _sign_in = mock_sign_in(&mut server, "tok123", "60").await;
        let refresh = server
            .mock("POST", "/v1/token")
            .match_query(Matcher::UrlEncoded("key".into(), "test-key".into()))
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("grant_type".into(), "refresh_token".into()),
                Matcher::UrlEncoded("refresh_token".into(), "refresh-1".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"id_token": "tok456", "refresh_token": "refresh-2", "expires_in": "3600", "user_id": "uid-1"}"#,
            )
            .expect(1)
            .create_async()
            .await;

        let identity = FirebaseIdentity::new(&test_config(&server));
        let user = identity
            .sign_in_with_password("ada@example.com", "secret")
            .await
            .unwrap();

        assert_eq!(user.get_id_token().await.unwrap(), "tok456");
        // Now fresh for an hour, so no second exchange.
        assert_eq!(user.get_id_token().await.unwrap(), "tok456");
        refresh.assert_async().await;
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_refresh() {
        let mut server = Server::new_async().await;
        let _sign_in = mock_sign_in(&mut server, "tok123", "0").await;
        let refresh = server
            .mock("POST", "/v1/token")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"id_token": "tok456", "refresh_token": "refresh-2", "expires_in": "3600"}"#)
            .expect(1)
            .create_async()
            .await;

        let identity = FirebaseIdentity::new(&test_config(&server));
        let user = identity
            .sign_in_with_password("ada@example.com", "secret")
            .await
            .unwrap();

        let tokens = futures::future::join_all((0..4).map(|_| user.get_id_token())).await;
        for token in tokens {
            assert_eq!(token.unwrap(), "tok456");
        }
        refresh.assert_async().await;
    }

    #[tokio::test]
    async fn test_rejected_refresh_surfaces_provider_message() {
        let mut server = Server::new_async().await;
        let _sign_in = mock_sign_in(&mut server, "tok123", "3600").await;
        let _refresh = server
            .mock("POST", "/v1/token")
            .match_query(Matcher::Any)
            .with_status(400)
            .with_header("content-type", "application/json")
            .with_body(r#"{"error": {"code": 400, "message": "TOKEN_EXPIRED"}}"#)
            .create_async()
            .await;

        let identity = FirebaseIdentity::new(&test_config(&server));
        let user = identity
            .sign_in_with_password("ada@example.com", "secret")
            .await
            .unwrap();

        match user.refresh().await {
            Err(IdentityError::Rejected { status, message }) => {
                assert_eq!(status, StatusCode::BAD_REQUEST);
                assert_eq!(message, "TOKEN_EXPIRED");
            }
            other => panic!("expected a rejection, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_wrong_password_leaves_user_signed_out() {
        let mut server = Server::new_async().await;
        let _m = server
            .mock("POST", "/v1/accounts:signInWithPassword")
            .match_query(Matcher::Any)
            .with_status(400)
            .with_body(r#"{"error": {"code": 400, "message": "INVALID_PASSWORD"}}"#)
            .create_async()
            .await;

        let identity = FirebaseIdentity::new(&test_config(&server));
        let err = identity
            .sign_in_with_password("ada@example.com", "wrong")
            .await
            .unwrap_err();

        assert!(err.to_string().contains("INVALID_PASSWORD"));
        assert!(identity.current_user().is_none());
    }

    #[tokio::test]
    async fn test_listeners_follow_sign_in_and_out() {
        let mut server = Server::new_async().await;
        let _sign_in = mock_sign_in(&mut server, "tok123", "3600").await;

        let identity = FirebaseIdentity::new(&test_config(&server));
        let signed_in = Arc::new(AtomicUsize::new(0));
        let signed_out = Arc::new(AtomicUsize::new(0));
        let (ins, outs) = (signed_in.clone(), signed_out.clone());
        let subscription = identity.on_auth_state_changed(Arc::new(
            move |user: Option<Arc<dyn UserHandle>>| match user {
                Some(_) => {
                    ins.fetch_add(1, Ordering::SeqCst);
                }
                None => {
                    outs.fetch_add(1, Ordering::SeqCst);
                }
            },
        ));

        // Registration replays the current (absent) user.
        assert_eq!(signed_out.load(Ordering::SeqCst), 1);

        identity
            .sign_in_with_password("ada@example.com", "secret")
            .await
            .unwrap();
        assert_eq!(signed_in.load(Ordering::SeqCst), 1);

        identity.sign_out();
        assert_eq!(signed_out.load(Ordering::SeqCst), 2);
        assert!(identity.current_user().is_none());

        drop(subscription);
        identity.sign_out();
        assert_eq!(signed_out.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_out_of_range_lifetime_fails_sign_in() {
        let mut server = Server::new_async().await;
        let _sign_in = mock_sign_in(&mut server, "tok123", "100000000000000").await;

        let identity = FirebaseIdentity::new(&test_config(&server));
        let err = identity
            .sign_in_with_password("ada@example.com", "secret")
            .await
            .unwrap_err();

        assert!(matches!(err, IdentityError::MalformedResponse(_)));
        assert!(identity.current_user().is_none());
    }

    #[tokio::test]
    async fn test_out_of_range_lifetime_fails_refresh_softly() {
        let mut server = Server::new_async().await;
        let _sign_in = mock_sign_in(&mut server, "tok123", "0").await;
        let _refresh = server
            .mock("POST", "/v1/token")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"id_token": "tok456", "refresh_token": "refresh-2", "expires_in": "100000000000000"}"#)
            .create_async()
            .await;

        let identity = FirebaseIdentity::new(&test_config(&server));
        let user = identity
            .sign_in_with_password("ada@example.com", "secret")
            .await
            .unwrap();
        assert!(matches!(
            user.get_id_token().await,
            Err(IdentityError::MalformedResponse(_))
        ));

        let store = SessionStore::new();
        store.init(&AuthConfig::enabled());
        store.set_user(user);
        let token = tokio::spawn(async move { store.get_fresh_token().await })
            .await
            .expect("token lookup must not panic");
        assert_eq!(token, None);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_sign_in_and_out_keep_session_in_step() {
        let mut server = Server::new_async().await;
        let _sign_in = server
            .mock("POST", "/v1/accounts:signInWithPassword")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(sign_in_body("tok123", "3600"))
            .expect_at_least(1)
            .create_async()
            .await;

        let identity = Arc::new(FirebaseIdentity::new(&test_config(&server)));
        let store = SessionStore::new();
        store.init(&AuthConfig::enabled());
        let _subscription = store.attach(&*identity);

        let mut tasks = Vec::new();
        for i in 0..16 {
            let identity = identity.clone();
            tasks.push(tokio::spawn(async move {
                if i % 2 == 0 {
                    identity
                        .sign_in_with_password("ada@example.com", "secret")
                        .await
                        .map(|_| ())
                } else {
                    identity.sign_out();
                    Ok(())
                }
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(store.user().is_some(), identity.current_user().is_some());
    }

    #[tokio::test]
    async fn test_listener_may_read_current_user() {
        let mut server = Server::new_async().await;
        let _sign_in = mock_sign_in(&mut server, "tok123", "3600").await;

        let identity = Arc::new(FirebaseIdentity::new(&test_config(&server)));
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let (reader, sink) = (identity.clone(), seen.clone());
        let _subscription = identity.on_auth_state_changed(Arc::new(
            move |user: Option<Arc<dyn UserHandle>>| {
                let current = reader.current_user().map(|u| u.uid().to_string());
                assert_eq!(current, user.map(|u| u.uid().to_string()));
                sink.lock().unwrap().push(current);
            },
        ));

        identity
            .sign_in_with_password("ada@example.com", "secret")
            .await
            .unwrap();
        identity.sign_out();

        assert_eq!(
            *seen.lock().unwrap(),
            vec![None, Some("uid-1".to_string()), None]
        );
    }

    #[test]
    fn test_error_message_falls_back_to_body() {
        assert_eq!(error_message("upstream down"), "upstream down");
        assert_eq!(
            error_message(r#"{"error": {"message": "USER_DISABLED"}}"#),
            "USER_DISABLED"
        );
    }
}
