use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config::AuthConfig;
use crate::identity::{AuthStateNotifier, Subscription, UserHandle};
use crate::utils::log_throttle::LogThrottle;

const TOKEN_FAILURE_LOG_WINDOW: Duration = Duration::from_secs(30);

/// Who is signed in, and whether sign-in matters at all.
#[derive(Debug, Clone, Default)]
pub struct Session {
    pub user: Option<Arc<dyn UserHandle>>,
    pub auth_enabled: bool,
}

impl Session {
    pub fn is_authenticated(&self) -> bool {
        self.auth_enabled && self.user.is_some()
    }
}

/// Shared handle to the session. Clones observe the same state.
///
/// Nothing here returns an error: identity-provider failures degrade to
/// "unauthenticated".
#[derive(Clone)]
pub struct SessionStore {
    inner: Arc<RwLock<Session>>,
    token_failures: Arc<LogThrottle>,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(Session::default())),
            token_failures: Arc::new(LogThrottle::new(TOKEN_FAILURE_LOG_WINDOW)),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Session> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Session> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Reads the auth flag from `config`.
    pub fn init(&self, config: &AuthConfig) {
        self.write().auth_enabled = config.enabled;
        if config.enabled {
            info!("Authentication enabled.");
        } else {
            warn!("Authentication is disabled; requests will carry no credentials.");
        }
    }

    /// Registers with `notifier` so sign-in and sign-out drive `set_user` and
    /// `clear_user`. Keep the returned subscription alive for as long as the
    /// store should follow the provider.
    pub fn attach(&self, notifier: &dyn AuthStateNotifier) -> Subscription {
        let store = self.clone();
        notifier.on_auth_state_changed(Arc::new(move |user: Option<Arc<dyn UserHandle>>| {
            match user {
                Some(user) => store.set_user(user),
                None => store.clear_user(),
            }
        }))
    }

    pub fn set_user(&self, user: Arc<dyn UserHandle>) {
        debug!("Session user set to uid='{}'", user.uid());
        self.write().user = Some(user);
    }

    pub fn clear_user(&self) {
        let previous = self.write().user.take();
        if let Some(previous) = previous {
            debug!("Session user uid='{}' cleared", previous.uid());
            self.token_failures.forget(previous.uid());
        }
    }

    /// Back to the state of a freshly created store.
    pub fn reset(&self) {
        *self.write() = Session::default();
        self.token_failures.clear();
    }

    pub fn user(&self) -> Option<Arc<dyn UserHandle>> {
        self.read().user.clone()
    }

    pub fn auth_enabled(&self) -> bool {
        self.read().auth_enabled
    }

    pub fn is_authenticated(&self) -> bool {
        self.read().is_authenticated()
    }

    /// Copy of the current session.
    pub fn snapshot(&self) -> Session {
        self.read().clone()
    }

    /// A bearer token for the current user, or `None` when nobody is signed in
    /// or the provider could not produce one.
    pub async fn get_fresh_token(&self) -> Option<String> {
        // Clone out so the lock is not held across the await.
        let user = self.user()?;

        match user.get_id_token().await {
            Ok(token) => Some(token),
            Err(e) => {
                if let Some(suppressed) = self.token_failures.should_emit(user.uid()) {
                    warn!(
                        uid = user.uid(),
                        suppressed,
                        "Error getting token: {}",
                        e
                    );
                }
                None
            }
        }
    }
}
