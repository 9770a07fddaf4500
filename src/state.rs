//! Shared application state.
//!
//! Bundles the session, the facade over it, the API client and, when
//! authentication is enabled, the identity provider feeding the session.

use std::sync::Arc;

use crate::api::ApiClient;
use crate::config::ConfigV1;
use crate::identity::{FirebaseIdentity, Subscription};
use crate::session::{Auth, SessionStore};

/// Everything a consumer needs after startup. Cheap to clone; clones share
/// one session.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration loaded at startup.
    pub config: Arc<ConfigV1>,
    /// Mutable session; prefer `auth` outside of sign-in plumbing.
    pub session: SessionStore,
    /// Read-mostly view of `session`.
    pub auth: Auth,
    /// Client for the configured API.
    pub api: ApiClient,
    /// `None` when authentication is disabled.
    pub identity: Option<Arc<FirebaseIdentity>>,
    /// Keeps `session` registered with `identity`.
    pub(crate) _subscription: Option<Arc<Subscription>>,
}
