use std::sync::Arc;

use super::store::SessionStore;
use crate::identity::UserHandle;

/// Read-mostly view of the session for code that should not depend on the
/// store's mutation API. Holds no state of its own.
#[derive(Clone)]
pub struct Auth {
    store: SessionStore,
}

impl Auth {
    pub fn new(store: SessionStore) -> Self {
        Self { store }
    }

    pub fn user(&self) -> Option<Arc<dyn UserHandle>> {
        self.store.user()
    }

    pub fn auth_enabled(&self) -> bool {
        self.store.auth_enabled()
    }

    pub fn is_authenticated(&self) -> bool {
        self.store.is_authenticated()
    }

    /// See [`SessionStore::get_fresh_token`].
    pub async fn get_token(&self) -> Option<String> {
        self.store.get_fresh_token().await
    }

    pub fn login(&self, user: Arc<dyn UserHandle>) {
        self.store.set_user(user);
    }

    pub fn logout(&self) {
        self.store.clear_user();
    }
}
