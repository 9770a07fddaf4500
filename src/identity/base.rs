use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use async_trait::async_trait;

use super::error::IdentityError;

/// A signed-in identity-provider session.
///
/// The only thing the rest of the crate asks of a handle is a bearer token,
/// which the provider may serve from cache or refresh over the network.
#[async_trait]
pub trait UserHandle: Send + Sync + fmt::Debug {
    /// Stable provider-side user id.
    fn uid(&self) -> &str;

    /// Returns a currently valid ID token, refreshing it when stale.
    async fn get_id_token(&self) -> Result<String, IdentityError>;
}

/// Callback invoked with the new user (or `None` on sign-out).
pub type AuthStateListener = Arc<dyn Fn(Option<Arc<dyn UserHandle>>) + Send + Sync>;

/// Source of sign-in/sign-out notifications.
pub trait AuthStateNotifier: Send + Sync {
    fn current_user(&self) -> Option<Arc<dyn UserHandle>>;

    /// Registers `listener`. Implementations call it once right away with the
    /// current user, then on every change until the subscription is dropped.
    fn on_auth_state_changed(&self, listener: AuthStateListener) -> Subscription;
}

/// Keeps a listener registered; dropping it unsubscribes.
#[must_use = "dropping a Subscription unregisters its listener"]
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    pub fn new(cancel: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

#[derive(Default)]
struct ListenerTable {
    next_id: u64,
    entries: Vec<(u64, AuthStateListener)>,
}

/// Listener registry shared by notifier implementations.
#[derive(Default, Clone)]
pub struct Listeners {
    table: Arc<Mutex<ListenerTable>>,
}

fn lock(table: &Mutex<ListenerTable>) -> MutexGuard<'_, ListenerTable> {
    table.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Listeners {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, listener: AuthStateListener) -> Subscription {
        let id = {
            let mut table = lock(&self.table);
            let id = table.next_id;
            table.next_id += 1;
            table.entries.push((id, listener));
            id
        };

        let table: Weak<Mutex<ListenerTable>> = Arc::downgrade(&self.table);
        Subscription::new(move || {
            if let Some(table) = table.upgrade() {
                lock(&table).entries.retain(|(entry_id, _)| *entry_id != id);
            }
        })
    }

    /// Calls every registered listener. The registry lock is released first
    /// so a listener may subscribe or unsubscribe without deadlocking.
    pub fn notify(&self, user: Option<Arc<dyn UserHandle>>) {
        let snapshot: Vec<AuthStateListener> = lock(&self.table)
            .entries
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();

        for listener in snapshot {
            listener(user.clone());
        }
    }

    pub fn len(&self) -> usize {
        lock(&self.table).entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
