pub mod base;
pub mod error;
pub mod firebase;

use std::sync::Arc;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub use base::{AuthStateListener, AuthStateNotifier, Listeners, Subscription, UserHandle};
pub use error::IdentityError;
pub use firebase::{FirebaseConfig, FirebaseIdentity, FirebaseUser};

/// Which identity provider backs the session. We differentiate them via a
/// "type" tag in the YAML.
#[derive(Deserialize, Serialize, JsonSchema, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum IdentityConfig {
    #[serde(rename = "firebase")]
    Firebase(FirebaseConfig),
}

/// Create the identity provider described by `config`.
pub fn create_identity(config: &IdentityConfig) -> Arc<FirebaseIdentity> {
    match config {
        IdentityConfig::Firebase(cfg) => Arc::new(FirebaseIdentity::new(cfg)),
    }
}
