//! Application startup.
//!
//! Reads configuration, installs logging, and wires the session to the
//! identity provider and the API client.

use std::path::Path;
use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};

use crate::api::ApiClient;
use crate::config::{load_config, ConfigV1};
use crate::identity::create_identity;
use crate::session::{Auth, SessionStore};
use crate::state::AppState;
use crate::utils::logger::{init_logging, LoggingError};

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("authentication is enabled but no identity provider is configured")]
    MissingIdentityConfig,

    #[error("error loading configuration: {0}")]
    Config(#[from] figment::Error),

    #[error(transparent)]
    Logging(#[from] LoggingError),
}

/// Builds the application state from an already loaded configuration.
///
/// The identity provider is only created when authentication is enabled;
/// otherwise the whole authentication path stays inert.
pub fn build(config: ConfigV1) -> Result<AppState, StartupError> {
    let config = Arc::new(config);

    let session = SessionStore::new();
    session.init(&config.auth);

    let (identity, subscription) = if config.auth.enabled {
        let identity_config = config
            .identity
            .as_ref()
            .ok_or(StartupError::MissingIdentityConfig)?;
        let identity = create_identity(identity_config);
        let subscription = session.attach(&*identity);
        info!("Identity provider ready.");
        (Some(identity), Some(Arc::new(subscription)))
    } else {
        if config.identity.is_some() {
            warn!("Identity provider configured but authentication is disabled; ignoring it.");
        }
        (None, None)
    };

    let auth = Auth::new(session.clone());
    let api = ApiClient::new(&config.api, auth.clone());
    info!("API client targeting '{}'", api.base_url());

    Ok(AppState {
        config,
        session,
        auth,
        api,
        identity,
        _subscription: subscription,
    })
}

/// Loads configuration from `config_path` and the environment, installs the
/// global logger, then [`build`]s the state.
pub fn start(config_path: impl AsRef<Path>) -> Result<AppState, StartupError> {
    let config = load_config(config_path)?;
    init_logging(&config.logging)?;
    build(config)
}
