// This module re-exports important pieces for convenience,
// so we can "use crate::config::*" easily.
pub mod auth;
pub mod config;
pub mod logging;

pub use auth::*;
pub use config::*;
pub use logging::*;
