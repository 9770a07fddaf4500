//! Session state and a token-attaching HTTP client for applications that
//! sign users in through an external identity provider.

pub mod api;
pub mod config;
pub mod identity;
pub mod session;
pub mod startup;
pub mod state;
pub mod utils;
