pub mod auth;
pub mod store;

pub use auth::Auth;
pub use store::{Session, SessionStore};
