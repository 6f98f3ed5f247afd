// Session Gateway - library root

pub mod auth;
pub mod classifier;
pub mod config;
pub mod error;
pub mod http_client;
pub mod session;

pub use error::{Result, SessionError};
pub use session::Session;
