// Authentication module
// Manages token lifecycle, credential storage and session teardown

mod api;
pub mod codec;
mod manager;
mod store;
mod teardown;
mod types;

pub use api::AuthApi;
pub use manager::TokenManager;
pub use store::{CredentialStore, MemoryStore, SqliteStore};
pub use teardown::SessionTeardown;
pub use types::{CredentialPair, SessionEvent, TokenChunks};
