// Authentication types

use serde::{Deserialize, Serialize};

/// Storage key for the first half of the access token
pub const ACCESS_TOKEN_PART1_KEY: &str = "access_token_part1";

/// Storage key for the second half of the access token
pub const ACCESS_TOKEN_PART2_KEY: &str = "access_token_part2";

/// Storage key for the refresh token
pub const REFRESH_TOKEN_KEY: &str = "refresh_token";

/// Storage key for the access token expiry (epoch milliseconds).
/// Written last on save; its presence marks a complete session.
pub const TOKEN_EXPIRY_KEY: &str = "token_expiry";

/// Every key owned by the lifecycle manager, in deletion order
pub const ALL_KEYS: [&str; 4] = [
    TOKEN_EXPIRY_KEY,
    ACCESS_TOKEN_PART1_KEY,
    ACCESS_TOKEN_PART2_KEY,
    REFRESH_TOKEN_KEY,
];

/// Access/refresh token pair issued by the backend
#[derive(Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialPair {
    pub access_token: String,
    pub refresh_token: String,
}

impl std::fmt::Debug for CredentialPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialPair")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .finish()
    }
}

/// Access token split for storage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenChunks {
    pub part1: String,
    pub part2: String,
}

/// Login request body
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest<'a> {
    pub identifier: &'a str,
    pub secret: &'a str,
}

/// Refresh request body
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest<'a> {
    pub refresh_token: &'a str,
}

/// Events published to application state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The session is over; the UI should return to its unauthenticated entry point
    Ended { reason: String },
}
