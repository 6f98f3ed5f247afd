// Backend authentication endpoints
// Login and refresh calls; both bypass the session pipeline

use std::time::Duration;

use reqwest::Client;

use super::types::{CredentialPair, LoginRequest, RefreshRequest};
use crate::config::Config;
use crate::error::{NetworkErrorKind, Result, SessionError};

/// Client for the backend's login and refresh endpoints
#[derive(Clone)]
pub struct AuthApi {
    client: Client,
    base_url: String,
    login_path: String,
    refresh_path: String,
}

impl AuthApi {
    pub fn new(config: &Config) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(config.http_connect_timeout))
            .timeout(Duration::from_secs(config.http_request_timeout))
            .build()
            .map_err(|e| SessionError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            login_path: config.login_path.clone(),
            refresh_path: config.refresh_path.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Exchange an identifier and secret for a credential pair
    pub async fn login(&self, identifier: &str, secret: &str) -> Result<CredentialPair> {
        tracing::info!("Logging in as {}...", identifier);

        let url = self.url(&self.login_path);
        let body = LoginRequest { identifier, secret };
        let pair = self.post_for_pair(&url, &body, "login").await?;

        tracing::info!("Login succeeded");
        Ok(pair)
    }

    /// Exchange a refresh token for a new credential pair
    pub async fn refresh(&self, refresh_token: &str) -> Result<CredentialPair> {
        tracing::info!("Refreshing access token...");

        let url = self.url(&self.refresh_path);
        let body = RefreshRequest { refresh_token };
        let pair = self.post_for_pair(&url, &body, "refresh").await?;

        tracing::info!("Access token refreshed");
        Ok(pair)
    }

    async fn post_for_pair<B: serde::Serialize>(
        &self,
        url: &str,
        body: &B,
        operation: &str,
    ) -> Result<CredentialPair> {
        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                let kind = NetworkErrorKind::from_reqwest(&e);
                tracing::warn!(
                    operation = operation,
                    error_kind = %kind,
                    error = %e,
                    "Authentication request failed"
                );
                SessionError::network(&e)
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            tracing::error!(
                operation = operation,
                status = status.as_u16(),
                body = %error_text,
                "Authentication endpoint rejected request"
            );
            return Err(SessionError::Http {
                status: status.as_u16(),
                message: error_text,
            });
        }

        let pair: CredentialPair = response.json().await.map_err(|e| {
            SessionError::Internal(format!("Failed to parse {} response: {}", operation, e))
        })?;

        if pair.access_token.is_empty() || pair.refresh_token.is_empty() {
            return Err(SessionError::Internal(format!(
                "{} response does not contain both tokens",
                operation
            )));
        }

        Ok(pair)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_joining() {
        let mut config = Config::default();
        config.api_base_url = "https://api.example.com/".to_string();
        let api = AuthApi::new(&config).unwrap();
        assert_eq!(api.url("/auth/refresh"), "https://api.example.com/auth/refresh");
        assert_eq!(api.url(&config.login_path), "https://api.example.com/auth/login");
    }
}
