use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{Client, Method, Response};
use std::sync::Arc;
use std::time::Duration;

use crate::auth::{SessionTeardown, TokenManager};
use crate::classifier::{FailureClassifier, FailureOutcome};
use crate::config::Config;
use crate::error::{NetworkErrorKind, Result, SessionError};

/// Per-request state carried across the original attempt and its single retry
struct RequestContext {
    request_id: String,
    method: Method,
    path: String,
    url: String,
    body: Option<serde_json::Value>,
    headers: HeaderMap,
    /// 0 for the original attempt, 1 once the auth retry has been spent
    retry_count: u8,
}

impl RequestContext {
    fn describe(&self) -> String {
        format!("{} {}", self.method, self.path)
    }
}

/// Authenticated HTTP client.
/// Attaches the session's bearer token and recovers from one authorization failure per request.
pub struct SessionHttpClient {
    /// Shared HTTP client with connection pooling
    client: Client,

    base_url: String,

    /// Paths sent without an Authorization header
    auth_endpoints: Vec<String>,

    manager: Arc<TokenManager>,

    teardown: Arc<SessionTeardown>,

    classifier: Arc<FailureClassifier>,
}

impl SessionHttpClient {
    pub fn new(
        config: &Config,
        manager: Arc<TokenManager>,
        teardown: Arc<SessionTeardown>,
        classifier: Arc<FailureClassifier>,
    ) -> Result<Self> {
        let client = Client::builder()
            .pool_max_idle_per_host(config.http_max_connections)
            .connect_timeout(Duration::from_secs(config.http_connect_timeout))
            .timeout(Duration::from_secs(config.http_request_timeout))
            .build()
            .map_err(|e| SessionError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            auth_endpoints: config.auth_endpoints.clone(),
            manager,
            teardown,
            classifier,
        })
    }

    /// Whether `path` is one of the designated authentication endpoints
    pub fn is_auth_endpoint(&self, path: &str) -> bool {
        let path = path.split('?').next().unwrap_or(path);
        let path = path.trim_end_matches('/');
        self.auth_endpoints.iter().any(|endpoint| endpoint == path)
    }

    /// Send a request on behalf of the session.
    ///
    /// On a 401 from a protected endpoint the access token is refreshed once and the
    /// request is resent with the new token. A second 401 is returned as
    /// `AuthorizationFailure`; a failed refresh ends the session and returns the refresh error.
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
        extra_headers: Option<HeaderMap>,
    ) -> Result<Response> {
        let mut ctx = RequestContext {
            request_id: uuid::Uuid::new_v4().to_string()[..8].to_string(),
            url: format!("{}{}", self.base_url, path),
            path: path.to_string(),
            method,
            body,
            headers: extra_headers.unwrap_or_default(),
            retry_count: 0,
        };

        let protected = !self.is_auth_endpoint(path);

        tracing::debug!(
            request_id = %ctx.request_id,
            method = %ctx.method,
            url = %ctx.url,
            protected = protected,
            "Sending HTTP request"
        );

        let mut headers = ctx.headers.clone();
        if protected {
            match self.manager.get_auth_header() {
                Ok(auth) => headers.extend(auth),
                Err(e) => {
                    tracing::warn!(request_id = %ctx.request_id, "No usable session for request: {}", e);
                    if e.is_session_fatal() {
                        self.teardown.teardown(&ctx.describe());
                    }
                    return Err(e);
                }
            }
        }

        let response = self.send(&ctx, headers).await?;
        let status = response.status();
        if status.is_success() {
            tracing::debug!(request_id = %ctx.request_id, status = %status, "Request successful");
            return Ok(response);
        }

        self.classifier.observe(
            FailureOutcome::Status(status.as_u16()),
            ctx.method.as_str(),
            &ctx.url,
        );

        if status.as_u16() != 401 || !protected {
            return Err(Self::http_error(response).await);
        }

        // 401: refresh once, then resend directly through the transport
        ctx.retry_count += 1;
        tracing::warn!(
            request_id = %ctx.request_id,
            attempt = ctx.retry_count,
            "Received 401, refreshing token and retrying..."
        );

        let token = match self.manager.refresh().await {
            Ok(token) => token,
            Err(e) => {
                tracing::error!(request_id = %ctx.request_id, "Token refresh failed: {}", e);
                self.teardown.teardown(&ctx.describe());
                return Err(e);
            }
        };

        let mut headers = ctx.headers.clone();
        let value = HeaderValue::from_str(&format!("Bearer {}", token)).map_err(|_| {
            SessionError::MalformedToken("token contains characters not valid in a header".to_string())
        })?;
        headers.insert(AUTHORIZATION, value);

        let response = self.send(&ctx, headers).await?;
        let status = response.status();
        if status.is_success() {
            tracing::debug!(request_id = %ctx.request_id, status = %status, "Retried request successful");
            return Ok(response);
        }

        self.classifier.observe(
            FailureOutcome::Status(status.as_u16()),
            ctx.method.as_str(),
            &ctx.url,
        );

        if status.as_u16() == 401 {
            let message = response.text().await.unwrap_or_default();
            tracing::error!(
                request_id = %ctx.request_id,
                url = %ctx.url,
                total_attempts = ctx.retry_count + 1,
                "Still unauthorized after refresh"
            );
            return Err(SessionError::AuthorizationFailure {
                status: 401,
                message,
            });
        }

        Err(Self::http_error(response).await)
    }

    /// Execute one attempt through the transport
    async fn send(&self, ctx: &RequestContext, headers: HeaderMap) -> Result<Response> {
        let mut builder = self
            .client
            .request(ctx.method.clone(), &ctx.url)
            .headers(headers);
        if let Some(ref body) = ctx.body {
            builder = builder.json(body);
        }

        match builder.send().await {
            Ok(response) => {
                tracing::debug!(
                    request_id = %ctx.request_id,
                    status = %response.status(),
                    attempt = ctx.retry_count + 1,
                    "Received HTTP response"
                );
                Ok(response)
            }
            Err(e) => {
                let kind = NetworkErrorKind::from_reqwest(&e);
                tracing::warn!(
                    request_id = %ctx.request_id,
                    error_kind = %kind,
                    error = %e,
                    url = %ctx.url,
                    attempt = ctx.retry_count + 1,
                    "HTTP request error"
                );
                self.classifier
                    .observe(FailureOutcome::Network(kind), ctx.method.as_str(), &ctx.url);
                Err(SessionError::network(&e))
            }
        }
    }

    async fn http_error(response: Response) -> SessionError {
        let status = response.status().as_u16();
        let message = response.text().await.unwrap_or_default();
        SessionError::Http { status, message }
    }

    /// Get the underlying HTTP client
    pub fn client(&self) -> &Client {
        &self.client
    }
}
