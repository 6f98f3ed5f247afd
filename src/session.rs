// Session composition root
// Builds the session layer from configuration; owned by the application, passed to resource clients

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;

use crate::auth::{AuthApi, CredentialStore, SessionEvent, SessionTeardown, TokenManager};
use crate::classifier::{Alert, FailureClassifier};
use crate::config::Config;
use crate::error::Result;
use crate::http_client::SessionHttpClient;

pub struct Session {
    api: AuthApi,
    manager: Arc<TokenManager>,
    teardown: Arc<SessionTeardown>,
    classifier: Arc<FailureClassifier>,
    client: SessionHttpClient,
}

impl Session {
    pub fn new(config: &Config, store: Arc<dyn CredentialStore>) -> Result<Self> {
        let api = AuthApi::new(config)?;
        let manager = Arc::new(TokenManager::new(
            store,
            api.clone(),
            config.refresh_safety_margin,
        ));
        let teardown = Arc::new(SessionTeardown::new(manager.clone()));
        manager.attach_teardown(&teardown);
        let classifier = Arc::new(FailureClassifier::new());
        let client = SessionHttpClient::new(
            config,
            manager.clone(),
            teardown.clone(),
            classifier.clone(),
        )?;

        Ok(Self {
            api,
            manager,
            teardown,
            classifier,
            client,
        })
    }

    /// Pick up a session persisted by a previous run.
    /// Returns the access token expiry when one was found.
    pub fn restore(&self) -> Result<Option<DateTime<Utc>>> {
        let restored = self.manager.restore()?;
        if restored.is_some() {
            self.teardown.arm();
            self.manager.schedule_proactive_refresh();
        }
        Ok(restored)
    }

    /// Log in, store the issued credentials and start proactive refresh
    pub async fn login(&self, identifier: &str, secret: &str) -> Result<DateTime<Utc>> {
        let pair = self.api.login(identifier, secret).await?;
        let expires_at = self.manager.save(&pair.access_token, &pair.refresh_token)?;
        self.teardown.arm();
        self.manager.schedule_proactive_refresh();
        Ok(expires_at)
    }

    /// End the session. Returns false if there was no live session.
    pub fn logout(&self) -> bool {
        if self.teardown.teardown("logout") {
            return true;
        }
        // Nothing armed, but leftovers from a broken run still go
        if let Err(e) = self.manager.clear() {
            tracing::warn!("Failed to clear stored credentials: {}", e);
        }
        false
    }

    /// Authenticated client for resource requests
    pub fn client(&self) -> &SessionHttpClient {
        &self.client
    }

    pub fn manager(&self) -> &Arc<TokenManager> {
        &self.manager
    }

    /// Session lifecycle events (logout, teardown)
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.teardown.subscribe()
    }

    /// Classified failure alerts for the UI
    pub fn alerts(&self) -> broadcast::Receiver<Alert> {
        self.classifier.subscribe()
    }

    pub fn is_active(&self) -> bool {
        self.teardown.is_armed()
    }
}
