use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError, RwLock, Weak};

use chrono::{DateTime, Duration, TimeZone, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use tokio::task::JoinHandle;

use super::api::AuthApi;
use super::codec;
use super::store::CredentialStore;
use super::teardown::SessionTeardown;
use super::types::{
    ACCESS_TOKEN_PART1_KEY, ACCESS_TOKEN_PART2_KEY, ALL_KEYS, REFRESH_TOKEN_KEY, TOKEN_EXPIRY_KEY,
};
use crate::error::{Result, SessionError};

/// Pending refresh shared by every caller that asks while it runs
type RefreshTicket = Shared<BoxFuture<'static, Result<String>>>;

/// Armed one-shot proactive refresh
struct ProactiveTimer {
    generation: u64,
    deadline: DateTime<Utc>,
    handle: JoinHandle<()>,
}

/// Token lifecycle manager
/// Owns the stored credential pair, its expiry, the in-flight refresh and the proactive timer
pub struct TokenManager {
    /// Persistent credential storage (only this type writes to it)
    store: Arc<dyn CredentialStore>,

    /// Backend client for refresh requests
    api: AuthApi,

    /// Cached access token expiry.
    /// Held for writing across a whole save or clear so header reads never see a partial session.
    expires_at: RwLock<Option<DateTime<Utc>>>,

    /// At most one refresh runs at a time
    in_flight: Mutex<Option<RefreshTicket>>,

    /// At most one proactive timer per session
    proactive: Mutex<Option<ProactiveTimer>>,

    timer_generation: AtomicU64,

    /// Bumped by every clear. A refresh started under an older epoch must not persist.
    session_epoch: AtomicU64,

    /// Ends the session when a proactive refresh fails
    teardown: OnceLock<Weak<SessionTeardown>>,

    /// Lead time before expiry at which the proactive refresh fires
    safety_margin: Duration,
}

impl TokenManager {
    pub fn new(store: Arc<dyn CredentialStore>, api: AuthApi, safety_margin_secs: u64) -> Self {
        Self {
            store,
            api,
            expires_at: RwLock::new(None),
            in_flight: Mutex::new(None),
            proactive: Mutex::new(None),
            timer_generation: AtomicU64::new(0),
            session_epoch: AtomicU64::new(0),
            teardown: OnceLock::new(),
            safety_margin: Duration::seconds(safety_margin_secs as i64),
        }
    }

    /// Route proactive refresh failures to the session teardown
    pub fn attach_teardown(&self, teardown: &Arc<SessionTeardown>) {
        if self.teardown.set(Arc::downgrade(teardown)).is_err() {
            tracing::warn!("Session teardown already attached, keeping the first one");
        }
    }

    /// Reload the persisted expiry after a restart.
    /// Returns the expiry of a complete stored session, or `None` if there is none.
    /// A store holding tokens without the expiry marker is a partial save and is wiped.
    pub fn restore(&self) -> Result<Option<DateTime<Utc>>> {
        let mut cached = self.expires_at.write().unwrap_or_else(PoisonError::into_inner);

        let marker = self.store.get(TOKEN_EXPIRY_KEY)?;
        let part1 = self.store.get(ACCESS_TOKEN_PART1_KEY)?;
        let part2 = self.store.get(ACCESS_TOKEN_PART2_KEY)?;
        let refresh = self.store.get(REFRESH_TOKEN_KEY)?;

        let complete = part1.is_some() && part2.is_some() && refresh.is_some();
        let expires_at = match marker {
            Some(ref millis) if complete => millis
                .parse::<i64>()
                .ok()
                .and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
            _ => None,
        };

        match expires_at {
            Some(exp) => {
                tracing::info!("Restored session, access token expires: {}", exp.to_rfc3339());
                *cached = Some(exp);
                Ok(Some(exp))
            }
            None => {
                if marker.is_some() || part1.is_some() || part2.is_some() || refresh.is_some() {
                    tracing::warn!("Stored session is incomplete, clearing it");
                    self.wipe_store()?;
                }
                *cached = None;
                Ok(None)
            }
        }
    }

    /// Persist a new credential pair.
    /// Writes the expiry last: until it lands the session reads as absent.
    pub fn save(&self, access_token: &str, refresh_token: &str) -> Result<DateTime<Utc>> {
        self.persist(access_token, refresh_token, None)
    }

    /// Write a credential pair; with `epoch` set, refuse if the session was cleared since
    fn persist(
        &self,
        access_token: &str,
        refresh_token: &str,
        epoch: Option<u64>,
    ) -> Result<DateTime<Utc>> {
        let claims = codec::decode_claims(access_token)?;
        let expires_at = claims.expires_at()?;
        let chunks = codec::split(access_token);

        let mut cached = self.expires_at.write().unwrap_or_else(PoisonError::into_inner);

        if epoch.is_some_and(|epoch| epoch != self.session_epoch.load(Ordering::SeqCst)) {
            tracing::info!("Session cleared during refresh, discarding new credentials");
            return Err(SessionError::NoSession);
        }

        let written = self
            .store
            .delete(TOKEN_EXPIRY_KEY)
            .and_then(|_| self.store.set(ACCESS_TOKEN_PART1_KEY, &chunks.part1))
            .and_then(|_| self.store.set(ACCESS_TOKEN_PART2_KEY, &chunks.part2))
            .and_then(|_| self.store.set(REFRESH_TOKEN_KEY, refresh_token))
            .and_then(|_| {
                self.store
                    .set(TOKEN_EXPIRY_KEY, &claims.expires_at_millis().to_string())
            });

        if let Err(e) = written {
            tracing::error!("Failed to persist credentials, clearing partial session: {}", e);
            *cached = None;
            if let Err(wipe_err) = self.wipe_store() {
                tracing::warn!("Failed to clear partial session: {}", wipe_err);
            }
            return Err(e.into());
        }

        *cached = Some(expires_at);
        tracing::debug!("Credentials saved, access token expires: {}", expires_at.to_rfc3339());
        Ok(expires_at)
    }

    /// Delete every stored credential and stop the proactive timer.
    /// Calling it with nothing stored is a no-op.
    pub fn clear(&self) -> Result<()> {
        // Bumped before cancelling so a refresh settling concurrently cannot re-arm
        self.session_epoch.fetch_add(1, Ordering::SeqCst);
        self.cancel_proactive_refresh();

        let mut cached = self.expires_at.write().unwrap_or_else(PoisonError::into_inner);
        *cached = None;
        self.wipe_store()
    }

    /// Clear unless the session already moved past `epoch`
    fn clear_epoch(&self, epoch: u64) -> Result<()> {
        if self.session_epoch.load(Ordering::SeqCst) != epoch {
            tracing::debug!("Session already cleared, leaving the store alone");
            return Ok(());
        }
        self.clear()
    }

    /// Attempt every key even if one fails; report the first failure
    fn wipe_store(&self) -> Result<()> {
        let mut first_error = None;
        for key in ALL_KEYS {
            if let Err(e) = self.store.delete(key) {
                tracing::warn!("Failed to delete credential '{}': {}", key, e);
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }

    /// Authorization header for the stored access token
    pub fn get_auth_header(&self) -> Result<HeaderMap> {
        let token = {
            let _guard = self.expires_at.read().unwrap_or_else(PoisonError::into_inner);

            let marker = self.store.get(TOKEN_EXPIRY_KEY)?;
            let part1 = self.store.get(ACCESS_TOKEN_PART1_KEY)?;
            let part2 = self.store.get(ACCESS_TOKEN_PART2_KEY)?;
            match (marker, part1, part2) {
                (Some(_), Some(part1), Some(part2)) => codec::join(&part1, &part2),
                _ => return Err(SessionError::NoSession),
            }
        };

        let value = HeaderValue::from_str(&format!("Bearer {}", token)).map_err(|_| {
            SessionError::MalformedToken("token contains characters not valid in a header".to_string())
        })?;

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, value);
        Ok(headers)
    }

    /// Cached expiry of the current access token
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        *self.expires_at.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether a refresh is currently running
    pub fn refresh_in_flight(&self) -> bool {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Refresh the access token and return the new one.
    /// Concurrent callers share one backend call and all receive its outcome.
    pub async fn refresh(self: &Arc<Self>) -> Result<String> {
        let ticket = self.ticket();
        ticket.await
    }

    fn ticket(self: &Arc<Self>) -> RefreshTicket {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(ticket) = in_flight.as_ref() {
            tracing::debug!("Refresh already in flight, joining it");
            return ticket.clone();
        }

        let this = Arc::clone(self);
        let ticket = async move { this.run_refresh().await }.boxed().shared();
        *in_flight = Some(ticket.clone());
        ticket
    }

    async fn run_refresh(self: Arc<Self>) -> Result<String> {
        let epoch = self.session_epoch.load(Ordering::SeqCst);
        let result = self.perform_refresh(epoch).await;

        if let Err(ref e) = result {
            tracing::error!("Token refresh failed: {}", e);
            if let Err(clear_err) = self.clear_epoch(epoch) {
                tracing::warn!("Failed to clear credentials after refresh failure: {}", clear_err);
            }
        }

        // Settled: the next caller starts a fresh attempt
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        let (access_token, expires_at) = result?;

        // Armed just before awaiters receive the token. A timer inside the margin
        // finds the slot empty and starts its own refresh.
        match self.arm_proactive_refresh(expires_at, epoch) {
            Some(_) => Ok(access_token),
            None => Err(SessionError::NoSession),
        }
    }

    async fn perform_refresh(&self, epoch: u64) -> Result<(String, DateTime<Utc>)> {
        let refresh_token = {
            let _guard = self.expires_at.read().unwrap_or_else(PoisonError::into_inner);
            self.store.get(REFRESH_TOKEN_KEY)?
        }
        .ok_or(SessionError::NoSession)?;

        match codec::decode_claims(&refresh_token) {
            Ok(claims) => {
                let exp = claims.expires_at()?;
                if exp <= Utc::now() {
                    tracing::warn!("Refresh token expired at {}", exp.to_rfc3339());
                    return Err(SessionError::RefreshTokenExpired(exp));
                }
            }
            Err(e) => {
                tracing::debug!("Refresh token carries no readable expiry ({}), leaving it to the backend", e);
            }
        }

        let pair = self
            .api
            .refresh(&refresh_token)
            .await
            .map_err(|e| SessionError::RefreshFailed(Box::new(e)))?;

        let expires_at = self.persist(&pair.access_token, &pair.refresh_token, Some(epoch))?;
        Ok((pair.access_token, expires_at))
    }

    /// Arm the proactive timer against the cached expiry.
    /// Returns the instant the refresh is planned for, or `None` without a session.
    pub fn schedule_proactive_refresh(self: &Arc<Self>) -> Option<DateTime<Utc>> {
        let epoch = self.session_epoch.load(Ordering::SeqCst);
        match self.expires_at() {
            Some(expires_at) => self.arm_proactive_refresh(expires_at, epoch),
            None => {
                tracing::debug!("No session, proactive refresh not armed");
                None
            }
        }
    }

    /// Returns `None` without arming if the session was cleared since `epoch`
    fn arm_proactive_refresh(
        self: &Arc<Self>,
        expires_at: DateTime<Utc>,
        epoch: u64,
    ) -> Option<DateTime<Utc>> {
        let deadline = expires_at - self.safety_margin;
        let delay = (deadline - Utc::now()).to_std().unwrap_or_default();

        let mut slot = self.proactive.lock().unwrap_or_else(PoisonError::into_inner);
        if epoch != self.session_epoch.load(Ordering::SeqCst) {
            tracing::debug!("Session cleared, proactive refresh not armed");
            return None;
        }
        if let Some(previous) = slot.take() {
            previous.handle.abort();
        }

        let generation = self.timer_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let this = Arc::clone(self);
        let handle = tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            this.fire_proactive_refresh(generation).await;
        });

        tracing::debug!(
            deadline = %deadline.to_rfc3339(),
            delay_secs = delay.as_secs(),
            "Proactive refresh armed"
        );

        *slot = Some(ProactiveTimer {
            generation,
            deadline,
            handle,
        });
        Some(deadline)
    }

    async fn fire_proactive_refresh(self: Arc<Self>, generation: u64) {
        {
            let mut slot = self.proactive.lock().unwrap_or_else(PoisonError::into_inner);
            match slot.as_ref() {
                Some(timer) if timer.generation == generation => {
                    // Detach without aborting: this task is the timer
                    slot.take();
                }
                _ => return,
            }
        }

        tracing::info!("Proactive refresh firing");
        // A successful refresh re-arms the timer against the new expiry
        if let Err(e) = self.refresh().await {
            tracing::warn!("Proactive refresh failed, not rescheduling: {}", e);

            // A newer session stored meanwhile is not ours to end
            if self.expires_at().is_none() {
                if let Some(teardown) = self.teardown.get().and_then(Weak::upgrade) {
                    teardown.teardown("proactive refresh");
                }
            }
        }
    }

    /// Cancel the proactive timer if one is armed
    pub fn cancel_proactive_refresh(&self) {
        let mut slot = self.proactive.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(timer) = slot.take() {
            timer.handle.abort();
            tracing::debug!("Proactive refresh cancelled");
        }
    }

    /// Instant the armed proactive refresh will fire at
    pub fn next_proactive_refresh(&self) -> Option<DateTime<Utc>> {
        self.proactive
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|timer| timer.deadline)
    }
}
