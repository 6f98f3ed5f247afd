// Session teardown
// Ends a session once: clears credentials and signals application state

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast;

use super::manager::TokenManager;
use super::types::SessionEvent;

pub struct SessionTeardown {
    manager: Arc<TokenManager>,
    active: AtomicBool,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionTeardown {
    pub fn new(manager: Arc<TokenManager>) -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            manager,
            active: AtomicBool::new(false),
            events,
        }
    }

    /// Mark a session as live so the next teardown takes effect
    pub fn arm(&self) {
        self.active.store(true, Ordering::SeqCst);
    }

    pub fn is_armed(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Clear credentials and emit `SessionEvent::Ended`.
    /// Only the first call per armed session does anything; returns whether this call did.
    pub fn teardown(&self, context: &str) -> bool {
        if !self.active.swap(false, Ordering::SeqCst) {
            tracing::debug!(context = context, "Session already torn down");
            return false;
        }

        tracing::info!(context = context, "Tearing down session");

        // Storage failures must not keep the user signed in
        if let Err(e) = self.manager.clear() {
            tracing::error!(context = context, "Failed to clear credentials during teardown: {}", e);
        }

        // No receivers is fine: nobody is listening yet
        let _ = self.events.send(SessionEvent::Ended {
            reason: context.to_string(),
        });
        true
    }
}
