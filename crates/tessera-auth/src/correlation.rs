//! Interactive session correlation.
//!
//! During the authorization stage of a save there is no token or code in
//! storage yet that ties the protocol request to the interactive login
//! session. The login flow deposits a pending session id (and the branding
//! label it resolved) here, and the reconstructor consumes the marker exactly
//! once when it persists the code stage.

use std::sync::Mutex;

use uuid::Uuid;

/// Ambient correlation state for the authorization stage.
///
/// Implementations are typically backed by the interactive login session
/// (server-side HTTP session, encrypted cookie, or similar). The pending
/// marker must be cleared exactly once per authorization-stage save.
pub trait SessionCorrelation: Send + Sync {
    /// The pending auth session id, if the login flow set one.
    fn pending_session(&self) -> Option<Uuid>;

    /// Clears the pending marker. Called by the reconstructor after the
    /// code stage has been durably written.
    fn clear_pending_session(&self);

    /// The branding label the login flow resolved, if any.
    fn branding(&self) -> Option<String>;
}

/// In-process correlation state, used by tests and embedded deployments.
#[derive(Debug, Default)]
pub struct InMemoryCorrelation {
    inner: Mutex<CorrelationState>,
}

#[derive(Debug, Default)]
struct CorrelationState {
    pending: Option<Uuid>,
    branding: Option<String>,
}

impl InMemoryCorrelation {
    /// Creates empty correlation state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Deposits a pending session id, as the login flow would.
    pub fn set_pending_session(&self, session_id: Uuid) {
        self.inner.lock().expect("correlation lock").pending = Some(session_id);
    }

    /// Deposits a branding label.
    pub fn set_branding(&self, branding: impl Into<String>) {
        self.inner.lock().expect("correlation lock").branding = Some(branding.into());
    }
}

impl SessionCorrelation for InMemoryCorrelation {
    fn pending_session(&self) -> Option<Uuid> {
        self.inner.lock().expect("correlation lock").pending
    }

    fn clear_pending_session(&self) {
        self.inner.lock().expect("correlation lock").pending = None;
    }

    fn branding(&self) -> Option<String> {
        self.inner.lock().expect("correlation lock").branding.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pending_set_and_clear() {
        let correlation = InMemoryCorrelation::new();
        assert!(correlation.pending_session().is_none());

        let id = Uuid::new_v4();
        correlation.set_pending_session(id);
        assert_eq!(correlation.pending_session(), Some(id));

        correlation.clear_pending_session();
        assert!(correlation.pending_session().is_none());
    }

    #[test]
    fn test_branding() {
        let correlation = InMemoryCorrelation::new();
        assert!(correlation.branding().is_none());
        correlation.set_branding("acme");
        assert_eq!(correlation.branding().as_deref(), Some("acme"));
    }
}
