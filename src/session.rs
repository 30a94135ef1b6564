//! Resumable session identity.
//!
//! Set wholesale when READY arrives, cleared when the gateway refuses a
//! resume. Only the connection state machine writes it.

/// Session id and resume endpoint issued by READY.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionIdentity {
    /// Opaque session id.
    pub session_id: String,
    /// Endpoint for resuming this session.
    pub resume_url: String,
}

/// Holds the current session, if any.
#[derive(Debug, Default)]
pub struct SessionManager {
    identity: Option<SessionIdentity>,
}

impl SessionManager {
    /// Create an empty session manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the session id and resume endpoint together.
    pub(crate) fn set(&mut self, identity: SessionIdentity) {
        self.identity = Some(identity);
    }

    /// Forget the session.
    pub(crate) fn clear(&mut self) {
        self.identity = None;
    }

    pub fn identity(&self) -> Option<&SessionIdentity> {
        self.identity.as_ref()
    }

    pub fn session_id(&self) -> Option<&str> {
        self.identity.as_ref().map(|s| s.session_id.as_str())
    }

    pub fn resume_url(&self) -> Option<&str> {
        self.identity.as_ref().map(|s| s.resume_url.as_str())
    }

    /// Check if a session is held.
    pub fn is_resumable(&self) -> bool {
        self.identity.is_some()
    }
}
