use super::identity::Identity;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Provider session tuple. Always handled as a whole.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Kind of provider-originated session change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionEvent {
    SignedIn,
    SignedOut,
    UserUpdated,
    TokenRefreshed,
}

/// Notification delivered by the provider's session-change subscription.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionChange {
    pub event: SessionEvent,
    pub identity: Option<Identity>,
    pub session: Option<Session>,
}

impl SessionChange {
    pub fn new(event: SessionEvent) -> Self {
        Self {
            event,
            identity: None,
            session: None,
        }
    }

    pub fn with_identity(mut self, identity: Identity) -> Self {
        self.identity = Some(identity);
        self
    }

    pub fn with_session(mut self, session: Session) -> Self {
        self.session = Some(session);
        self
    }
}

/// Result of a provider OTP check. Nothing is stored or announced until the
/// caller activates the session.
#[derive(Debug, Clone, PartialEq)]
pub struct OtpVerification {
    pub identity: Identity,
    pub session: Option<Session>,
}

/// Result of a provider sign-up.
#[derive(Debug, Clone, PartialEq)]
pub struct SignUp {
    pub identity: Identity,
    pub session: Option<Session>,
}
