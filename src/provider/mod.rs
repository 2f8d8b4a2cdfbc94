//! Identity provider seam.
//!
//! Layout:
//! - `mod.rs`: the `IdentityProvider` trait, its error type, and the
//!   session-change subscription plumbing shared by implementations
//! - `endpoints.rs`: stateless GoTrue REST calls
//! - `gotrue.rs`: `GoTrueClient`, a stateful `IdentityProvider` over HTTP

pub mod endpoints;
pub mod gotrue;

use crate::types::{Identity, OtpVerification, Session, SessionChange, SignUp};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use thiserror::Error as ThisError;
use tracing::debug;

pub use gotrue::GoTrueClient;

/// Raw failure reported by an identity provider. Translated into
/// [`crate::AuthSyncError`] before reaching callers.
#[derive(Debug, Clone, ThisError, PartialEq, Eq)]
pub enum ProviderError {
    #[error("provider returned {status}: {message}")]
    Api {
        status: u16,
        code: Option<String>,
        message: String,
    },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("decode error: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            ProviderError::Decode(e.to_string())
        } else {
            ProviderError::Transport(e.to_string())
        }
    }
}

pub type SessionChangeCallback = Arc<dyn Fn(SessionChange) + Send + Sync>;

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Check the code. Must not store the session or notify listeners; see
    /// [`activate_session`](Self::activate_session).
    async fn verify_otp(&self, email: &str, code: &str) -> Result<OtpVerification, ProviderError>;

    /// Adopt a session obtained from `verify_otp` and announce the sign-in.
    fn activate_session(&self, identity: &Identity, session: Session);

    /// Seed the provider with a previously persisted session, refreshing it
    /// if expired. Returns the session now in effect.
    async fn restore_session(&self, session: Session) -> Result<Session, ProviderError>;

    async fn resend(&self, email: &str) -> Result<(), ProviderError>;

    async fn sign_in(&self, email: &str, password: &str) -> Result<Session, ProviderError>;

    async fn sign_up(&self, email: &str, password: &str) -> Result<SignUp, ProviderError>;

    async fn sign_out(&self) -> Result<(), ProviderError>;

    async fn get_session(&self) -> Result<Option<Session>, ProviderError>;

    async fn get_user(&self) -> Result<Option<Identity>, ProviderError>;

    /// Register `callback` for session changes until the returned
    /// [`Subscription`] is unsubscribed or dropped.
    fn on_session_change(&self, callback: SessionChangeCallback) -> Subscription;
}

/// Callback registry backing `on_session_change`.
#[derive(Default)]
pub struct SessionListeners {
    inner: Arc<ListenerTable>,
}

#[derive(Default)]
struct ListenerTable {
    next_id: AtomicU64,
    callbacks: Mutex<BTreeMap<u64, SessionChangeCallback>>,
}

impl SessionListeners {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, callback: SessionChangeCallback) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, callback);
        debug!(subscription = id, "session listener registered");
        Subscription {
            id,
            table: Arc::downgrade(&self.inner),
        }
    }

    /// Invoke every registered callback, in registration order.
    pub fn emit(&self, change: SessionChange) {
        // Snapshot so callbacks may unsubscribe without deadlocking.
        let callbacks: Vec<SessionChangeCallback> = self
            .inner
            .callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        debug!(event = ?change.event, listeners = callbacks.len(), "emitting session change");
        for callback in callbacks {
            callback(change.clone());
        }
    }

    pub fn len(&self) -> usize {
        self.inner
            .callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Unsubscribe handle returned by [`IdentityProvider::on_session_change`].
pub struct Subscription {
    id: u64,
    table: Weak<ListenerTable>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn unsubscribe(self) {
        // Drop does the work.
    }

    fn remove(&self) {
        if let Some(table) = self.table.upgrade() {
            table
                .callbacks
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&self.id);
            debug!(subscription = self.id, "session listener removed");
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.remove();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SessionEvent;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn dropping_subscription_stops_delivery() {
        let listeners = SessionListeners::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let sub = listeners.subscribe(Arc::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        listeners.emit(SessionChange::new(SessionEvent::SignedOut));
        sub.unsubscribe();
        listeners.emit(SessionChange::new(SessionEvent::SignedOut));

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(listeners.is_empty());
    }

    #[test]
    fn every_listener_sees_each_change_once() {
        let listeners = SessionListeners::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let subs: Vec<_> = (0..3)
            .map(|_| {
                let counter = hits.clone();
                listeners.subscribe(Arc::new(move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                }))
            })
            .collect();

        listeners.emit(SessionChange::new(SessionEvent::TokenRefreshed));

        assert_eq!(hits.load(Ordering::SeqCst), 3);
        drop(subs);
        assert!(listeners.is_empty());
    }
}
