#![allow(dead_code)]

use async_trait::async_trait;
use authsync::config::SyncRetryConfig;
use authsync::db::{LocalProfile, ProfileStorage, ProfileStore, connect};
use authsync::provider::{
    IdentityProvider, ProviderError, SessionChangeCallback, SessionListeners, Subscription,
};
use authsync::service::ProfileSynchronizer;
use authsync::types::{Identity, OtpVerification, Session, SessionChange, SessionEvent, SignUp};
use authsync::AuthSyncError;
use chrono::{Duration, Utc};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

pub fn session(n: u32) -> Session {
    Session {
        access_token: format!("access-{n}"),
        refresh_token: format!("refresh-{n}"),
        expires_at: Utc::now() + Duration::hours(1),
    }
}

pub fn invalid_code() -> ProviderError {
    ProviderError::Api {
        status: 403,
        code: Some("otp_invalid".to_string()),
        message: "Invalid one-time code".to_string(),
    }
}

pub fn fast_retry() -> SyncRetryConfig {
    SyncRetryConfig {
        max_attempts: 3,
        min_delay_ms: 1,
        max_delay_ms: 5,
        jitter: false,
    }
}

pub async fn memory_storage() -> Arc<ProfileStorage> {
    Arc::new(ProfileStorage::new(
        connect("sqlite::memory:").await.expect("open in-memory db"),
    ))
}

pub fn synchronizer(store: Arc<dyn ProfileStore>) -> Arc<ProfileSynchronizer> {
    Arc::new(ProfileSynchronizer::new(store, &fast_retry()))
}

/// Scripted identity provider. Unscripted verify calls fail with an invalid
/// code; unscripted resends succeed. Like the HTTP adapter, a successful
/// verify hands back a session and only `activate_session` announces it.
#[derive(Default)]
pub struct FakeProvider {
    listeners: SessionListeners,
    verify_script: Mutex<VecDeque<Result<Identity, ProviderError>>>,
    resend_script: Mutex<VecDeque<Result<(), ProviderError>>>,
    verify_gate: Mutex<Option<Arc<Notify>>>,
    resend_gate: Mutex<Option<Arc<Notify>>>,
    reject_restore: AtomicBool,
    pub restores: AtomicUsize,
    session: Mutex<Option<Session>>,
    user: Mutex<Option<Identity>>,
    sign_up: Mutex<Option<SignUp>>,
    pub verify_calls: AtomicUsize,
    pub resend_calls: AtomicUsize,
    pub sign_out_calls: AtomicUsize,
}

impl FakeProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn script_verify(&self, result: Result<Identity, ProviderError>) {
        self.verify_script.lock().unwrap().push_back(result);
    }

    pub fn script_resend(&self, result: Result<(), ProviderError>) {
        self.resend_script.lock().unwrap().push_back(result);
    }

    /// Make every following verify call wait until the returned gate is
    /// notified.
    pub fn gate_verify(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.verify_gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    /// Make every following resend call wait until the returned gate is
    /// notified.
    pub fn gate_resend(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.resend_gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    /// Known user with no live session, as after a process restart.
    pub fn set_user(&self, identity: Identity) {
        *self.user.lock().unwrap() = Some(identity);
    }

    pub fn reject_restore(&self) {
        self.reject_restore.store(true, Ordering::SeqCst);
    }

    pub fn sign_in_as(&self, identity: Identity, session: Session) {
        *self.user.lock().unwrap() = Some(identity);
        *self.session.lock().unwrap() = Some(session);
    }

    pub fn script_sign_up(&self, result: SignUp) {
        *self.sign_up.lock().unwrap() = Some(result);
    }

    pub fn emit(&self, change: SessionChange) {
        self.listeners.emit(change);
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    pub fn verify_calls(&self) -> usize {
        self.verify_calls.load(Ordering::SeqCst)
    }

    pub fn resend_calls(&self) -> usize {
        self.resend_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IdentityProvider for FakeProvider {
    async fn verify_otp(&self, _email: &str, _code: &str) -> Result<OtpVerification, ProviderError> {
        self.verify_calls.fetch_add(1, Ordering::SeqCst);
        let gate = self.verify_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        let identity = self
            .verify_script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(invalid_code()))?;
        Ok(OtpVerification {
            identity,
            session: Some(session(0)),
        })
    }

    fn activate_session(&self, identity: &Identity, session: Session) {
        *self.user.lock().unwrap() = Some(identity.clone());
        *self.session.lock().unwrap() = Some(session.clone());
        self.listeners.emit(
            SessionChange::new(SessionEvent::SignedIn)
                .with_identity(identity.clone())
                .with_session(session),
        );
    }

    async fn restore_session(&self, session: Session) -> Result<Session, ProviderError> {
        self.restores.fetch_add(1, Ordering::SeqCst);
        if self.reject_restore.load(Ordering::SeqCst) {
            return Err(ProviderError::Api {
                status: 400,
                code: Some("refresh_token_not_found".to_string()),
                message: "Invalid Refresh Token".to_string(),
            });
        }
        *self.session.lock().unwrap() = Some(session.clone());
        Ok(session)
    }

    async fn resend(&self, _email: &str) -> Result<(), ProviderError> {
        self.resend_calls.fetch_add(1, Ordering::SeqCst);
        let gate = self.resend_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        self.resend_script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(()))
    }

    async fn sign_in(&self, _email: &str, _password: &str) -> Result<Session, ProviderError> {
        self.session
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| ProviderError::Api {
                status: 400,
                code: Some("invalid_credentials".to_string()),
                message: "Invalid login credentials".to_string(),
            })
    }

    async fn sign_up(&self, _email: &str, _password: &str) -> Result<SignUp, ProviderError> {
        self.sign_up
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| ProviderError::Api {
                status: 422,
                code: Some("user_already_exists".to_string()),
                message: "User already registered".to_string(),
            })
    }

    async fn sign_out(&self) -> Result<(), ProviderError> {
        self.sign_out_calls.fetch_add(1, Ordering::SeqCst);
        *self.session.lock().unwrap() = None;
        *self.user.lock().unwrap() = None;
        self.listeners.emit(SessionChange::new(SessionEvent::SignedOut));
        Ok(())
    }

    async fn get_session(&self) -> Result<Option<Session>, ProviderError> {
        Ok(self.session.lock().unwrap().clone())
    }

    async fn get_user(&self) -> Result<Option<Identity>, ProviderError> {
        if self.session.lock().unwrap().is_none() {
            return Ok(None);
        }
        Ok(self.user.lock().unwrap().clone())
    }

    fn on_session_change(&self, callback: SessionChangeCallback) -> Subscription {
        self.listeners.subscribe(callback)
    }
}

/// Profile store whose upserts block until released, and which counts them.
pub struct GatedStore {
    pub inner: Arc<ProfileStorage>,
    pub gate: Notify,
    pub upserts: AtomicUsize,
}

impl GatedStore {
    pub fn new(inner: Arc<ProfileStorage>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            gate: Notify::new(),
            upserts: AtomicUsize::new(0),
        })
    }

    pub fn release(&self) {
        self.gate.notify_one();
    }
}

#[async_trait]
impl ProfileStore for GatedStore {
    async fn find_by_auth_id(&self, auth_id: &str) -> Result<Option<LocalProfile>, AuthSyncError> {
        self.inner.find_by_auth_id(auth_id).await
    }

    async fn upsert(&self, profile: &LocalProfile) -> Result<LocalProfile, AuthSyncError> {
        self.gate.notified().await;
        let saved = self.inner.upsert(profile).await;
        self.upserts.fetch_add(1, Ordering::SeqCst);
        saved
    }

    async fn find_by_username(
        &self,
        username: &str,
    ) -> Result<Option<LocalProfile>, AuthSyncError> {
        self.inner.find_by_username(username).await
    }
}

/// Profile store that counts upserts.
pub struct CountingStore {
    pub inner: Arc<ProfileStorage>,
    pub upserts: AtomicUsize,
}

impl CountingStore {
    pub fn new(inner: Arc<ProfileStorage>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            upserts: AtomicUsize::new(0),
        })
    }

    pub fn upserts(&self) -> usize {
        self.upserts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProfileStore for CountingStore {
    async fn find_by_auth_id(&self, auth_id: &str) -> Result<Option<LocalProfile>, AuthSyncError> {
        self.inner.find_by_auth_id(auth_id).await
    }

    async fn upsert(&self, profile: &LocalProfile) -> Result<LocalProfile, AuthSyncError> {
        self.upserts.fetch_add(1, Ordering::SeqCst);
        self.inner.upsert(profile).await
    }

    async fn find_by_username(
        &self,
        username: &str,
    ) -> Result<Option<LocalProfile>, AuthSyncError> {
        self.inner.find_by_username(username).await
    }
}

/// Profile store whose every call fails with a transient error.
pub struct FailingStore;

#[async_trait]
impl ProfileStore for FailingStore {
    async fn find_by_auth_id(&self, _auth_id: &str) -> Result<Option<LocalProfile>, AuthSyncError> {
        Err(AuthSyncError::DatabaseError(sqlx::Error::PoolTimedOut))
    }

    async fn upsert(&self, _profile: &LocalProfile) -> Result<LocalProfile, AuthSyncError> {
        Err(AuthSyncError::DatabaseError(sqlx::Error::PoolTimedOut))
    }

    async fn find_by_username(
        &self,
        _username: &str,
    ) -> Result<Option<LocalProfile>, AuthSyncError> {
        Ok(None)
    }
}
