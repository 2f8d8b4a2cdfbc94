use crate::clock::{Clock, SystemClock};
use crate::config::VerificationConfig;
use crate::db::LocalProfile;
use crate::error::{AuthSyncError, ProviderOperation};
use crate::provider::IdentityProvider;
use crate::service::profile_sync::ProfileSynchronizer;
use crate::types::{Identity, OtpVerification};
use chrono::{DateTime, Utc};
use regex::Regex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, LazyLock, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

static EMAIL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("valid email pattern"));

pub const CODE_LENGTH: usize = 6;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AttemptStatus {
    #[default]
    Idle,
    CodeEntered,
    Verifying,
    /// Terminal.
    Verified,
    /// A verify call was abandoned mid-flight; its outcome is unknown.
    Failed,
}

/// Per-email verification state. Lives for one verification flow.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerificationAttempt {
    pub status: AttemptStatus,
    pub attempt_count: u32,
    pub last_sent_at: Option<DateTime<Utc>>,
    pub cooldown_until: Option<DateTime<Utc>>,
    resending: bool,
}

#[derive(Debug)]
pub struct Verification {
    pub identity: Identity,
    /// Settled profile sync. An error here does not undo the verification.
    pub profile: Result<LocalProfile, AuthSyncError>,
}

#[derive(Debug)]
pub enum SubmitOutcome {
    Verified(Verification),
    /// Email already verified; the provider was not contacted.
    NoOp,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResendOutcome {
    Sent { cooldown_until: DateTime<Utc> },
    NoOp,
}

type AttemptTable = Mutex<HashMap<String, VerificationAttempt>>;

/// Drives OTP verification for any number of emails.
///
/// Calls for the same email are mutually exclusive: a second `submit_code`
/// (or `resend`) while one is in flight is rejected with
/// [`AuthSyncError::Busy`]. After [`teardown`](Self::teardown) every
/// in-flight provider response is dropped without touching shared state.
pub struct VerificationOrchestrator {
    provider: Arc<dyn IdentityProvider>,
    synchronizer: Arc<ProfileSynchronizer>,
    clock: Arc<dyn Clock>,
    cooldown: chrono::Duration,
    attempts: AttemptTable,
    alive: AtomicBool,
}

impl VerificationOrchestrator {
    pub fn new(
        provider: Arc<dyn IdentityProvider>,
        synchronizer: Arc<ProfileSynchronizer>,
        cfg: &VerificationConfig,
    ) -> Result<Self, AuthSyncError> {
        Ok(Self {
            provider,
            synchronizer,
            clock: Arc::new(SystemClock),
            cooldown: cfg.resend_cooldown()?,
            attempts: Mutex::new(HashMap::new()),
            alive: AtomicBool::new(true),
        })
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// End this orchestrator's lifetime. Pending provider responses are
    /// discarded and all attempts forgotten.
    pub fn teardown(&self) {
        self.alive.store(false, Ordering::Release);
        self.lock_attempts().clear();
        info!("verification orchestrator torn down");
    }

    pub fn attempt(&self, email: &str) -> Option<VerificationAttempt> {
        self.lock_attempts().get(&normalize_email(email)).cloned()
    }

    pub fn abandon(&self, email: &str) {
        if self.lock_attempts().remove(&normalize_email(email)).is_some() {
            debug!(email = %normalize_email(email), "verification attempt abandoned");
        }
    }

    /// Record a code sent outside `resend` (sign-up sends the first one), so
    /// the resend cooldown starts now.
    pub fn mark_code_sent(&self, email: &str) -> Result<DateTime<Utc>, AuthSyncError> {
        self.ensure_alive()?;
        let email = validate_email(email)?;
        let now = self.clock.now();
        let cooldown_until = now + self.cooldown;
        let mut attempts = self.lock_attempts();
        let attempt = attempts.entry(email).or_default();
        attempt.last_sent_at = Some(now);
        attempt.cooldown_until = Some(cooldown_until);
        Ok(cooldown_until)
    }

    pub async fn submit_code(
        &self,
        email: &str,
        code: &str,
    ) -> Result<SubmitOutcome, AuthSyncError> {
        self.ensure_alive()?;
        validate_code(code)?;
        let email = validate_email(email)?;

        let Some(in_flight) = self.begin_verify(&email)? else {
            debug!(email = %email, "already verified; skipping provider");
            return Ok(SubmitOutcome::NoOp);
        };

        let result = self.provider.verify_otp(&email, code).await;

        if !self.is_alive() {
            in_flight.disarm();
            warn!(email = %email, "verify response arrived after teardown; discarded");
            return Err(AuthSyncError::Cancelled);
        }

        match result {
            Ok(OtpVerification { identity, session }) => {
                in_flight.complete(|attempt| attempt.status = AttemptStatus::Verified);
                if let Some(session) = session {
                    self.provider.activate_session(&identity, session);
                }
                info!(email = %email, auth_id = %identity.id, "email verified");
                let profile = self.synchronizer.sync(&identity).await;
                Ok(SubmitOutcome::Verified(Verification { identity, profile }))
            }
            Err(e) => {
                let mapped = AuthSyncError::from_provider(e, ProviderOperation::VerifyOtp);
                let mut count = 0;
                in_flight.complete(|attempt| {
                    attempt.status = AttemptStatus::CodeEntered;
                    attempt.attempt_count += 1;
                    count = attempt.attempt_count;
                });
                warn!(email = %email, attempt = count, code = mapped.code(), "verification failed");
                Err(mapped)
            }
        }
    }

    pub async fn resend(&self, email: &str) -> Result<ResendOutcome, AuthSyncError> {
        self.ensure_alive()?;
        let email = validate_email(email)?;

        let in_flight = {
            let now = self.clock.now();
            let mut attempts = self.lock_attempts();
            let attempt = attempts.entry(email.clone()).or_default();
            if attempt.status == AttemptStatus::Verified {
                return Ok(ResendOutcome::NoOp);
            }
            if let Some(until) = attempt.cooldown_until
                && now < until
            {
                let remaining = (until - now).to_std().unwrap_or_default();
                debug!(email = %email, remaining_secs = remaining.as_secs(), "resend in cooldown");
                return Err(AuthSyncError::Cooldown { remaining });
            }
            if attempt.resending {
                return Err(AuthSyncError::Busy);
            }
            attempt.resending = true;
            InFlight::new(&self.attempts, email.clone(), InFlightKind::Resend)
        };

        let result = self.provider.resend(&email).await;

        if !self.is_alive() {
            in_flight.disarm();
            return Err(AuthSyncError::Cancelled);
        }

        match result {
            Ok(()) => {
                let now = self.clock.now();
                let cooldown_until = now + self.cooldown;
                in_flight.complete(|attempt| {
                    attempt.resending = false;
                    attempt.last_sent_at = Some(now);
                    attempt.cooldown_until = Some(cooldown_until);
                });
                info!(email = %email, "verification code resent");
                Ok(ResendOutcome::Sent { cooldown_until })
            }
            Err(e) => {
                let mapped = AuthSyncError::from_provider(e, ProviderOperation::Resend);
                in_flight.complete(|attempt| attempt.resending = false);
                warn!(email = %email, code = mapped.code(), "resend failed");
                Err(mapped)
            }
        }
    }

    fn begin_verify(&self, email: &str) -> Result<Option<InFlight<'_>>, AuthSyncError> {
        let mut attempts = self.lock_attempts();
        let attempt = attempts.entry(email.to_string()).or_default();
        match attempt.status {
            AttemptStatus::Verified => return Ok(None),
            AttemptStatus::Verifying => return Err(AuthSyncError::Busy),
            AttemptStatus::Idle | AttemptStatus::CodeEntered | AttemptStatus::Failed => {}
        }
        attempt.status = AttemptStatus::Verifying;
        Ok(Some(InFlight::new(
            &self.attempts,
            email.to_string(),
            InFlightKind::Verify,
        )))
    }

    fn ensure_alive(&self) -> Result<(), AuthSyncError> {
        if self.is_alive() {
            Ok(())
        } else {
            Err(AuthSyncError::Cancelled)
        }
    }

    fn lock_attempts(&self) -> MutexGuard<'_, HashMap<String, VerificationAttempt>> {
        self.attempts.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Debug, Clone, Copy)]
enum InFlightKind {
    Verify,
    Resend,
}

/// Marks a provider call in flight for one email. If the driving future is
/// dropped before completion, the attempt is released so the email does not
/// stay busy.
struct InFlight<'a> {
    attempts: &'a AttemptTable,
    email: String,
    kind: InFlightKind,
    armed: bool,
}

impl<'a> InFlight<'a> {
    fn new(attempts: &'a AttemptTable, email: String, kind: InFlightKind) -> Self {
        Self {
            attempts,
            email,
            kind,
            armed: true,
        }
    }

    /// Apply the outcome. A no-op if the attempt was abandoned meanwhile.
    fn complete(mut self, apply: impl FnOnce(&mut VerificationAttempt)) {
        self.armed = false;
        let mut attempts = self.attempts.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(attempt) = attempts.get_mut(&self.email) {
            apply(attempt);
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut attempts = self.attempts.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(attempt) = attempts.get_mut(&self.email) else {
            return;
        };
        match self.kind {
            InFlightKind::Verify if attempt.status == AttemptStatus::Verifying => {
                attempt.status = AttemptStatus::Failed;
            }
            InFlightKind::Verify => {}
            InFlightKind::Resend => attempt.resending = false,
        }
        debug!(email = %self.email, kind = ?self.kind, "in-flight call dropped");
    }
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Normalize and check the basic `local@domain.tld` shape.
pub fn validate_email(email: &str) -> Result<String, AuthSyncError> {
    let normalized = normalize_email(email);
    if EMAIL_RE.is_match(&normalized) {
        Ok(normalized)
    } else {
        Err(AuthSyncError::Validation("malformed email address".to_string()))
    }
}

/// Exactly six ASCII digits; no trimming.
pub fn validate_code(code: &str) -> Result<(), AuthSyncError> {
    if code.len() == CODE_LENGTH && code.bytes().all(|b| b.is_ascii_digit()) {
        Ok(())
    } else {
        Err(AuthSyncError::Validation(format!(
            "verification code must be {CODE_LENGTH} digits"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_must_be_exactly_six_ascii_digits() {
        assert!(validate_code("000111").is_ok());
        for bad in [
            "", "12345", "1234567", "12345a", " 123456", "123456\n", "１２３４５６", "12 456",
        ] {
            assert!(
                matches!(validate_code(bad), Err(AuthSyncError::Validation(_))),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn emails_are_normalized_and_checked() {
        assert_eq!(validate_email(" A@B.com ").unwrap(), "a@b.com");
        assert!(validate_email("not-an-email").is_err());
        assert!(validate_email("missing-domain@").is_err());
        assert!(validate_email("a@b").is_err());
    }
}
