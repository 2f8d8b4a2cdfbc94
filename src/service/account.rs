use crate::db::LocalProfile;
use crate::error::{AuthSyncError, ProviderOperation};
use crate::provider::IdentityProvider;
use crate::service::profile_sync::ProfileSynchronizer;
use crate::service::session_store::SessionStore;
use crate::service::verification::{VerificationOrchestrator, validate_email};
use crate::types::{Identity, Session};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A signed-in user together with how their profile sync settled.
#[derive(Debug)]
pub struct Authenticated {
    pub identity: Identity,
    pub session: Session,
    pub profile: Result<LocalProfile, AuthSyncError>,
}

#[derive(Debug)]
pub struct Registration {
    pub identity: Identity,
    /// Absent while the provider waits for email confirmation.
    pub session: Option<Session>,
    pub profile: Option<Result<LocalProfile, AuthSyncError>>,
    /// Earliest time the confirmation code may be resent.
    pub resend_after: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailVerificationStatus {
    pub email: Option<String>,
    pub verified: bool,
}

/// Password sign-in/up and session bootstrap over an [`IdentityProvider`].
pub struct AccountService {
    provider: Arc<dyn IdentityProvider>,
    synchronizer: Arc<ProfileSynchronizer>,
    sessions: Arc<dyn SessionStore>,
    verification: Arc<VerificationOrchestrator>,
}

impl AccountService {
    pub fn new(
        provider: Arc<dyn IdentityProvider>,
        synchronizer: Arc<ProfileSynchronizer>,
        sessions: Arc<dyn SessionStore>,
        verification: Arc<VerificationOrchestrator>,
    ) -> Self {
        Self {
            provider,
            synchronizer,
            sessions,
            verification,
        }
    }

    /// Restore the session at startup: the persisted one is handed to the
    /// provider first, then the provider's view is stored back. Returns the
    /// signed-in user, if any, after their profile has been synced.
    pub async fn initialize(&self) -> Result<Option<Identity>, AuthSyncError> {
        if let Some(persisted) = self.sessions.get().await? {
            match self.provider.restore_session(persisted).await {
                Ok(_) => debug!("persisted session handed to provider"),
                Err(e) => {
                    let mapped = AuthSyncError::from_provider(e, ProviderOperation::GetSession);
                    if !matches!(mapped, AuthSyncError::Unauthenticated) {
                        return Err(mapped);
                    }
                    warn!("persisted session rejected by provider; discarding");
                    self.sessions.clear().await?;
                }
            }
        }

        let session = self
            .provider
            .get_session()
            .await
            .map_err(|e| AuthSyncError::from_provider(e, ProviderOperation::GetSession))?;
        let Some(session) = session else {
            debug!("no provider session to restore");
            return Ok(None);
        };
        self.sessions.set(session).await?;

        let identity = self.current_user().await?;
        if let Some(identity) = identity.as_ref()
            && let Err(e) = self.synchronizer.sync(identity).await
        {
            warn!(auth_id = %identity.id, "profile sync on startup failed: {}", e);
        }
        Ok(identity)
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<Authenticated, AuthSyncError> {
        let email = validate_email(email)?;
        require_password(password)?;

        let session = self
            .provider
            .sign_in(&email, password)
            .await
            .map_err(|e| AuthSyncError::from_provider(e, ProviderOperation::SignIn))?;
        self.sessions.set(session.clone()).await?;

        let identity = self
            .current_user()
            .await?
            .ok_or(AuthSyncError::Unauthenticated)?;
        info!(auth_id = %identity.id, "signed in");

        let profile = self.synchronizer.sync(&identity).await;
        Ok(Authenticated {
            identity,
            session,
            profile,
        })
    }

    pub async fn sign_up(&self, email: &str, password: &str) -> Result<Registration, AuthSyncError> {
        let email = validate_email(email)?;
        require_password(password)?;

        let signup = self
            .provider
            .sign_up(&email, password)
            .await
            .map_err(|e| AuthSyncError::from_provider(e, ProviderOperation::SignUp))?;
        info!(auth_id = %signup.identity.id, confirmed = signup.session.is_some(), "signed up");

        let profile = match signup.session.as_ref() {
            Some(session) => {
                self.sessions.set(session.clone()).await?;
                Some(self.synchronizer.sync(&signup.identity).await)
            }
            None => None,
        };

        let resend_after = if signup.identity.email_verified {
            None
        } else {
            Some(self.verification.mark_code_sent(&email)?)
        };

        Ok(Registration {
            identity: signup.identity,
            session: signup.session,
            profile,
            resend_after,
        })
    }

    /// Provider sign-out is best effort; the local session is always cleared.
    pub async fn sign_out(&self) -> Result<(), AuthSyncError> {
        if let Err(e) = self.provider.sign_out().await {
            let mapped = AuthSyncError::from_provider(e, ProviderOperation::SignOut);
            warn!(code = mapped.code(), "provider sign-out failed: {}", mapped);
        }
        self.sessions.clear().await?;
        info!("signed out");
        Ok(())
    }

    pub async fn check_email_verification(&self) -> Result<EmailVerificationStatus, AuthSyncError> {
        let identity = self
            .current_user()
            .await?
            .ok_or(AuthSyncError::Unauthenticated)?;
        Ok(EmailVerificationStatus {
            email: identity.email,
            verified: identity.email_verified,
        })
    }

    /// Case-insensitive check against stored profiles.
    pub async fn username_available(&self, username: &str) -> Result<bool, AuthSyncError> {
        let username = username.trim();
        if username.is_empty() {
            return Err(AuthSyncError::Validation(
                "username must not be empty".to_string(),
            ));
        }
        let taken = self.synchronizer.store().find_by_username(username).await?;
        Ok(taken.is_none())
    }

    async fn current_user(&self) -> Result<Option<Identity>, AuthSyncError> {
        self.provider
            .get_user()
            .await
            .map_err(|e| AuthSyncError::from_provider(e, ProviderOperation::GetUser))
    }
}

fn require_password(password: &str) -> Result<(), AuthSyncError> {
    if password.is_empty() {
        Err(AuthSyncError::Validation("password must not be empty".to_string()))
    } else {
        Ok(())
    }
}
