use super::endpoints::{GoTrueEndpoints, GoTrueTarget, SignUpResponse, TokenResponse};
use super::{IdentityProvider, ProviderError, SessionChangeCallback, SessionListeners, Subscription};
use crate::clock::{Clock, SystemClock};
use crate::config::ProviderConfig;
use crate::error::AuthSyncError;
use crate::types::{Identity, OtpVerification, Session, SessionChange, SessionEvent, SignUp};
use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use serde_json::Value;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tracing::{info, warn};

fn read_retry_policy() -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(250))
        .with_max_delay(Duration::from_secs(2))
        .with_max_times(2)
        .with_jitter()
}

/// `IdentityProvider` backed by a GoTrue-compatible REST API.
///
/// Holds the provider-side session in memory and emits a [`SessionChange`]
/// to subscribers whenever it changes.
pub struct GoTrueClient {
    http: reqwest::Client,
    target: GoTrueTarget,
    session: RwLock<Option<Session>>,
    listeners: SessionListeners,
    clock: Arc<dyn Clock>,
}

impl GoTrueClient {
    pub fn new(cfg: &ProviderConfig) -> Result<Self, AuthSyncError> {
        let base = cfg
            .url
            .clone()
            .ok_or_else(|| AuthSyncError::Validation("provider.url is not configured".into()))?;
        let http = reqwest::Client::builder()
            .user_agent(concat!("authsync/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(cfg.timeout_secs.max(1)))
            .build()
            .map_err(|e| AuthSyncError::Network(format!("http client init failed: {e}")))?;
        Ok(Self {
            http,
            target: GoTrueTarget::new(base, cfg.anon_key.clone(), cfg.redirect_to.clone()),
            session: RwLock::new(None),
            listeners: SessionListeners::new(),
            clock: Arc::new(SystemClock),
        })
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Exchange the refresh token for a new session.
    pub async fn refresh_session(&self) -> Result<Session, ProviderError> {
        let refresh_token = self
            .current_session()
            .map(|s| s.refresh_token)
            .ok_or_else(|| ProviderError::Api {
                status: 401,
                code: Some("session_not_found".to_string()),
                message: "no session to refresh".to_string(),
            })?;
        let token = GoTrueEndpoints::refresh_grant(&self.http, &self.target, &refresh_token).await?;
        let session = token.session(self.clock.now())?;
        self.replace_session(Some(session.clone()));
        self.listeners
            .emit(SessionChange::new(SessionEvent::TokenRefreshed).with_session(session.clone()));
        Ok(session)
    }

    fn current_session(&self) -> Option<Session> {
        self.session
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn replace_session(&self, session: Option<Session>) -> Option<Session> {
        let mut guard = self.session.write().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *guard, session)
    }

    /// Decode a token grant without side effects.
    fn read_token(&self, token: &TokenResponse) -> Result<(Session, Option<Identity>), ProviderError> {
        let session = token.session(self.clock.now())?;
        let identity = token.user.as_ref().map(identity_from_payload).transpose()?;
        Ok((session, identity))
    }

    /// Store the session from a token grant and announce the sign-in.
    fn accept_token(&self, token: &TokenResponse) -> Result<(Session, Option<Identity>), ProviderError> {
        let (session, identity) = self.read_token(token)?;
        self.replace_session(Some(session.clone()));

        let mut change = SessionChange::new(SessionEvent::SignedIn).with_session(session.clone());
        if let Some(identity) = identity.clone() {
            change = change.with_identity(identity);
        }
        self.listeners.emit(change);
        Ok((session, identity))
    }
}

fn identity_from_payload(payload: &Value) -> Result<Identity, ProviderError> {
    Identity::from_payload(payload).map_err(|e| ProviderError::Decode(e.to_string()))
}

#[async_trait]
impl IdentityProvider for GoTrueClient {
    async fn verify_otp(&self, email: &str, code: &str) -> Result<OtpVerification, ProviderError> {
        let token =
            GoTrueEndpoints::verify_signup_otp(&self.http, &self.target, email, code).await?;
        let (session, identity) = self.read_token(&token)?;
        let identity = identity
            .ok_or_else(|| ProviderError::Decode("verify response missing user".to_string()))?;
        Ok(OtpVerification {
            identity,
            session: Some(session),
        })
    }

    fn activate_session(&self, identity: &Identity, session: Session) {
        self.replace_session(Some(session.clone()));
        self.listeners.emit(
            SessionChange::new(SessionEvent::SignedIn)
                .with_identity(identity.clone())
                .with_session(session),
        );
    }

    async fn restore_session(&self, session: Session) -> Result<Session, ProviderError> {
        let expired = session.is_expired_at(self.clock.now());
        self.replace_session(Some(session.clone()));
        if !expired {
            return Ok(session);
        }
        info!("restored session expired; refreshing");
        match self.refresh_session().await {
            Ok(fresh) => Ok(fresh),
            Err(e) => {
                self.replace_session(None);
                Err(e)
            }
        }
    }

    async fn resend(&self, email: &str) -> Result<(), ProviderError> {
        GoTrueEndpoints::resend_signup(&self.http, &self.target, email).await
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<Session, ProviderError> {
        let token =
            GoTrueEndpoints::password_grant(&self.http, &self.target, email, password).await?;
        let (session, _) = self.accept_token(&token)?;
        info!("password sign-in succeeded");
        Ok(session)
    }

    async fn sign_up(&self, email: &str, password: &str) -> Result<SignUp, ProviderError> {
        match GoTrueEndpoints::sign_up(&self.http, &self.target, email, password).await? {
            SignUpResponse::Session(token) => {
                let (session, identity) = self.accept_token(&token)?;
                let identity = identity.ok_or_else(|| {
                    ProviderError::Decode("sign-up response missing user".to_string())
                })?;
                Ok(SignUp {
                    identity,
                    session: Some(session),
                })
            }
            SignUpResponse::User(user) => Ok(SignUp {
                identity: identity_from_payload(&user)?,
                session: None,
            }),
        }
    }

    async fn sign_out(&self) -> Result<(), ProviderError> {
        let previous = self.replace_session(None);
        let result = match previous {
            Some(session) => {
                GoTrueEndpoints::logout(&self.http, &self.target, &session.access_token).await
            }
            None => Ok(()),
        };
        if let Err(e) = &result {
            warn!("provider logout failed; local session cleared anyway: {}", e);
        }
        self.listeners
            .emit(SessionChange::new(SessionEvent::SignedOut));
        result
    }

    async fn get_session(&self) -> Result<Option<Session>, ProviderError> {
        match self.current_session() {
            Some(session) if session.is_expired_at(self.clock.now()) => {
                self.refresh_session().await.map(Some)
            }
            other => Ok(other),
        }
    }

    async fn get_user(&self) -> Result<Option<Identity>, ProviderError> {
        let Some(session) = self.get_session().await? else {
            return Ok(None);
        };
        let payload = (|| async {
            GoTrueEndpoints::fetch_user(&self.http, &self.target, &session.access_token).await
        })
        .retry(read_retry_policy())
        .when(|e: &ProviderError| matches!(e, ProviderError::Transport(_)))
        .notify(|err, dur: Duration| {
            warn!("fetch user retrying after error {}, sleeping {:?}", err, dur);
        })
        .await?;
        identity_from_payload(&payload).map(Some)
    }

    fn on_session_change(&self, callback: SessionChangeCallback) -> Subscription {
        self.listeners.subscribe(callback)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use url::Url;

    fn config() -> ProviderConfig {
        ProviderConfig {
            url: Some(Url::parse("http://127.0.0.1:9").unwrap()),
            anon_key: "anon".to_string(),
            ..ProviderConfig::default()
        }
    }

    #[test]
    fn missing_url_is_a_validation_error() {
        let err = GoTrueClient::new(&ProviderConfig::default()).err().unwrap();
        assert!(matches!(err, AuthSyncError::Validation(_)));
    }

    #[tokio::test]
    async fn no_session_means_no_user_and_no_request() {
        let client = GoTrueClient::new(&config()).unwrap();
        assert!(client.get_session().await.unwrap().is_none());
        assert!(client.get_user().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn sign_out_without_session_still_notifies() {
        let client = GoTrueClient::new(&config()).unwrap();
        let seen = Arc::new(RwLock::new(Vec::new()));
        let sink = seen.clone();
        let _sub = client.on_session_change(Arc::new(move |change: SessionChange| {
            sink.write().unwrap().push(change.event);
        }));

        client.sign_out().await.unwrap();

        assert_eq!(*seen.read().unwrap(), vec![SessionEvent::SignedOut]);
    }

    fn unexpired(access: &str) -> Session {
        Session {
            access_token: access.to_string(),
            refresh_token: "r".to_string(),
            expires_at: chrono::Utc::now() + chrono::Duration::hours(1),
        }
    }

    #[tokio::test]
    async fn restored_session_is_served_without_refresh() {
        let client = GoTrueClient::new(&config()).unwrap();
        let seen = Arc::new(RwLock::new(Vec::new()));
        let sink = seen.clone();
        let _sub = client.on_session_change(Arc::new(move |change: SessionChange| {
            sink.write().unwrap().push(change.event);
        }));

        let restored = client.restore_session(unexpired("persisted")).await.unwrap();

        assert_eq!(restored.access_token, "persisted");
        assert_eq!(
            client.get_session().await.unwrap().map(|s| s.access_token),
            Some("persisted".to_string())
        );
        assert!(seen.read().unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_refresh_of_restored_session_leaves_no_session() {
        let client = GoTrueClient::new(&config()).unwrap();
        let mut stale = unexpired("stale");
        stale.expires_at = chrono::Utc::now() - chrono::Duration::hours(1);

        // Nothing listens on port 9, so the refresh grant fails.
        assert!(client.restore_session(stale).await.is_err());
        assert!(client.current_session().is_none());
    }

    #[test]
    fn activation_stores_and_announces_the_session() {
        let client = GoTrueClient::new(&config()).unwrap();
        let seen = Arc::new(RwLock::new(Vec::new()));
        let sink = seen.clone();
        let _sub = client.on_session_change(Arc::new(move |change: SessionChange| {
            sink.write().unwrap().push(change);
        }));

        client.activate_session(&Identity::new("u1", "a@b.com"), unexpired("fresh"));

        assert_eq!(
            client.current_session().map(|s| s.access_token),
            Some("fresh".to_string())
        );
        let seen = seen.read().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].event, SessionEvent::SignedIn);
        assert_eq!(seen[0].identity.as_ref().map(|i| i.id.as_str()), Some("u1"));
    }

    #[test]
    fn reading_a_token_has_no_side_effects() {
        let client = GoTrueClient::new(&config()).unwrap();
        let seen = Arc::new(RwLock::new(0usize));
        let sink = seen.clone();
        let _sub = client.on_session_change(Arc::new(move |_| {
            *sink.write().unwrap() += 1;
        }));
        let token = TokenResponse {
            access_token: "a".to_string(),
            refresh_token: "r".to_string(),
            expires_in: Some(3600),
            expires_at: None,
            user: Some(serde_json::json!({ "id": "u1", "email": "a@b.com" })),
        };

        let (_, identity) = client.read_token(&token).unwrap();

        assert_eq!(identity.map(|i| i.id), Some("u1".to_string()));
        assert!(client.current_session().is_none());
        assert_eq!(*seen.read().unwrap(), 0);
    }

    #[test]
    fn accepted_token_is_stored_and_announced() {
        let client = GoTrueClient::new(&config()).unwrap();
        let seen = Arc::new(RwLock::new(Vec::new()));
        let sink = seen.clone();
        let _sub = client.on_session_change(Arc::new(move |change: SessionChange| {
            sink.write().unwrap().push(change);
        }));

        let token = TokenResponse {
            access_token: "a".to_string(),
            refresh_token: "r".to_string(),
            expires_in: Some(3600),
            expires_at: None,
            user: Some(serde_json::json!({ "id": "u1", "email": "a@b.com" })),
        };
        let (session, identity) = client.accept_token(&token).unwrap();

        assert_eq!(client.current_session(), Some(session));
        assert_eq!(identity.map(|i| i.id), Some("u1".to_string()));
        let seen = seen.read().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].event, SessionEvent::SignedIn);
        assert!(seen[0].identity.is_some());
    }
}
