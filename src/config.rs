use crate::error::AuthSyncError;
use backon::ExponentialBuilder;
use figment::{
    Figment,
    providers::{Env, Serialized},
};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

pub const ENV_PREFIX: &str = "AUTHSYNC_";

/// One day.
pub const MAX_RESEND_COOLDOWN_SECS: u64 = 86_400;

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub database_url: String,
    pub loglevel: String,
    /// Key under which the session tuple is persisted.
    pub session_scope: String,
    pub verification: VerificationConfig,
    pub sync: SyncRetryConfig,
    pub provider: ProviderConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: "sqlite://authsync.db".to_string(),
            loglevel: "info".to_string(),
            session_scope: "default".to_string(),
            verification: VerificationConfig::default(),
            sync: SyncRetryConfig::default(),
            provider: ProviderConfig::default(),
        }
    }
}

impl Config {
    /// Defaults, then `.env`, then `AUTHSYNC_*` environment variables.
    /// Nested keys use `__`, e.g. `AUTHSYNC_SYNC__MAX_ATTEMPTS=5`.
    pub fn load() -> Result<Self, AuthSyncError> {
        dotenvy::dotenv().ok();
        let cfg: Config = Self::figment().extract().map_err(AuthSyncError::from)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject values that would overflow time arithmetic later.
    pub fn validate(&self) -> Result<(), AuthSyncError> {
        self.verification.resend_cooldown()?;
        Ok(())
    }

    pub fn figment() -> Figment {
        Figment::from(Serialized::defaults(Config::default()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct VerificationConfig {
    pub resend_cooldown_secs: u64,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            resend_cooldown_secs: 60,
        }
    }
}

impl VerificationConfig {
    pub fn resend_cooldown(&self) -> Result<chrono::Duration, AuthSyncError> {
        if self.resend_cooldown_secs > MAX_RESEND_COOLDOWN_SECS {
            return Err(AuthSyncError::Validation(format!(
                "verification.resend_cooldown_secs must be at most {MAX_RESEND_COOLDOWN_SECS}"
            )));
        }
        i64::try_from(self.resend_cooldown_secs)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .ok_or_else(|| {
                AuthSyncError::Validation("verification.resend_cooldown_secs out of range".into())
            })
    }
}

/// Backoff for transient storage failures during profile sync.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SyncRetryConfig {
    /// Total attempts, including the first.
    pub max_attempts: usize,
    pub min_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter: bool,
}

impl Default for SyncRetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            min_delay_ms: 200,
            max_delay_ms: 2000,
            jitter: true,
        }
    }
}

impl SyncRetryConfig {
    pub fn policy(&self) -> ExponentialBuilder {
        let policy = ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(self.min_delay_ms))
            .with_max_delay(Duration::from_millis(self.max_delay_ms.max(self.min_delay_ms)))
            .with_max_times(self.max_attempts.saturating_sub(1));
        if self.jitter {
            policy.with_jitter()
        } else {
            policy
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Base URL of the GoTrue-compatible identity provider.
    pub url: Option<Url>,
    pub anon_key: String,
    /// Where email links should land after confirmation.
    pub redirect_to: Option<Url>,
    pub timeout_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            url: None,
            anon_key: String::new(),
            redirect_to: None,
            timeout_secs: 15,
        }
    }
}
