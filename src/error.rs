use crate::provider::ProviderError;
use serde::Serialize;
use sqlx::Error as SqlxError;
use std::time::Duration;
use thiserror::Error as ThisError;

#[derive(Debug, ThisError)]
pub enum AuthSyncError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Verification code is invalid")]
    InvalidCode,

    #[error("Verification code has expired")]
    ExpiredCode,

    #[error("Rate limited by identity provider")]
    RateLimited,

    #[error("Resend cooldown active, {} secs remaining", .remaining.as_secs())]
    Cooldown { remaining: Duration },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Storage conflict: {0}")]
    StorageConflict(String),

    #[error("An account with this email already exists")]
    AccountExists,

    #[error("Database error: {0}")]
    DatabaseError(#[from] SqlxError),

    #[error("Not authenticated")]
    Unauthenticated,

    #[error("Operation already in progress")]
    Busy,

    #[error("Orchestrator torn down; response discarded")]
    Cancelled,

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("Config error: {0}")]
    Config(#[from] Box<figment::Error>),

    #[error("Ractor error: {0}")]
    RactorError(String),
}

/// The provider call an error originated from. Determines how otherwise
/// ambiguous client errors are classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderOperation {
    VerifyOtp,
    Resend,
    SignIn,
    SignUp,
    SignOut,
    GetSession,
    GetUser,
}

const RATE_LIMIT_CODES: &[&str] = &[
    "over_email_send_rate_limit",
    "over_request_rate_limit",
    "over_sms_send_rate_limit",
];

const UNAUTHENTICATED_CODES: &[&str] = &[
    "invalid_credentials",
    "bad_jwt",
    "no_authorization",
    "session_not_found",
    "session_expired",
    "refresh_token_not_found",
    "user_not_found",
];

impl AuthSyncError {
    /// Translate a provider failure into the crate taxonomy.
    pub fn from_provider(err: ProviderError, op: ProviderOperation) -> Self {
        match err {
            ProviderError::Transport(_) => AuthSyncError::Network(
                "identity provider unreachable".to_string(),
            ),
            ProviderError::Decode(_) => {
                AuthSyncError::Network("unexpected identity provider response".to_string())
            }
            ProviderError::Api {
                status,
                code,
                message,
            } => {
                let code = code.as_deref().unwrap_or_default();
                let message = message.to_ascii_lowercase();
                if status == 429 || RATE_LIMIT_CODES.contains(&code) {
                    return AuthSyncError::RateLimited;
                }
                if status >= 500 {
                    return AuthSyncError::Network(format!("identity provider status {status}"));
                }
                if code == "otp_expired" || message.contains("expired") {
                    return AuthSyncError::ExpiredCode;
                }
                if op == ProviderOperation::VerifyOtp {
                    return AuthSyncError::InvalidCode;
                }
                if UNAUTHENTICATED_CODES.contains(&code) || status == 401 || status == 403 {
                    return AuthSyncError::Unauthenticated;
                }
                match code {
                    "email_address_invalid" | "weak_password" | "validation_failed" => {
                        AuthSyncError::Validation("rejected by identity provider".to_string())
                    }
                    "user_already_exists" | "email_exists" => AuthSyncError::AccountExists,
                    _ => AuthSyncError::Unauthenticated,
                }
            }
        }
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            AuthSyncError::Validation(_) => "VALIDATION_ERROR",
            AuthSyncError::InvalidCode => "INVALID_CODE",
            AuthSyncError::ExpiredCode => "EXPIRED_CODE",
            AuthSyncError::RateLimited => "RATE_LIMITED",
            AuthSyncError::Cooldown { .. } => "COOLDOWN",
            AuthSyncError::Network(_) => "NETWORK_ERROR",
            AuthSyncError::StorageConflict(_) => "STORAGE_CONFLICT",
            AuthSyncError::AccountExists => "ACCOUNT_EXISTS",
            AuthSyncError::DatabaseError(e) if is_unique_violation(e) => "STORAGE_CONFLICT",
            AuthSyncError::DatabaseError(_) => "STORAGE_ERROR",
            AuthSyncError::Unauthenticated => "UNAUTHENTICATED",
            AuthSyncError::Busy => "BUSY",
            AuthSyncError::Cancelled => "CANCELLED",
            AuthSyncError::Json(_)
            | AuthSyncError::UrlParse(_)
            | AuthSyncError::Config(_)
            | AuthSyncError::RactorError(_) => "INTERNAL_ERROR",
        }
    }

    /// Message safe to show an end user. Never echoes provider text.
    pub fn user_message(&self) -> String {
        match self {
            AuthSyncError::Validation(_) => "Please check the email and 6-digit code.".to_string(),
            AuthSyncError::InvalidCode => "Invalid verification code. Please try again.".to_string(),
            AuthSyncError::ExpiredCode => {
                "This verification code has expired. Request a new one.".to_string()
            }
            AuthSyncError::RateLimited => {
                "Too many requests. Please wait a moment and try again.".to_string()
            }
            AuthSyncError::Cooldown { remaining } => format!(
                "Please wait {} seconds before requesting a new code.",
                remaining.as_secs().max(1)
            ),
            AuthSyncError::Network(_) => {
                "Unable to reach the sign-in service. Check your connection.".to_string()
            }
            AuthSyncError::StorageConflict(_) => {
                "Your profile was changed elsewhere. Please retry.".to_string()
            }
            AuthSyncError::AccountExists => {
                "An account with this email already exists. Try signing in instead.".to_string()
            }
            AuthSyncError::DatabaseError(_) => "Your profile could not be saved.".to_string(),
            AuthSyncError::Unauthenticated => "Please sign in to continue.".to_string(),
            AuthSyncError::Busy => "A request is already in progress.".to_string(),
            AuthSyncError::Cancelled => "The request was cancelled.".to_string(),
            AuthSyncError::Json(_)
            | AuthSyncError::UrlParse(_)
            | AuthSyncError::Config(_)
            | AuthSyncError::RactorError(_) => "An internal error occurred.".to_string(),
        }
    }

    pub fn to_body(&self) -> ApiErrorBody {
        ApiErrorBody {
            code: self.code().to_string(),
            message: self.user_message(),
        }
    }
}

impl From<figment::Error> for AuthSyncError {
    fn from(e: figment::Error) -> Self {
        AuthSyncError::Config(Box::new(e))
    }
}

fn is_unique_violation(e: &SqlxError) -> bool {
    matches!(e, SqlxError::Database(db) if db.is_unique_violation())
}

pub trait IsRetryable {
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for AuthSyncError {
    fn is_retryable(&self) -> bool {
        match self {
            AuthSyncError::DatabaseError(e) => match e {
                SqlxError::PoolTimedOut | SqlxError::Io(_) | SqlxError::WorkerCrashed => true,
                // SQLITE_BUSY (5) and SQLITE_LOCKED (6), including extended codes.
                SqlxError::Database(db) => db
                    .code()
                    .and_then(|c| c.parse::<i64>().ok())
                    .is_some_and(|c| matches!(c & 0xff, 5 | 6)),
                _ => false,
            },
            AuthSyncError::Network(_) => true,
            _ => false,
        }
    }
}

/// Standardized error body handed to the UI layer.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ApiErrorBody {
    pub code: String,
    pub message: String,
}
