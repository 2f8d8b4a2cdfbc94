use crate::error::AuthSyncError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Canonical role of an identity, resolved once when the identity is built.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    User,
    Admin,
}

/// Provider-issued user record. Read-only to this crate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
    pub email: Option<String>,
    pub email_verified: bool,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(default)]
    pub role: Role,
}

impl Identity {
    pub fn new(id: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            email: Some(email.into()),
            email_verified: false,
            metadata: Map::new(),
            role: Role::User,
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// `metadata.username`, when present and non-blank.
    pub fn metadata_username(&self) -> Option<&str> {
        self.metadata
            .get("username")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// Build an identity from a raw provider user payload.
    ///
    /// The role may appear in several places depending on how the account was
    /// provisioned (`role`, `app_metadata.role`, `user_metadata.role`,
    /// `app_metadata.account_type`). Any of them naming `admin` yields
    /// [`Role::Admin`]; nothing downstream inspects the raw locations again.
    pub fn from_payload(payload: &Value) -> Result<Self, AuthSyncError> {
        let id = payload
            .get("id")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| AuthSyncError::Validation("user payload missing id".to_string()))?
            .to_string();

        let email = payload
            .get("email")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string);

        let metadata = payload
            .get("user_metadata")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();

        let email_verified = payload
            .get("email_confirmed_at")
            .is_some_and(|v| !v.is_null())
            || metadata
                .get("email_verified")
                .and_then(Value::as_bool)
                .unwrap_or(false);

        Ok(Self {
            id,
            email,
            email_verified,
            role: normalize_role(payload),
            metadata,
        })
    }
}

fn normalize_role(payload: &Value) -> Role {
    let candidates = [
        payload.get("role"),
        payload.pointer("/app_metadata/role"),
        payload.pointer("/user_metadata/role"),
        payload.pointer("/app_metadata/account_type"),
    ];
    let is_admin = candidates
        .into_iter()
        .flatten()
        .filter_map(Value::as_str)
        .any(|r| r.eq_ignore_ascii_case("admin"));
    if is_admin { Role::Admin } else { Role::User }
}
