use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const DEFAULT_ACCOUNT_STATUS: &str = "active";
pub const DEFAULT_ACCOUNT_TYPE: &str = "user";

/// Local mirror of a provider identity, keyed by `auth_id`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LocalProfile {
    pub auth_id: String,
    pub email: String,
    pub username: String,
    pub has_set_username: bool,
    pub account_status: String,
    pub account_type: String,
    pub metadata: Map<String, Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
