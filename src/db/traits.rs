use super::models::LocalProfile;
use crate::error::AuthSyncError;
use async_trait::async_trait;

/// Storage collaborator for local profiles.
#[async_trait]
pub trait ProfileStore: Send + Sync {
    async fn find_by_auth_id(&self, auth_id: &str) -> Result<Option<LocalProfile>, AuthSyncError>;

    /// Insert-or-update keyed by `auth_id`.
    ///
    /// On conflict only `email`, `has_set_username` and `updated_at` are
    /// overwritten; the remaining columns keep their stored values.
    async fn upsert(&self, profile: &LocalProfile) -> Result<LocalProfile, AuthSyncError>;

    /// Case-insensitive lookup.
    async fn find_by_username(&self, username: &str)
    -> Result<Option<LocalProfile>, AuthSyncError>;
}
