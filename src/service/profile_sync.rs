use crate::clock::{Clock, SystemClock};
use crate::config::SyncRetryConfig;
use crate::db::models::{DEFAULT_ACCOUNT_STATUS, DEFAULT_ACCOUNT_TYPE, LocalProfile};
use crate::db::traits::ProfileStore;
use crate::error::{AuthSyncError, IsRetryable};
use crate::types::Identity;
use backon::{ExponentialBuilder, Retryable};
use chrono::{DateTime, Utc};
use serde_json::Map;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Keeps the local profile row consistent with a provider identity.
///
/// Safe to call concurrently for the same identity: correctness rests on the
/// store's upsert, not on a lock held here. Racing writers resolve
/// last-write-wins.
pub struct ProfileSynchronizer {
    store: Arc<dyn ProfileStore>,
    retry: ExponentialBuilder,
    clock: Arc<dyn Clock>,
}

impl ProfileSynchronizer {
    pub fn new(store: Arc<dyn ProfileStore>, retry: &SyncRetryConfig) -> Self {
        Self {
            store,
            retry: retry.policy(),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn store(&self) -> &Arc<dyn ProfileStore> {
        &self.store
    }

    /// Upsert the profile for `identity`, retrying transient storage errors.
    pub async fn sync(&self, identity: &Identity) -> Result<LocalProfile, AuthSyncError> {
        if identity.id.trim().is_empty() {
            return Err(AuthSyncError::Validation(
                "identity id must not be empty".to_string(),
            ));
        }

        let result = (|| async { self.sync_once(identity).await })
            .retry(self.retry.clone())
            .when(|e: &AuthSyncError| e.is_retryable())
            .notify(|err, dur: Duration| {
                warn!(
                    auth_id = %identity.id,
                    "profile sync retrying after error {}, sleeping {:?}",
                    err, dur
                );
            })
            .await;

        match &result {
            Ok(profile) => info!(
                auth_id = %profile.auth_id,
                has_set_username = profile.has_set_username,
                "profile sync completed"
            ),
            Err(e) => error!(auth_id = %identity.id, "profile sync failed: {}", e),
        }
        result
    }

    async fn sync_once(&self, identity: &Identity) -> Result<LocalProfile, AuthSyncError> {
        let now = self.clock.now();
        let record = match self.store.find_by_auth_id(&identity.id).await? {
            None => {
                debug!(auth_id = %identity.id, "creating profile");
                new_profile(identity, now)
            }
            Some(existing) => {
                debug!(auth_id = %identity.id, "updating profile");
                updated_profile(existing, identity, now)
            }
        };
        self.store.upsert(&record).await
    }
}

/// Username a fresh profile gets: `metadata.username`, else the email
/// local-part, else the identity id.
pub fn default_username(identity: &Identity) -> String {
    default_username_for(identity, identity.email.as_deref())
}

fn default_username_for(identity: &Identity, email: Option<&str>) -> String {
    identity
        .metadata_username()
        .or_else(|| email.and_then(email_local_part))
        .unwrap_or(identity.id.as_str())
        .to_string()
}

fn email_local_part(email: &str) -> Option<&str> {
    email
        .split_once('@')
        .map(|(local, _)| local.trim())
        .filter(|local| !local.is_empty())
}

fn new_profile(identity: &Identity, now: DateTime<Utc>) -> LocalProfile {
    LocalProfile {
        auth_id: identity.id.clone(),
        email: identity.email.clone().unwrap_or_default(),
        username: default_username(identity),
        has_set_username: false,
        account_status: DEFAULT_ACCOUNT_STATUS.to_string(),
        account_type: DEFAULT_ACCOUNT_TYPE.to_string(),
        metadata: Map::new(),
        created_at: now,
        updated_at: now,
    }
}

/// Only `email` and `has_set_username` follow the identity. The flag turns on
/// once the stored username no longer matches any derived default, and stays
/// on.
fn updated_profile(existing: LocalProfile, identity: &Identity, now: DateTime<Utc>) -> LocalProfile {
    let customized = existing.username != default_username(identity)
        && existing.username != default_username_for(identity, Some(&existing.email));
    LocalProfile {
        email: identity.email.clone().unwrap_or_else(|| existing.email.clone()),
        has_set_username: existing.has_set_username || customized,
        updated_at: now,
        ..existing
    }
}
