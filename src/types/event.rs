use super::identity::Identity;
use super::session::{Session, SessionEvent};
use crate::db::LocalProfile;
use crate::error::AuthSyncError;

/// How the profile sync for an event settled.
#[derive(Debug, Clone, PartialEq)]
pub enum ProfileSyncStatus {
    Synced(LocalProfile),
    Failed { code: &'static str },
}

impl ProfileSyncStatus {
    pub fn from_result(result: &Result<LocalProfile, AuthSyncError>) -> Self {
        match result {
            Ok(profile) => ProfileSyncStatus::Synced(profile.clone()),
            Err(e) => ProfileSyncStatus::Failed { code: e.code() },
        }
    }

    pub fn is_synced(&self) -> bool {
        matches!(self, ProfileSyncStatus::Synced(_))
    }
}

/// Event forwarded to bus observers.
///
/// For `SignedIn` / `UserUpdated` with an identity, `profile` is always set:
/// the sync has settled by the time any observer sees the event.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthEvent {
    pub event: SessionEvent,
    pub identity: Option<Identity>,
    pub session: Option<Session>,
    pub profile: Option<ProfileSyncStatus>,
}

impl AuthEvent {
    pub fn is_authenticated(&self) -> bool {
        self.event != SessionEvent::SignedOut && self.identity.is_some()
    }
}
