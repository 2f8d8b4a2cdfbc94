pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod provider;
pub mod service;
pub mod types;

pub use error::{AuthSyncError, IsRetryable, ProviderOperation};
pub use provider::{GoTrueClient, IdentityProvider, ProviderError};
pub use service::{
    AccountService, AuthEventBus, ProfileSynchronizer, VerificationOrchestrator,
};
pub use types::{AuthEvent, Identity, Session, SessionChange, SessionEvent};
