pub mod account;
pub mod event_bus;
pub mod profile_sync;
pub mod session_store;
pub mod verification;

pub use account::{AccountService, Authenticated, EmailVerificationStatus, Registration};
pub use event_bus::{AuthEventBus, AuthObserver};
pub use profile_sync::ProfileSynchronizer;
pub use session_store::{MemorySessionStore, SessionStore};
pub use verification::{
    AttemptStatus, ResendOutcome, SubmitOutcome, Verification, VerificationAttempt,
    VerificationOrchestrator,
};
