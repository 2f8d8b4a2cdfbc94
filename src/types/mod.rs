pub mod event;
pub mod identity;
pub mod session;

pub use event::{AuthEvent, ProfileSyncStatus};
pub use identity::{Identity, Role};
pub use session::{OtpVerification, Session, SessionChange, SessionEvent, SignUp};
