pub mod claims;
pub mod login;
pub mod session;

pub use login::{login, logout, register, Credentials, Registration};
pub use session::{CurrentUser, EndReason, SessionEvent, SessionManager};
