pub mod bearer;
pub mod wire;

pub use bearer::{normalize_bearer, strip_bearer, BEARER_PREFIX};
pub use wire::UserId;
