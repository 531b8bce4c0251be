//! Heartbeats and friend presence.

pub mod cadence;
pub mod friends;
pub mod tracker;

pub use cadence::{Cadence, Visibility};
pub use friends::{FriendDirectory, FriendsEndpoint};
pub use tracker::{PresenceEntry, PresenceSnapshot, PresenceTracker};
