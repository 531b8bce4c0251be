//! JSON bodies and paths of the web gateway's HTTP API.
//!
//! Field names are fixed by the gateway and must not be renamed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Numeric user identifier as issued by the auth service.
pub type UserId = i64;

/// Well-known gateway endpoints.
pub mod path {
    pub const REGISTER: &str = "/api/register";
    pub const LOGIN: &str = "/api/login";
    pub const LOGOUT: &str = "/api/logout";
    pub const REFRESH: &str = "/api/refresh";
    pub const FRIENDS: &str = "/api/friends";
    pub const HEARTBEAT: &str = "/api/presence/heartbeat";
    pub const FRIENDS_PRESENCE: &str = "/api/presence/friends";
}

// ---------------------------------------------------------------------------
// Auth
// ---------------------------------------------------------------------------

/// New account. The gateway checks that the two passwords match.
#[derive(Clone, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub name: String,
    pub email: String,
    pub password: String,
    pub password_confirm: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub user_id: UserId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginResponse {
    pub access_token: String,
    #[serde(default)]
    pub user_id: Option<UserId>,
}

/// `POST /api/refresh` success body. The token is optional on the wire; a
/// 200 without it is still a failed refresh.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RefreshResponse {
    #[serde(default)]
    pub access_token: Option<String>,
}

/// Error body the gateway returns on any non-2xx response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub error: Option<String>,
}

// ---------------------------------------------------------------------------
// Presence
// ---------------------------------------------------------------------------

/// Empty heartbeat body, serialized as `{}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HeartbeatRequest {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FriendsPresenceRequest {
    pub user_ids: Vec<UserId>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FriendsPresenceResponse {
    #[serde(default)]
    pub presences: Vec<FriendPresence>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FriendPresence {
    pub user_id: UserId,
    #[serde(default)]
    pub is_online: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Friends
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FriendsResponse {
    #[serde(default)]
    pub friends: Vec<Friend>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Friend {
    pub id: i64,
    pub user_id: UserId,
    pub username: String,
}
