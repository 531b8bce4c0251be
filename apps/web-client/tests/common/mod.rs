#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::header::{AUTHORIZATION, COOKIE, SET_COOKIE};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use chat_common::wire::{
    path, Friend, FriendPresence, FriendsPresenceRequest, FriendsPresenceResponse, FriendsResponse,
    LoginRequest, LoginResponse,
};
use chat_common::UserId;
use web_client::auth::{self, Credentials};
use web_client::config::Config;
use web_client::store::{KeyValueStore, MemoryStore};
use web_client::transport::HttpTransport;
use web_client::ChatClient;

pub const PASSWORD: &str = "correct horse";
pub const USER_ID: UserId = 42;
const SECRET: &[u8] = b"mock-gateway-secret";
const REFRESH_COOKIE: &str = "refresh_token";

/// Echoes the caller's identity.
pub const WHOAMI: &str = "/api/whoami";
/// Always answers 403 to authenticated callers.
pub const ADMIN: &str = "/api/admin";

#[derive(Debug, Serialize, Deserialize)]
pub struct TestClaims {
    pub uid: UserId,
    pub username: String,
    pub role: String,
    pub exp: i64,
    pub jti: u64,
}

/// In-memory stand-in for the web gateway.
pub struct MockState {
    encoding: EncodingKey,
    decoding: DecodingKey,
    next_id: AtomicU64,
    refresh_sessions: Mutex<HashMap<String, (UserId, String)>>,
    revoked: Mutex<HashSet<String>>,
    friends: Mutex<Vec<Friend>>,
    online: Mutex<HashSet<UserId>>,
    presence_down: AtomicBool,
    pub refreshes: AtomicUsize,
    pub heartbeats: AtomicUsize,
}

impl MockState {
    fn new() -> Self {
        Self {
            encoding: EncodingKey::from_secret(SECRET),
            decoding: DecodingKey::from_secret(SECRET),
            next_id: AtomicU64::new(1),
            refresh_sessions: Mutex::new(HashMap::new()),
            revoked: Mutex::new(HashSet::new()),
            friends: Mutex::new(Vec::new()),
            online: Mutex::new(HashSet::new()),
            presence_down: AtomicBool::new(false),
            refreshes: AtomicUsize::new(0),
            heartbeats: AtomicUsize::new(0),
        }
    }

    /// Mint an HS256 access token. Returned without the `Bearer ` prefix,
    /// like the real gateway.
    pub fn mint(&self, uid: UserId, username: &str) -> String {
        let claims = TestClaims {
            uid,
            username: username.to_string(),
            role: "user".to_string(),
            exp: (chrono::Utc::now() + chrono::Duration::hours(1)).timestamp(),
            jti: self.next_id.fetch_add(1, Ordering::SeqCst),
        };
        jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .expect("mint test token")
    }

    /// Reject `token` from now on. Accepts the header form too.
    pub fn revoke(&self, token: &str) {
        let raw = token.strip_prefix("Bearer ").unwrap_or(token);
        self.revoked.lock().insert(raw.to_string());
    }

    /// Forget every refresh cookie, so no session can be renewed.
    pub fn revoke_refresh_tokens(&self) {
        self.refresh_sessions.lock().clear();
    }

    pub fn set_friends(&self, friends: Vec<(UserId, &str)>) {
        *self.friends.lock() = friends
            .into_iter()
            .enumerate()
            .map(|(i, (user_id, username))| Friend {
                id: i as i64 + 1,
                user_id,
                username: username.to_string(),
            })
            .collect();
    }

    pub fn set_online(&self, user_id: UserId, online: bool) {
        let mut set = self.online.lock();
        if online {
            set.insert(user_id);
        } else {
            set.remove(&user_id);
        }
    }

    pub fn is_online(&self, user_id: UserId) -> bool {
        self.online.lock().contains(&user_id)
    }

    pub fn set_presence_down(&self, down: bool) {
        self.presence_down.store(down, Ordering::SeqCst);
    }

    pub fn refresh_count(&self) -> usize {
        self.refreshes.load(Ordering::SeqCst)
    }

    fn authenticate(&self, headers: &HeaderMap) -> Result<TestClaims, Response> {
        let token = headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .ok_or_else(|| error(StatusCode::UNAUTHORIZED, "missing bearer token"))?;
        if self.revoked.lock().contains(token) {
            return Err(error(StatusCode::UNAUTHORIZED, "token revoked"));
        }
        jsonwebtoken::decode::<TestClaims>(token, &self.decoding, &Validation::new(Algorithm::HS256))
            .map(|data| data.claims)
            .map_err(|_| error(StatusCode::UNAUTHORIZED, "invalid token"))
    }
}

pub struct MockGateway {
    pub base_url: String,
    pub state: Arc<MockState>,
}

/// Boot the mock gateway on an ephemeral port.
pub async fn spawn_gateway() -> MockGateway {
    let state = Arc::new(MockState::new());
    let app = Router::new()
        .route(path::LOGIN, post(login))
        .route(path::LOGOUT, post(logout))
        .route(path::REFRESH, post(refresh))
        .route(path::FRIENDS, get(friends))
        .route(path::HEARTBEAT, post(heartbeat))
        .route(path::FRIENDS_PRESENCE, post(friends_presence))
        .route(WHOAMI, get(whoami))
        .route(ADMIN, get(admin))
        .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind mock gateway");
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    MockGateway {
        base_url: format!("http://{addr}"),
        state,
    }
}

fn error(status: StatusCode, message: &str) -> Response {
    (status, Json(serde_json::json!({ "error": message }))).into_response()
}

fn refresh_cookie(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == REFRESH_COOKIE)
        .map(|(_, value)| value.to_string())
}

async fn login(State(gw): State<Arc<MockState>>, Json(body): Json<LoginRequest>) -> Response {
    if body.password != PASSWORD {
        return error(StatusCode::UNAUTHORIZED, "invalid credentials");
    }
    let username = body.email.split('@').next().unwrap_or_default().to_string();
    let refresh = format!("rt-{}", gw.next_id.fetch_add(1, Ordering::SeqCst));
    gw.refresh_sessions
        .lock()
        .insert(refresh.clone(), (USER_ID, username.clone()));

    let cookie = format!("{REFRESH_COOKIE}={refresh}; Path=/; HttpOnly");
    let body = LoginResponse {
        access_token: gw.mint(USER_ID, &username),
        user_id: Some(USER_ID),
    };
    ([(SET_COOKIE, cookie)], Json(body)).into_response()
}

async fn logout(State(gw): State<Arc<MockState>>, headers: HeaderMap) -> Response {
    if let Some(refresh) = refresh_cookie(&headers) {
        gw.refresh_sessions.lock().remove(&refresh);
    }
    let cookie = format!("{REFRESH_COOKIE}=; Path=/; Max-Age=0");
    ([(SET_COOKIE, cookie)], StatusCode::NO_CONTENT).into_response()
}

async fn refresh(State(gw): State<Arc<MockState>>, headers: HeaderMap) -> Response {
    gw.refreshes.fetch_add(1, Ordering::SeqCst);
    let Some(refresh) = refresh_cookie(&headers) else {
        return error(StatusCode::UNAUTHORIZED, "missing refresh token");
    };
    let Some((uid, username)) = gw.refresh_sessions.lock().get(&refresh).cloned() else {
        return error(StatusCode::UNAUTHORIZED, "invalid refresh token");
    };
    Json(serde_json::json!({ "access_token": gw.mint(uid, &username) })).into_response()
}

async fn friends(State(gw): State<Arc<MockState>>, headers: HeaderMap) -> Response {
    if let Err(resp) = gw.authenticate(&headers) {
        return resp;
    }
    Json(FriendsResponse {
        friends: gw.friends.lock().clone(),
    })
    .into_response()
}

async fn heartbeat(State(gw): State<Arc<MockState>>, headers: HeaderMap) -> Response {
    let claims = match gw.authenticate(&headers) {
        Ok(claims) => claims,
        Err(resp) => return resp,
    };
    gw.heartbeats.fetch_add(1, Ordering::SeqCst);
    gw.set_online(claims.uid, true);
    Json(serde_json::json!({})).into_response()
}

async fn friends_presence(
    State(gw): State<Arc<MockState>>,
    headers: HeaderMap,
    Json(body): Json<FriendsPresenceRequest>,
) -> Response {
    if let Err(resp) = gw.authenticate(&headers) {
        return resp;
    }
    if gw.presence_down.load(Ordering::SeqCst) {
        return error(StatusCode::SERVICE_UNAVAILABLE, "presence service unavailable");
    }
    let known: HashSet<UserId> = gw.friends.lock().iter().map(|f| f.user_id).collect();
    let online = gw.online.lock().clone();
    // Unknown ids are left out of the answer.
    let presences = body
        .user_ids
        .into_iter()
        .filter(|id| known.contains(id))
        .map(|user_id| {
            let is_online = online.contains(&user_id);
            FriendPresence {
                user_id,
                is_online,
                last_seen_at: (!is_online).then(chrono::Utc::now),
            }
        })
        .collect();
    Json(FriendsPresenceResponse { presences }).into_response()
}

async fn whoami(State(gw): State<Arc<MockState>>, headers: HeaderMap) -> Response {
    match gw.authenticate(&headers) {
        Ok(claims) => Json(serde_json::json!({ "uid": claims.uid, "username": claims.username }))
            .into_response(),
        Err(resp) => resp,
    }
}

async fn admin(State(gw): State<Arc<MockState>>, headers: HeaderMap) -> Response {
    if let Err(resp) = gw.authenticate(&headers) {
        return resp;
    }
    error(StatusCode::FORBIDDEN, "missing permission")
}

// ---------------------------------------------------------------------------
// Client helpers
// ---------------------------------------------------------------------------

pub fn config(gw: &MockGateway) -> Config {
    let mut config = Config::new(&gw.base_url);
    config.request_timeout = Duration::from_secs(5);
    config
}

pub fn client_with_store(config: Config, store: Arc<dyn KeyValueStore>) -> ChatClient {
    let transport = Arc::new(HttpTransport::new(&config).expect("http transport"));
    ChatClient::new(config, transport, store)
}

pub fn client(config: Config) -> ChatClient {
    client_with_store(config, Arc::new(MemoryStore::new()))
}

pub fn credentials(password: &str) -> Credentials {
    Credentials {
        email: "alice@example.com".to_string(),
        password: password.to_string(),
    }
}

/// A client logged in as `alice` (uid 42).
pub async fn logged_in(gw: &MockGateway) -> ChatClient {
    let client = client(config(gw));
    auth::login(&client.gateway, &credentials(PASSWORD))
        .await
        .expect("login");
    client
}
