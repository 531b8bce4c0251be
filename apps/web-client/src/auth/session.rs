//! Access-token lifecycle: storage, expiry tracking, scheduled renewal and
//! de-duplicated refresh.
//!
//! Every path that needs a fresh token (the renewal timer, the gateway's
//! pre-flight check, the gateway's reaction to a 401/403, restore on startup)
//! goes through [`SessionManager::renew`]. Only one refresh request is in
//! flight at a time; later callers await the same result.
//!
//! Each set or clear bumps a generation counter. A refresh that completes for
//! an older generation is discarded instead of reviving a session the user
//! already left.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chat_common::wire::{path, RefreshResponse};
use chat_common::{normalize_bearer, UserId};
use chrono::{DateTime, Utc};
use futures_util::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use reqwest::StatusCode;
use tokio::sync::broadcast;
use tokio::time;

use crate::auth::claims::decode_claims;
use crate::clock::{Clock, RuntimeClock};
use crate::config::Config;
use crate::error::{ClientError, RenewalError};
use crate::store::{keys, KeyValueStore};
use crate::timer::{self, TimerHandle};
use crate::transport::{ApiRequest, Transport};

/// Capacity of the session event channel.
const EVENT_CAPACITY: usize = 16;

/// Identity derived from the access token's claims.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CurrentUser {
    pub id: Option<UserId>,
    pub name: Option<String>,
}

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    /// Explicit `clear()` or logout.
    Cleared,
    /// The refresh endpoint could not issue a new token.
    RenewalFailed,
    /// The gateway rejected a freshly renewed token.
    Rejected,
}

/// Session lifecycle notifications for UI collaborators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Established(CurrentUser),
    Renewed,
    /// The user must re-authenticate.
    Ended(EndReason),
}

#[derive(Debug, Clone)]
struct Session {
    /// Always carries the `Bearer ` prefix.
    access_token: String,
    issued_at: DateTime<Utc>,
    subject: CurrentUser,
}

#[derive(Default)]
struct SessionState {
    session: Option<Session>,
    timer: Option<TimerHandle>,
    generation: u64,
}

type PendingRenewal = Shared<BoxFuture<'static, Result<(), RenewalError>>>;

/// The refresh currently on the wire and the session generation it serves.
struct InFlight {
    id: u64,
    generation: u64,
    pending: PendingRenewal,
}

struct Inner {
    transport: Arc<dyn Transport>,
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    renewal_delay: Duration,
    request_timeout: Duration,
    state: Mutex<SessionState>,
    /// Lock order: `in_flight` before `state`.
    in_flight: Mutex<Option<InFlight>>,
    next_renewal: AtomicU64,
    /// Serializes writes to the store so the last write reflects the latest state.
    persist_lock: tokio::sync::Mutex<()>,
    events: broadcast::Sender<SessionEvent>,
}

/// Single owner of the client's authentication state. Cheap to clone.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

impl SessionManager {
    pub fn new(
        config: &Config,
        transport: Arc<dyn Transport>,
        store: Arc<dyn KeyValueStore>,
    ) -> Self {
        Self::with_clock(config, transport, store, Arc::new(RuntimeClock::new()))
    }

    pub fn with_clock(
        config: &Config,
        transport: Arc<dyn Transport>,
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                transport,
                store,
                clock,
                ttl: config.access_token_ttl,
                renewal_delay: config.renewal_delay(),
                request_timeout: config.request_timeout,
                state: Mutex::new(SessionState::default()),
                in_flight: Mutex::new(None),
                next_renewal: AtomicU64::new(1),
                persist_lock: tokio::sync::Mutex::new(()),
                events,
            }),
        }
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub fn is_authenticated(&self) -> bool {
        self.inner.state.lock().session.is_some()
    }

    /// True without a session, or once the token is at least `ttl` old.
    pub fn is_expired(&self) -> bool {
        let state = self.inner.state.lock();
        match &state.session {
            Some(session) => self.age(session.issued_at) >= self.inner.ttl,
            None => true,
        }
    }

    /// Identity of the logged-in user. Fields are `None` when the token's
    /// claims could not be decoded.
    pub fn current_user(&self) -> Option<CurrentUser> {
        self.inner
            .state
            .lock()
            .session
            .as_ref()
            .map(|s| s.subject.clone())
    }

    /// `Authorization` header value for the current token.
    pub fn access_token(&self) -> Option<String> {
        self.inner
            .state
            .lock()
            .session
            .as_ref()
            .map(|s| s.access_token.clone())
    }

    /// The pending renewal timer, if any.
    pub fn renewal_timer(&self) -> Option<TimerHandle> {
        self.inner.state.lock().timer.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    pub(crate) fn transport(&self) -> &Arc<dyn Transport> {
        &self.inner.transport
    }

    pub(crate) fn request_timeout(&self) -> Duration {
        self.inner.request_timeout
    }

    fn generation(&self) -> u64 {
        self.inner.state.lock().generation
    }

    fn age(&self, issued_at: DateTime<Utc>) -> Duration {
        (self.inner.clock.now() - issued_at)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }

    // -----------------------------------------------------------------------
    // Mutations
    // -----------------------------------------------------------------------

    /// Store a newly issued token, replacing any previous session.
    ///
    /// Cancels the pending renewal timer and arms a new one `ttl - margin`
    /// from now. A token whose claims cannot be decoded is still stored; the
    /// session is then authenticated without a known identity.
    pub async fn set_session(&self, token: &str) -> CurrentUser {
        let now = self.inner.clock.now();
        let user = {
            let mut state = self.inner.state.lock();
            self.install(&mut state, token, now)
        };
        tracing::info!(user_id = ?user.id, username = ?user.name, "session established");
        let _ = self.inner.events.send(SessionEvent::Established(user.clone()));
        self.persist().await;
        user
    }

    /// Drop the session and cancel the renewal timer. Idempotent.
    pub async fn clear(&self) {
        self.end(EndReason::Cleared).await;
    }

    pub(crate) async fn end(&self, reason: EndReason) {
        let ended = {
            let mut state = self.inner.state.lock();
            if let Some(timer) = state.timer.take() {
                timer.cancel();
            }
            state.generation += 1;
            state.session.take().is_some()
        };
        if ended {
            tracing::info!(?reason, "session ended");
            let _ = self.inner.events.send(SessionEvent::Ended(reason));
        }
        self.persist().await;
    }

    /// Reload a session persisted by an earlier run.
    ///
    /// Returns whether the client is authenticated afterwards. An expired
    /// token is refreshed right away; if that fails the session is cleared.
    pub async fn restore(&self) -> Result<bool, ClientError> {
        let store = self.inner.store.as_ref();
        let Some(token) = store.get(keys::ACCESS_TOKEN).await? else {
            return Ok(false);
        };

        let now = self.inner.clock.now();
        // Unknown age counts as expired.
        let stale = chrono::Duration::from_std(self.inner.ttl)
            .ok()
            .and_then(|ttl| now.checked_sub_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let issued_at = store
            .get(keys::TOKEN_SET_AT)
            .await?
            .and_then(|v| v.parse::<i64>().ok())
            .and_then(DateTime::from_timestamp_millis)
            .unwrap_or(stale);

        let user = {
            let mut state = self.inner.state.lock();
            self.install(&mut state, &token, issued_at)
        };
        tracing::info!(user_id = ?user.id, username = ?user.name, "session restored");
        let _ = self.inner.events.send(SessionEvent::Established(user));

        if self.is_expired() {
            tracing::info!("restored token expired, refreshing");
            match self.renew().await {
                Ok(()) => {}
                // Replaced by a login while refreshing; that session stands.
                Err(RenewalError::Superseded) => return Ok(self.is_authenticated()),
                Err(err) => {
                    tracing::warn!(%err, "could not refresh restored session");
                    self.end(EndReason::RenewalFailed).await;
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }

    /// Replace the session under the state lock and re-arm the timer.
    fn install(&self, state: &mut SessionState, token: &str, issued_at: DateTime<Utc>) -> CurrentUser {
        let access_token = normalize_bearer(token);
        let subject = match decode_claims(&access_token) {
            Ok(claims) => CurrentUser {
                id: claims.uid,
                name: claims.username,
            },
            Err(err) => {
                tracing::warn!(%err, "failed to decode token claims, identity unavailable");
                CurrentUser::default()
            }
        };

        if let Some(previous) = state.timer.take() {
            previous.cancel();
        }
        state.generation += 1;

        let delay = self.inner.renewal_delay.saturating_sub(self.age(issued_at));
        state.timer = Some(self.arm_renewal(delay, state.generation));
        state.session = Some(Session {
            access_token,
            issued_at,
            subject: subject.clone(),
        });
        subject
    }

    fn arm_renewal(&self, delay: Duration, generation: u64) -> TimerHandle {
        tracing::debug!(delay_secs = delay.as_secs(), "token renewal scheduled");
        let weak = Arc::downgrade(&self.inner);
        timer::schedule_once(delay, async move {
            if let Some(inner) = weak.upgrade() {
                SessionManager { inner }.on_renewal_timer(generation).await;
            }
        })
    }

    async fn on_renewal_timer(&self, generation: u64) {
        if self.generation() != generation {
            return;
        }
        tracing::info!("renewal timer fired");
        match self.renew().await {
            Ok(()) => {}
            Err(RenewalError::Superseded) => {
                tracing::debug!("scheduled renewal superseded by a newer session");
            }
            Err(err) => {
                tracing::warn!(%err, "scheduled token renewal failed");
                self.end(EndReason::RenewalFailed).await;
            }
        }
    }

    // -----------------------------------------------------------------------
    // Renewal
    // -----------------------------------------------------------------------

    /// Obtain a new access token from `POST /api/refresh`.
    ///
    /// If a refresh for the current session is already in flight this awaits
    /// it instead of issuing a second request; every waiter sees the same
    /// outcome. A refresh left over from an earlier session is never joined.
    pub async fn renew(&self) -> Result<(), RenewalError> {
        let pending = {
            let mut slot = self.inner.in_flight.lock();
            let generation = self.generation();
            match slot.as_ref() {
                Some(current) if current.generation == generation => {
                    tracing::debug!("joining in-flight token refresh");
                    current.pending.clone()
                }
                _ => {
                    let id = self.inner.next_renewal.fetch_add(1, Ordering::Relaxed);
                    let this = self.clone();
                    let task = tokio::spawn(async move {
                        let result = this.refresh_once(generation).await;
                        this.finish_renewal(id);
                        result
                    });
                    let pending: PendingRenewal = async move {
                        task.await.unwrap_or(Err(RenewalError::Aborted))
                    }
                    .boxed()
                    .shared();
                    *slot = Some(InFlight {
                        id,
                        generation,
                        pending: pending.clone(),
                    });
                    pending
                }
            }
        };
        pending.await
    }

    /// Renew after the gateway rejected `rejected`.
    ///
    /// Skips the network when the session already moved on to a different,
    /// unexpired token; the caller can simply retry with it.
    pub async fn renew_rejected(&self, rejected: &str) -> Result<(), RenewalError> {
        {
            let state = self.inner.state.lock();
            if let Some(session) = &state.session {
                if session.access_token != rejected && self.age(session.issued_at) < self.inner.ttl {
                    tracing::debug!("token already renewed since the rejected request");
                    return Ok(());
                }
            }
        }
        self.renew().await
    }

    fn finish_renewal(&self, id: u64) {
        let mut slot = self.inner.in_flight.lock();
        if slot.as_ref().is_some_and(|current| current.id == id) {
            *slot = None;
        }
    }

    async fn refresh_once(&self, generation: u64) -> Result<(), RenewalError> {
        tracing::info!("refreshing access token");
        let request = ApiRequest::post(path::REFRESH);
        let outcome = time::timeout(
            self.inner.request_timeout,
            self.inner.transport.execute(&request, None),
        )
        .await;

        if self.generation() != generation {
            tracing::debug!("session changed during refresh, discarding result");
            return Err(RenewalError::Superseded);
        }

        let response = match outcome {
            Err(_elapsed) => {
                tracing::warn!("token refresh timed out");
                return Err(RenewalError::Timeout);
            }
            Ok(Err(err)) => {
                tracing::warn!(%err, "token refresh request failed");
                return Err(err.into());
            }
            Ok(Ok(response)) => response,
        };

        if !response.is_success() {
            tracing::warn!(
                status = %response.status,
                error = %response.error_message(),
                "token refresh rejected"
            );
            if response.status == StatusCode::UNAUTHORIZED {
                // The refresh cookie is gone; nothing can revive this session.
                self.end(EndReason::RenewalFailed).await;
            }
            return Err(RenewalError::Rejected(response.status));
        }

        let token = response
            .json::<RefreshResponse>()
            .ok()
            .and_then(|body| body.access_token)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                tracing::warn!("refresh response carried no access token");
                RenewalError::MissingToken
            })?;

        let now = self.inner.clock.now();
        {
            let mut state = self.inner.state.lock();
            if state.generation != generation {
                return Err(RenewalError::Superseded);
            }
            self.install(&mut state, &token, now);
        }
        tracing::info!("access token refreshed");
        let _ = self.inner.events.send(SessionEvent::Renewed);
        self.persist().await;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Persistence
    // -----------------------------------------------------------------------

    async fn persist(&self) {
        let _guard = self.inner.persist_lock.lock().await;
        let session = self.inner.state.lock().session.clone();
        if let Err(err) = write_session(self.inner.store.as_ref(), session.as_ref()).await {
            tracing::warn!(%err, "failed to persist session state");
        }
    }
}

async fn write_session(store: &dyn KeyValueStore, session: Option<&Session>) -> Result<(), ClientError> {
    let Some(session) = session else {
        for key in [keys::ACCESS_TOKEN, keys::TOKEN_SET_AT, keys::USERNAME, keys::USER_ID] {
            store.del(key).await?;
        }
        return Ok(());
    };

    store.set(keys::ACCESS_TOKEN, &session.access_token).await?;
    store
        .set(keys::TOKEN_SET_AT, &session.issued_at.timestamp_millis().to_string())
        .await?;
    match &session.subject.name {
        Some(name) => store.set(keys::USERNAME, name).await?,
        None => store.del(keys::USERNAME).await?,
    }
    match session.subject.id {
        Some(id) => store.set(keys::USER_ID, &id.to_string()).await?,
        None => store.del(keys::USER_ID).await?,
    }
    Ok(())
}
