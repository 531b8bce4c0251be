//! Heartbeat and friend-presence polling on top of the request gateway.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use chat_common::wire::{path, FriendsPresenceRequest, FriendsPresenceResponse, HeartbeatRequest};
use chat_common::UserId;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use super::cadence::{Cadence, Ticks, Visibility};
use super::friends::FriendDirectory;
use crate::auth::session::SessionEvent;
use crate::error::ClientError;
use crate::gateway::RequestGateway;
use crate::transport::ApiRequest;

/// Last known presence of one friend.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PresenceEntry {
    pub is_online: bool,
    pub last_seen_at: Option<DateTime<Utc>>,
}

pub type PresenceSnapshot = HashMap<UserId, PresenceEntry>;

struct Inner {
    gateway: RequestGateway,
    snapshot: watch::Sender<Arc<PresenceSnapshot>>,
    visibility: watch::Sender<Visibility>,
    task: Mutex<Option<JoinHandle<()>>>,
}

/// Keeps the user marked online and polls friends' presence while a session
/// is active. Cheap to clone.
#[derive(Clone)]
pub struct PresenceTracker {
    inner: Arc<Inner>,
}

impl PresenceTracker {
    pub fn new(gateway: RequestGateway) -> Self {
        let (snapshot, _) = watch::channel(Arc::new(PresenceSnapshot::new()));
        let (visibility, _) = watch::channel(Visibility::default());
        Self {
            inner: Arc::new(Inner {
                gateway,
                snapshot,
                visibility,
                task: Mutex::new(None),
            }),
        }
    }

    /// Latest presence, replaced wholesale on every successful poll.
    pub fn snapshot(&self) -> Arc<PresenceSnapshot> {
        self.inner.snapshot.borrow().clone()
    }

    pub fn is_online(&self, user_id: UserId) -> bool {
        self.inner
            .snapshot
            .borrow()
            .get(&user_id)
            .is_some_and(|p| p.is_online)
    }

    /// Notified after every successful poll.
    pub fn subscribe(&self) -> watch::Receiver<Arc<PresenceSnapshot>> {
        self.inner.snapshot.subscribe()
    }

    pub fn visibility(&self) -> Visibility {
        *self.inner.visibility.borrow()
    }

    /// Switch cadence. Coming back to the foreground triggers an immediate
    /// heartbeat and presence poll.
    pub fn set_visibility(&self, visibility: Visibility) {
        let changed = self.inner.visibility.send_if_modified(|current| {
            if *current == visibility {
                return false;
            }
            *current = visibility;
            true
        });
        if changed {
            tracing::debug!(?visibility, "presence visibility changed");
        }
    }

    /// `POST /api/presence/heartbeat`. Failures are logged and dropped.
    pub async fn heartbeat(&self) {
        if let Err(err) = self.try_heartbeat().await {
            tracing::debug!(%err, "heartbeat failed");
        }
    }

    async fn try_heartbeat(&self) -> Result<(), ClientError> {
        let request = ApiRequest::post(path::HEARTBEAT).json(&HeartbeatRequest::default())?;
        self.inner.gateway.send(request).await?.error_for_status()?;
        Ok(())
    }

    /// Poll presence for `friend_ids`.
    ///
    /// An empty list sends nothing. On any failure the previous snapshot is
    /// kept as is.
    pub async fn refresh_presence(&self, friend_ids: &[UserId]) {
        if friend_ids.is_empty() {
            return;
        }
        match self.fetch_presence(friend_ids).await {
            Ok(response) => {
                let mut next: PresenceSnapshot = friend_ids
                    .iter()
                    .map(|id| (*id, PresenceEntry::default()))
                    .collect();
                for presence in response.presences {
                    next.insert(
                        presence.user_id,
                        PresenceEntry {
                            is_online: presence.is_online,
                            last_seen_at: presence.last_seen_at,
                        },
                    );
                }
                tracing::trace!(friends = next.len(), "presence snapshot updated");
                self.inner.snapshot.send_replace(Arc::new(next));
            }
            Err(err) => {
                tracing::debug!(%err, friends = friend_ids.len(), "presence refresh failed, keeping last snapshot");
            }
        }
    }

    async fn fetch_presence(&self, friend_ids: &[UserId]) -> Result<FriendsPresenceResponse, ClientError> {
        let request = ApiRequest::post(path::FRIENDS_PRESENCE).json(&FriendsPresenceRequest {
            user_ids: friend_ids.to_vec(),
        })?;
        self.inner
            .gateway
            .send(request)
            .await?
            .error_for_status()?
            .json()
    }

    // -----------------------------------------------------------------------
    // Background loop
    // -----------------------------------------------------------------------

    /// Start the heartbeat/poll loop. Requires a session; calling it while
    /// the loop runs is a no-op.
    pub fn start(&self, friends: Arc<dyn FriendDirectory>) -> Result<(), ClientError> {
        let session = self.inner.gateway.session();
        if !session.is_authenticated() {
            return Err(ClientError::NotAuthenticated);
        }

        let mut task = self.inner.task.lock();
        if task.as_ref().is_some_and(|t| !t.is_finished()) {
            tracing::debug!("presence loop already running");
            return Ok(());
        }

        let events = session.subscribe();
        let visibility = self.inner.visibility.subscribe();
        *task = Some(tokio::spawn(run(
            Arc::downgrade(&self.inner),
            friends,
            events,
            visibility,
        )));
        tracing::info!("presence tracking started");
        Ok(())
    }

    /// Stop the loop. Idempotent.
    pub fn stop(&self) {
        if let Some(task) = self.inner.task.lock().take() {
            task.abort();
            tracing::info!("presence tracking stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.inner
            .task
            .lock()
            .as_ref()
            .is_some_and(|t| !t.is_finished())
    }
}

async fn run(
    inner: Weak<Inner>,
    friends: Arc<dyn FriendDirectory>,
    mut events: broadcast::Receiver<SessionEvent>,
    mut visibility: watch::Receiver<Visibility>,
) {
    let upgrade = |inner: &Weak<Inner>| inner.upgrade().map(|inner| PresenceTracker { inner });
    let mut ticks = Ticks::new(Cadence::for_visibility(*visibility.borrow_and_update()), true);

    loop {
        tokio::select! {
            _ = ticks.heartbeat.tick() => {
                let Some(tracker) = upgrade(&inner) else { break };
                tracker.heartbeat().await;
            }
            _ = ticks.presence.tick() => {
                let Some(tracker) = upgrade(&inner) else { break };
                let ids = friends.friend_ids().await;
                tracker.refresh_presence(&ids).await;
            }
            changed = visibility.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = *visibility.borrow_and_update();
                ticks = Ticks::new(
                    Cadence::for_visibility(current),
                    current == Visibility::Foreground,
                );
            }
            event = events.recv() => match event {
                Ok(SessionEvent::Ended(reason)) => {
                    tracing::info!(?reason, "session ended, stopping presence loop");
                    break;
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "presence loop lagged behind session events");
                    let authenticated = upgrade(&inner)
                        .is_some_and(|t| t.inner.gateway.session().is_authenticated());
                    if !authenticated {
                        break;
                    }
                }
                Err(RecvError::Closed) => break,
            },
        }
    }
}
