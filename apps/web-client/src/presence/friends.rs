//! Where the presence loop gets the ids it polls for.

use async_trait::async_trait;
use chat_common::wire::{path, Friend, FriendsResponse};
use chat_common::UserId;

use crate::error::ClientError;
use crate::gateway::RequestGateway;
use crate::transport::ApiRequest;

/// Supplies the current friend ids on every presence poll.
#[async_trait]
pub trait FriendDirectory: Send + Sync {
    async fn friend_ids(&self) -> Vec<UserId>;
}

#[async_trait]
impl<F> FriendDirectory for F
where
    F: Fn() -> Vec<UserId> + Send + Sync,
{
    async fn friend_ids(&self) -> Vec<UserId> {
        self()
    }
}

/// Friend list served by `GET /api/friends`.
#[derive(Clone)]
pub struct FriendsEndpoint {
    gateway: RequestGateway,
}

impl FriendsEndpoint {
    pub fn new(gateway: RequestGateway) -> Self {
        Self { gateway }
    }

    pub async fn fetch(&self) -> Result<Vec<Friend>, ClientError> {
        let response = self
            .gateway
            .send(ApiRequest::get(path::FRIENDS))
            .await?
            .error_for_status()?;
        Ok(response.json::<FriendsResponse>()?.friends)
    }
}

#[async_trait]
impl FriendDirectory for FriendsEndpoint {
    /// An unavailable friend list reads as empty, which skips the poll.
    async fn friend_ids(&self) -> Vec<UserId> {
        match self.fetch().await {
            Ok(friends) => friends.into_iter().map(|f| f.user_id).collect(),
            Err(err) => {
                tracing::debug!(%err, "failed to load friend list");
                Vec::new()
            }
        }
    }
}
