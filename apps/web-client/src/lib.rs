pub mod auth;
pub mod clock;
pub mod config;
pub mod error;
pub mod gateway;
pub mod presence;
pub mod store;
pub mod timer;
pub mod transport;

#[cfg(test)]
mod testing;

use std::sync::Arc;

use auth::SessionManager;
use config::Config;
use error::ClientError;
use gateway::RequestGateway;
use presence::PresenceTracker;
use store::{FileStore, KeyValueStore, MemoryStore};
use transport::{HttpTransport, Transport};

/// Everything a UI needs, wired around one transport and one session.
#[derive(Clone)]
pub struct ChatClient {
    pub config: Arc<Config>,
    pub session: SessionManager,
    pub gateway: RequestGateway,
    pub presence: PresenceTracker,
}

impl ChatClient {
    pub fn new(config: Config, transport: Arc<dyn Transport>, store: Arc<dyn KeyValueStore>) -> Self {
        let session = SessionManager::new(&config, transport, store);
        let gateway = RequestGateway::new(session.clone());
        let presence = PresenceTracker::new(gateway.clone());
        Self {
            config: Arc::new(config),
            session,
            gateway,
            presence,
        }
    }

    /// Build a client talking HTTP to `config.base_url`. The session is kept
    /// in `config.store_path` when set, in memory otherwise.
    pub async fn connect(config: Config) -> Result<Self, ClientError> {
        let transport: Arc<dyn Transport> = Arc::new(HttpTransport::new(&config)?);
        let store: Arc<dyn KeyValueStore> = match &config.store_path {
            Some(path) => Arc::new(FileStore::open(path).await?),
            None => Arc::new(MemoryStore::new()),
        };
        Ok(Self::new(config, transport, store))
    }
}
