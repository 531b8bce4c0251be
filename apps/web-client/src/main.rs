use std::path::Path;
use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use web_client::auth::{self, Credentials, SessionEvent};
use web_client::config::Config;
use web_client::error::ClientError;
use web_client::presence::FriendsEndpoint;
use web_client::ChatClient;

#[tokio::main]
async fn main() {
    // Load .env file (silently skip if missing, env vars may be set externally)
    if dotenvy::dotenv().is_err() {
        let env_path = Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
        let _ = dotenvy::from_path(env_path);
    }

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(err) = run().await {
        tracing::error!(%err, "web-client exited with error");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), ClientError> {
    let config = Config::from_env()?;
    tracing::info!(gateway = %config.base_url, "web-client configured");

    let client = ChatClient::connect(config).await?;
    let mut events = client.session.subscribe();

    if client.session.restore().await? {
        tracing::info!("resumed stored session");
    } else {
        let credentials = credentials().await?;
        let user = auth::login(&client.gateway, &credentials).await?;
        tracing::info!(user_id = ?user.id, username = ?user.name, "logged in");
    }

    let friends = Arc::new(FriendsEndpoint::new(client.gateway.clone()));
    client.presence.start(friends)?;
    let mut snapshots = client.presence.subscribe();

    loop {
        tokio::select! {
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = snapshots.borrow_and_update().clone();
                let online = snapshot.values().filter(|p| p.is_online).count();
                tracing::info!(friends = snapshot.len(), online, "presence updated");
            }
            event = events.recv() => match event {
                Ok(SessionEvent::Ended(reason)) => {
                    tracing::warn!(?reason, "session ended, please log in again");
                    break;
                }
                Ok(SessionEvent::Renewed) => tracing::debug!("access token renewed"),
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => tracing::debug!(skipped, "missed session events"),
                Err(RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutting down");
                auth::logout(&client.gateway).await;
                break;
            }
        }
    }

    client.presence.stop();
    Ok(())
}

/// `CHAT_EMAIL` / `CHAT_PASSWORD`, prompting for whatever is missing.
async fn credentials() -> Result<Credentials, ClientError> {
    let email = match std::env::var("CHAT_EMAIL") {
        Ok(email) if !email.is_empty() => email,
        _ => prompt("Email: ", false).await?,
    };
    let password = match std::env::var("CHAT_PASSWORD") {
        Ok(password) if !password.is_empty() => password,
        _ => prompt("Password: ", true).await?,
    };
    Ok(Credentials { email, password })
}

async fn prompt(label: &'static str, secret: bool) -> Result<String, ClientError> {
    tokio::task::spawn_blocking(move || {
        use std::io::Write;
        print!("{label}");
        std::io::stdout().flush()?;
        if secret {
            return rpassword::read_password();
        }
        let mut line = String::new();
        std::io::stdin().read_line(&mut line)?;
        Ok(line.trim().to_string())
    })
    .await
    .map_err(|e| ClientError::Config(format!("prompt task failed: {e}")))?
    .map_err(|e| ClientError::Config(format!("failed to read {}: {e}", label.trim_end_matches(": "))))
}
