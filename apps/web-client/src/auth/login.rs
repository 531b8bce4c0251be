//! Registration, password login and logout against the gateway's auth
//! endpoints.

use chat_common::wire::{path, LoginRequest, LoginResponse, RegisterRequest, RegisterResponse};
use chat_common::UserId;

use crate::auth::session::CurrentUser;
use crate::error::ClientError;
use crate::gateway::RequestGateway;
use crate::transport::ApiRequest;

#[derive(Clone)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Details for a new account.
#[derive(Clone)]
pub struct Registration {
    pub name: String,
    pub email: String,
    pub password: String,
    pub password_confirm: String,
}

impl std::fmt::Debug for Registration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registration")
            .field("name", &self.name)
            .field("email", &self.email)
            .finish_non_exhaustive()
    }
}

/// Create an account with `POST /api/register`. No session is started; the
/// new user logs in separately.
pub async fn register(gateway: &RequestGateway, registration: &Registration) -> Result<UserId, ClientError> {
    let request = ApiRequest::post(path::REGISTER).json(&RegisterRequest {
        name: registration.name.clone(),
        email: registration.email.clone(),
        password: registration.password.clone(),
        password_confirm: registration.password_confirm.clone(),
    })?;
    let response = gateway.dispatch(&request, None).await?.error_for_status()?;
    let body: RegisterResponse = response.json()?;
    tracing::info!(user_id = body.user_id, "account registered");
    Ok(body.user_id)
}

/// Exchange credentials for an access token and start a session.
///
/// The gateway also sets the refresh cookie on this response. The returned
/// identity is the one decoded from the token, the same one
/// [`SessionManager::current_user`](crate::auth::SessionManager::current_user)
/// reports and the store keeps.
pub async fn login(gateway: &RequestGateway, credentials: &Credentials) -> Result<CurrentUser, ClientError> {
    let request = ApiRequest::post(path::LOGIN).json(&LoginRequest {
        email: credentials.email.clone(),
        password: credentials.password.clone(),
    })?;
    let response = gateway.dispatch(&request, None).await?.error_for_status()?;
    let body: LoginResponse = response.json()?;
    if body.access_token.is_empty() {
        return Err(ClientError::Decode("login response carried no access token".into()));
    }

    Ok(gateway.session().set_session(&body.access_token).await)
}

/// End the session on the gateway and locally. The local session is cleared
/// even if the gateway cannot be reached.
pub async fn logout(gateway: &RequestGateway) {
    let request = ApiRequest::post(path::LOGOUT);
    match gateway.dispatch(&request, None).await {
        Ok(response) if !response.is_success() => {
            tracing::warn!(status = %response.status, error = %response.error_message(), "logout rejected");
        }
        Ok(_) => {}
        Err(err) => tracing::warn!(%err, "logout request failed"),
    }
    gateway.session().clear().await;
}
