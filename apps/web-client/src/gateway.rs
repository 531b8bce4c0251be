//! Single entry point for authenticated calls to the web gateway.
//!
//! Wraps every request with the session's token, renews it before dispatch
//! when it has expired, and recovers from one auth rejection per call with a
//! renewal and a retry.

use std::sync::Arc;
use std::time::Duration;

use reqwest::StatusCode;
use tokio::time;

use crate::auth::session::{EndReason, SessionManager};
use crate::error::{ClientError, RenewalError};
use crate::transport::{ApiRequest, ApiResponse, Transport};

#[derive(Clone)]
pub struct RequestGateway {
    session: SessionManager,
    transport: Arc<dyn Transport>,
    timeout: Duration,
}

fn is_auth_failure(status: StatusCode) -> bool {
    status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN
}

impl RequestGateway {
    pub fn new(session: SessionManager) -> Self {
        Self {
            transport: session.transport().clone(),
            timeout: session.request_timeout(),
            session,
        }
    }

    pub fn session(&self) -> &SessionManager {
        &self.session
    }

    /// Send `request`, returning the gateway's response verbatim unless the
    /// session cannot be kept alive.
    ///
    /// At most two dispatches and one renewal happen per call. A 401/403 on
    /// the retry (or after a pre-flight renewal) is not retried again: a 401
    /// ends the session with [`ClientError::SessionExpired`], a 403 is a real
    /// permission denial and is returned to the caller.
    ///
    /// A renewal overtaken by a new login or logout leaves that newer state
    /// alone: the call continues with whatever token is current, or fails
    /// with [`ClientError::SessionExpired`] if there is none.
    pub async fn send(&self, request: ApiRequest) -> Result<ApiResponse, ClientError> {
        let mut renewed = false;

        if self.session.is_authenticated() && self.session.is_expired() {
            tracing::debug!(path = %request.path, "token expired, renewing before dispatch");
            match self.session.renew().await {
                Ok(()) => {}
                Err(RenewalError::Superseded) => {
                    tracing::debug!(path = %request.path, "session replaced during renewal");
                    if !self.session.is_authenticated() {
                        return Err(ClientError::SessionExpired);
                    }
                }
                Err(err) => {
                    return Err(self.session_expired(&request, EndReason::RenewalFailed, &err.to_string()).await);
                }
            }
            renewed = true;
        }

        let token = self.session.access_token();
        let response = self.dispatch(&request, token.as_deref()).await?;
        let Some(rejected) = token else {
            return Ok(response);
        };
        if !is_auth_failure(response.status) {
            return Ok(response);
        }

        if renewed {
            return self.after_fresh_token(&request, response).await;
        }

        tracing::info!(path = %request.path, status = %response.status, "auth rejected, renewing token");
        match self.session.renew_rejected(&rejected).await {
            Ok(()) => {}
            Err(RenewalError::Superseded) => {
                tracing::debug!(path = %request.path, "session replaced during renewal, retrying with current token");
            }
            Err(err) => {
                return Err(self.session_expired(&request, EndReason::RenewalFailed, &err.to_string()).await);
            }
        }

        let Some(token) = self.session.access_token() else {
            return Err(ClientError::SessionExpired);
        };
        let retry = self.dispatch(&request, Some(&token)).await?;
        if is_auth_failure(retry.status) {
            return self.after_fresh_token(&request, retry).await;
        }
        Ok(retry)
    }

    /// Rejection of a request that already carried a freshly renewed token.
    async fn after_fresh_token(
        &self,
        request: &ApiRequest,
        response: ApiResponse,
    ) -> Result<ApiResponse, ClientError> {
        if response.status == StatusCode::FORBIDDEN {
            return Ok(response);
        }
        Err(self
            .session_expired(request, EndReason::Rejected, &response.error_message())
            .await)
    }

    async fn session_expired(&self, request: &ApiRequest, reason: EndReason, detail: &str) -> ClientError {
        tracing::warn!(path = %request.path, ?reason, detail, "session could not be renewed");
        self.session.end(reason).await;
        ClientError::SessionExpired
    }

    /// One bounded dispatch. `token` is the full `Authorization` value.
    pub(crate) async fn dispatch(
        &self,
        request: &ApiRequest,
        token: Option<&str>,
    ) -> Result<ApiResponse, ClientError> {
        let response = time::timeout(self.timeout, self.transport.execute(request, token))
            .await
            .map_err(|_| {
                tracing::warn!(method = %request.method, path = %request.path, "request timed out");
                ClientError::Timeout
            })??;
        tracing::debug!(method = %request.method, path = %request.path, status = %response.status, "gateway call");
        Ok(response)
    }
}
