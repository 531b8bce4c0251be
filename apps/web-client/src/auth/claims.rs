//! Reading identity claims out of an access token.
//!
//! The client never verifies the signature; the gateway does. The payload is
//! only used to show who is logged in.

use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig};
use base64::engine::DecodePaddingMode;
use base64::Engine;
use chat_common::{strip_bearer, UserId};
use serde::Deserialize;

/// base64url, padding optional.
const PAYLOAD_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Claims the auth service embeds in access tokens.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TokenClaims {
    #[serde(default)]
    pub uid: Option<UserId>,
    /// Display name. Older tokens carried it as `name`.
    #[serde(default, alias = "name")]
    pub username: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub exp: Option<i64>,
}

#[derive(Debug, thiserror::Error)]
pub enum ClaimsError {
    #[error("token has no payload segment")]
    MissingPayload,
    #[error("payload is not base64url: {0}")]
    Encoding(#[from] base64::DecodeError),
    #[error("payload is not a JSON claims object: {0}")]
    Json(#[from] serde_json::Error),
}

/// Decode the claims from the second dot-separated segment of `token`.
/// A leading `Bearer ` is ignored.
pub fn decode_claims(token: &str) -> Result<TokenClaims, ClaimsError> {
    let payload = strip_bearer(token)
        .split('.')
        .nth(1)
        .filter(|s| !s.is_empty())
        .ok_or(ClaimsError::MissingPayload)?;
    let bytes = PAYLOAD_ENGINE.decode(payload)?;
    Ok(serde_json::from_slice(&bytes)?)
}
