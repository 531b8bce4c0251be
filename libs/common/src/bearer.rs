//! `Authorization` header value helpers.
//!
//! The gateway hands out access tokens both with and without the `Bearer `
//! scheme prefix, so every token is normalized before it is stored or sent.

/// Scheme prefix expected in the `Authorization` header.
pub const BEARER_PREFIX: &str = "Bearer ";

/// Prepend `Bearer ` to a raw token unless it is already there.
///
/// # Examples
/// ```
/// assert_eq!(chat_common::normalize_bearer("abc"), "Bearer abc");
/// assert_eq!(chat_common::normalize_bearer("Bearer abc"), "Bearer abc");
/// ```
pub fn normalize_bearer(token: &str) -> String {
    if token.starts_with(BEARER_PREFIX) {
        token.to_string()
    } else {
        format!("{BEARER_PREFIX}{token}")
    }
}

/// The bare token without the scheme prefix.
pub fn strip_bearer(token: &str) -> &str {
    token.strip_prefix(BEARER_PREFIX).unwrap_or(token)
}
