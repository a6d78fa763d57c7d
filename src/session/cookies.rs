//! `Set-Cookie` capture.

use axum::http::header::SET_COOKIE;
use axum::http::HeaderMap;

/// Concatenate the `name=value;` prefix of every `Set-Cookie` value, in order.
///
/// Each value contributes everything up to and including its first `;`.
/// A value without `;` contributes nothing.
pub fn capture_session_cookie(headers: &HeaderMap) -> String {
    headers
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|value| match value.to_str() {
            Ok(v) => Some(v),
            Err(_) => {
                tracing::debug!("Ignoring non-text Set-Cookie value");
                None
            }
        })
        .filter_map(|value| value.find(';').map(|end| &value[..=end]))
        .collect()
}
