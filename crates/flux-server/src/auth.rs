//! Identity attached to upgrade requests.
//!
//! Authentication happens upstream. The relay only reads the resulting
//! [`Identity`] request extension. When the relay sits behind an
//! authenticating reverse proxy, [`proxy_identity`] can build that extension
//! from trusted headers.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::Response;
use flux_core::UserId;
use flux_settings::AuthSettings;
use tracing::debug;

/// A verified user, attached by upstream middleware.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Identity {
    /// User ID.
    pub id: UserId,
    /// User email, if known.
    pub email: Option<String>,
}

/// Read an identity from the configured proxy headers.
///
/// Returns `None` when the ID header is missing, empty, or not valid UTF-8.
pub fn identity_from_headers(headers: &HeaderMap, auth: &AuthSettings) -> Option<Identity> {
    let id = headers
        .get(auth.user_id_header.as_str())?
        .to_str()
        .ok()
        .map(str::trim)
        .filter(|v| !v.is_empty())?;
    let email = headers
        .get(auth.user_email_header.as_str())
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_owned);
    Some(Identity {
        id: UserId::from_raw(id),
        email,
    })
}

/// Middleware that trusts identity headers set by a reverse proxy.
///
/// An identity already attached by an earlier layer wins.
pub async fn proxy_identity(
    State(auth): State<Arc<AuthSettings>>,
    mut req: Request,
    next: Next,
) -> Response {
    if req.extensions().get::<Identity>().is_none() {
        match identity_from_headers(req.headers(), &auth) {
            Some(identity) => {
                let _ = req.extensions_mut().insert(identity);
            }
            None => debug!(header = %auth.user_id_header, "no proxy identity header on request"),
        }
    }
    next.run(req).await
}
