//! Caller identity.
//!
//! Authentication itself happens upstream; this module only turns the
//! identity the gateway attached to a request into a [`UserId`].

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::HeaderMap;

use crate::api::AppState;
use crate::error::{NearcastError, NearcastResult};
use crate::protocol_constants::USER_ID_HEADER;
use crate::types::UserId;

/// Supplies the authenticated user id of a request.
pub trait Authenticator: Send + Sync {
    /// # Errors
    ///
    /// `Unauthorized` if the identity is missing or malformed.
    fn current_user_id(&self, headers: &HeaderMap) -> NearcastResult<UserId>;
}

/// Trusts the `x-user-id` header set by an authenticating gateway.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeaderAuthenticator;

impl Authenticator for HeaderAuthenticator {
    fn current_user_id(&self, headers: &HeaderMap) -> NearcastResult<UserId> {
        let raw = headers
            .get(USER_ID_HEADER)
            .ok_or_else(|| NearcastError::Unauthorized(format!("missing {} header", USER_ID_HEADER)))?;
        raw.to_str()
            .ok()
            .and_then(|s| s.trim().parse::<UserId>().ok())
            .filter(|id| *id > 0)
            .ok_or_else(|| NearcastError::Unauthorized(format!("invalid {} header", USER_ID_HEADER)))
    }
}

/// Extractor yielding the caller's user id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthUser(pub UserId);

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = NearcastError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        state
            .authenticator
            .current_user_id(&parts.headers)
            .map(AuthUser)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(USER_ID_HEADER, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn reads_user_id_header() {
        assert_eq!(HeaderAuthenticator.current_user_id(&headers("42")).unwrap(), 42);
        assert_eq!(HeaderAuthenticator.current_user_id(&headers(" 7 ")).unwrap(), 7);
    }

    #[test]
    fn missing_or_invalid_header_is_unauthorized() {
        for headers in [HeaderMap::new(), headers("abc"), headers("0"), headers("-1")] {
            let err = HeaderAuthenticator.current_user_id(&headers).unwrap_err();
            assert!(matches!(err, NearcastError::Unauthorized(_)));
        }
    }
}
