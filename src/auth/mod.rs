//! Resolution of long-lived client credentials into backend bearer tokens.

mod cache;
mod oidc;

pub use cache::{parse_credential, CachingAuthProvider, Credential, TokenRefresher};
pub use oidc::OidcTokenRefresher;

use futures_util::future::BoxFuture;
use http::header::{HeaderName, AUTHORIZATION};

use crate::error::GatewayError;

const X_API_KEY: HeaderName = HeaderName::from_static("x-api-key");

/// Turns an opaque client credential into a currently valid bearer token.
pub trait AuthProvider: Send + Sync {
    fn resolve<'a>(&'a self, credential: &'a str) -> BoxFuture<'a, Result<String, GatewayError>>;
}

/// Extract the client credential: `x-api-key` first, then
/// `Authorization: Bearer <credential>`.
///
/// # Errors
///
/// Returns `GatewayError::Auth` when neither header carries a non-empty value.
pub fn extract_credential(headers: &http::HeaderMap) -> Result<&str, GatewayError> {
    let from_api_key = headers
        .get(X_API_KEY)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty());
    let credential = from_api_key.or_else(|| {
        headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.strip_prefix("Bearer "))
            .filter(|v| !v.is_empty())
    });

    credential.ok_or_else(|| {
        GatewayError::Auth(
            "Missing authentication. Provide Authorization header or x-api-key".to_string(),
        )
    })
}
