use std::time::Duration;

use futures_util::future::BoxFuture;
use http::header::{HeaderName, HeaderValue, CONTENT_TYPE, USER_AGENT};
use serde::{Deserialize, Serialize};

use super::cache::{Credential, TokenRefresher};
use crate::config::{AuthConfig, ServerConfig};
use crate::error::GatewayError;
use crate::transport::{build_reqwest_client, AMZ_SDK_REQUEST};
use crate::util::generate_uuid;

const REFRESH_GRANT_TYPE: &str = "refresh_token";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshRequest<'a> {
    grant_type: &'a str,
    client_id: &'a str,
    client_secret: &'a str,
    refresh_token: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshResponse {
    #[serde(default)]
    access_token: Option<String>,
}

/// Exchanges refresh tokens at the OIDC token endpoint.
#[derive(Debug, Clone)]
pub struct OidcTokenRefresher {
    client: reqwest::Client,
    token_url: url::Url,
    user_agent: HeaderValue,
    amz_user_agent: HeaderValue,
}

impl OidcTokenRefresher {
    /// # Errors
    ///
    /// Returns [`GatewayError::Config`] for an unparsable token URL or user
    /// agent, and [`GatewayError::Transport`] when the client cannot be built.
    pub fn new(auth: &AuthConfig, server: &ServerConfig) -> Result<Self, GatewayError> {
        let client = build_reqwest_client(
            server.http_pool_max_idle_per_host.max(1),
            Some(Duration::from_secs(server.http_pool_idle_timeout_secs.max(1))),
            Duration::from_secs(auth.request_timeout_secs),
            server.http_use_env_proxy,
            server.proxy.as_deref(),
        )?;
        let token_url = url::Url::parse(&auth.token_url)
            .map_err(|err| GatewayError::Config(format!("Invalid auth token_url: {err}")))?;
        let user_agent = HeaderValue::from_str(&auth.user_agent)
            .map_err(|_| GatewayError::Config("Invalid auth user_agent".to_string()))?;
        let amz_user_agent = HeaderValue::from_str(&auth.amz_user_agent)
            .map_err(|_| GatewayError::Config("Invalid auth amz_user_agent".to_string()))?;
        Ok(Self {
            client,
            token_url,
            user_agent,
            amz_user_agent,
        })
    }

    async fn exchange(&self, credential: &Credential) -> Result<String, GatewayError> {
        let body = serde_json::to_vec(&RefreshRequest {
            grant_type: REFRESH_GRANT_TYPE,
            client_id: &credential.client_id,
            client_secret: &credential.client_secret,
            refresh_token: &credential.refresh_token,
        })
        .map_err(|err| GatewayError::Internal(err.to_string()))?;

        let invocation_id = HeaderValue::from_str(&generate_uuid())
            .map_err(|err| GatewayError::Internal(err.to_string()))?;
        let response = self
            .client
            .post(self.token_url.clone())
            .header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
            .header(USER_AGENT, self.user_agent.clone())
            .header(
                HeaderName::from_static("x-amz-user-agent"),
                self.amz_user_agent.clone(),
            )
            .header(
                HeaderName::from_static("amz-sdk-request"),
                HeaderValue::from_static(AMZ_SDK_REQUEST),
            )
            .header(HeaderName::from_static("amz-sdk-invocation-id"), invocation_id)
            .body(body)
            .send()
            .await
            .map_err(|err| GatewayError::Transport(err.to_string()))?;

        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .map_err(|err| GatewayError::Transport(err.to_string()))?;
        if status.as_u16() >= 400 {
            return Err(GatewayError::Auth(format!(
                "token refresh failed: {} - {}",
                status.as_u16(),
                String::from_utf8_lossy(&bytes)
            )));
        }

        let parsed: RefreshResponse = serde_json::from_slice(&bytes)
            .map_err(|err| GatewayError::Auth(format!("invalid token response: {err}")))?;
        parsed
            .access_token
            .filter(|token| !token.is_empty())
            .ok_or_else(|| GatewayError::Auth("no access token in response".to_string()))
    }
}

impl TokenRefresher for OidcTokenRefresher {
    fn refresh<'a>(
        &'a self,
        credential: &'a Credential,
    ) -> BoxFuture<'a, Result<String, GatewayError>> {
        Box::pin(self.exchange(credential))
    }
}
