use std::time::Duration;

use crate::config::{ServerConfig, UpstreamConfig};
use crate::error::GatewayError;
use crate::protocol::upstream::UpstreamRequest;

use super::headers::build_upstream_headers;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Build a pooled reqwest client.
///
/// An explicit `proxy_url` wins over environment proxies; with neither,
/// connections go direct.
///
/// # Errors
///
/// Returns [`GatewayError::Transport`] for an unparsable proxy URL or when
/// the TLS backend cannot be initialized.
pub fn build_reqwest_client(
    pool_max_idle_per_host: usize,
    pool_idle_timeout: Option<Duration>,
    timeout: Duration,
    use_env_proxy: bool,
    proxy_url: Option<&str>,
) -> Result<reqwest::Client, GatewayError> {
    let mut builder = reqwest::Client::builder()
        .pool_max_idle_per_host(pool_max_idle_per_host)
        .pool_idle_timeout(pool_idle_timeout)
        .tcp_nodelay(true)
        .connect_timeout(CONNECT_TIMEOUT)
        .redirect(reqwest::redirect::Policy::none())
        .timeout(timeout);

    if let Some(proxy_url) = proxy_url {
        let proxy = reqwest::Proxy::all(proxy_url)
            .map_err(|err| GatewayError::Transport(format!("Invalid proxy URL: {err}")))?;
        builder = builder.no_proxy().proxy(proxy);
    } else if !use_env_proxy {
        builder = builder.no_proxy();
    }

    builder
        .build()
        .map_err(|err| GatewayError::Transport(format!("Failed to build HTTP client: {err}")))
}

/// HTTP client for the conversation backend.
#[derive(Debug, Clone)]
pub struct UpstreamClient {
    client: reqwest::Client,
    url: url::Url,
    config: UpstreamConfig,
}

impl UpstreamClient {
    /// Create a client with connection pooling, timeouts and proxy settings
    /// from `server`, targeting `upstream.api_url`.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Config`] for an unparsable API URL and
    /// [`GatewayError::Transport`] when the HTTP client cannot be built.
    pub fn new(server: &ServerConfig, upstream: &UpstreamConfig) -> Result<Self, GatewayError> {
        let pool_idle_timeout = if server.http_pool_idle_timeout_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(server.http_pool_idle_timeout_secs))
        };
        let client = build_reqwest_client(
            server.http_pool_max_idle_per_host.max(1),
            pool_idle_timeout,
            Duration::from_secs(server.timeout),
            server.http_use_env_proxy,
            server.proxy.as_deref(),
        )?;
        let url = url::Url::parse(&upstream.api_url)
            .map_err(|err| GatewayError::Config(format!("Invalid upstream api_url: {err}")))?;
        Ok(Self {
            client,
            url,
            config: upstream.clone(),
        })
    }

    #[must_use]
    pub fn url(&self) -> &url::Url {
        &self.url
    }

    #[must_use]
    pub fn config(&self) -> &UpstreamConfig {
        &self.config
    }

    /// POST `request` and return the response with its body unread.
    ///
    /// Not retried. A status of 400 or above is read to completion and
    /// surfaced as [`GatewayError::Upstream`].
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Internal`] if the request cannot be
    /// serialized, [`GatewayError::Transport`] on connection failure and
    /// [`GatewayError::Upstream`] for an error status.
    pub async fn send(
        &self,
        bearer_token: &str,
        request: &UpstreamRequest,
    ) -> Result<reqwest::Response, GatewayError> {
        let body = serde_json::to_vec(request)
            .map_err(|err| GatewayError::Internal(format!("Failed to encode request: {err}")))?;
        let headers = build_upstream_headers(&self.config, bearer_token)?;

        let response = self
            .client
            .post(self.url.clone())
            .headers(headers)
            .body(body)
            .send()
            .await
            .map_err(|err| GatewayError::Transport(err.to_string()))?;

        let status = response.status();
        if status.as_u16() >= 400 {
            let message = response
                .text()
                .await
                .unwrap_or_else(|err| format!("<failed to read upstream body: {err}>"));
            tracing::warn!(status = status.as_u16(), "upstream returned an error status");
            return Err(GatewayError::Upstream {
                status: status.as_u16(),
                message,
            });
        }
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_proxy_rejected() {
        let err = build_reqwest_client(1, None, Duration::from_secs(1), false, Some("http://[bad"))
            .unwrap_err();
        assert!(matches!(err, GatewayError::Transport(_)));
    }

    #[test]
    fn test_new_parses_api_url() {
        let client = UpstreamClient::new(&ServerConfig::default(), &UpstreamConfig::default())
            .unwrap();
        assert_eq!(client.url().host_str(), Some("q.us-east-1.amazonaws.com"));
    }

    #[test]
    fn test_new_rejects_bad_api_url() {
        let upstream = UpstreamConfig {
            api_url: "not a url".into(),
            ..UpstreamConfig::default()
        };
        let err = UpstreamClient::new(&ServerConfig::default(), &upstream).unwrap_err();
        assert!(matches!(err, GatewayError::Config(_)));
    }
}
