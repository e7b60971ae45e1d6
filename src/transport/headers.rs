use http::header::{HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use http::HeaderMap;

use crate::config::UpstreamConfig;
use crate::error::GatewayError;
use crate::util::generate_uuid;

pub const UPSTREAM_CONTENT_TYPE: &str = "application/x-amz-json-1.0";
pub const AMZ_SDK_REQUEST: &str = "attempt=1; max=3";

const X_AMZ_TARGET: HeaderName = HeaderName::from_static("x-amz-target");
const X_AMZ_USER_AGENT: HeaderName = HeaderName::from_static("x-amz-user-agent");
const X_AMZN_OPTOUT: HeaderName = HeaderName::from_static("x-amzn-codewhisperer-optout");
const AMZ_SDK_REQUEST_HEADER: HeaderName = HeaderName::from_static("amz-sdk-request");
const AMZ_SDK_INVOCATION_ID: HeaderName = HeaderName::from_static("amz-sdk-invocation-id");

fn header_value(name: &str, value: &str) -> Result<HeaderValue, GatewayError> {
    HeaderValue::from_str(value)
        .map_err(|_| GatewayError::Config(format!("invalid characters in {name} header value")))
}

/// Headers for one backend call. Every call gets a fresh invocation id.
///
/// # Errors
///
/// Returns [`GatewayError::Config`] when a configured value is not a valid
/// header value, or [`GatewayError::Auth`] when the token is not.
pub fn build_upstream_headers(
    config: &UpstreamConfig,
    bearer_token: &str,
) -> Result<HeaderMap, GatewayError> {
    let mut headers = HeaderMap::with_capacity(8);
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(UPSTREAM_CONTENT_TYPE));
    headers.insert(X_AMZ_TARGET, header_value("x-amz-target", &config.target)?);
    headers.insert(USER_AGENT, header_value("user-agent", &config.user_agent)?);
    headers.insert(
        X_AMZ_USER_AGENT,
        header_value("x-amz-user-agent", &config.amz_user_agent)?,
    );
    headers.insert(X_AMZN_OPTOUT, HeaderValue::from_static("false"));
    headers.insert(AMZ_SDK_REQUEST_HEADER, HeaderValue::from_static(AMZ_SDK_REQUEST));
    headers.insert(
        AMZ_SDK_INVOCATION_ID,
        header_value("amz-sdk-invocation-id", &generate_uuid())?,
    );
    let mut authorization = HeaderValue::from_str(&format!("Bearer {bearer_token}"))
        .map_err(|_| GatewayError::Auth("bearer token is not a valid header value".into()))?;
    authorization.set_sensitive(true);
    headers.insert(AUTHORIZATION, authorization);
    Ok(headers)
}
