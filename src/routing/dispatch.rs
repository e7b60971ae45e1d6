use std::convert::Infallible;
use std::sync::Arc;

use axum::body::{self, Body};
use axum::extract::State;
use axum::http::{Method, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use http::header::{
    HeaderValue, ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS,
    ACCESS_CONTROL_ALLOW_ORIGIN,
};

use crate::api::{health, messages};
use crate::error::{error_payload, ErrorCategory};
use crate::state::AppState;

const DEFAULT_BODY_LIMIT_BYTES: usize = 8 * 1024 * 1024;

#[derive(Debug, PartialEq, Eq)]
enum RouteMatch {
    Health,
    Messages,
    Preflight,
    MethodNotAllowed,
    NotFound,
}

/// Dispatch a raw HTTP request to the matching handler.
///
/// # Errors
///
/// This function currently never returns `Err` and uses `Infallible`.
pub async fn dispatch_request(
    state: Arc<AppState>,
    base_path: Arc<str>,
    request: Request<Body>,
) -> Result<Response, Infallible> {
    let (parts, body) = request.into_parts();
    let enable_cors = state.config.server.enable_cors;
    let route = match_route(&parts.method, parts.uri.path(), base_path.as_ref(), enable_cors);

    let mut response = match route {
        RouteMatch::Health => health::health_handler(State(state)).into_response(),
        RouteMatch::Messages => match read_request_body(body).await {
            Ok(body_bytes) => messages::handler(State(state), parts.headers, body_bytes).await,
            Err(response) => response,
        },
        RouteMatch::Preflight => StatusCode::NO_CONTENT.into_response(),
        RouteMatch::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED.into_response(),
        RouteMatch::NotFound => StatusCode::NOT_FOUND.into_response(),
    };

    if enable_cors {
        apply_cors_headers(&mut response);
    }
    Ok(response)
}

#[must_use]
pub fn normalize_base_path(base_path: &str) -> String {
    let trimmed = base_path.trim();
    if trimmed.is_empty() || trimmed == "/" {
        String::new()
    } else if trimmed.starts_with('/') {
        trimmed.trim_end_matches('/').to_string()
    } else {
        format!("/{}", trimmed.trim_end_matches('/'))
    }
}

fn apply_cors_headers(response: &mut Response) {
    let headers = response.headers_mut();
    let any = HeaderValue::from_static("*");
    headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, any.clone());
    headers.insert(ACCESS_CONTROL_ALLOW_METHODS, any.clone());
    headers.insert(ACCESS_CONTROL_ALLOW_HEADERS, any);
}

async fn read_request_body(body: Body) -> Result<bytes::Bytes, Response> {
    body::to_bytes(body, DEFAULT_BODY_LIMIT_BYTES)
        .await
        .map_err(|_| {
            (
                StatusCode::PAYLOAD_TOO_LARGE,
                axum::Json(error_payload(
                    ErrorCategory::InvalidRequest,
                    "Request body too large (max 8MiB)",
                )),
            )
                .into_response()
        })
}

fn match_route(method: &Method, path: &str, base_path: &str, enable_cors: bool) -> RouteMatch {
    if enable_cors && method == Method::OPTIONS {
        return RouteMatch::Preflight;
    }
    let Some(path) = strip_base_path(path, base_path) else {
        return RouteMatch::NotFound;
    };

    match path {
        "/" => {
            if method == Method::GET {
                RouteMatch::Health
            } else {
                RouteMatch::MethodNotAllowed
            }
        }
        "/v1/messages" => {
            if method == Method::POST {
                RouteMatch::Messages
            } else {
                RouteMatch::MethodNotAllowed
            }
        }
        _ => RouteMatch::NotFound,
    }
}

fn strip_base_path<'a>(path: &'a str, base_path: &str) -> Option<&'a str> {
    if base_path.is_empty() {
        return Some(path);
    }

    let remainder = path.strip_prefix(base_path)?;
    if remainder.is_empty() {
        Some("/")
    } else if remainder.starts_with('/') {
        Some(remainder)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_base_path() {
        assert_eq!(normalize_base_path(""), "");
        assert_eq!(normalize_base_path("/"), "");
        assert_eq!(normalize_base_path("api/"), "/api");
        assert_eq!(normalize_base_path(" /api// "), "/api");
    }

    #[test]
    fn test_match_route() {
        assert_eq!(match_route(&Method::GET, "/", "", true), RouteMatch::Health);
        assert_eq!(match_route(&Method::POST, "/v1/messages", "", true), RouteMatch::Messages);
        assert_eq!(
            match_route(&Method::GET, "/v1/messages", "", true),
            RouteMatch::MethodNotAllowed
        );
        assert_eq!(match_route(&Method::POST, "/v1/other", "", true), RouteMatch::NotFound);
        assert_eq!(match_route(&Method::OPTIONS, "/anything", "", true), RouteMatch::Preflight);
        assert_eq!(
            match_route(&Method::OPTIONS, "/v1/messages", "", false),
            RouteMatch::MethodNotAllowed
        );
    }

    #[test]
    fn test_match_route_with_base_path() {
        assert_eq!(
            match_route(&Method::POST, "/gw/v1/messages", "/gw", true),
            RouteMatch::Messages
        );
        assert_eq!(match_route(&Method::GET, "/gw", "/gw", true), RouteMatch::Health);
        assert_eq!(match_route(&Method::GET, "/gwx", "/gw", true), RouteMatch::NotFound);
        assert_eq!(match_route(&Method::POST, "/v1/messages", "/gw", true), RouteMatch::NotFound);
    }
}
