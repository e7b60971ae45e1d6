mod client;
mod headers;

pub use client::{build_reqwest_client, UpstreamClient};
pub use headers::{build_upstream_headers, AMZ_SDK_REQUEST, UPSTREAM_CONTENT_TYPE};
