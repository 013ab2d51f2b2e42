use std::time::Duration;

use aulos_net::{Headers, HttpClient};
use bytes::Bytes;
use reqwest::Method;
use tracing::warn;
use url::Url;

use crate::error::{ProxyError, ProxyResult};

/// Per-attempt deadline for forwarded non-GET requests.
pub const FORWARD_TIMEOUT: Duration = Duration::from_secs(10);

const FORWARDABLE: &[Method] = &[
    Method::POST,
    Method::PUT,
    Method::OPTIONS,
    Method::DELETE,
    Method::PATCH,
    Method::HEAD,
];

/// Forward one non-GET request to the origin with transport retries, and
/// hand back the origin response verbatim (status included).
pub async fn forward_request(
    client: &HttpClient,
    method: Method,
    url: Url,
    headers: &Headers,
    body: Bytes,
) -> ProxyResult<reqwest::Response> {
    if !FORWARDABLE.contains(&method) {
        return Err(ProxyError::BadMethod(method.to_string()));
    }

    let retries = client.options().forward_retries;
    let body = (!body.is_empty()).then_some(body);
    let mut last_err = None;

    for attempt in 0..=retries {
        match client
            .request_raw(
                method.clone(),
                url.clone(),
                headers,
                None,
                body.clone(),
                Some(FORWARD_TIMEOUT),
            )
            .await
        {
            Ok(resp) => return Ok(resp),
            Err(e) if e.is_transport() && attempt < retries => {
                warn!(%url, %method, attempt, "forward transport error, retrying: {e}");
                last_err = Some(e);
            }
            Err(e) => {
                last_err = Some(e);
                break;
            }
        }
    }

    Err(ProxyError::Origin {
        url: url.to_string(),
        source: last_err.expect("forward loop sets an error before exiting"),
    })
}
