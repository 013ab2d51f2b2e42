use aulos_net::{Headers, HttpClient, RangeSpec};
use bytes::Bytes;
use http::header::{
    ACCEPT_RANGES, CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE,
};
use http::HeaderMap;
use reqwest::Method;
use tracing::{debug, warn};
use url::Url;

use crate::error::{ProxyError, ProxyResult};
use crate::media_type::{file_name_from, infer_content_type};

/// What the initial short ranged GET discovered about the origin.
#[derive(Clone, Debug)]
pub struct ProbedMedia {
    /// Origin headers, normalized: no `Content-Range`, `Accept-Ranges: bytes`,
    /// `Content-Length` set to the full size, `Content-Type` inferred when
    /// the origin had nothing useful.
    pub headers: HeaderMap,
    pub content_size: u64,
    pub file_name: String,
}

/// Probe result. Only the rangeable outcome is cacheable; a pass-through
/// carries the live response body, and an origin error is forwarded verbatim.
pub enum ProbeOutcome {
    Rangeable(ProbedMedia),
    PassThrough {
        media: ProbedMedia,
        response: reqwest::Response,
    },
    OriginError {
        status: u16,
        body: Bytes,
    },
}

const PROBE_RANGE_END: u64 = 1023;

/// `Range: bytes=0-1023` GET with no deadline and transport retries.
///
/// Derives content length (preferring the `Content-Range` total), content
/// type, and filename, and decides whether the origin supports ranged reads
/// at all: an origin exposing neither `Accept-Ranges` nor `Content-Range` is
/// streamed through directly.
pub async fn probe_origin(
    client: &HttpClient,
    url: &Url,
    headers: &Headers,
) -> ProxyResult<ProbeOutcome> {
    let retries = client.options().forward_retries;
    let mut last_err = None;

    let mut response = None;
    for attempt in 0..=retries {
        match client
            .request_raw(
                Method::GET,
                url.clone(),
                headers,
                Some(RangeSpec::new(0, Some(PROBE_RANGE_END))),
                None,
                None,
            )
            .await
        {
            Ok(resp) => {
                response = Some(resp);
                break;
            }
            Err(e) if e.is_transport() && attempt < retries => {
                warn!(%url, attempt, "probe transport error, retrying: {e}");
                last_err = Some(e);
            }
            Err(e) => {
                last_err = Some(e);
                break;
            }
        }
    }
    let Some(response) = response else {
        return Err(ProxyError::Origin {
            url: url.to_string(),
            source: last_err.expect("probe loop sets an error when no response"),
        });
    };

    let status = response.status().as_u16();
    if !(200..400).contains(&status) {
        let body = response.bytes().await.unwrap_or_default();
        debug!(%url, status, "probe got origin error status");
        return Ok(ProbeOutcome::OriginError { status, body });
    }

    let mut origin_headers: HeaderMap = response.headers().clone();

    let content_disposition = origin_headers
        .get(CONTENT_DISPOSITION)
        .and_then(|v| v.to_str().ok());
    let file_name = file_name_from(content_disposition, url.as_str());

    let content_type = origin_headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if content_type.is_empty() || content_type == "application/octet-stream" {
        if let Some(inferred) = infer_content_type(&file_name) {
            origin_headers.insert(CONTENT_TYPE, inferred.parse().expect("static mime"));
        }
    }

    let content_range = origin_headers
        .get(CONTENT_RANGE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let accept_ranges = origin_headers
        .get(ACCEPT_RANGES)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let content_size = content_range
        .as_deref()
        .and_then(content_range_total)
        .or_else(|| {
            origin_headers
                .get(CONTENT_LENGTH)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok())
        })
        .or(response.content_length())
        .unwrap_or(0);

    if let Ok(value) = content_size.to_string().parse() {
        origin_headers.insert(CONTENT_LENGTH, value);
    }

    let rangeable = content_range.is_some() || accept_ranges.is_some();
    if !rangeable {
        debug!(%url, content_size, "origin does not support ranged reads");
        let media = ProbedMedia {
            headers: origin_headers,
            content_size,
            file_name,
        };
        return Ok(ProbeOutcome::PassThrough {
            media,
            response,
        });
    }

    origin_headers.remove(CONTENT_RANGE);
    origin_headers.insert(ACCEPT_RANGES, "bytes".parse().expect("static token"));

    debug!(%url, content_size, file_name, "origin probed, ranged reads supported");
    Ok(ProbeOutcome::Rangeable(ProbedMedia {
        headers: origin_headers,
        content_size,
        file_name,
    }))
}

/// Total size from a `Content-Range: bytes A-B/SIZE` value.
pub fn content_range_total(value: &str) -> Option<u64> {
    value.rsplit('/').next()?.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case::normal("bytes 0-1023/1048576", Some(1048576))]
    #[case::star_range("bytes */2048", Some(2048))]
    #[case::unknown_total("bytes 0-1023/*", None)]
    #[case::garbage("whatever", None)]
    fn content_range_totals(#[case] value: &str, #[case] expected: Option<u64>) {
        assert_eq!(content_range_total(value), expected);
    }
}
