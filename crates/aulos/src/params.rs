use std::collections::HashMap;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

use crate::error::{ProxyError, ProxyResult};

/// Default chunk size for the parallel downloader (128 KiB).
pub const DEFAULT_CHUNK_SIZE: u64 = 128 * 1024;

/// Total buffer budget per download; the queue capacity is this divided by
/// the chunk size.
pub const BUFFER_BUDGET_BYTES: u64 = 128 * 1024 * 1024;

const RESERVED_PARAMS: &[&str] = &["url", "form", "thread", "size", "header"];

/// Headers never forwarded to the origin. `Range` is set by the fetchers
/// themselves; the rest either identify the client or break ranged replies.
pub fn is_filtered_header(name: &str) -> bool {
    let name = name.trim();
    if name.is_empty() {
        return false;
    }
    matches!(
        name.to_ascii_lowercase().as_str(),
        "range" | "host" | "http-client-ip" | "remote-addr" | "accept-encoding"
    )
}

/// Hop-by-hop headers dropped when copying an origin response to the client.
pub fn is_hop_header(name: &str) -> bool {
    matches!(
        name.to_ascii_lowercase().as_str(),
        "connection" | "proxy-connection" | "transfer-encoding"
    )
}

/// Parsed proxy query string.
#[derive(Clone, Debug, PartialEq)]
pub struct ProxyQuery {
    /// Origin URL, decoded, with passthrough parameters appended.
    pub origin_url: String,
    /// Extra request headers from the `header` JSON parameter.
    pub header: HashMap<String, String>,
    /// Requested parallelism; `None` means size-based default.
    pub thread: Option<i64>,
    pub chunk_size: u64,
}

/// Parse `url`/`form`/`header`/`thread`/`size` and append every other
/// parameter to the origin URL as `&name=value`.
pub fn parse_query(raw: &str) -> ProxyResult<ProxyQuery> {
    let pairs: Vec<(String, String)> = url::form_urlencoded::parse(raw.as_bytes())
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    let first = |name: &str| -> Option<&str> {
        pairs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    };

    let form = first("form").unwrap_or("");
    let base64_form = form == "base64";

    let mut origin_url = match first("url") {
        Some(url) if !url.is_empty() => url.to_string(),
        _ => return Err(ProxyError::MissingUrl),
    };
    if base64_form {
        let decoded = BASE64
            .decode(origin_url.as_bytes())
            .map_err(|e| ProxyError::BadBase64(e.to_string()))?;
        origin_url =
            String::from_utf8(decoded).map_err(|e| ProxyError::BadBase64(e.to_string()))?;
    }

    let mut header = HashMap::new();
    if let Some(raw_header) = first("header").filter(|h| !h.is_empty()) {
        let json = if base64_form {
            let decoded = BASE64
                .decode(raw_header.as_bytes())
                .map_err(|e| ProxyError::BadBase64(e.to_string()))?;
            String::from_utf8(decoded).map_err(|e| ProxyError::BadBase64(e.to_string()))?
        } else {
            raw_header.to_string()
        };
        header = serde_json::from_str(&json).map_err(|e| ProxyError::BadHeaderJson(e.to_string()))?;
    }

    let thread = first("thread")
        .filter(|t| !t.is_empty())
        .map(|t| t.parse::<i64>().unwrap_or(0));

    let chunk_size = first("size")
        .filter(|s| !s.is_empty())
        .and_then(|s| s.parse::<u64>().ok())
        .filter(|&s| s > 0)
        .unwrap_or(DEFAULT_CHUNK_SIZE);

    let mut seen = Vec::new();
    for (name, value) in &pairs {
        if RESERVED_PARAMS.contains(&name.as_str()) || seen.contains(name) {
            continue;
        }
        seen.push(name.clone());
        origin_url.push('&');
        origin_url.push_str(name);
        origin_url.push('=');
        origin_url.push_str(value);
    }

    Ok(ProxyQuery {
        origin_url,
        header,
        thread,
        chunk_size,
    })
}

/// Parse a client `Range: bytes=A-[B]` header. `None` when absent or
/// unparsable, in which case the response is a plain 200.
pub fn parse_client_range(value: &str) -> Option<(u64, Option<u64>)> {
    let spec = value.trim().strip_prefix("bytes=")?;
    let (start_str, end_str) = spec.split_once('-')?;
    let start: u64 = start_str.trim().parse().ok()?;
    let end = end_str.trim().parse::<u64>().ok();
    Some((start, end))
}

/// Size-based parallelism when the client does not pass `thread`.
pub fn default_thread_count(content_size: u64) -> u64 {
    const GIB: u64 = 1024 * 1024 * 1024;
    if content_size < GIB {
        4
    } else if content_size < 4 * GIB {
        8
    } else if content_size < 16 * GIB {
        12
    } else {
        16
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[test]
    fn plain_url_is_passed_through() {
        let q = parse_query("url=http://origin/media.mp4").unwrap();
        assert_eq!(q.origin_url, "http://origin/media.mp4");
        assert!(q.header.is_empty());
        assert_eq!(q.thread, None);
        assert_eq!(q.chunk_size, DEFAULT_CHUNK_SIZE);
    }

    #[test]
    fn missing_url_is_rejected() {
        assert!(matches!(
            parse_query("thread=4"),
            Err(ProxyError::MissingUrl)
        ));
    }

    #[test]
    fn base64_form_decodes_url_and_header() {
        let url = BASE64.encode("http://origin/a.mp4");
        let header = BASE64.encode(r#"{"X-Token":"abc"}"#);
        let q = parse_query(&format!("url={url}&form=base64&header={header}")).unwrap();
        assert_eq!(q.origin_url, "http://origin/a.mp4");
        assert_eq!(q.header.get("X-Token").map(String::as_str), Some("abc"));
    }

    #[test]
    fn invalid_base64_is_rejected() {
        assert!(matches!(
            parse_query("url=%21%21%21&form=base64"),
            Err(ProxyError::BadBase64(_))
        ));
    }

    #[test]
    fn invalid_header_json_is_rejected() {
        assert!(matches!(
            parse_query("url=http://o/a&header=notjson"),
            Err(ProxyError::BadHeaderJson(_))
        ));
    }

    #[test]
    fn passthrough_params_are_appended() {
        let q = parse_query("url=http://o/a?sig=1&token=abc&thread=8&expires=99").unwrap();
        assert_eq!(q.origin_url, "http://o/a?sig=1&token=abc&expires=99");
        assert_eq!(q.thread, Some(8));
    }

    #[rstest]
    #[case::explicit("url=http://o/a&thread=6", Some(6))]
    #[case::invalid_becomes_zero("url=http://o/a&thread=abc", Some(0))]
    #[case::absent("url=http://o/a", None)]
    fn thread_parsing(#[case] raw: &str, #[case] expected: Option<i64>) {
        assert_eq!(parse_query(raw).unwrap().thread, expected);
    }

    #[rstest]
    #[case::explicit("url=http://o/a&size=65536", 65536)]
    #[case::invalid("url=http://o/a&size=abc", DEFAULT_CHUNK_SIZE)]
    #[case::zero("url=http://o/a&size=0", DEFAULT_CHUNK_SIZE)]
    fn chunk_size_parsing(#[case] raw: &str, #[case] expected: u64) {
        assert_eq!(parse_query(raw).unwrap().chunk_size, expected);
    }

    #[rstest]
    #[case::bounded("bytes=100000-199999", Some((100000, Some(199999))))]
    #[case::open("bytes=1000000-", Some((1000000, None)))]
    #[case::spaces("bytes= 5 - 10", Some((5, Some(10))))]
    #[case::not_bytes("items=0-5", None)]
    #[case::garbage("bytes=abc-", None)]
    fn client_range_parsing(#[case] raw: &str, #[case] expected: Option<(u64, Option<u64>)>) {
        assert_eq!(parse_client_range(raw), expected);
    }

    #[rstest]
    #[case::small(512 * 1024 * 1024, 4)]
    #[case::two_gib(2 * 1024 * 1024 * 1024, 8)]
    #[case::eight_gib(8u64 * 1024 * 1024 * 1024, 12)]
    #[case::huge(64u64 * 1024 * 1024 * 1024, 16)]
    fn thread_defaults(#[case] size: u64, #[case] expected: u64) {
        assert_eq!(default_thread_count(size), expected);
    }

    #[rstest]
    #[case::range("Range", true)]
    #[case::host_mixed_case("Host", true)]
    #[case::client_ip("HTTP-CLIENT-IP", true)]
    #[case::remote_addr("remote-addr", true)]
    #[case::accept_encoding("Accept-Encoding", true)]
    #[case::cookie("Cookie", false)]
    #[case::user_agent("User-Agent", false)]
    #[case::empty("", false)]
    fn header_filtering(#[case] name: &str, #[case] filtered: bool) {
        assert_eq!(is_filtered_header(name), filtered);
    }
}
