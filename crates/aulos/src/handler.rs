use std::sync::Arc;

use aulos_engine::{Coordinator, CoordinatorConfig, Emitter};
use aulos_net::{Headers, HttpClient};
use axum::body::Body;
use axum::extract::{Request, State};
use axum::response::{Html, IntoResponse, Response};
use bytes::Bytes;
use futures::TryStreamExt;
use http::header::{HeaderName, HeaderValue, CONNECTION, CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_RANGE, COOKIE, RANGE};
use http::{HeaderMap, Method, StatusCode};
use reqwest::cookie::Jar;
use tracing::{debug, info};
use url::Url;

use crate::error::{ProxyError, ProxyResult};
use crate::forward::forward_request;
use crate::params::{self, ProxyQuery, BUFFER_BUDGET_BYTES};
use crate::probe::{probe_origin, ProbeOutcome, ProbedMedia};
use crate::state::{ProxyState, PROXY_TIMEOUT};

const INDEX_HTML: &str = include_str!("../static/index.html");

/// Single entry point for every path and method.
pub async fn handle(State(state): State<Arc<ProxyState>>, req: Request) -> Response {
    if req.method() == Method::GET {
        if req.uri().query().unwrap_or("").is_empty() {
            return Html(INDEX_HTML).into_response();
        }
        info!("handling proxied GET");
        handle_get(state, req)
            .await
            .unwrap_or_else(|e| e.into_response())
    } else {
        info!(method = %req.method(), "handling forwarded request");
        handle_other(state, req)
            .await
            .unwrap_or_else(|e| e.into_response())
    }
}

/// Inbound headers with the `header` query parameter merged on top.
fn effective_headers(inbound: &HeaderMap, query: &ProxyQuery) -> HeaderMap {
    let mut merged = inbound.clone();
    for (name, value) in &query.header {
        if let (Ok(name), Ok(value)) = (
            name.parse::<HeaderName>(),
            value.parse::<HeaderValue>(),
        ) {
            merged.insert(name, value);
        }
    }
    merged
}

/// Cookie jar seeded from the inbound `Cookie` header, scoped to the origin.
fn cookie_jar(headers: &HeaderMap, url: &Url) -> Arc<Jar> {
    let jar = Jar::default();
    if let Some(cookies) = headers.get(COOKIE).and_then(|v| v.to_str().ok()) {
        for pair in cookies.split(';') {
            let pair = pair.trim();
            if !pair.is_empty() {
                jar.add_cookie_str(pair, url);
            }
        }
    }
    Arc::new(jar)
}

fn origin_client(state: &ProxyState, inbound: &HeaderMap, url: &Url) -> ProxyResult<HttpClient> {
    let jar = cookie_jar(inbound, url);
    state
        .client_with_cookies(jar)
        .map_err(|source| ProxyError::Origin {
            url: url.to_string(),
            source,
        })
}

async fn handle_get(state: Arc<ProxyState>, req: Request) -> ProxyResult<Response> {
    let query = params::parse_query(req.uri().query().unwrap_or(""))?;

    let inbound = effective_headers(req.headers(), &query);
    let forward_headers =
        Headers::from_header_map(&inbound, |name| !params::is_filtered_header(name));

    let origin_url: Url = query
        .origin_url
        .parse()
        .map_err(|_| ProxyError::BadUrl(query.origin_url.clone()))?;
    let client = origin_client(&state, &inbound, &origin_url)?;

    let client_range = inbound
        .get(RANGE)
        .and_then(|v| v.to_str().ok())
        .and_then(params::parse_client_range);
    let status_code = if client_range.is_some() {
        StatusCode::PARTIAL_CONTENT
    } else {
        StatusCode::OK
    };
    let (range_start, range_end_req) = client_range.unwrap_or((0, None));

    let headers_key = format!("{origin_url}#Headers");
    let media = match state.media().get(&headers_key) {
        Some(media) => media,
        None => match probe_origin(&client, &origin_url, &forward_headers).await? {
            ProbeOutcome::OriginError { status, body } => {
                return Ok(origin_error_response(status, body));
            }
            ProbeOutcome::PassThrough { media, response } => {
                return Ok(pass_through_response(status_code, &media, response));
            }
            ProbeOutcome::Rangeable(media) => {
                state.media().insert(headers_key.clone(), media.clone());
                media
            }
        },
    };

    Ok(ranged_response(
        state,
        client,
        origin_url,
        headers_key,
        forward_headers,
        &media,
        status_code,
        range_start,
        range_end_req,
        &query,
    ))
}

fn origin_error_response(status: u16, body: Bytes) -> Response {
    let status = StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY);
    (status, body).into_response()
}

/// Origin without range support: stream the probe body straight through.
fn pass_through_response(
    status_code: StatusCode,
    media: &ProbedMedia,
    response: reqwest::Response,
) -> Response {
    let mut headers = HeaderMap::new();
    for (name, value) in media.headers.iter() {
        if params::is_hop_header(name.as_str()) {
            continue;
        }
        headers.insert(name, value.clone());
    }
    if media.content_size == 0 {
        // Unknown total (chunked origin): let hyper pick the framing.
        headers.remove(CONTENT_LENGTH);
    }
    let disposition = format!("attachment; filename*=UTF-8''{}", media.file_name);
    if let Ok(value) = HeaderValue::from_str(&disposition) {
        headers.insert(CONTENT_DISPOSITION, value);
    }
    headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));

    let stream = response.bytes_stream().map_err(std::io::Error::other);
    let mut resp = Response::new(Body::from_stream(stream));
    *resp.status_mut() = status_code;
    *resp.headers_mut() = headers;
    resp
}

/// Rangeable origin: shape the response headers and hand the interval to the
/// parallel download engine.
#[allow(clippy::too_many_arguments)]
fn ranged_response(
    state: Arc<ProxyState>,
    client: HttpClient,
    origin_url: Url,
    headers_key: String,
    forward_headers: Headers,
    media: &ProbedMedia,
    status_code: StatusCode,
    range_start: u64,
    range_end_req: Option<u64>,
    query: &ProxyQuery,
) -> Response {
    let content_size = media.content_size;
    // A missing or zero end means "to the end of the media".
    let range_end = range_end_req
        .filter(|&end| end != 0)
        .unwrap_or_else(|| content_size.saturating_sub(1));

    if range_start >= content_size {
        state.media().remove(&headers_key);
        let mut headers = HeaderMap::new();
        for (name, value) in media.headers.iter() {
            if params::is_hop_header(name.as_str()) {
                continue;
            }
            headers.insert(name, value.clone());
        }
        headers.insert(CONNECTION, HeaderValue::from_static("close"));
        headers.insert(CONTENT_LENGTH, HeaderValue::from_static("0"));
        let mut resp = Response::new(Body::empty());
        *resp.status_mut() = StatusCode::OK;
        *resp.headers_mut() = headers;
        return resp;
    }

    let num_tasks = match query.thread {
        Some(thread) => thread.max(1) as u64,
        None => params::default_thread_count(content_size),
    };
    let chunk_size = query.chunk_size;
    let max_buffered_chunks = (BUFFER_BUDGET_BYTES / chunk_size).max(1);
    let final_window = range_start + chunk_size * num_tasks >= content_size.saturating_sub(1);

    let mut headers = HeaderMap::new();
    for (name, value) in media.headers.iter() {
        let lowercase = name.as_str();
        if params::is_hop_header(lowercase) {
            continue;
        }
        if status_code == StatusCode::OK && lowercase == "content-range" {
            continue;
        }
        if status_code == StatusCode::PARTIAL_CONTENT && lowercase == "accept-ranges" {
            continue;
        }
        headers.insert(name, value.clone());
    }
    if status_code == StatusCode::PARTIAL_CONTENT {
        let content_range = format!("bytes {range_start}-{range_end}/{content_size}");
        if let Ok(value) = HeaderValue::from_str(&content_range) {
            headers.insert(CONTENT_RANGE, value);
        }
    }
    // The probed total is right only for a full-interval response; anything
    // else must advertise the bytes actually streamed.
    let body_len = range_end.saturating_sub(range_start) + 1;
    headers.insert(
        CONTENT_LENGTH,
        HeaderValue::from_str(&body_len.to_string()).expect("digits are a valid header value"),
    );
    headers.insert(
        CONNECTION,
        HeaderValue::from_static(if final_window { "close" } else { "keep-alive" }),
    );

    let pool = state
        .work_pool_mode()
        .then(|| state.pool_for(origin_url.as_str(), num_tasks));

    let coordinator = Coordinator::new(
        client,
        CoordinatorConfig {
            url: origin_url,
            headers: forward_headers,
            start_offset: range_start,
            end_offset: range_end,
            chunk_size,
            thread_count: num_tasks,
            max_buffered_chunks,
            proxy_timeout: PROXY_TIMEOUT,
            pool,
        },
    );

    let (emitter, reader) = Emitter::pair();
    tokio::spawn(async move {
        let outcome = coordinator.run(emitter).await;
        debug!(
            delivered = outcome.delivered,
            complete = outcome.complete,
            "download task finished"
        );
        if final_window {
            state.media().remove(&headers_key);
        }
    });

    let mut resp = Response::new(Body::from_stream(reader.into_stream()));
    *resp.status_mut() = status_code;
    *resp.headers_mut() = headers;
    resp
}

/// Non-GET methods: forward verbatim and copy the origin response back.
async fn handle_other(state: Arc<ProxyState>, req: Request) -> ProxyResult<Response> {
    let method = req.method().clone();
    let query = params::parse_query(req.uri().query().unwrap_or(""))?;

    let (parts, body) = req.into_parts();
    let inbound = effective_headers(&parts.headers, &query);
    let forward_headers =
        Headers::from_header_map(&inbound, |name| !params::is_filtered_header(name));

    let origin_url: Url = query
        .origin_url
        .parse()
        .map_err(|_| ProxyError::BadUrl(query.origin_url.clone()))?;
    let client = origin_client(&state, &inbound, &origin_url)?;

    let body = axum::body::to_bytes(body, usize::MAX)
        .await
        .map_err(|e| ProxyError::Body(e.to_string()))?;

    let resp = forward_request(&client, method, origin_url, &forward_headers, body).await?;

    let status = resp.status();
    if !(200..400).contains(&status.as_u16()) {
        let reason = status.canonical_reason().unwrap_or("");
        return Ok((status, reason.to_string()).into_response());
    }

    let mut headers = HeaderMap::new();
    for (name, value) in resp.headers() {
        headers.insert(name, value.clone());
    }
    headers.insert(CONNECTION, HeaderValue::from_static("close"));

    let stream = resp.bytes_stream().map_err(std::io::Error::other);
    let mut out = Response::new(Body::from_stream(stream));
    *out.status_mut() = status;
    *out.headers_mut() = headers;
    Ok(out)
}
