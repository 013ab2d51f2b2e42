use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use reqwest::cookie::Jar;
use reqwest::{Client, Method};
use url::Url;

use crate::error::{NetError, NetResult};
use crate::resolve::RacedResolver;
use crate::types::{Headers, NetOptions, RangeSpec};

/// Outbound HTTP client for the proxy.
///
/// Origin connections are pinned to HTTP/1.1 and rustls. A client is cheap to
/// clone; per-request cookie jars are attached by building a sibling client
/// through [`HttpClient::with_cookies`] so redirects inside one proxied
/// request observe `Set-Cookie` responses.
#[derive(Clone, Debug)]
pub struct HttpClient {
    inner: Client,
    options: NetOptions,
    resolver: Option<Arc<RacedResolver>>,
}

impl HttpClient {
    pub fn new(options: NetOptions) -> NetResult<Self> {
        Self::with_parts(options, None, None)
    }

    pub fn with_parts(
        options: NetOptions,
        resolver: Option<Arc<RacedResolver>>,
        cookies: Option<Arc<Jar>>,
    ) -> NetResult<Self> {
        let mut builder = Client::builder()
            .use_rustls_tls()
            .http1_only()
            .pool_max_idle_per_host(options.pool_max_idle_per_host);

        if let Some(resolver) = resolver.clone() {
            builder = builder.dns_resolver(resolver);
        }
        if let Some(jar) = cookies {
            builder = builder.cookie_provider(jar);
        }

        let inner = builder.build().map_err(NetError::from)?;
        Ok(Self {
            inner,
            options,
            resolver,
        })
    }

    /// Sibling client sharing options and resolver, with a cookie jar attached.
    pub fn with_cookies(&self, jar: Arc<Jar>) -> NetResult<Self> {
        Self::with_parts(self.options.clone(), self.resolver.clone(), Some(jar))
    }

    pub fn options(&self) -> &NetOptions {
        &self.options
    }

    fn build_request(
        &self,
        method: Method,
        url: Url,
        headers: &Headers,
        range: Option<RangeSpec>,
        body: Option<Bytes>,
        timeout: Option<Duration>,
    ) -> reqwest::RequestBuilder {
        let mut req = self.inner.request(method, url);
        for (key, value) in headers.iter() {
            req = req.header(key, value);
        }
        if let Some(range) = range {
            req = req.header("Range", range.to_header_value());
        }
        if let Some(body) = body {
            req = req.body(body);
        }
        if let Some(timeout) = timeout {
            req = req.timeout(timeout);
        }
        req
    }

    /// One ranged GET, fully collected. Non-2xx is an error; the caller
    /// decides whether transport errors are worth another attempt.
    pub async fn get_range_bytes(
        &self,
        url: Url,
        range: RangeSpec,
        headers: &Headers,
    ) -> NetResult<Bytes> {
        let req = self.build_request(
            Method::GET,
            url.clone(),
            headers,
            Some(range),
            None,
            Some(self.options.request_timeout),
        );

        let resp = req.send().await.map_err(NetError::from)?;
        let status = resp.status();
        if !status.is_success() {
            return Err(NetError::HttpStatus {
                status: status.as_u16(),
                url,
            });
        }

        resp.bytes().await.map_err(NetError::from)
    }

    /// Raw request with no status filtering: the probe and the non-GET
    /// forwarding path both need the origin response verbatim.
    ///
    /// `timeout: None` means no per-request deadline (the probe runs without
    /// one so slow origins still answer the first kilobyte).
    pub async fn request_raw(
        &self,
        method: Method,
        url: Url,
        headers: &Headers,
        range: Option<RangeSpec>,
        body: Option<Bytes>,
        timeout: Option<Duration>,
    ) -> NetResult<reqwest::Response> {
        let req = self.build_request(method, url, headers, range, body, timeout);
        req.send().await.map_err(NetError::from)
    }
}
