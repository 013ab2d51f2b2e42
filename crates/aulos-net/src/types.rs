use std::collections::HashMap;
use std::time::Duration;

/// Case-preserving header map forwarded to the origin.
///
/// Duplicate inbound values are collapsed into a single comma-joined value
/// when converting from an [`http::HeaderMap`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Headers {
    inner: HashMap<String, String>,
}

impl Headers {
    pub fn new() -> Self {
        Self {
            inner: HashMap::new(),
        }
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.inner.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.inner.get(key).map(|s| s.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.inner.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Copy every header whose lowercase name `keep` accepts.
    pub fn from_header_map<F>(map: &http::HeaderMap, keep: F) -> Self
    where
        F: Fn(&str) -> bool,
    {
        let mut out = Self::new();
        for key in map.keys() {
            if !keep(key.as_str()) {
                continue;
            }
            let joined = map
                .get_all(key)
                .iter()
                .filter_map(|v| v.to_str().ok())
                .collect::<Vec<_>>()
                .join(", ");
            out.insert(key.as_str(), joined);
        }
        out
    }
}

impl From<HashMap<String, String>> for Headers {
    fn from(map: HashMap<String, String>) -> Self {
        Self { inner: map }
    }
}

/// Inclusive byte range for a `Range: bytes=A-B` request header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RangeSpec {
    pub start: u64,
    pub end: Option<u64>,
}

impl RangeSpec {
    pub fn new(start: u64, end: Option<u64>) -> Self {
        Self { start, end }
    }

    pub fn from_start(start: u64) -> Self {
        Self { start, end: None }
    }

    pub fn to_header_value(&self) -> String {
        if let Some(end) = self.end {
            format!("bytes={}-{}", self.start, end)
        } else {
            format!("bytes={}-", self.start)
        }
    }
}

/// Client construction options.
#[derive(Clone, Debug)]
pub struct NetOptions {
    /// Per-attempt timeout applied to ranged chunk fetches and forwards.
    pub request_timeout: Duration,
    /// Retry count for plain request forwarding (probe and non-GET methods).
    pub forward_retries: u32,
    pub pool_max_idle_per_host: usize,
}

impl Default for NetOptions {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(10),
            forward_retries: 3,
            pool_max_idle_per_host: 8,
        }
    }
}
