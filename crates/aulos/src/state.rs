use std::sync::Arc;
use std::time::Duration;

use aulos_engine::WorkPool;
use aulos_net::{HttpClient, NetOptions, NetResult, RacedResolver};
use reqwest::cookie::Jar;

use crate::probe::ProbedMedia;
use crate::store::TtlStore;

/// TTL for probed origin headers and cached work pools.
pub const MEDIA_CACHE_TTL: Duration = Duration::from_secs(4 * 60 * 60);

/// Consumer-side queue timeout and the work-pool slot acquisition timeout.
pub const PROXY_TIMEOUT: Duration = Duration::from_secs(10);

/// Shared server state, passed by capability to every handler.
pub struct ProxyState {
    work_pool_mode: bool,
    media: TtlStore<ProbedMedia>,
    pools: TtlStore<WorkPool>,
    base_client: HttpClient,
}

impl ProxyState {
    pub fn new(
        options: NetOptions,
        resolver: Option<Arc<RacedResolver>>,
        work_pool_mode: bool,
    ) -> NetResult<Self> {
        let base_client = HttpClient::with_parts(options, resolver, None)?;
        Ok(Self {
            work_pool_mode,
            media: TtlStore::new(MEDIA_CACHE_TTL),
            pools: TtlStore::new(MEDIA_CACHE_TTL),
            base_client,
        })
    }

    pub fn work_pool_mode(&self) -> bool {
        self.work_pool_mode
    }

    pub fn media(&self) -> &TtlStore<ProbedMedia> {
        &self.media
    }

    /// Shared work pool for a hot URL, created on first use.
    pub fn pool_for(&self, url: &str, size: u64) -> WorkPool {
        let key = format!("{url}#Workpool");
        self.pools
            .get_or_insert_with(&key, || WorkPool::new(size.max(1) as usize, PROXY_TIMEOUT))
    }

    /// Per-request client carrying that request's cookie jar.
    pub fn client_with_cookies(&self, jar: Arc<Jar>) -> NetResult<HttpClient> {
        self.base_client.with_cookies(jar)
    }

    pub fn client(&self) -> &HttpClient {
        &self.base_client
    }
}
