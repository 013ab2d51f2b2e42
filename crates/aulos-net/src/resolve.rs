use std::net::{IpAddr, SocketAddr};
use std::time::{Duration, Instant};

use futures::future::join_all;
use hickory_resolver::config::{NameServerConfig, Protocol, ResolverConfig, ResolverOpts};
use hickory_resolver::TokioAsyncResolver;
use reqwest::dns::{Addrs, Name, Resolve, Resolving};
use tracing::{debug, warn};

use crate::error::{NetError, NetResult};

/// Resolvers raced at startup when the config leaves `dns` empty.
pub const DNS_CANDIDATES: &[&str] = &[
    "119.29.29.29",
    "180.76.76.76",
    "223.5.5.5",
    "114.114.114.114",
    "1.1.1.1",
    "101.226.4.6",
    "1.2.4.8",
    "210.2.4.8",
    "123.125.81.6",
];

/// Domain used to measure candidate latency.
pub const DNS_PROBE_DOMAIN: &str = "baidu.com";

const MEASURE_TIMEOUT: Duration = Duration::from_secs(2);

/// Resolver backed by a single fixed nameserver, pluggable into reqwest.
#[derive(Clone)]
pub struct RacedResolver {
    inner: TokioAsyncResolver,
    server: IpAddr,
}

impl std::fmt::Debug for RacedResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RacedResolver")
            .field("server", &self.server)
            .finish()
    }
}

impl RacedResolver {
    pub fn for_nameserver(server: IpAddr) -> Self {
        let mut config = ResolverConfig::new();
        config.add_name_server(NameServerConfig::new(
            SocketAddr::new(server, 53),
            Protocol::Udp,
        ));
        let inner = TokioAsyncResolver::tokio(config, ResolverOpts::default());
        Self { inner, server }
    }

    pub fn server(&self) -> IpAddr {
        self.server
    }

    /// Time one A-record lookup through `server`. `None` on error or timeout.
    pub async fn measure(server: IpAddr, domain: &str) -> Option<Duration> {
        let resolver = Self::for_nameserver(server);
        let started = Instant::now();
        match tokio::time::timeout(MEASURE_TIMEOUT, resolver.inner.lookup_ip(domain)).await {
            Ok(Ok(_)) => Some(started.elapsed()),
            Ok(Err(e)) => {
                debug!(%server, "dns candidate failed: {e}");
                None
            }
            Err(_) => {
                debug!(%server, "dns candidate timed out");
                None
            }
        }
    }

    /// Race every candidate and return the lowest-latency responder.
    pub async fn fastest(candidates: &[&str], domain: &str) -> Option<IpAddr> {
        let servers: Vec<IpAddr> = candidates
            .iter()
            .filter_map(|raw| raw.parse().ok())
            .collect();

        let measurements = join_all(servers.iter().map(|&server| async move {
            Self::measure(server, domain).await.map(|lat| (server, lat))
        }))
        .await;

        let mut ranked: Vec<(IpAddr, Duration)> = measurements.into_iter().flatten().collect();
        ranked.sort_by_key(|&(_, lat)| lat);

        match ranked.first() {
            Some(&(server, latency)) => {
                debug!(%server, ?latency, "fastest dns candidate");
                Some(server)
            }
            None => None,
        }
    }
}

/// Pick the outbound resolver per the startup rules: a configured server wins,
/// an empty setting races the candidate list, and no usable candidate falls
/// back to system DNS (`None`).
pub async fn select_resolver(configured: &str) -> NetResult<Option<RacedResolver>> {
    if !configured.is_empty() {
        let server: IpAddr = configured
            .parse()
            .map_err(|_| NetError::BadResolver(configured.to_string()))?;
        return Ok(Some(RacedResolver::for_nameserver(server)));
    }

    match RacedResolver::fastest(DNS_CANDIDATES, DNS_PROBE_DOMAIN).await {
        Some(server) => Ok(Some(RacedResolver::for_nameserver(server))),
        None => {
            warn!("no dns candidate answered, using system resolver");
            Ok(None)
        }
    }
}

impl Resolve for RacedResolver {
    fn resolve(&self, name: Name) -> Resolving {
        let resolver = self.inner.clone();
        Box::pin(async move {
            let lookup = resolver.lookup_ip(name.as_str()).await?;
            let addrs: Addrs = Box::new(lookup.into_iter().map(|ip| SocketAddr::new(ip, 0)));
            Ok(addrs)
        })
    }
}
