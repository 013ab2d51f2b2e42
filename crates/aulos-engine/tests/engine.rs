use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use bytes::Bytes;
use tokio::net::TcpListener;

use aulos_engine::{Coordinator, CoordinatorConfig, Emitter, RunState, WorkPool};
use aulos_net::{Headers, HttpClient, NetOptions};

const CHUNK: u64 = 128 * 1024;

/// Deterministic pseudo-random content so truncated prefixes are checkable.
fn content(len: usize) -> Vec<u8> {
    let mut state = 0x9e37_79b9_7f4a_7c15u64;
    (0..len)
        .map(|i| {
            state = state
                .wrapping_mul(6364136223846793005)
                .wrapping_add(i as u64 | 1);
            (state >> 56) as u8
        })
        .collect()
}

#[derive(Clone)]
struct Origin {
    data: Arc<Vec<u8>>,
    /// Requests whose range start falls inside this window get a 500.
    fail_window: Option<(u64, u64)>,
    /// Artificial per-request latency, to make concurrency observable.
    delay: Option<Duration>,
    in_flight: Arc<AtomicUsize>,
    peak_in_flight: Arc<AtomicUsize>,
    bytes_served: Arc<AtomicU64>,
    ranges_seen: Arc<Mutex<Vec<(u64, u64)>>>,
}

impl Origin {
    fn new(data: Vec<u8>) -> Self {
        Self {
            data: Arc::new(data),
            fail_window: None,
            delay: None,
            in_flight: Arc::new(AtomicUsize::new(0)),
            peak_in_flight: Arc::new(AtomicUsize::new(0)),
            bytes_served: Arc::new(AtomicU64::new(0)),
            ranges_seen: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn with_fail_window(mut self, start: u64, end: u64) -> Self {
        self.fail_window = Some((start, end));
        self
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    async fn serve(self) -> url::Url {
        let app = Router::new()
            .route("/media.bin", get(origin_handler))
            .with_state(self);
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://127.0.0.1:{}/media.bin", addr.port())
            .parse()
            .unwrap()
    }
}

fn parse_range(value: &str, len: usize) -> Option<(usize, usize)> {
    let spec = value.strip_prefix("bytes=")?;
    let (start_str, end_str) = spec.split_once('-')?;
    let start: usize = start_str.trim().parse().ok()?;
    let end = if end_str.trim().is_empty() {
        len - 1
    } else {
        end_str.trim().parse().ok()?
    };
    (start <= end && end < len).then_some((start, end))
}

async fn origin_handler(State(origin): State<Origin>, req: Request) -> Response {
    let live = origin.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
    origin.peak_in_flight.fetch_max(live, Ordering::SeqCst);

    if let Some(delay) = origin.delay {
        tokio::time::sleep(delay).await;
    }

    let range = req
        .headers()
        .get("Range")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| parse_range(v, origin.data.len()));

    let resp = match range {
        Some((start, end)) => {
            origin
                .ranges_seen
                .lock()
                .unwrap()
                .push((start as u64, end as u64));

            let failed = origin
                .fail_window
                .is_some_and(|(fs, fe)| (start as u64) >= fs && (start as u64) <= fe);
            if failed {
                Response::builder()
                    .status(StatusCode::INTERNAL_SERVER_ERROR)
                    .body(Body::from("window unavailable"))
                    .unwrap()
            } else {
                let slice = Bytes::copy_from_slice(&origin.data[start..=end]);
                origin
                    .bytes_served
                    .fetch_add(slice.len() as u64, Ordering::SeqCst);
                Response::builder()
                    .status(StatusCode::PARTIAL_CONTENT)
                    .header(
                        "Content-Range",
                        format!("bytes {}-{}/{}", start, end, origin.data.len()),
                    )
                    .body(Body::from(slice))
                    .unwrap()
            }
        }
        None => Response::builder()
            .status(StatusCode::OK)
            .body(Body::from(Bytes::copy_from_slice(&origin.data)))
            .unwrap(),
    };

    origin.in_flight.fetch_sub(1, Ordering::SeqCst);
    resp
}

fn coordinator_for(
    url: url::Url,
    start: u64,
    end: u64,
    threads: u64,
    max_buffered: u64,
) -> Arc<Coordinator> {
    let client = HttpClient::new(NetOptions::default()).unwrap();
    Coordinator::new(
        client,
        CoordinatorConfig {
            url,
            headers: Headers::new(),
            start_offset: start,
            end_offset: end,
            chunk_size: CHUNK,
            thread_count: threads,
            max_buffered_chunks: max_buffered,
            proxy_timeout: Duration::from_secs(10),
            pool: None,
        },
    )
}

async fn collect(reader: aulos_engine::EmitterReader) -> Vec<u8> {
    let mut out = Vec::new();
    while let Some(bytes) = reader.read().await {
        out.extend_from_slice(&bytes);
    }
    out
}

async fn wait_for_state(co: &Arc<Coordinator>, state: RunState, deadline: Duration) {
    let started = std::time::Instant::now();
    while co.state() != state {
        assert!(
            started.elapsed() < deadline,
            "coordinator did not reach {state:?} within {deadline:?} (now {:?})",
            co.state()
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

#[tokio::test]
async fn full_download_is_ordered_and_complete() {
    let data = content(1024 * 1024);
    let url = Origin::new(data.clone()).serve().await;

    let co = coordinator_for(url, 0, data.len() as u64 - 1, 4, 16);
    let (emitter, reader) = Emitter::pair();
    let run = tokio::spawn(Arc::clone(&co).run(emitter));

    let body = collect(reader).await;
    let outcome = run.await.unwrap();

    assert_eq!(body, data);
    assert!(outcome.complete);
    assert_eq!(outcome.delivered, data.len() as u64);
    assert_eq!(co.state(), RunState::Stopped);
    assert_eq!(co.queued_chunks(), 0);
}

#[tokio::test]
async fn subinterval_download_matches_origin_slice() {
    let data = content(1024 * 1024);
    let url = Origin::new(data.clone()).serve().await;

    let co = coordinator_for(url, 100_000, 199_999, 4, 16);
    let (emitter, reader) = Emitter::pair();
    let run = tokio::spawn(Arc::clone(&co).run(emitter));

    let body = collect(reader).await;
    let outcome = run.await.unwrap();

    assert_eq!(body, &data[100_000..200_000]);
    assert!(outcome.complete);
    assert_eq!(outcome.delivered, 100_000);
}

#[tokio::test]
async fn chunk_ranges_are_disjoint_and_cover_the_interval() {
    let data = content(1024 * 1024);
    let origin = Origin::new(data.clone());
    let ranges_seen = Arc::clone(&origin.ranges_seen);
    let url = origin.serve().await;

    let co = coordinator_for(url, 0, data.len() as u64 - 1, 4, 16);
    let (emitter, reader) = Emitter::pair();
    let run = tokio::spawn(Arc::clone(&co).run(emitter));
    collect(reader).await;
    run.await.unwrap();

    let mut ranges = ranges_seen.lock().unwrap().clone();
    ranges.sort();

    let expected: Vec<(u64, u64)> = (0..8)
        .map(|i| {
            let start = i * CHUNK;
            (start, (start + CHUNK - 1).min(data.len() as u64 - 1))
        })
        .collect();
    assert_eq!(ranges, expected, "every byte fetched exactly once");
}

#[tokio::test]
async fn mid_stream_failure_delivers_a_valid_prefix() {
    let data = content(1024 * 1024);
    let origin = Origin::new(data.clone()).with_fail_window(393_216, 524_287);
    let in_flight = Arc::clone(&origin.in_flight);
    let url = origin.serve().await;

    let co = coordinator_for(url, 0, data.len() as u64 - 1, 4, 16);
    let (emitter, reader) = Emitter::pair();
    let run = tokio::spawn(Arc::clone(&co).run(emitter));

    let body = collect(reader).await;
    let outcome = run.await.unwrap();

    assert!(!outcome.complete);
    assert!(body.len() <= 393_216, "no bytes past the failed window");
    assert_eq!(body, &data[..body.len()], "delivered bytes are a valid prefix");

    wait_for_state(&co, RunState::Stopped, Duration::from_secs(15)).await;
    assert_eq!(co.queued_chunks(), 0);

    let started = std::time::Instant::now();
    while in_flight.load(Ordering::SeqCst) > 0 {
        assert!(started.elapsed() < Duration::from_secs(15));
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

#[tokio::test]
async fn client_disconnect_stops_all_fetchers() {
    let data = content(4 * 1024 * 1024);
    let origin = Origin::new(data.clone()).with_delay(Duration::from_millis(10));
    let in_flight = Arc::clone(&origin.in_flight);
    let url = origin.serve().await;

    let co = coordinator_for(url, 0, data.len() as u64 - 1, 4, 16);
    let (emitter, reader) = Emitter::pair();
    let run = tokio::spawn(Arc::clone(&co).run(emitter));

    let mut received = 0usize;
    while received < 200_000 {
        let Some(bytes) = reader.read().await else {
            break;
        };
        received += bytes.len();
    }
    drop(reader);

    let outcome = run.await.unwrap();
    assert!(!outcome.complete);

    wait_for_state(&co, RunState::Stopped, Duration::from_secs(15)).await;
    assert_eq!(co.queued_chunks(), 0, "no buffered chunks after stop");

    let started = std::time::Instant::now();
    while in_flight.load(Ordering::SeqCst) > 0 {
        assert!(
            started.elapsed() < Duration::from_secs(15),
            "fetchers still in flight"
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

#[tokio::test]
async fn stop_is_idempotent() {
    let data = content(256 * 1024);
    let url = Origin::new(data.clone()).serve().await;

    let co = coordinator_for(url, 0, data.len() as u64 - 1, 2, 8);
    co.stop().await;
    co.stop().await;

    assert_eq!(co.state(), RunState::Stopped);
    assert_eq!(co.queued_chunks(), 0);
    assert!(co.read().await.is_none(), "read after stop is a no-op");
}

#[tokio::test]
async fn origin_concurrency_never_exceeds_the_cap() {
    let data = content(1024 * 1024);
    let origin = Origin::new(data.clone()).with_delay(Duration::from_millis(15));
    let peak = Arc::clone(&origin.peak_in_flight);
    let url = origin.serve().await;

    let co = coordinator_for(url, 0, data.len() as u64 - 1, 4, 16);
    let (emitter, reader) = Emitter::pair();
    let run = tokio::spawn(Arc::clone(&co).run(emitter));
    collect(reader).await;
    run.await.unwrap();

    assert!(
        peak.load(Ordering::SeqCst) <= 4,
        "live fetchers exceeded thread_count"
    );
}

#[tokio::test]
async fn backpressure_bounds_buffered_bytes() {
    let data = content(1024 * 1024);
    let origin = Origin::new(data.clone());
    let served = Arc::clone(&origin.bytes_served);
    let url = origin.serve().await;

    let threads = 2u64;
    let max_buffered = 2u64;
    let co = coordinator_for(url, 0, data.len() as u64 - 1, threads, max_buffered);
    let (emitter, reader) = Emitter::pair();
    let run = tokio::spawn(Arc::clone(&co).run(emitter));

    let mut body = Vec::new();
    while let Some(bytes) = reader.read().await {
        body.extend_from_slice(&bytes);

        assert!(co.queued_chunks() as u64 <= max_buffered);
        // Queue plus one in-flight chunk per fetcher, plus the chunk the
        // consumer just handed over.
        let bound = CHUNK * (max_buffered + threads + 1);
        let outstanding = served.load(Ordering::SeqCst) - co.bytes_delivered();
        assert!(
            outstanding <= bound,
            "outstanding {outstanding} exceeds bound {bound}"
        );

        // A slow consumer is what makes backpressure bite.
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let outcome = run.await.unwrap();
    assert!(outcome.complete);
    assert_eq!(body, data);
}

#[tokio::test]
async fn starved_work_pool_times_out_the_queue_read() {
    let data = content(256 * 1024);
    let url = Origin::new(data.clone()).serve().await;

    let pool = WorkPool::new(1, Duration::from_millis(30));
    // Hold the only slot for the whole test.
    let _blocker = pool.spawn(async move {
        tokio::time::sleep(Duration::from_secs(30)).await;
    });
    tokio::time::sleep(Duration::from_millis(10)).await;

    let client = HttpClient::new(NetOptions::default()).unwrap();
    let co = Coordinator::new(
        client,
        CoordinatorConfig {
            url,
            headers: Headers::new(),
            start_offset: 0,
            end_offset: data.len() as u64 - 1,
            chunk_size: CHUNK,
            thread_count: 2,
            max_buffered_chunks: 8,
            proxy_timeout: Duration::from_millis(300),
            pool: Some(pool),
        },
    );

    let (emitter, reader) = Emitter::pair();
    let run = tokio::spawn(Arc::clone(&co).run(emitter));
    let body = collect(reader).await;
    let outcome = run.await.unwrap();

    assert!(body.is_empty());
    assert!(!outcome.complete);
    assert_eq!(outcome.delivered, 0);
    assert_eq!(co.state(), RunState::Stopped);
}
