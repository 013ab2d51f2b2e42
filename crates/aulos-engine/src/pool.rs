use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::warn;

/// Capped task submission for a hot URL.
///
/// When the server runs in work-pool mode, every download of the same URL
/// submits its fetchers through one shared `WorkPool`, so aggregate
/// concurrency against that origin never exceeds the pool size regardless of
/// how many clients are streaming it. A task that cannot obtain a slot within
/// the acquire timeout is dropped; the download it belonged to then simply
/// runs with fewer fetchers (or times out on its ready queue if none run).
///
/// Cloning is cheap (Arc increment); pools are cached per URL and reused
/// across requests.
#[derive(Clone, Debug)]
pub struct WorkPool {
    slots: Arc<Semaphore>,
    acquire_timeout: Duration,
}

impl WorkPool {
    pub fn new(size: usize, acquire_timeout: Duration) -> Self {
        Self {
            slots: Arc::new(Semaphore::new(size)),
            acquire_timeout,
        }
    }

    pub fn available(&self) -> usize {
        self.slots.available_permits()
    }

    /// Run `fut` once a slot frees up, holding the slot for its duration.
    pub fn spawn<F>(&self, fut: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let slots = Arc::clone(&self.slots);
        let acquire_timeout = self.acquire_timeout;
        tokio::spawn(async move {
            let _permit = match tokio::time::timeout(acquire_timeout, slots.acquire_owned()).await {
                Ok(Ok(permit)) => permit,
                Ok(Err(_)) | Err(_) => {
                    warn!("work pool slot unavailable, dropping task");
                    return;
                }
            };
            fut.await;
        })
    }
}
