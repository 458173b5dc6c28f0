use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use super::{Fields, SideCache};

/// Background cache work produced by a committed transaction.
#[derive(Debug, Clone)]
pub enum CacheJob {
    Populate {
        key: String,
        fields: Fields,
        ttl: Duration,
    },
    Invalidate {
        keys: Vec<String>,
    },
}

/// Counters for background cache work. Failures are otherwise only logged.
#[derive(Debug, Default)]
pub struct CacheStats {
    populated: AtomicU64,
    populate_failures: AtomicU64,
    invalidated: AtomicU64,
    invalidate_failures: AtomicU64,
}

impl CacheStats {
    pub fn populated(&self) -> u64 {
        self.populated.load(Ordering::Relaxed)
    }

    pub fn populate_failures(&self) -> u64 {
        self.populate_failures.load(Ordering::Relaxed)
    }

    pub fn invalidated(&self) -> u64 {
        self.invalidated.load(Ordering::Relaxed)
    }

    pub fn invalidate_failures(&self) -> u64 {
        self.invalidate_failures.load(Ordering::Relaxed)
    }
}

enum Command {
    Run(CacheJob, Option<oneshot::Sender<()>>),
    Flush(oneshot::Sender<()>),
}

/// Single consumer that applies cache jobs in submission order, so a populate
/// queued before an invalidation of the same key can never land after it.
#[derive(Clone)]
pub struct CacheWorker {
    tx: mpsc::UnboundedSender<Command>,
    stats: Arc<CacheStats>,
}

impl CacheWorker {
    /// Spawn the worker on the current tokio runtime.
    pub fn spawn(cache: Arc<dyn SideCache>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let stats = Arc::new(CacheStats::default());
        tokio::spawn(worker_loop(cache, rx, stats.clone()));
        Self { tx, stats }
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    /// Fire and forget.
    pub fn submit(&self, job: CacheJob) {
        if self.tx.send(Command::Run(job, None)).is_err() {
            warn!("cache worker stopped; dropping job");
        }
    }

    /// Submit and wait until the job has been applied (or has failed).
    pub async fn submit_and_wait(&self, job: CacheJob) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(Command::Run(job, Some(done_tx))).is_err() {
            warn!("cache worker stopped; dropping job");
            return;
        }
        let _ = done_rx.await;
    }

    /// Wait for every job submitted so far.
    pub async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(Command::Flush(done_tx)).is_ok() {
            let _ = done_rx.await;
        }
    }
}

async fn worker_loop(
    cache: Arc<dyn SideCache>,
    mut rx: mpsc::UnboundedReceiver<Command>,
    stats: Arc<CacheStats>,
) {
    while let Some(command) = rx.recv().await {
        match command {
            Command::Run(job, done) => {
                process_job(cache.as_ref(), job, &stats).await;
                if let Some(done) = done {
                    let _ = done.send(());
                }
            }
            Command::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
}

async fn process_job(cache: &dyn SideCache, job: CacheJob, stats: &CacheStats) {
    match job {
        CacheJob::Populate { key, fields, ttl } => match cache.set_hash(&key, fields, ttl).await {
            Ok(()) => {
                stats.populated.fetch_add(1, Ordering::Relaxed);
                debug!(%key, "cache populated");
            }
            Err(error) => {
                stats.populate_failures.fetch_add(1, Ordering::Relaxed);
                warn!(%key, %error, "cache populate failed");
            }
        },
        CacheJob::Invalidate { keys } => {
            if keys.is_empty() {
                return;
            }
            let result = match keys.as_slice() {
                [key] => cache.delete(key).await,
                _ => cache.delete_pipelined(&keys).await,
            };
            match result {
                Ok(()) => {
                    stats
                        .invalidated
                        .fetch_add(keys.len() as u64, Ordering::Relaxed);
                    debug!(?keys, "cache invalidated");
                }
                Err(error) => {
                    stats.invalidate_failures.fetch_add(1, Ordering::Relaxed);
                    warn!(?keys, %error, "cache invalidation failed; entries live until TTL");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::cache::MemoryCache;
    use crate::error::CacheError;

    struct DownCache;

    #[async_trait]
    impl SideCache for DownCache {
        async fn get_hash(&self, _key: &str) -> Result<Option<Fields>, CacheError> {
            Err(CacheError::Unavailable("down".into()))
        }

        async fn set_hash(
            &self,
            _key: &str,
            _fields: Fields,
            _ttl: Duration,
        ) -> Result<(), CacheError> {
            Err(CacheError::Unavailable("down".into()))
        }

        async fn delete(&self, _key: &str) -> Result<(), CacheError> {
            Err(CacheError::Unavailable("down".into()))
        }

        async fn delete_pipelined(&self, _keys: &[String]) -> Result<(), CacheError> {
            Err(CacheError::Unavailable("down".into()))
        }
    }

    #[tokio::test]
    async fn jobs_apply_in_submission_order() {
        let cache = Arc::new(MemoryCache::new());
        let worker = CacheWorker::spawn(cache.clone());

        worker.submit(CacheJob::Populate {
            key: "user:1".into(),
            fields: Fields::new(),
            ttl: Duration::from_secs(60),
        });
        worker.submit(CacheJob::Invalidate {
            keys: vec!["user:1".into()],
        });
        worker.flush().await;

        assert!(!cache.contains("user:1"));
        assert_eq!(worker.stats().populated(), 1);
        assert_eq!(worker.stats().invalidated(), 1);
    }

    #[tokio::test]
    async fn submit_and_wait_returns_after_apply() {
        let cache = Arc::new(MemoryCache::new());
        let worker = CacheWorker::spawn(cache.clone());

        worker
            .submit_and_wait(CacheJob::Populate {
                key: "device:x".into(),
                fields: Fields::new(),
                ttl: Duration::from_secs(60),
            })
            .await;
        assert!(cache.contains("device:x"));
    }

    #[tokio::test]
    async fn failed_jobs_are_counted_not_raised() {
        let worker = CacheWorker::spawn(Arc::new(DownCache));

        worker.submit(CacheJob::Populate {
            key: "user:1".into(),
            fields: Fields::new(),
            ttl: Duration::from_secs(60),
        });
        worker
            .submit_and_wait(CacheJob::Invalidate {
                keys: vec!["user:1".into(), "user:email:a@b.c".into()],
            })
            .await;

        let stats = worker.stats();
        assert_eq!(stats.populate_failures(), 1);
        assert_eq!(stats.invalidate_failures(), 1);
        assert_eq!(stats.populated(), 0);
        assert_eq!(stats.invalidated(), 0);
    }
}
