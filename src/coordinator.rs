//! Concurrency & resource model (§5, §9 Design Notes).
//!
//! `Coordinator` is the one place that owns the process-wide mutation
//! mutex: every HTTP handler that reads-modifies-writes shared state
//! (state.json, the hash registry, per-level manifests, streaming JSONL
//! files, the probe index) acquires `lock()` before touching disk. The
//! auto-finalize watchdog runs on the same lock, so it never overlaps a
//! request or itself.

use crate::config::{ArtifactEncoding, Config};
use crate::domain::DomainKey;
use crate::routing::{self, RoutingPolicy};
use crate::runs;
use crate::state::StateStore;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, error, info, warn};

/// Holds the single mutation mutex, configuration, and the routing policy
/// selected for this deployment.
pub struct Coordinator {
    config: Config,
    config_hash: String,
    project_root: PathBuf,
    policy: Box<dyn RoutingPolicy>,
    lock: Mutex<()>,
    watchdog_last_tick: StdMutex<Option<String>>,
    watchdog_ticking: AtomicBool,
}

impl Coordinator {
    pub fn new(config: Config, project_root: impl Into<PathBuf>) -> Self {
        let policy = routing::build_policy(&config.routing.policy);
        Coordinator {
            config,
            config_hash: String::new(),
            project_root: project_root.into(),
            policy,
            lock: Mutex::new(()),
            watchdog_last_tick: StdMutex::new(None),
            watchdog_ticking: AtomicBool::new(false),
        }
    }

    /// Attaches the configuration file's content hash (§2 ambient stack),
    /// logged at startup and surfaced on `GET /health` for traceability
    /// across restarts.
    pub fn with_config_hash(mut self, hash: impl Into<String>) -> Self {
        self.config_hash = hash.into();
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn config_hash(&self) -> &str {
        &self.config_hash
    }

    /// The watchdog's last completed tick (RFC3339), and whether it is
    /// currently inside a tick (§4.10).
    pub fn watchdog_status(&self) -> (Option<String>, bool) {
        let last = self.watchdog_last_tick.lock().unwrap().clone();
        (last, self.watchdog_ticking.load(Ordering::SeqCst))
    }

    /// Count of streaming buckets across every domain that are JSONL-present
    /// but not yet `.done`-marked (§4.10).
    pub fn open_bucket_count(&self) -> usize {
        runs::count_open_buckets(&self.project_root)
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    pub fn policy(&self) -> &dyn RoutingPolicy {
        self.policy.as_ref()
    }

    /// Acquires the global mutation mutex. Every read-modify-write handler
    /// must hold this guard for the duration of its disk operations (§9
    /// Design Notes: "every mutating handler must acquire the lock").
    pub async fn lock(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().await
    }

    pub fn store_for(&self, domain: DomainKey) -> StateStore {
        StateStore::new(self.project_root.clone(), domain)
    }

    /// The artifact encoding to use for `domain`: a per-domain override if
    /// configured, else the deployment default.
    pub fn encoding_for(&self, domain: &DomainKey) -> ArtifactEncoding {
        self.config
            .domain_overrides
            .get(domain.as_str())
            .and_then(|o| o.encoding)
            .unwrap_or(self.config.artifacts.encoding)
    }

    /// The chunk size to use for `domain`: a per-domain override if
    /// configured, else the deployment default.
    pub fn chunk_size_for(&self, domain: &DomainKey) -> usize {
        self.config
            .domain_overrides
            .get(domain.as_str())
            .and_then(|o| o.chunk_size)
            .unwrap_or(self.config.artifacts.default_chunk_size)
    }

    fn meta_root(&self) -> PathBuf {
        self.project_root.join("BFS_crawl").join("_meta")
    }

    fn known_domains(&self) -> Vec<DomainKey> {
        std::fs::read_dir(self.meta_root())
            .into_iter()
            .flatten()
            .flatten()
            .filter(|e| e.path().is_dir())
            .filter_map(|e| e.file_name().into_string().ok())
            .map(|name| DomainKey::from_host(&name))
            .collect()
    }

    /// Scans every known domain's run buckets and finalizes any that have
    /// gone idle past `watchdog.idle_ms`. Called on an `watchdog.interval_ms`
    /// tick; runs under the mutation lock.
    async fn watchdog_tick(self: &Arc<Self>) {
        self.watchdog_ticking.store(true, Ordering::SeqCst);
        let _guard = self.lock().await;
        let now = std::time::SystemTime::now();

        for domain in self.known_domains() {
            let store = self.store_for(domain.clone());
            let encoding = self.encoding_for(&domain);
            let chunk_size = self.chunk_size_for(&domain);

            match runs::run_watchdog_sweep(&store, encoding, chunk_size, self.config.watchdog.idle_ms, now) {
                Ok(finalized) if !finalized.is_empty() => {
                    info!(domain = %domain, count = finalized.len(), "watchdog auto-finalized idle run buckets");
                }
                Ok(_) => debug!(domain = %domain, "watchdog sweep found nothing idle"),
                Err(err) => warn!(domain = %domain, error = %err, "watchdog sweep failed"),
            }
        }

        *self.watchdog_last_tick.lock().unwrap() = Some(chrono::Utc::now().to_rfc3339());
        self.watchdog_ticking.store(false, Ordering::SeqCst);
    }

    /// Spawns the background watchdog loop on `config.watchdog.interval_ms`.
    /// The returned handle can be aborted on shutdown.
    pub fn spawn_watchdog(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        let interval = std::time::Duration::from_millis(self.config.watchdog.interval_ms);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                self.watchdog_tick().await;
            }
        })
    }
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("project_root", &self.project_root)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn test_config() -> Config {
        Config::default()
    }

    #[tokio::test]
    async fn test_lock_is_exclusive_across_awaits() {
        let dir = tempdir().unwrap();
        let coordinator = Arc::new(Coordinator::new(test_config(), dir.path()));

        let first = coordinator.clone();
        let second = coordinator.clone();

        let order = Arc::new(Mutex::new(Vec::<u32>::new()));
        let order_a = order.clone();
        let order_b = order.clone();

        let a = tokio::spawn(async move {
            let _g = first.lock().await;
            order_a.lock().await.push(1);
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            order_a.lock().await.push(2);
        });
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let b = tokio::spawn(async move {
            let _g = second.lock().await;
            order_b.lock().await.push(3);
        });

        a.await.unwrap();
        b.await.unwrap();
        assert_eq!(*order.lock().await, vec![1, 2, 3]);
    }

    #[test]
    fn test_encoding_and_chunk_size_fall_back_to_defaults() {
        let dir = tempdir().unwrap();
        let coordinator = Coordinator::new(test_config(), dir.path());
        let domain = DomainKey::from_host("example.com");
        assert_eq!(coordinator.encoding_for(&domain), coordinator.config().artifacts.encoding);
        assert_eq!(coordinator.chunk_size_for(&domain), coordinator.config().artifacts.default_chunk_size);
    }

    #[test]
    fn test_known_domains_empty_when_no_meta_dir() {
        let dir = tempdir().unwrap();
        let coordinator = Coordinator::new(test_config(), dir.path());
        assert!(coordinator.known_domains().is_empty());
    }
}
