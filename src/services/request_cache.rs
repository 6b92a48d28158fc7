//! Coalescing TTL cache in front of the rate-limited ledger provider.
//!
//! At most one fetch per key is in flight at any time; every concurrent
//! caller awaits the same shared result. Failed fetches are never cached.

use futures_util::future::{join_all, BoxFuture, FutureExt, Shared};
use std::any::Any;
use std::collections::HashMap;
use std::fmt::Debug;
use std::future::Future;
use std::hash::Hash;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::{sleep, Duration, Instant};

use crate::{
    config::Config,
    constants::{RATE_LIMIT_BACKOFF_BASE_MS, RATE_LIMIT_BACKOFF_MAX_MS},
    error::{AppError, Result},
    models::{GameSnapshot, PlacedTile, PlayerInfo},
    services::onchain::GameLedger,
};

type SharedFetch<V> = Shared<BoxFuture<'static, Result<V>>>;

#[derive(Debug, Clone)]
pub struct CachePolicy {
    /// Delay before a new fetch starts, so near-simultaneous requests merge.
    pub debounce: Duration,
    pub batch_size: usize,
    pub batch_cooldown: Duration,
    pub rate_limit_retries: u32,
}

impl CachePolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            debounce: Duration::from_millis(config.request_debounce_ms),
            batch_size: config.refresh_batch_size.max(1),
            batch_cooldown: Duration::from_millis(config.refresh_batch_cooldown_ms),
            rate_limit_retries: config.rate_limit_retries,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshReport {
    pub batches: usize,
    pub succeeded: usize,
    pub failed: usize,
}

struct InFlight<V> {
    id: u64,
    fetch: SharedFetch<V>,
}

struct CacheEntry<V> {
    cached: Option<(V, Instant)>,
    ttl: Duration,
    in_flight: Option<InFlight<V>>,
    // fetches started before this id finish for their waiters but are neither
    // stored nor joined by later callers
    min_storable_id: u64,
}

impl<V> CacheEntry<V> {
    fn empty() -> Self {
        Self {
            cached: None,
            ttl: Duration::ZERO,
            in_flight: None,
            min_storable_id: 0,
        }
    }
}

// Internal helper that supports `rate_limit_backoff` operations.
fn rate_limit_backoff(attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(5);
    let candidate = RATE_LIMIT_BACKOFF_BASE_MS.saturating_mul(1_u64 << exponent);
    Duration::from_millis(candidate.clamp(RATE_LIMIT_BACKOFF_BASE_MS, RATE_LIMIT_BACKOFF_MAX_MS))
}

// Internal helper that renders a panic payload for the error message.
fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

// Internal helper that retries rate-limited fetches with exponential backoff.
async fn fetch_with_backoff<V, F, Fut>(fetcher: &F, retries: u32, name: &str) -> Result<V>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<V>>,
{
    let mut attempt = 0;
    loop {
        match fetcher().await {
            Err(AppError::RateLimited) if attempt < retries => {
                attempt += 1;
                let delay = rate_limit_backoff(attempt);
                tracing::warn!(
                    "{} cache: rate limited, retry {}/{} in {:?}",
                    name,
                    attempt,
                    retries,
                    delay
                );
                sleep(delay).await;
            }
            other => return other,
        }
    }
}

pub struct RequestCache<K, V> {
    name: &'static str,
    policy: CachePolicy,
    entries: Arc<Mutex<HashMap<K, CacheEntry<V>>>>,
    next_fetch_id: AtomicU64,
}

impl<K, V> RequestCache<K, V>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new(name: &'static str, policy: CachePolicy) -> Self {
        Self {
            name,
            policy,
            entries: Arc::new(Mutex::new(HashMap::new())),
            next_fetch_id: AtomicU64::new(1),
        }
    }

    /// Returns the cached payload if younger than `ttl`, joins an in-flight
    /// fetch for `key` if there is one started since the last `invalidate`,
    /// and otherwise starts a new fetch.
    pub async fn get<F, Fut>(&self, key: K, fetcher: F, ttl: Duration) -> Result<V>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<V>> + Send + 'static,
    {
        self.get_inner(key, fetcher, ttl, false).await
    }

    async fn get_inner<F, Fut>(&self, key: K, fetcher: F, ttl: Duration, force: bool) -> Result<V>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<V>> + Send + 'static,
    {
        let fetch = {
            let mut entries = self.entries.lock().await;
            let entry = entries.entry(key.clone()).or_insert_with(CacheEntry::empty);

            if !force {
                if let Some((payload, fetched_at)) = &entry.cached {
                    if fetched_at.elapsed() < ttl {
                        tracing::debug!("{} cache hit for {:?}", self.name, key);
                        return Ok(payload.clone());
                    }
                }
            }

            let joined = entry
                .in_flight
                .as_ref()
                .filter(|f| f.id >= entry.min_storable_id)
                .map(|f| f.fetch.clone());
            match joined {
                Some(fetch) => {
                    tracing::debug!("{} cache: joining in-flight fetch for {:?}", self.name, key);
                    fetch
                }
                None => {
                    let (id, fetch) = self.spawn_fetch(key.clone(), fetcher, ttl);
                    entry.in_flight = Some(InFlight {
                        id,
                        fetch: fetch.clone(),
                    });
                    fetch
                }
            }
        };

        fetch.await
    }

    // The spawned task owns the in-flight marker: it clears it and stores the
    // result whatever happens to the callers awaiting it, including when the
    // fetcher panics.
    fn spawn_fetch<F, Fut>(&self, key: K, fetcher: F, ttl: Duration) -> (u64, SharedFetch<V>)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<V>> + Send + 'static,
    {
        let id = self.next_fetch_id.fetch_add(1, Ordering::Relaxed);
        let entries = Arc::clone(&self.entries);
        let policy = self.policy.clone();
        let name = self.name;

        tracing::debug!("{} cache: fetching {:?}", name, key);
        let task = tokio::spawn(async move {
            if !policy.debounce.is_zero() {
                sleep(policy.debounce).await;
            }
            let result = AssertUnwindSafe(fetch_with_backoff(
                &fetcher,
                policy.rate_limit_retries,
                name,
            ))
            .catch_unwind()
            .await
            .unwrap_or_else(|payload| {
                Err(AppError::Internal(format!(
                    "{} fetch panicked: {}",
                    name,
                    panic_message(&*payload)
                )))
            });

            let mut entries = entries.lock().await;
            let remove = match entries.get_mut(&key) {
                Some(entry) => {
                    if entry.in_flight.as_ref().map(|f| f.id) == Some(id) {
                        entry.in_flight = None;
                    }
                    let storable = id >= entry.min_storable_id;
                    match &result {
                        Ok(payload) if storable => {
                            entry.cached = Some((payload.clone(), Instant::now()));
                            entry.ttl = ttl;
                            false
                        }
                        Ok(_) => false,
                        Err(err) => {
                            tracing::warn!("{} cache: fetch for {:?} failed: {}", name, key, err);
                            if storable {
                                entry.cached = None;
                            }
                            entry.in_flight.is_none() && entry.cached.is_none()
                        }
                    }
                }
                None => false,
            };
            if remove {
                entries.remove(&key);
            }
            result
        });

        let fetch = async move {
            match task.await {
                Ok(result) => result,
                Err(e) => Err(AppError::Internal(format!("cache fetch task failed: {}", e))),
            }
        }
        .boxed()
        .shared();

        (id, fetch)
    }

    /// Re-fetches `keys` in batches of `batch_size`, each batch concurrently,
    /// pausing `batch_cooldown` between batches.
    pub async fn refresh_all<F, Fut>(&self, keys: Vec<K>, fetcher: F, ttl: Duration) -> RefreshReport
    where
        F: Fn(K) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<V>> + Send + 'static,
    {
        let fetcher = Arc::new(fetcher);
        let mut report = RefreshReport::default();

        for (index, batch) in keys.chunks(self.policy.batch_size.max(1)).enumerate() {
            if index > 0 && !self.policy.batch_cooldown.is_zero() {
                sleep(self.policy.batch_cooldown).await;
            }
            report.batches += 1;

            let results = join_all(batch.iter().cloned().map(|key| {
                let fetcher = Arc::clone(&fetcher);
                let fetch_key = key.clone();
                self.get_inner(key, move || (*fetcher)(fetch_key.clone()), ttl, true)
            }))
            .await;

            for result in results {
                match result {
                    Ok(_) => report.succeeded += 1,
                    Err(_) => report.failed += 1,
                }
            }
        }

        tracing::debug!(
            "{} cache: refreshed {} key(s) in {} batch(es), {} failed",
            self.name,
            report.succeeded + report.failed,
            report.batches,
            report.failed
        );
        report
    }

    /// The next `get` for `key` ignores any cached payload.
    /// Fetches already in flight still resolve for their waiters, but a
    /// later `get` starts a new one.
    pub async fn invalidate(&self, key: &K) {
        let mut entries = self.entries.lock().await;
        let barrier = self.next_fetch_id.load(Ordering::Relaxed);
        if let Some(entry) = entries.get_mut(key) {
            entry.cached = None;
            entry.min_storable_id = barrier;
        }
    }

    pub async fn invalidate_all(&self) {
        let mut entries = self.entries.lock().await;
        let barrier = self.next_fetch_id.load(Ordering::Relaxed);
        for entry in entries.values_mut() {
            entry.cached = None;
            entry.min_storable_id = barrier;
        }
    }

    pub async fn is_cached(&self, key: &K) -> bool {
        let entries = self.entries.lock().await;
        entries
            .get(key)
            .and_then(|entry| entry.cached.as_ref().map(|(_, at)| at.elapsed() < entry.ttl))
            .unwrap_or(false)
    }
}

/// Typed caches for every ledger read path.
pub struct LedgerCache {
    ledger: Arc<dyn GameLedger>,
    snapshots: RequestCache<u64, Arc<GameSnapshot>>,
    tiles: RequestCache<u64, Arc<Vec<PlacedTile>>>,
    players: RequestCache<(u64, String), Arc<PlayerInfo>>,
    state_ttl: Duration,
    preview_ttl: Duration,
}

impl LedgerCache {
    pub fn new(
        ledger: Arc<dyn GameLedger>,
        policy: CachePolicy,
        state_ttl: Duration,
        preview_ttl: Duration,
    ) -> Self {
        Self {
            ledger,
            snapshots: RequestCache::new("game_state", policy.clone()),
            tiles: RequestCache::new("placed_tiles", policy.clone()),
            players: RequestCache::new("player_info", policy),
            state_ttl,
            preview_ttl,
        }
    }

    pub fn from_config(ledger: Arc<dyn GameLedger>, config: &Config) -> Self {
        Self::new(
            ledger,
            CachePolicy::from_config(config),
            config.state_cache_ttl(),
            config.preview_cache_ttl(),
        )
    }

    pub async fn game_state(&self, game_id: u64) -> Result<Arc<GameSnapshot>> {
        let ledger = Arc::clone(&self.ledger);
        self.snapshots
            .get(
                game_id,
                move || {
                    let ledger = Arc::clone(&ledger);
                    async move { ledger.get_game_state(game_id).await.map(Arc::new) }
                },
                self.state_ttl,
            )
            .await
    }

    /// Snapshot for lobby/board previews; tolerates much older data.
    pub async fn preview(&self, game_id: u64) -> Result<Arc<GameSnapshot>> {
        let ledger = Arc::clone(&self.ledger);
        self.snapshots
            .get(
                game_id,
                move || {
                    let ledger = Arc::clone(&ledger);
                    async move { ledger.get_game_state(game_id).await.map(Arc::new) }
                },
                self.preview_ttl,
            )
            .await
    }

    pub async fn refresh_previews(&self, game_ids: Vec<u64>) -> RefreshReport {
        let ledger = Arc::clone(&self.ledger);
        self.snapshots
            .refresh_all(
                game_ids,
                move |game_id| {
                    let ledger = Arc::clone(&ledger);
                    async move { ledger.get_game_state(game_id).await.map(Arc::new) }
                },
                self.preview_ttl,
            )
            .await
    }

    pub async fn placed_tiles(&self, game_id: u64) -> Result<Arc<Vec<PlacedTile>>> {
        let ledger = Arc::clone(&self.ledger);
        self.tiles
            .get(
                game_id,
                move || {
                    let ledger = Arc::clone(&ledger);
                    async move { ledger.get_placed_tiles(game_id).await.map(Arc::new) }
                },
                self.state_ttl,
            )
            .await
    }

    pub async fn player_info(&self, game_id: u64, address: &str) -> Result<Arc<PlayerInfo>> {
        let ledger = Arc::clone(&self.ledger);
        let owned = address.to_string();
        self.players
            .get(
                (game_id, address.to_string()),
                move || {
                    let ledger = Arc::clone(&ledger);
                    let address = owned.clone();
                    async move {
                        ledger
                            .get_player_info(game_id, &address)
                            .await
                            .map(Arc::new)
                    }
                },
                self.state_ttl,
            )
            .await
    }

    pub async fn invalidate_game(&self, game_id: u64, address: &str) {
        self.snapshots.invalidate(&game_id).await;
        self.tiles.invalidate(&game_id).await;
        self.players
            .invalidate(&(game_id, address.to_string()))
            .await;
    }

    pub async fn invalidate_all(&self) {
        self.snapshots.invalidate_all().await;
        self.tiles.invalidate_all().await;
        self.players.invalidate_all().await;
    }
}
