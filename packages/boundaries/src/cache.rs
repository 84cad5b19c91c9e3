//! Keyed single-flight cache with time-based expiry.
//!
//! Concurrent requests for the same key share one in-flight load. The load
//! runs on its own task, and that task records the outcome in the cache
//! itself, so a load completes and fills the cache even when every caller
//! has gone away. A failed load is handed to everyone who joined it and is
//! never cached: the next request starts a new load.
//!
//! Expiry is checked lazily on read. [`SingleFlightCache::spawn_sweeper`]
//! additionally drops expired entries in the background to bound memory.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};

use futures::FutureExt as _;
use futures::future::{BoxFuture, Shared};
use tokio::task::{JoinError, JoinHandle};

type SharedLoad<V, E> = Shared<BoxFuture<'static, Result<V, E>>>;

enum SlotState<V, E> {
    /// A load is running; callers join it.
    Loading(SharedLoad<V, E>),
    /// The load succeeded at `loaded_at`.
    Ready { value: V, loaded_at: Instant },
}

struct Slot<V, E> {
    generation: u64,
    state: SlotState<V, E>,
}

impl<V, E> Slot<V, E> {
    fn is_expired(&self, ttl: Duration) -> bool {
        match &self.state {
            SlotState::Loading(_) => false,
            SlotState::Ready { loaded_at, .. } => loaded_at.elapsed() >= ttl,
        }
    }
}

type SlotMap<K, V, E> = Mutex<HashMap<K, Slot<V, E>>>;

fn lock<K, V, E>(slots: &SlotMap<K, V, E>) -> MutexGuard<'_, HashMap<K, Slot<V, E>>> {
    slots.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Hit and load counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Requests served by an existing entry, including joins of an
    /// in-flight load.
    pub hits: u64,
    /// Requests that started a new load.
    pub loads: u64,
}

/// Single-flight cache keyed by `K`.
///
/// `E` must be cloneable because one failure is delivered to every waiter.
pub struct SingleFlightCache<K, V, E> {
    slots: Arc<SlotMap<K, V, E>>,
    ttl: Duration,
    next_generation: AtomicU64,
    hits: AtomicU64,
    loads: AtomicU64,
}

impl<K, V, E> SingleFlightCache<K, V, E>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + From<JoinError> + 'static,
{
    /// Creates an empty cache whose entries live for `ttl` after loading.
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            slots: Arc::new(Mutex::new(HashMap::new())),
            ttl,
            next_generation: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            loads: AtomicU64::new(0),
        }
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<K, Slot<V, E>>> {
        lock(&self.slots)
    }

    /// Returns the cached value for `key`, or runs `load` to produce it.
    ///
    /// At most one load per key is in flight at a time. `load` is only
    /// called when this request starts a new load, and must be spawnable on
    /// the tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns the load's error, shared with every concurrent waiter.
    pub async fn get_or_load<F, Fut>(&self, key: K, load: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
    {
        let (generation, shared) = {
            let mut slots = self.slots();

            match slots.get(&key) {
                Some(Slot {
                    state: SlotState::Ready { value, loaded_at },
                    ..
                }) if loaded_at.elapsed() < self.ttl => {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    return Ok(value.clone());
                }
                Some(Slot {
                    generation,
                    state: SlotState::Loading(shared),
                }) => {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    (*generation, shared.clone())
                }
                _ => {
                    self.loads.fetch_add(1, Ordering::Relaxed);
                    let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
                    let shared = self.spawn_load(key.clone(), generation, load());

                    slots.insert(
                        key.clone(),
                        Slot {
                            generation,
                            state: SlotState::Loading(shared.clone()),
                        },
                    );
                    (generation, shared)
                }
            }
        };

        let result = shared.await;
        if result.is_err() {
            self.evict_loading(&key, generation);
        }
        result
    }

    /// Runs `pending` on its own task. The task stores a success as a ready
    /// entry and removes the entry on failure, whether or not anyone is
    /// still waiting.
    fn spawn_load(
        &self,
        key: K,
        generation: u64,
        pending: impl Future<Output = Result<V, E>> + Send + 'static,
    ) -> SharedLoad<V, E> {
        let slots = Arc::clone(&self.slots);

        let handle = tokio::spawn(async move {
            let result = pending.await;

            let mut slots = lock(&slots);
            if slots.get(&key).is_some_and(|slot| slot.generation == generation) {
                match &result {
                    Ok(value) => {
                        slots.insert(
                            key,
                            Slot {
                                generation,
                                state: SlotState::Ready {
                                    value: value.clone(),
                                    loaded_at: Instant::now(),
                                },
                            },
                        );
                    }
                    Err(_) => {
                        slots.remove(&key);
                    }
                }
            }
            drop(slots);

            result
        });

        async move { handle.await.map_err(E::from)? }.boxed().shared()
    }

    /// Removes `key` if it still holds the load of `generation`. Covers a
    /// load task that panicked or was cancelled before recording its
    /// outcome.
    fn evict_loading(&self, key: &K, generation: u64) {
        let mut slots = self.slots();
        if slots.get(key).is_some_and(|slot| slot.generation == generation) {
            slots.remove(key);
        }
    }

    /// Drops every expired entry. In-flight loads are kept.
    ///
    /// Returns the number of entries removed.
    pub fn sweep_expired(&self) -> usize {
        let mut slots = self.slots();
        let before = slots.len();
        slots.retain(|_, slot| !slot.is_expired(self.ttl));
        before - slots.len()
    }

    /// Number of entries currently held, including in-flight loads.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots().len()
    }

    /// Returns `true` if the cache holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current hit and load counters.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            loads: self.loads.load(Ordering::Relaxed),
        }
    }

    /// Starts a background task that sweeps expired entries every
    /// `interval`. The task ends once the cache is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let cache: Weak<Self> = Arc::downgrade(self);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let Some(cache) = cache.upgrade() else {
                    break;
                };
                let removed = cache.sweep_expired();
                if removed > 0 {
                    log::debug!("Cache sweep removed {removed} expired entries");
                }
            }
        })
    }
}
