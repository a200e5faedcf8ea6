//! Fixed-window admission control keyed by job id.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::clock::Clock;
use crate::metrics::TRACKED_KEYS;

// Rate limit entry - admission state for one key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitEntry {
    pub count: u32,
    pub window_start: Instant,
}

impl RateLimitEntry {
    fn fresh(now: Instant) -> Self {
        Self {
            count: 1,
            window_start: now,
        }
    }

    fn is_expired(&self, now: Instant, window: Duration) -> bool {
        now.saturating_duration_since(self.window_start) > window
    }
}

/// Outcome of a rate-limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Admit,
    Deny,
}

impl Decision {
    pub fn is_admitted(self) -> bool {
        matches!(self, Decision::Admit)
    }
}

/// Window parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitPolicy {
    pub window: Duration,
    pub max_per_window: u32,
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(60),
            max_per_window: 10,
        }
    }
}

/// Storage for rate-limit entries.
///
/// `update` must hold the key exclusively for the duration of `apply` so
/// that two requests for the same key never observe the same count.
pub trait RateLimitStore: Send + Sync {
    fn update(
        &self,
        key: &str,
        apply: &mut dyn FnMut(Option<RateLimitEntry>) -> RateLimitEntry,
    ) -> RateLimitEntry;

    /// Drops every entry for which `keep` returns false. Returns how many
    /// entries were removed.
    fn retain(&self, keep: &mut dyn FnMut(&RateLimitEntry) -> bool) -> usize;

    fn get(&self, key: &str) -> Option<RateLimitEntry>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// In-memory store sharded by `DashMap`.
#[derive(Debug, Default)]
pub struct DashMapStore {
    entries: DashMap<String, RateLimitEntry>,
}

impl DashMapStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RateLimitStore for DashMapStore {
    fn update(
        &self,
        key: &str,
        apply: &mut dyn FnMut(Option<RateLimitEntry>) -> RateLimitEntry,
    ) -> RateLimitEntry {
        // the shard write lock is held until the entry guard drops
        match self.entries.entry(key.to_owned()) {
            Entry::Occupied(mut slot) => {
                let next = apply(Some(*slot.get()));
                *slot.get_mut() = next;
                next
            }
            Entry::Vacant(slot) => {
                let next = apply(None);
                slot.insert(next);
                next
            }
        }
    }

    fn retain(&self, keep: &mut dyn FnMut(&RateLimitEntry) -> bool) -> usize {
        let mut removed = 0;
        self.entries.retain(|_, entry| {
            let kept = keep(&*entry);
            if !kept {
                removed += 1;
            }
            kept
        });
        removed
    }

    fn get(&self, key: &str) -> Option<RateLimitEntry> {
        self.entries.get(key).map(|entry| *entry)
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Per-key fixed-window counter.
///
/// Denied attempts still count against the window, so a caller that keeps
/// flooding stays denied until a new window opens.
pub struct RateLimiter {
    store: Arc<dyn RateLimitStore>,
    clock: Arc<dyn Clock>,
    policy: RateLimitPolicy,
}

impl RateLimiter {
    pub fn new(
        policy: RateLimitPolicy,
        store: Arc<dyn RateLimitStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            clock,
            policy,
        }
    }

    /// Limiter backed by a fresh in-memory store.
    pub fn in_memory(policy: RateLimitPolicy, clock: Arc<dyn Clock>) -> Self {
        Self::new(policy, Arc::new(DashMapStore::new()), clock)
    }

    pub fn policy(&self) -> RateLimitPolicy {
        self.policy
    }

    pub fn check(&self, key: &str) -> Decision {
        self.check_at(key, self.clock.now())
    }

    pub fn check_at(&self, key: &str, now: Instant) -> Decision {
        let window = self.policy.window;
        let entry = self.store.update(key, &mut |current: Option<RateLimitEntry>| match current {
            None => RateLimitEntry::fresh(now),
            Some(entry) if entry.is_expired(now, window) => RateLimitEntry::fresh(now),
            Some(entry) => RateLimitEntry {
                count: entry.count.saturating_add(1),
                ..entry
            },
        });

        if entry.count > self.policy.max_per_window {
            Decision::Deny
        } else {
            Decision::Admit
        }
    }

    /// Evicts idle entries. Returns the number removed.
    pub fn sweep(&self) -> usize {
        self.sweep_at(self.clock.now())
    }

    pub fn sweep_at(&self, now: Instant) -> usize {
        if self.store.is_empty() {
            return 0;
        }
        let window = self.policy.window;
        self.store
            .retain(&mut |entry: &RateLimitEntry| !entry.is_expired(now, window))
    }

    pub fn entry(&self, key: &str) -> Option<RateLimitEntry> {
        self.store.get(key)
    }

    pub fn tracked_keys(&self) -> usize {
        self.store.len()
    }
}

/// Runs `sweep` every `period` until `shutdown` is cancelled.
///
/// The first pass happens one full period after the task starts.
pub fn spawn_sweeper(
    limiter: Arc<RateLimiter>,
    period: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(period_secs = period.as_secs(), "rate limit sweeper started");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let evicted = limiter.sweep();
                    let remaining = limiter.tracked_keys();
                    TRACKED_KEYS.set(remaining as i64);
                    debug!(evicted, remaining, "rate limit sweep complete");
                }
            }
        }

        info!("rate limit sweeper stopped");
    })
}
