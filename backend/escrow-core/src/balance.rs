//! Read-through cache for on-chain escrow balances.
//!
//! Balance reads are comparatively expensive and rate-sensitive; the
//! staleness window (30 s by default) amortises repeated UI renders against
//! one underlying call.  `force` and the optimistic [`BalanceCache::update`]
//! are the escape hatches for callers that know the value changed (right
//! after funding) or must have a fresh read (right after a resolution).
//!
//! One instance per application context; construct and inject explicitly so
//! tests get isolated caches.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::debug;

use crate::config::{Config, DEFAULT_STALE_MS};
use crate::errors::Result;
use crate::ports::EscrowClient;

#[derive(Debug, Clone, Copy)]
pub struct BalanceEntry {
    pub balance: f64,
    pub fetched_at: Instant,
}

pub struct BalanceCache {
    entries: RwLock<HashMap<String, BalanceEntry>>,
    stale_after: Duration,
    loading: AtomicBool,
}

impl Default for BalanceCache {
    fn default() -> Self {
        Self::new(Duration::from_millis(DEFAULT_STALE_MS))
    }
}

impl BalanceCache {
    pub fn new(stale_after: Duration) -> Self {
        BalanceCache {
            entries: RwLock::new(HashMap::new()),
            stale_after,
            loading: AtomicBool::new(false),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(Duration::from_millis(config.stale_ms))
    }

    /// Last cached balance for `id`, fresh or not.
    pub async fn get(&self, id: &str) -> Option<f64> {
        self.entries.read().await.get(id).map(|e| e.balance)
    }

    /// Refresh the cached balances for `ids`.
    ///
    /// Only ids that are missing, stale, or explicitly forced reach the
    /// chain, in a single batched call.  Returns the ids actually fetched
    /// (empty when everything was fresh or another fetch cycle was already
    /// in flight).
    pub async fn fetch(
        &self,
        client: &dyn EscrowClient,
        signer: &str,
        ids: &[String],
        force: bool,
    ) -> Result<Vec<String>> {
        // One fetch cycle at a time; an overlapping caller skips instead of
        // stacking redundant chain calls.
        if self.loading.swap(true, Ordering::SeqCst) {
            return Ok(Vec::new());
        }
        let result = self.fetch_inner(client, signer, ids, force).await;
        self.loading.store(false, Ordering::SeqCst);
        result
    }

    async fn fetch_inner(
        &self,
        client: &dyn EscrowClient,
        signer: &str,
        ids: &[String],
        force: bool,
    ) -> Result<Vec<String>> {
        let now = Instant::now();
        let mut missing: Vec<String> = Vec::new();
        {
            let entries = self.entries.read().await;
            for id in ids {
                if id.is_empty() || missing.iter().any(|m| m == id) {
                    continue;
                }
                let needs_fetch = match entries.get(id) {
                    None => true,
                    Some(e) => force || now.duration_since(e.fetched_at) > self.stale_after,
                };
                if needs_fetch {
                    missing.push(id.clone());
                }
            }
        }
        if missing.is_empty() {
            return Ok(missing);
        }

        debug!("Fetching {} escrow balance(s) from chain", missing.len());
        let balances = client.get_balances(signer, &missing).await?;

        let fetched_at = Instant::now();
        let mut entries = self.entries.write().await;
        for b in balances {
            entries.insert(
                b.address,
                BalanceEntry {
                    balance: b.balance,
                    fetched_at,
                },
            );
        }
        Ok(missing)
    }

    /// Optimistic local update (e.g. right after a successful fund or
    /// withdraw).  Stamps the entry fresh so the next staleness pass skips
    /// it.  Missing entries start from zero.
    pub async fn update(&self, id: &str, f: impl FnOnce(f64) -> f64) {
        let mut entries = self.entries.write().await;
        let prev = entries.get(id).map(|e| e.balance).unwrap_or(0.0);
        entries.insert(
            id.to_string(),
            BalanceEntry {
                balance: f(prev),
                fetched_at: Instant::now(),
            },
        );
    }

    /// Literal form of [`BalanceCache::update`].
    pub async fn set(&self, id: &str, balance: f64) {
        self.update(id, |_| balance).await;
    }
}
