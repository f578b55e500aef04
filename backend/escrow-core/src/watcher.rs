//! Chain → local reconciliation of the `resolved` milestone flag.
//!
//! The escrow contract is the source of truth for resolution.  The watcher
//! pulls the per-milestone flags, merges them into the local document (a
//! one-directional, monotonic merge of the single watcher-owned field), and
//! writes back only when something actually changed.  `status` and
//! `flags.approved` stay local-owned and are never touched here.
//!
//! A single-slot staleness stamp skips repeat checks of the same escrow
//! within the window; a failed chain read does not stamp, so the next
//! eligible call retries instead of being suppressed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::balance::BalanceCache;
use crate::config::Config;
use crate::document::{self, MergeOutcome};
use crate::errors::Result;
use crate::model::Milestone;
use crate::ports::{EscrowClient, PersistenceGateway};

/// Payout coordinates the watcher needs.
#[derive(Debug, Clone)]
pub struct PayoutRef {
    pub payout_id: String,
    /// Address of the backing escrow contract, if one was deployed.
    pub escrow_id: Option<String>,
}

/// Outcome of a resolution check.
#[derive(Debug, Clone)]
pub struct ResolutionCheck {
    pub milestones: Vec<Milestone>,
    /// Indices whose resolved flag flipped on this pass (empty for a
    /// no-op or no-change check).
    pub changed: Vec<usize>,
}

#[derive(Debug, Clone)]
struct CheckStamp {
    escrow_id: String,
    checked_at: Instant,
}

pub struct ResolutionWatcher {
    enabled: bool,
    stale_after: Duration,
    last: Mutex<Option<CheckStamp>>,
    checking: AtomicBool,
}

impl ResolutionWatcher {
    pub fn new(enabled: bool, stale_after: Duration) -> Self {
        ResolutionWatcher {
            enabled,
            stale_after,
            last: Mutex::new(None),
            checking: AtomicBool::new(false),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.watcher_enabled,
            Duration::from_millis(config.stale_ms),
        )
    }

    /// Compare on-chain milestone flags against the local document and
    /// persist the merged result when anything changed.
    ///
    /// Returns the changed indices so callers can react (toast, re-render).
    /// A successful read stamps the escrow as checked whether or not
    /// anything changed; after a persisted change the balance cache entry
    /// for this escrow is force-refreshed, since resolution usually moves
    /// funds.
    #[allow(clippy::too_many_arguments)]
    pub async fn check_resolution(
        &self,
        client: &dyn EscrowClient,
        store: &dyn PersistenceGateway,
        cache: &BalanceCache,
        signer: &str,
        payout: &PayoutRef,
        milestones: &[Milestone],
        force: bool,
    ) -> Result<ResolutionCheck> {
        let noop = || ResolutionCheck {
            milestones: milestones.to_vec(),
            changed: Vec::new(),
        };

        let escrow_id = match payout.escrow_id.as_deref().filter(|id| !id.is_empty()) {
            Some(id) if self.enabled => id,
            _ => return Ok(noop()),
        };

        if !force && self.recently_checked(escrow_id).await {
            return Ok(noop());
        }

        // At most one check in flight per watcher; a concurrent caller
        // skips rather than duplicating the contract read.
        if self.checking.swap(true, Ordering::SeqCst) {
            return Ok(noop());
        }
        let result = self
            .check_inner(client, store, cache, signer, payout, milestones, escrow_id)
            .await;
        self.checking.store(false, Ordering::SeqCst);
        result
    }

    #[allow(clippy::too_many_arguments)]
    async fn check_inner(
        &self,
        client: &dyn EscrowClient,
        store: &dyn PersistenceGateway,
        cache: &BalanceCache,
        signer: &str,
        payout: &PayoutRef,
        milestones: &[Milestone],
        escrow_id: &str,
    ) -> Result<ResolutionCheck> {
        // A read failure propagates before the stamp is written, so the
        // next eligible call retries.
        let sets = client
            .get_milestone_flags(&[escrow_id.to_string()])
            .await?;
        let chain_flags: Vec<bool> = sets
            .first()
            .map(|s| s.milestones.iter().map(|m| m.flags.resolved).collect())
            .unwrap_or_default();

        self.stamp(escrow_id).await;

        let MergeOutcome {
            milestones: merged,
            changed,
        } = document::merge_resolved_flags(milestones, &chain_flags);

        if changed.is_empty() {
            debug!("Resolution check for escrow {escrow_id}: no changes");
            return Ok(ResolutionCheck {
                milestones: merged,
                changed,
            });
        }

        info!(
            "Escrow {escrow_id}: {} milestone(s) newly resolved",
            changed.len()
        );
        let doc = serde_json::to_value(&merged)?;
        store.replace_milestones(&payout.payout_id, doc).await?;

        // Resolution moves funds out of escrow; refresh the balance eagerly.
        cache
            .fetch(client, signer, &[escrow_id.to_string()], true)
            .await?;

        Ok(ResolutionCheck {
            milestones: merged,
            changed,
        })
    }

    async fn recently_checked(&self, escrow_id: &str) -> bool {
        match self.last.lock().await.as_ref() {
            Some(stamp) => {
                stamp.escrow_id == escrow_id
                    && Instant::now().duration_since(stamp.checked_at) <= self.stale_after
            }
            None => false,
        }
    }

    async fn stamp(&self, escrow_id: &str) {
        *self.last.lock().await = Some(CheckStamp {
            escrow_id: escrow_id.to_string(),
            checked_at: Instant::now(),
        });
    }
}
