//! Refresh coordination
//!
//! At most one render → upload → reload cycle runs at a time. A request
//! that finds the slot taken never waits: under [`RefreshPolicy::Drop`] it
//! is discarded, under [`RefreshPolicy::FollowUp`] it leaves a flag that
//! the slot holder consumes before releasing.

use crate::config::RefreshPolicy;
use crate::error::SyncError;
use crate::registry::InstanceRegistry;
use crate::render::render;
use crate::sync::{PushReport, RemoteSynchronizer};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

/// What a mutation or refresh request led to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// A cycle ran on this caller and the document was pushed
    Applied(PushReport),
    /// Another cycle held the slot; this request was dropped
    Skipped,
    /// Another cycle held the slot and will run once more for this request
    Deferred,
    /// The registry did not change, so no cycle was attempted
    Unchanged,
}

impl RefreshOutcome {
    /// Whether this caller pushed a document
    #[inline]
    #[must_use]
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied(_))
    }

    /// Push report, when a cycle ran
    #[inline]
    #[must_use]
    pub fn report(&self) -> Option<&PushReport> {
        match self {
            Self::Applied(report) => Some(report),
            _ => None,
        }
    }
}

/// Refresh counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshStats {
    /// Refresh requests received
    pub attempted: u64,
    /// Cycles that completed
    pub applied: u64,
    /// Requests dropped on contention
    pub skipped: u64,
    /// Requests handed to the running cycle
    pub deferred: u64,
    /// Cycles that ended with an error
    pub failed: u64,
}

#[derive(Debug, Default)]
struct Counters {
    attempted: AtomicU64,
    applied: AtomicU64,
    skipped: AtomicU64,
    deferred: AtomicU64,
    failed: AtomicU64,
}

/// Serializes refresh cycles over a shared registry
#[derive(Debug)]
pub struct RefreshCoordinator {
    registry: Arc<InstanceRegistry>,
    synchronizer: RemoteSynchronizer,
    policy: RefreshPolicy,
    /// Refresh slot; held for a whole cycle
    slot: Mutex<()>,
    /// Set while a slot holder is inside its cycles; read by status queries
    in_cycle: AtomicBool,
    pending: AtomicBool,
    counters: Counters,
}

impl RefreshCoordinator {
    /// Create a coordinator
    #[must_use]
    pub fn new(
        registry: Arc<InstanceRegistry>,
        synchronizer: RemoteSynchronizer,
        policy: RefreshPolicy,
    ) -> Self {
        Self {
            registry,
            synchronizer,
            policy,
            slot: Mutex::new(()),
            in_cycle: AtomicBool::new(false),
            pending: AtomicBool::new(false),
            counters: Counters::default(),
        }
    }

    /// Whether a cycle is running
    #[inline]
    #[must_use]
    pub fn is_refreshing(&self) -> bool {
        self.in_cycle.load(Ordering::SeqCst)
    }

    /// Snapshot of the counters
    #[must_use]
    pub fn stats(&self) -> RefreshStats {
        RefreshStats {
            attempted: self.counters.attempted.load(Ordering::Relaxed),
            applied: self.counters.applied.load(Ordering::Relaxed),
            skipped: self.counters.skipped.load(Ordering::Relaxed),
            deferred: self.counters.deferred.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
        }
    }

    /// Try to run a cycle now
    ///
    /// # Errors
    /// Transport failures from the cycle run by this caller. The slot is
    /// free again when this returns.
    pub async fn refresh(&self) -> Result<RefreshOutcome, SyncError> {
        self.counters.attempted.fetch_add(1, Ordering::Relaxed);
        match self.policy {
            RefreshPolicy::Drop => self.refresh_or_drop().await,
            RefreshPolicy::FollowUp => self.refresh_or_defer().await,
        }
    }

    async fn refresh_or_drop(&self) -> Result<RefreshOutcome, SyncError> {
        let Ok(_slot) = self.slot.try_lock() else {
            self.counters.skipped.fetch_add(1, Ordering::Relaxed);
            tracing::warn!("configuration refresh already in progress, skipping");
            return Ok(RefreshOutcome::Skipped);
        };
        let _cycle = CycleFlag::raise(&self.in_cycle);
        self.run_cycle().await.map(RefreshOutcome::Applied)
    }

    /// Run cycles until no request is pending
    ///
    /// A failed cycle does not end the loop while a contender is waiting on
    /// it. The caller gets the result of the last cycle it ran, since that
    /// cycle rendered every change made before it started.
    async fn refresh_or_defer(&self) -> Result<RefreshOutcome, SyncError> {
        // Set before trying the slot so a holder that is about to finish sees it
        self.pending.store(true, Ordering::SeqCst);

        let mut last = None;
        loop {
            let Ok(slot) = self.slot.try_lock() else {
                if last.is_some() {
                    // The new holder owns the flag now
                    break;
                }
                self.counters.deferred.fetch_add(1, Ordering::Relaxed);
                tracing::warn!("configuration refresh already in progress, deferring to it");
                return Ok(RefreshOutcome::Deferred);
            };

            let cycle = CycleFlag::raise(&self.in_cycle);
            while self.pending.swap(false, Ordering::SeqCst) {
                if last.is_some() {
                    tracing::info!("running follow-up configuration refresh");
                }
                last = Some(self.run_cycle().await);
            }
            drop(cycle);
            drop(slot);

            if !self.pending.load(Ordering::SeqCst) {
                break;
            }
        }

        match last {
            Some(result) => result.map(RefreshOutcome::Applied),
            // A holder that took the flag before us already rendered our change
            None => Ok(RefreshOutcome::Deferred),
        }
    }

    async fn run_cycle(&self) -> Result<PushReport, SyncError> {
        let instances = self.registry.snapshot();
        let config = render(&instances);
        tracing::debug!(instances = instances.len(), config = %config, "rendered configuration");

        match self.synchronizer.push(&config).await {
            Ok(report) => {
                self.counters.applied.fetch_add(1, Ordering::Relaxed);
                tracing::info!(
                    instances = report.instance_count,
                    exit_status = report.exit_status,
                    elapsed_ms = u64::try_from(report.elapsed.as_millis()).unwrap_or(u64::MAX),
                    "configuration refresh complete"
                );
                Ok(report)
            }
            Err(err) => {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                tracing::error!(error = %err, "configuration refresh failed");
                Err(err)
            }
        }
    }
}

/// Keeps `in_cycle` set for its lifetime, including when the cycle future
/// is dropped mid-flight
struct CycleFlag<'a>(&'a AtomicBool);

impl<'a> CycleFlag<'a> {
    fn raise(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::SeqCst);
        Self(flag)
    }
}

impl Drop for CycleFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}
