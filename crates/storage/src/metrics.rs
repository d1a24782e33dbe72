//! Engine operation counters.
//!
//! All counters are independent, monotonically increasing `AtomicU64`s
//! updated with `Ordering::Relaxed`. A [`MetricsSnapshot`] reads them one by
//! one, so counters may be slightly inconsistent relative to each other; that
//! is acceptable for telemetry.
//!
//! # Usage
//!
//! ```
//! use fleetsim_storage::metrics::EngineMetrics;
//!
//! let metrics = EngineMetrics::new();
//! metrics.record_lock_acquired();
//! metrics.record_lock_contended();
//!
//! let snapshot = metrics.snapshot();
//! assert_eq!(snapshot.lock_attempts(), 2);
//! ```

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

#[derive(Debug, Default)]
struct Counters {
    gets: AtomicU64,
    creates: AtomicU64,
    upserts: AtomicU64,
    deletes: AtomicU64,
    scans: AtomicU64,
    not_found: AtomicU64,
    conflicts: AtomicU64,
    backend_errors: AtomicU64,
    locks_acquired: AtomicU64,
    locks_contended: AtomicU64,
    locks_failed: AtomicU64,
    unlocks: AtomicU64,
    unlocks_refused: AtomicU64,
    expired_purged: AtomicU64,
    cleanup_failures: AtomicU64,
}

/// Shared, cheaply cloneable engine counters.
#[derive(Debug, Clone, Default)]
pub struct EngineMetrics {
    counters: Arc<Counters>,
}

/// Point-in-time copy of [`EngineMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Point reads (`get`, `exists`, and the reads inside lock/unlock).
    pub gets: u64,
    /// Successful creates.
    pub creates: u64,
    /// Successful upserts.
    pub upserts: u64,
    /// Deletes issued (including expiration cleanup).
    pub deletes: u64,
    /// Full collection scans.
    pub scans: u64,
    /// Reads that resolved to not-found (absent or expired).
    pub not_found: u64,
    /// Writes rejected for id collision or stale token.
    pub conflicts: u64,
    /// Backend failures other than not-found and conflict.
    pub backend_errors: u64,
    /// Lock attempts that won.
    pub locks_acquired: u64,
    /// Lock attempts refused because another owner held the lock.
    pub locks_contended: u64,
    /// Lock attempts that lost a write race or hit a backend error.
    pub locks_failed: u64,
    /// Successful unlocks.
    pub unlocks: u64,
    /// Unlock attempts that returned `false`.
    pub unlocks_refused: u64,
    /// Expired records physically deleted on discovery.
    pub expired_purged: u64,
    /// Expiration cleanups that failed and were swallowed.
    pub cleanup_failures: u64,
}

impl MetricsSnapshot {
    /// Total lock attempts, whatever their outcome.
    #[must_use]
    pub fn lock_attempts(&self) -> u64 {
        self.locks_acquired + self.locks_contended + self.locks_failed
    }
}

macro_rules! recorder {
    ($($(#[$meta:meta])* $fn_name:ident => $field:ident),* $(,)?) => {
        $(
            $(#[$meta])*
            pub fn $fn_name(&self) {
                self.counters.$field.fetch_add(1, Ordering::Relaxed);
            }
        )*
    };
}

impl EngineMetrics {
    /// Creates a zeroed set of counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    recorder! {
        /// Counts a point read.
        record_get => gets,
        /// Counts a successful create.
        record_create => creates,
        /// Counts a successful upsert.
        record_upsert => upserts,
        /// Counts a delete.
        record_delete => deletes,
        /// Counts a collection scan.
        record_scan => scans,
        /// Counts a not-found outcome.
        record_not_found => not_found,
        /// Counts a conflict.
        record_conflict => conflicts,
        /// Counts a backend failure.
        record_backend_error => backend_errors,
        /// Counts a won lock.
        record_lock_acquired => locks_acquired,
        /// Counts a lock refused because another owner holds it.
        record_lock_contended => locks_contended,
        /// Counts a lock lost to a race or backend error.
        record_lock_failed => locks_failed,
        /// Counts a successful unlock.
        record_unlock => unlocks,
        /// Counts an unlock that returned `false`.
        record_unlock_refused => unlocks_refused,
        /// Counts an expired record deleted on discovery.
        record_expired_purged => expired_purged,
        /// Counts a swallowed cleanup failure.
        record_cleanup_failure => cleanup_failures,
    }

    /// Reads every counter.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        let c = &self.counters;
        MetricsSnapshot {
            gets: c.gets.load(Ordering::Relaxed),
            creates: c.creates.load(Ordering::Relaxed),
            upserts: c.upserts.load(Ordering::Relaxed),
            deletes: c.deletes.load(Ordering::Relaxed),
            scans: c.scans.load(Ordering::Relaxed),
            not_found: c.not_found.load(Ordering::Relaxed),
            conflicts: c.conflicts.load(Ordering::Relaxed),
            backend_errors: c.backend_errors.load(Ordering::Relaxed),
            locks_acquired: c.locks_acquired.load(Ordering::Relaxed),
            locks_contended: c.locks_contended.load(Ordering::Relaxed),
            locks_failed: c.locks_failed.load(Ordering::Relaxed),
            unlocks: c.unlocks.load(Ordering::Relaxed),
            unlocks_refused: c.unlocks_refused.load(Ordering::Relaxed),
            expired_purged: c.expired_purged.load(Ordering::Relaxed),
            cleanup_failures: c.cleanup_failures.load(Ordering::Relaxed),
        }
    }
}
