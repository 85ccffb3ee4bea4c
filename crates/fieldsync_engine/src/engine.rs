//! Sync pass state machine and orchestration.

use crate::connectivity::ConnectivityMonitor;
use crate::transport::RecordTransport;
use fieldsync_store::{OutboxStore, RecordKind};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Where the engine currently is inside a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassState {
    /// No pass is running.
    Idle,
    /// Unsynced records are being submitted.
    Draining,
    /// Synced records are being removed.
    Pruning,
}

/// How a requested pass ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The pass drained and pruned.
    Completed,
    /// The host was offline; nothing ran.
    Offline,
    /// Another pass was already running; nothing ran.
    AlreadyRunning,
}

/// Result of one sync pass.
///
/// A pass never fails as a whole: a report is always produced, and
/// per-record failures show up only as counts and a log trail.
#[derive(Debug, Clone)]
pub struct SyncReport {
    /// How the pass ended.
    pub outcome: SyncOutcome,
    /// Unsynced records a submission was attempted for.
    pub attempted: usize,
    /// Records confirmed and marked synced this pass.
    pub submitted: usize,
    /// Records left unsynced for a future pass.
    pub failed: usize,
    /// Records removed during the pruning phase.
    pub pruned: usize,
    /// The last failure observed during the pass, if any.
    pub last_error: Option<String>,
}

impl SyncReport {
    fn skipped(outcome: SyncOutcome) -> Self {
        Self {
            outcome,
            attempted: 0,
            submitted: 0,
            failed: 0,
            pruned: 0,
            last_error: None,
        }
    }
}

/// Cumulative statistics across passes.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Completed passes (skipped passes do not count).
    pub passes_completed: u64,
    /// Total records confirmed across all passes.
    pub records_submitted: u64,
    /// Total submission or store failures across all passes.
    pub records_failed: u64,
    /// Total records pruned across all passes.
    pub records_pruned: u64,
    /// When the last completed pass finished.
    pub last_pass_at: Option<Instant>,
    /// Last failure observed, if any.
    pub last_error: Option<String>,
}

/// Drains the outbox to the remote authority and prunes what landed.
///
/// The engine is an explicit object the application shell constructs and
/// owns - there is no process-wide singleton. [`start`](Self::start)
/// wires the one automatic trigger (the online transition);
/// [`trigger_sync`](Self::trigger_sync) is the manual one. Both are
/// fire-and-forget: no error from a pass ever reaches the caller.
///
/// Within a kind, records are submitted strictly sequentially in store
/// order, because a later event semantically depends on earlier ones
/// having been recorded by the remote authority. Ordering across kinds
/// is not guaranteed relative to each other.
pub struct SyncEngine<T: RecordTransport> {
    store: Arc<OutboxStore>,
    transport: T,
    monitor: Arc<ConnectivityMonitor>,
    state: RwLock<PassState>,
    stats: RwLock<SyncStats>,
    pass_guard: Mutex<()>,
}

impl<T: RecordTransport> SyncEngine<T> {
    /// Creates an engine over the given store, transport and monitor.
    pub fn new(store: Arc<OutboxStore>, transport: T, monitor: Arc<ConnectivityMonitor>) -> Self {
        Self {
            store,
            transport,
            monitor,
            state: RwLock::new(PassState::Idle),
            stats: RwLock::new(SyncStats::default()),
            pass_guard: Mutex::new(()),
        }
    }

    /// Registers the engine's online observer on the monitor.
    ///
    /// This is the sole automatic trigger for synchronization - no
    /// periodic polling, no retry timers. The observer holds only a weak
    /// handle, so dropping the engine disarms it.
    ///
    /// ```rust,ignore
    /// let engine = Arc::new(SyncEngine::new(store, transport, monitor));
    /// SyncEngine::start(&engine);
    /// ```
    pub fn start(engine: &Arc<Self>)
    where
        T: 'static,
    {
        let weak = Arc::downgrade(engine);
        engine.monitor.on_online(move || {
            if let Some(engine) = weak.upgrade() {
                engine.trigger_sync();
            }
        });
    }

    /// Runs one pass, fire-and-forget.
    pub fn trigger_sync(&self) {
        let report = self.sync_once();
        match report.outcome {
            SyncOutcome::Completed => info!(
                submitted = report.submitted,
                failed = report.failed,
                pruned = report.pruned,
                "sync pass completed"
            ),
            SyncOutcome::Offline => debug!("sync pass skipped: offline"),
            SyncOutcome::AlreadyRunning => debug!("sync pass skipped: already running"),
        }
    }

    /// Runs one drain-then-prune pass and reports what happened.
    ///
    /// The pass is a no-op while offline or while another pass runs. It
    /// cannot be cancelled once started; a slow submission only delays
    /// its own kind's loop, bounded by the transport's timeout.
    pub fn sync_once(&self) -> SyncReport {
        if self.monitor.is_offline() {
            return SyncReport::skipped(SyncOutcome::Offline);
        }

        let Some(_pass) = self.pass_guard.try_lock() else {
            return SyncReport::skipped(SyncOutcome::AlreadyRunning);
        };

        let mut report = SyncReport::skipped(SyncOutcome::Completed);

        *self.state.write() = PassState::Draining;
        for kind in RecordKind::ALL {
            self.drain_kind(kind, &mut report);
        }

        // Pruning runs regardless of how many submissions failed; it
        // removes records marked synced during this or any earlier pass.
        *self.state.write() = PassState::Pruning;
        for kind in RecordKind::ALL {
            match self.store.prune_synced(kind) {
                Ok(pruned) => report.pruned += pruned,
                Err(e) => {
                    warn!(kind = %kind, error = %e, "prune failed, retrying next pass");
                    report.last_error = Some(e.to_string());
                }
            }
        }

        *self.state.write() = PassState::Idle;

        let mut stats = self.stats.write();
        stats.passes_completed += 1;
        stats.records_submitted += report.submitted as u64;
        stats.records_failed += report.failed as u64;
        stats.records_pruned += report.pruned as u64;
        stats.last_pass_at = Some(Instant::now());
        stats.last_error = report.last_error.clone();

        report
    }

    fn drain_kind(&self, kind: RecordKind, report: &mut SyncReport) {
        for record in self.store.list_all(kind) {
            if record.synced {
                continue;
            }
            report.attempted += 1;

            match self
                .transport
                .submit(kind, &record.payload, &record.credential)
            {
                Ok(()) => match self.store.mark_synced(kind, record.id) {
                    Ok(()) => report.submitted += 1,
                    Err(e) => {
                        // The remote accepted but the flag did not commit;
                        // the record stays unsynced and is resubmitted
                        // next pass (at-least-once delivery).
                        warn!(record = %record.id, kind = %kind, error = %e, "mark_synced failed");
                        report.failed += 1;
                        report.last_error = Some(e.to_string());
                    }
                },
                Err(rejection) => {
                    warn!(
                        record = %record.id,
                        kind = %kind,
                        %rejection,
                        "submission rejected, leaving record unsynced"
                    );
                    report.failed += 1;
                    report.last_error = Some(rejection.to_string());
                }
            }
        }
    }

    /// Current position in the pass state machine.
    #[must_use]
    pub fn state(&self) -> PassState {
        *self.state.read()
    }

    /// Cumulative statistics.
    #[must_use]
    pub fn stats(&self) -> SyncStats {
        self.stats.read().clone()
    }

    /// The store this engine drains.
    #[must_use]
    pub fn store(&self) -> &Arc<OutboxStore> {
        &self.store
    }

    /// The transport this engine submits through.
    #[must_use]
    pub fn transport(&self) -> &T {
        &self.transport
    }
}

impl<T: RecordTransport> std::fmt::Debug for SyncEngine<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
