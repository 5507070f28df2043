//! Refresh cycle coordination and scheduling.
//!
//! `RefreshCoordinator` owns everything one fetch→merge→write cycle needs
//! (site source, store, settings) and is shared by `Arc` between the
//! background scheduler and the request-serving layer. Cycles are
//! serialized by an internal mutex so the timer and a cold-start request
//! never fetch at the same time.
//!
//! `RefreshScheduler` runs cycles on a dedicated thread: once at start,
//! then every interval, until its handle is shut down. Shutdown waits for an
//! in-flight cycle to finish; the store's temp-file-and-rename write means
//! an abandoned cycle (process exit) cannot leave a torn snapshot either.

use std::io;
use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::ingest::{SiteSource, fetch_all};
use crate::logging::{self, DataSource};
use crate::merge::merge_site_results;
use crate::model::{
    CycleError, CyclePhase, CycleSummary, DateRange, RefreshStatus, ServiceError,
};
use crate::store::SnapshotStore;

/// Interval between scheduled refreshes unless configured otherwise.
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(15 * 60);

/// What a cycle fetches.
#[derive(Debug, Clone, PartialEq)]
pub struct RefreshSettings {
    pub site_codes: Vec<String>,
    pub parameter_codes: Vec<String>,
    pub lookback: chrono::Duration,
    pub max_concurrent_fetches: usize,
}

// ---------------------------------------------------------------------------
// Coordinator
// ---------------------------------------------------------------------------

pub struct RefreshCoordinator {
    store: SnapshotStore,
    source: Box<dyn SiteSource>,
    settings: RefreshSettings,
    cycle: Mutex<()>,
    phase: Mutex<CyclePhase>,
}

impl RefreshCoordinator {
    pub fn new(
        store: SnapshotStore,
        source: Box<dyn SiteSource>,
        settings: RefreshSettings,
    ) -> Self {
        Self {
            store,
            source,
            settings,
            cycle: Mutex::new(()),
            phase: Mutex::new(CyclePhase::Idle),
        }
    }

    pub fn store(&self) -> &SnapshotStore {
        &self.store
    }

    pub fn phase(&self) -> CyclePhase {
        *self.phase.lock()
    }

    pub fn status(&self) -> RefreshStatus {
        self.store.status()
    }

    /// Run one full cycle now. Failures are recorded in the status and
    /// returned for the caller's information; nothing else needs handling.
    pub fn run_cycle(&self) -> Result<CycleSummary, CycleError> {
        self.run_cycle_at(Utc::now())
    }

    /// As `run_cycle`, with the cycle's notion of "now" injected.
    pub fn run_cycle_at(&self, now: DateTime<Utc>) -> Result<CycleSummary, CycleError> {
        let _cycle = self.cycle.lock();
        self.cycle_locked(now)
    }

    /// Make sure a snapshot exists, running a cycle synchronously if none
    /// has been written yet.
    pub fn ensure_available(&self) -> Result<(), ServiceError> {
        if self.store.exists() {
            return Ok(());
        }

        let _cycle = self.cycle.lock();
        // Another caller may have produced it while we waited.
        if self.store.exists() {
            return Ok(());
        }

        logging::info(DataSource::Scheduler, None, "no snapshot on disk, refreshing on demand");
        self.cycle_locked(Utc::now())
            .map(|_| ())
            .map_err(|e| ServiceError::NotAvailable(e.to_string()))
    }

    /// Snapshot bytes and status for the query façade.
    pub fn get_snapshot(&self) -> Result<(Vec<u8>, RefreshStatus), ServiceError> {
        self.ensure_available()?;
        self.store.read()
    }

    fn set_phase(&self, phase: CyclePhase) {
        *self.phase.lock() = phase;
    }

    fn cycle_locked(&self, now: DateTime<Utc>) -> Result<CycleSummary, CycleError> {
        let window = DateRange::lookback(now, self.settings.lookback);

        self.set_phase(CyclePhase::Fetching);
        let results = fetch_all(
            self.source.as_ref(),
            &self.settings.site_codes,
            &self.settings.parameter_codes,
            &window,
            self.settings.max_concurrent_fetches,
        );

        self.set_phase(CyclePhase::Merging);
        let report = merge_site_results(&results, &window);
        let summary = report.summary;
        if report.unparsable_rows > 0 {
            logging::warn(
                DataSource::Scheduler,
                None,
                &format!("dropped {} rows with unparsable timestamps", report.unparsable_rows),
            );
        }
        logging::log_cycle_summary(&summary);

        let outcome = report.into_snapshot().and_then(|snapshot| {
            self.set_phase(CyclePhase::Writing);
            self.store.write(&snapshot, summary, now)
        });

        match outcome {
            Ok(()) => {
                self.set_phase(CyclePhase::Idle);
                logging::info(
                    DataSource::Scheduler,
                    None,
                    &format!("snapshot refreshed with {} readings", summary.rows),
                );
                Ok(summary)
            }
            Err(err) => {
                self.set_phase(CyclePhase::Failed);
                self.store.record_failure(&err, summary, now);
                logging::error(
                    DataSource::Scheduler,
                    None,
                    &format!("refresh failed, keeping previous snapshot: {}", err),
                );
                self.set_phase(CyclePhase::Idle);
                Err(err)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

pub struct RefreshScheduler;

impl RefreshScheduler {
    /// Start the refresh thread. The first cycle runs immediately.
    pub fn spawn(
        coordinator: Arc<RefreshCoordinator>,
        interval: Duration,
    ) -> io::Result<SchedulerHandle> {
        let (stop_tx, stop_rx) = mpsc::channel::<()>();

        let thread = thread::Builder::new()
            .name("watergrid-refresh".to_string())
            .spawn(move || {
                logging::info(
                    DataSource::Scheduler,
                    None,
                    &format!("refreshing every {} s", interval.as_secs()),
                );
                loop {
                    // Errors are already recorded in the status.
                    let _ = coordinator.run_cycle();

                    match stop_rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => continue,
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                logging::info(DataSource::Scheduler, None, "refresh thread stopped");
            })?;

        Ok(SchedulerHandle {
            stop_tx: Some(stop_tx),
            thread: Some(thread),
        })
    }
}

/// Owner of the running scheduler thread.
#[derive(Debug)]
pub struct SchedulerHandle {
    stop_tx: Option<mpsc::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl SchedulerHandle {
    /// Stop scheduling new cycles and wait for the thread to exit.
    pub fn shutdown(mut self) {
        self.stop_and_join();
    }

    fn stop_and_join(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                logging::error(DataSource::Scheduler, None, "refresh thread panicked");
            }
        }
    }
}

impl Drop for SchedulerHandle {
    fn drop(&mut self) {
        self.stop_and_join();
    }
}
