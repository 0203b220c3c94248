//! Real-time subframe worker pool
//!
//! A fixed set of [`SubframeWorker`]s cycles through an idle channel. The
//! front end acquires a worker per TTI, fills its sample buffers in place and
//! submits it; processing runs on a rayon thread pool and the report is
//! collected by TTI or in submission order. Reconfiguration quiesces the
//! pool, publishes a new [`PhyState`] snapshot and reopens dispatch.
//!
//! Lock order: the gate and the report board are never held together.

use super::cc_worker::{CarrierResult, ChannelProcessor, ComponentCarrierWorker};
use super::grant::PdschGrant;
use super::ra_dl::RaError;
use super::sf_worker::{SubframeReport, SubframeWorker};
use super::state::{PhyState, PhyStateHandle};
use common::types::Tti;
use crossbeam::channel::{self, Receiver, Sender};
use num_complex::Complex32;
use parking_lot::{Condvar, Mutex};
use std::any::Any;
use std::collections::{HashMap, VecDeque};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, error, info, trace, warn};

/// Worker pool errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    #[error("no idle worker for TTI {tti} within the TTI period")]
    DeadlineExceeded { tti: Tti },

    #[error("report for TTI {tti} not ready")]
    NotReady { tti: Tti },

    #[error("no subframe pending")]
    NothingPending,

    #[error("TTI {0} already in flight")]
    DuplicateTti(Tti),

    #[error("reconfiguration timed out with {in_flight} subframes in flight")]
    QuiesceTimeout { in_flight: usize },

    #[error("TTI {tti}: carrier {cc_idx} not configured")]
    CarrierNotConfigured { tti: Tti, cc_idx: u32 },

    #[error("invalid pool configuration: {0}")]
    InvalidConfiguration(String),
}

/// Worker pool timing and sizing
#[derive(Debug, Clone, PartialEq)]
pub struct PoolConfig {
    /// Number of subframe workers, and of pool threads
    pub nof_workers: usize,
    /// Longest wait for an idle worker when acquiring
    pub tti_period: Duration,
    /// Time from acquisition by which a subframe must complete
    pub processing_deadline: Duration,
    /// Processing time allowed per carrier
    pub carrier_budget: Duration,
    /// Longest wait for in-flight subframes when reconfiguring
    pub quiesce_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            nof_workers: 4,
            tti_period: Duration::from_millis(1),
            processing_deadline: Duration::from_millis(3),
            carrier_budget: Duration::from_millis(2),
            quiesce_timeout: Duration::from_millis(100),
        }
    }
}

impl PoolConfig {
    pub fn validate(&self) -> Result<(), PoolError> {
        if self.nof_workers == 0 {
            return Err(PoolError::InvalidConfiguration(
                "at least one worker required".to_string(),
            ));
        }
        if self.tti_period.is_zero() || self.processing_deadline.is_zero() {
            return Err(PoolError::InvalidConfiguration(
                "TTI period and processing deadline must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Pool counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub submitted: u64,
    pub completed: u64,
    /// TTIs rejected for lack of an idle worker
    pub dropped: u64,
    pub late_reports: u64,
    pub not_ready: u64,
    pub carrier_timing_violations: u64,
    pub unusable_grants: u64,
    pub crc_ok: u64,
    pub crc_failed: u64,
    /// Subframes currently bound or running
    pub in_flight: usize,
    pub generation: u64,
}

#[derive(Default)]
struct Counters {
    submitted: AtomicU64,
    completed: AtomicU64,
    dropped: AtomicU64,
    late_reports: AtomicU64,
    not_ready: AtomicU64,
    carrier_timing_violations: AtomicU64,
    unusable_grants: AtomicU64,
    crc_ok: AtomicU64,
    crc_failed: AtomicU64,
}

/// Dispatch gate closed during reconfiguration
struct Gate {
    reconfiguring: bool,
    /// Workers bound or running
    in_flight: usize,
}

/// Submitted TTIs and finished workers awaiting collection
#[derive(Default)]
struct ReportBoard {
    order: VecDeque<Tti>,
    ready: HashMap<Tti, Box<SubframeWorker>>,
}

struct PoolShared {
    config: PoolConfig,
    state: Arc<PhyStateHandle>,
    processor: Arc<dyn ChannelProcessor>,
    idle_tx: Sender<Box<SubframeWorker>>,
    idle_rx: Receiver<Box<SubframeWorker>>,
    /// Result storage of consumed reports
    spare_tx: Sender<Vec<CarrierResult>>,
    spare_rx: Receiver<Vec<CarrierResult>>,
    gate: Mutex<Gate>,
    gate_cv: Condvar,
    board: Mutex<ReportBoard>,
    board_cv: Condvar,
    counters: Counters,
}

impl PoolShared {
    fn leave_gate(&self) {
        let mut gate = self.gate.lock();
        gate.in_flight = gate.in_flight.saturating_sub(1);
        drop(gate);
        self.gate_cv.notify_all();
    }

    fn return_idle(&self, worker: Box<SubframeWorker>) {
        let id = worker.id();
        if self.idle_tx.send(worker).is_err() {
            error!("Subframe worker {} lost: idle channel closed", id);
        }
    }

    fn account(&self, report: &SubframeReport) {
        let c = &self.counters;
        c.completed.fetch_add(1, Ordering::Relaxed);
        if report.late {
            c.late_reports.fetch_add(1, Ordering::Relaxed);
        }
        let (ok, ko) = report.crc_counts();
        c.crc_ok.fetch_add(ok, Ordering::Relaxed);
        c.crc_failed.fetch_add(ko, Ordering::Relaxed);
        c.carrier_timing_violations
            .fetch_add(report.timing_violations(), Ordering::Relaxed);
        c.unusable_grants
            .fetch_add(report.unusable_grants(), Ordering::Relaxed);
    }

    /// A worker finished running: post it on the board
    fn complete(&self, worker: Box<SubframeWorker>) {
        let tti = worker.tti();
        if let Some(report) = worker.report() {
            self.account(report);
            trace!("TTI {} report ready after {:?}", tti, report.elapsed);
        }

        self.leave_gate();

        let mut board = self.board.lock();
        board.ready.insert(tti, worker);
        drop(board);
        self.board_cv.notify_all();
    }

    /// Take the report out of a collected worker and put it back to work
    fn recycle(&self, mut worker: Box<SubframeWorker>) -> SubframeReport {
        let report = worker.release();
        if let Ok(carriers) = self.spare_rx.try_recv() {
            worker.restock(carriers);
        }
        self.return_idle(worker);
        report
    }
}

fn panic_message(cause: &(dyn Any + Send)) -> String {
    if let Some(s) = cause.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = cause.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Fixed-size pool of subframe workers
pub struct WorkerPool {
    shared: Arc<PoolShared>,
    threads: rayon::ThreadPool,
}

impl WorkerPool {
    pub fn new(
        state: Arc<PhyStateHandle>,
        config: PoolConfig,
        processor: Arc<dyn ChannelProcessor>,
    ) -> Result<Self, PoolError> {
        config.validate()?;

        let threads = rayon::ThreadPoolBuilder::new()
            .num_threads(config.nof_workers)
            .thread_name(|i| format!("sf-worker-{}", i))
            .build()
            .map_err(|e| PoolError::InvalidConfiguration(e.to_string()))?;

        let (idle_tx, idle_rx) = channel::bounded(config.nof_workers);
        let (spare_tx, spare_rx) = channel::bounded(config.nof_workers);
        let snapshot = state.snapshot();
        for id in 0..config.nof_workers {
            let worker = SubframeWorker::new(id, &snapshot)
                .map_err(|e| PoolError::InvalidConfiguration(e.to_string()))?;
            idle_tx
                .send(Box::new(worker))
                .map_err(|e| PoolError::InvalidConfiguration(e.to_string()))?;
        }

        info!(
            "Worker pool started: {} workers, {} carriers, generation {}",
            config.nof_workers,
            snapshot.nof_carriers(),
            snapshot.generation()
        );

        Ok(Self {
            shared: Arc::new(PoolShared {
                config,
                state,
                processor,
                idle_tx,
                idle_rx,
                spare_tx,
                spare_rx,
                gate: Mutex::new(Gate {
                    reconfiguring: false,
                    in_flight: 0,
                }),
                gate_cv: Condvar::new(),
                board: Mutex::new(ReportBoard::default()),
                board_cv: Condvar::new(),
                counters: Counters::default(),
            }),
            threads,
        })
    }

    pub fn config(&self) -> &PoolConfig {
        &self.shared.config
    }

    fn drop_tti(&self, tti: Tti) -> PoolError {
        self.shared.counters.dropped.fetch_add(1, Ordering::Relaxed);
        warn!(
            "TTI {}: no idle worker within {:?}, subframe dropped",
            tti, self.shared.config.tti_period
        );
        PoolError::DeadlineExceeded { tti }
    }

    /// Bind an idle worker to `tti`.
    ///
    /// Waits at most one TTI period for a worker (and for a reconfiguration
    /// in progress); the TTI is dropped otherwise.
    pub fn acquire(&self, tti: Tti) -> Result<SubframeLease<'_>, PoolError> {
        let shared = &self.shared;
        let deadline = Instant::now() + shared.config.tti_period;

        {
            let mut gate = shared.gate.lock();
            while gate.reconfiguring {
                if shared.gate_cv.wait_until(&mut gate, deadline).timed_out() && gate.reconfiguring {
                    drop(gate);
                    return Err(self.drop_tti(tti));
                }
            }
            gate.in_flight += 1;
        }

        let wait = deadline.saturating_duration_since(Instant::now());
        let mut worker = match shared.idle_rx.recv_timeout(wait) {
            Ok(worker) => worker,
            Err(_) => {
                shared.leave_gate();
                return Err(self.drop_tti(tti));
            }
        };

        {
            let mut board = shared.board.lock();
            if board.order.contains(&tti) {
                drop(board);
                shared.return_idle(worker);
                shared.leave_gate();
                return Err(PoolError::DuplicateTti(tti));
            }
            board.order.push_back(tti);
        }

        let snapshot = shared.state.snapshot();
        if let Err(e) = worker.bind(tti, &snapshot, Instant::now() + shared.config.processing_deadline) {
            shared.board.lock().order.retain(|&t| t != tti);
            shared.return_idle(worker);
            shared.leave_gate();
            return Err(PoolError::InvalidConfiguration(e.to_string()));
        }

        trace!("TTI {} bound to worker {}", tti, worker.id());
        Ok(SubframeLease {
            pool: self,
            tti,
            generation: worker.generation(),
            worker: Some(worker),
        })
    }

    fn dispatch(&self, mut worker: Box<SubframeWorker>) {
        self.shared.counters.submitted.fetch_add(1, Ordering::Relaxed);
        let shared = Arc::clone(&self.shared);

        self.threads.spawn(move || {
            let processor = Arc::clone(&shared.processor);
            let budget = shared.config.carrier_budget;

            let outcome = panic::catch_unwind(AssertUnwindSafe(|| worker.run(processor.as_ref(), budget)));
            if let Err(cause) = outcome {
                let reason = panic_message(cause.as_ref());
                error!("TTI {}: worker {} panicked: {}", worker.tti(), worker.id(), reason);
                worker.fail(&reason);
            }

            shared.complete(worker);
        });
    }

    /// Acquire, fill and submit in one call.
    ///
    /// `fill` writes the sample buffers through the lease before the grants
    /// are attached. A grant for a carrier the bound configuration lacks is
    /// counted as unusable and skipped.
    pub fn submit<F>(&self, tti: Tti, grants: &[PdschGrant], fill: F) -> Result<(), PoolError>
    where
        F: FnOnce(&mut SubframeLease<'_>),
    {
        let mut lease = self.acquire(tti)?;
        fill(&mut lease);
        for grant in grants {
            // Already logged and counted by the lease
            let _ = lease.set_grant(grant.clone());
        }
        lease.submit();
        Ok(())
    }

    /// Report of `tti` if it has completed
    pub fn try_collect(&self, tti: Tti) -> Option<SubframeReport> {
        let worker = {
            let mut board = self.shared.board.lock();
            let worker = board.ready.remove(&tti)?;
            board.order.retain(|&t| t != tti);
            worker
        };
        Some(self.shared.recycle(worker))
    }

    /// Oldest submitted report if it has completed
    pub fn try_collect_next(&self) -> Option<SubframeReport> {
        let worker = {
            let mut board = self.shared.board.lock();
            let tti = *board.order.front()?;
            let worker = board.ready.remove(&tti)?;
            board.order.pop_front();
            worker
        };
        Some(self.shared.recycle(worker))
    }

    fn not_ready(&self, tti: Tti) -> PoolError {
        self.shared.counters.not_ready.fetch_add(1, Ordering::Relaxed);
        debug!("TTI {}: report not ready", tti);
        PoolError::NotReady { tti }
    }

    /// Wait up to `timeout` for the report of `tti`
    pub fn collect(&self, tti: Tti, timeout: Duration) -> Result<SubframeReport, PoolError> {
        let deadline = Instant::now() + timeout;
        let mut board = self.shared.board.lock();

        loop {
            if let Some(worker) = board.ready.remove(&tti) {
                board.order.retain(|&t| t != tti);
                drop(board);
                return Ok(self.shared.recycle(worker));
            }
            if !board.order.contains(&tti) {
                return Err(PoolError::NothingPending);
            }
            if Instant::now() >= deadline {
                drop(board);
                return Err(self.not_ready(tti));
            }
            self.shared.board_cv.wait_until(&mut board, deadline);
        }
    }

    /// Wait up to `timeout` for the oldest submitted report
    pub fn collect_next(&self, timeout: Duration) -> Result<SubframeReport, PoolError> {
        let deadline = Instant::now() + timeout;
        let mut board = self.shared.board.lock();

        loop {
            let tti = *board.order.front().ok_or(PoolError::NothingPending)?;
            if let Some(worker) = board.ready.remove(&tti) {
                board.order.pop_front();
                drop(board);
                return Ok(self.shared.recycle(worker));
            }
            if Instant::now() >= deadline {
                drop(board);
                return Err(self.not_ready(tti));
            }
            self.shared.board_cv.wait_until(&mut board, deadline);
        }
    }

    /// Hand a consumed report back so its storage serves a later TTI.
    ///
    /// Optional; reports that are simply dropped cost one allocation per
    /// TTI instead.
    pub fn reuse(&self, report: SubframeReport) {
        let _ = self.shared.spare_tx.try_send(report.carriers);
    }

    /// Number of submitted or bound TTIs not yet collected
    pub fn pending(&self) -> usize {
        self.shared.board.lock().order.len()
    }

    /// Replace the PHY configuration.
    ///
    /// New acquisitions are held off while bound and running subframes
    /// finish with the configuration they were bound with; the new snapshot
    /// is then published and idle workers rebuilt for it. Returns the new
    /// generation.
    pub fn apply(&self, state: PhyState) -> Result<u64, PoolError> {
        let shared = &self.shared;
        let deadline = Instant::now() + shared.config.quiesce_timeout;

        {
            let mut gate = shared.gate.lock();
            while gate.reconfiguring {
                if shared.gate_cv.wait_until(&mut gate, deadline).timed_out() && gate.reconfiguring {
                    return Err(PoolError::QuiesceTimeout {
                        in_flight: gate.in_flight,
                    });
                }
            }

            gate.reconfiguring = true;
            while gate.in_flight > 0 {
                if shared.gate_cv.wait_until(&mut gate, deadline).timed_out() && gate.in_flight > 0 {
                    let in_flight = gate.in_flight;
                    gate.reconfiguring = false;
                    drop(gate);
                    shared.gate_cv.notify_all();
                    warn!(
                        "Reconfiguration abandoned: {} subframes still in flight after {:?}",
                        in_flight, shared.config.quiesce_timeout
                    );
                    return Err(PoolError::QuiesceTimeout { in_flight });
                }
            }
        }

        let snapshot = shared.state.publish(state);

        let parked: Vec<_> = shared.idle_rx.try_iter().collect();
        let nof_parked = parked.len();
        for mut worker in parked {
            if let Err(e) = worker.reconfigure(&snapshot) {
                warn!("Subframe worker {} keeps previous configuration: {}", worker.id(), e);
            }
            shared.return_idle(worker);
        }

        shared.gate.lock().reconfiguring = false;
        shared.gate_cv.notify_all();

        info!(
            "Published PHY configuration generation {}: {} carriers, {} idle workers reconfigured",
            snapshot.generation(),
            snapshot.nof_carriers(),
            nof_parked
        );
        Ok(snapshot.generation())
    }

    pub fn generation(&self) -> u64 {
        self.shared.state.generation()
    }

    pub fn stats(&self) -> PoolStats {
        let c = &self.shared.counters;
        PoolStats {
            submitted: c.submitted.load(Ordering::Relaxed),
            completed: c.completed.load(Ordering::Relaxed),
            dropped: c.dropped.load(Ordering::Relaxed),
            late_reports: c.late_reports.load(Ordering::Relaxed),
            not_ready: c.not_ready.load(Ordering::Relaxed),
            carrier_timing_violations: c.carrier_timing_violations.load(Ordering::Relaxed),
            unusable_grants: c.unusable_grants.load(Ordering::Relaxed),
            crc_ok: c.crc_ok.load(Ordering::Relaxed),
            crc_failed: c.crc_failed.load(Ordering::Relaxed),
            in_flight: self.shared.gate.lock().in_flight,
            generation: self.generation(),
        }
    }
}

/// Exclusive use of one bound subframe worker.
///
/// Dropping the lease without [`submit`](Self::submit) returns the worker
/// to the pool unprocessed.
pub struct SubframeLease<'a> {
    pool: &'a WorkerPool,
    tti: Tti,
    generation: u64,
    worker: Option<Box<SubframeWorker>>,
}

impl SubframeLease<'_> {
    pub fn tti(&self) -> Tti {
        self.tti
    }

    /// Configuration generation the TTI is bound to
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn nof_carriers(&self) -> usize {
        self.worker.as_ref().map_or(0, |w| w.nof_carriers())
    }

    /// Sample buffer of `antenna` on carrier `cc_idx` for the bound slot
    pub fn buffer_mut(&mut self, cc_idx: u32, antenna: usize) -> Option<&mut [Complex32]> {
        self.worker
            .as_mut()?
            .try_carrier_mut(cc_idx)?
            .buffer_mut(antenna)
    }

    /// Samples per antenna of carrier `cc_idx` in the bound slot
    pub fn buffer_len(&mut self, cc_idx: u32) -> Option<usize> {
        self.worker
            .as_mut()?
            .try_carrier_mut(cc_idx)
            .map(|c| c.buffer_len())
    }

    /// Configuration snapshot the TTI is bound to
    pub fn phy(&self) -> Option<&Arc<PhyState>> {
        self.worker.as_ref().map(|w| w.phy())
    }

    /// Carrier `cc_idx` of the bound worker.
    ///
    /// A grant may have been decoded against an earlier generation whose
    /// carrier has since been removed; that grant is unusable, not fatal.
    fn carrier_mut(&mut self, cc_idx: u32) -> Result<&mut ComponentCarrierWorker, PoolError> {
        let tti = self.tti;
        let generation = self.generation;
        let pool = self.pool;
        match self.worker.as_mut().and_then(|w| w.try_carrier_mut(cc_idx)) {
            Some(carrier) => Ok(carrier),
            None => {
                pool.shared.counters.unusable_grants.fetch_add(1, Ordering::Relaxed);
                warn!(
                    "TTI {}: carrier {} not configured in generation {}, grant skipped",
                    tti, cc_idx, generation
                );
                Err(PoolError::CarrierNotConfigured { tti, cc_idx })
            }
        }
    }

    /// Schedule `grant` on its carrier
    pub fn set_grant(&mut self, grant: PdschGrant) -> Result<(), PoolError> {
        self.carrier_mut(grant.cc_idx)?.set_grant(grant);
        Ok(())
    }

    /// Record that the DCI for carrier `cc_idx` could not be decoded
    pub fn set_decode_failure(&mut self, cc_idx: u32, error: RaError) -> Result<(), PoolError> {
        self.carrier_mut(cc_idx)?.set_decode_failure(error);
        Ok(())
    }

    /// Start processing on a pool thread
    pub fn submit(mut self) {
        if let Some(worker) = self.worker.take() {
            self.pool.dispatch(worker);
        }
    }
}

impl Drop for SubframeLease<'_> {
    fn drop(&mut self) {
        if let Some(mut worker) = self.worker.take() {
            debug!("TTI {}: lease dropped without submission", self.tti);
            worker.abandon();

            let shared = &self.pool.shared;
            shared.board.lock().order.retain(|&t| t != self.tti);
            shared.return_idle(worker);
            shared.leave_gate();
        }
    }
}
