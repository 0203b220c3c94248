//! Subframe worker
//!
//! Processes every component carrier of one TTI. A worker is bound to a TTI
//! and a configuration snapshot, filled by the front end, run on a pool
//! thread, and finally releases its report:
//!
//! ```text
//! Idle -> Bound -> Running -> ReportPending -> Idle
//!           \______________________________/
//!             lease dropped unsubmitted
//! ```

use super::cc_worker::{CarrierOutcome, CarrierResult, ChannelProcessor, ComponentCarrierWorker};
use super::state::PhyState;
use crate::LayerError;
use common::types::Tti;
use num_complex::Complex32;
use rayon::prelude::*;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    Bound,
    Running,
    ReportPending,
}

/// Results of one TTI across all carriers
#[derive(Debug, Clone, PartialEq)]
pub struct SubframeReport {
    pub tti: Tti,
    /// Configuration generation the TTI was processed with
    pub generation: u64,
    /// Indexed by component carrier
    pub carriers: Vec<CarrierResult>,
    /// Time from bind to completion
    pub elapsed: Duration,
    /// Completed after the processing deadline
    pub late: bool,
}

impl SubframeReport {
    /// Decoded carriers as (CRC ok, CRC failed)
    pub fn crc_counts(&self) -> (u64, u64) {
        self.carriers
            .iter()
            .fold((0, 0), |(ok, ko), carrier| match &carrier.outcome {
                CarrierOutcome::Decoded(result) if result.crc_ok => (ok + 1, ko),
                CarrierOutcome::Decoded(_) => (ok, ko + 1),
                _ => (ok, ko),
            })
    }

    pub fn timing_violations(&self) -> u64 {
        self.carriers.iter().filter(|c| c.timing_violation).count() as u64
    }

    pub fn unusable_grants(&self) -> u64 {
        self.carriers
            .iter()
            .filter(|c| matches!(c.outcome, CarrierOutcome::NoUsableAllocation(_)))
            .count() as u64
    }

    /// Equalised PDSCH symbols of carrier `cc_idx`, empty when it decoded nothing
    pub fn pdsch_symbols(&self, cc_idx: u32) -> Option<&[Complex32]> {
        self.carriers
            .get(cc_idx as usize)
            .map(|c| c.pdsch_symbols.as_slice())
    }
}

pub struct SubframeWorker {
    id: usize,
    state: WorkerState,
    tti: Tti,
    phy: Arc<PhyState>,
    carriers: Vec<ComponentCarrierWorker>,
    bound_at: Instant,
    deadline: Instant,
    report: Option<SubframeReport>,
    /// Result storage handed back from a collected report
    spare: Vec<CarrierResult>,
}

fn build_carriers(phy: &PhyState) -> Result<Vec<ComponentCarrierWorker>, LayerError> {
    phy.carriers()
        .iter()
        .enumerate()
        .map(|(cc_idx, setup)| {
            ComponentCarrierWorker::new(cc_idx as u32, &setup.carrier, phy.cell().nof_rx_antennas)
        })
        .collect()
}

impl SubframeWorker {
    pub fn new(id: usize, phy: &Arc<PhyState>) -> Result<Self, LayerError> {
        let now = Instant::now();
        Ok(Self {
            id,
            state: WorkerState::Idle,
            tti: Tti::new(0),
            phy: Arc::clone(phy),
            carriers: build_carriers(phy)?,
            bound_at: now,
            deadline: now,
            report: None,
            spare: Vec::new(),
        })
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    pub fn tti(&self) -> Tti {
        self.tti
    }

    /// Generation of the snapshot the worker is configured for
    pub fn generation(&self) -> u64 {
        self.phy.generation()
    }

    pub fn phy(&self) -> &Arc<PhyState> {
        &self.phy
    }

    pub fn nof_carriers(&self) -> usize {
        self.carriers.len()
    }

    fn transition(&mut self, to: WorkerState) {
        use WorkerState::*;

        let legal = matches!(
            (self.state, to),
            (Idle, Bound) | (Bound, Running) | (Running, ReportPending) | (ReportPending, Idle) | (Bound, Idle)
        );
        assert!(
            legal,
            "subframe worker {}: illegal transition {:?} -> {:?}",
            self.id, self.state, to
        );
        self.state = to;
    }

    /// Rebuild carrier buffers for a new configuration snapshot
    pub fn reconfigure(&mut self, phy: &Arc<PhyState>) -> Result<(), LayerError> {
        assert_eq!(
            self.state,
            WorkerState::Idle,
            "subframe worker {}: reconfigured while {:?}",
            self.id,
            self.state
        );

        // Build first so a failure leaves the previous configuration intact
        let carriers = build_carriers(phy)?;
        self.carriers = carriers;
        self.phy = Arc::clone(phy);
        debug!("Subframe worker {} configured for generation {}", self.id, phy.generation());
        Ok(())
    }

    /// Bind to `tti` with configuration `phy`, to complete by `deadline`
    pub fn bind(&mut self, tti: Tti, phy: &Arc<PhyState>, deadline: Instant) -> Result<(), LayerError> {
        if phy.generation() != self.generation() {
            self.reconfigure(phy)?;
        }

        self.transition(WorkerState::Bound);
        self.tti = tti;
        self.bound_at = Instant::now();
        self.deadline = deadline;
        self.report = None;

        let phy = Arc::clone(&self.phy);
        for (worker, setup) in self.carriers.iter_mut().zip(phy.carriers()) {
            worker.prepare(tti, &setup.carrier);
        }
        Ok(())
    }

    /// Carrier worker `cc_idx` of the bound TTI.
    ///
    /// Panics if the worker does not own that carrier.
    pub fn carrier_mut(&mut self, cc_idx: u32) -> &mut ComponentCarrierWorker {
        let nof_carriers = self.carriers.len();
        match self.carriers.get_mut(cc_idx as usize) {
            Some(worker) => worker,
            None => panic!(
                "subframe worker {}: carrier {} not configured ({} carriers)",
                self.id, cc_idx, nof_carriers
            ),
        }
    }

    pub fn try_carrier_mut(&mut self, cc_idx: u32) -> Option<&mut ComponentCarrierWorker> {
        self.carriers.get_mut(cc_idx as usize)
    }

    /// Process all carriers, in parallel when the pool has spare threads
    pub fn run(&mut self, processor: &dyn ChannelProcessor, carrier_budget: Duration) {
        self.transition(WorkerState::Running);

        let tti = self.tti;
        let phy = &self.phy;
        self.carriers
            .par_iter_mut()
            .zip(phy.carriers().par_iter())
            .for_each(|(worker, setup)| worker.work(tti, &setup.carrier, carrier_budget, processor));

        self.stage_report();
    }

    /// Abort a running TTI: every carrier reports `reason`
    pub fn fail(&mut self, reason: &str) {
        for worker in &mut self.carriers {
            worker.fail(reason);
        }
        self.stage_report();
    }

    fn stage_report(&mut self) {
        let completed = Instant::now();
        let late = completed > self.deadline;
        if late {
            warn!(
                "TTI {} completed {:?} after its deadline",
                self.tti,
                completed - self.deadline
            );
        }

        let mut carriers = std::mem::take(&mut self.spare);
        carriers.truncate(self.carriers.len());
        while carriers.len() < self.carriers.len() {
            carriers.push(CarrierResult::new(carriers.len() as u32, CarrierOutcome::NoGrant));
        }
        for (worker, out) in self.carriers.iter_mut().zip(carriers.iter_mut()) {
            worker.write_result(out);
        }

        self.report = Some(SubframeReport {
            tti: self.tti,
            generation: self.generation(),
            carriers,
            elapsed: completed - self.bound_at,
            late,
        });
        self.transition(WorkerState::ReportPending);
    }

    pub fn report(&self) -> Option<&SubframeReport> {
        self.report.as_ref()
    }

    /// Hand out the staged report and return to idle
    pub fn release(&mut self) -> SubframeReport {
        self.transition(WorkerState::Idle);
        let (tti, generation) = (self.tti, self.generation());
        self.report.take().unwrap_or_else(|| SubframeReport {
            tti,
            generation,
            carriers: Vec::new(),
            elapsed: Duration::ZERO,
            late: false,
        })
    }

    /// Keep the result storage of a consumed report for the next TTI
    pub fn restock(&mut self, carriers: Vec<CarrierResult>) {
        if carriers.capacity() > self.spare.capacity() {
            self.spare = carriers;
        }
    }

    /// Return to idle without processing the bound TTI
    pub fn abandon(&mut self) {
        self.transition(WorkerState::Idle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phy::grant::PrbMask;
    use crate::phy::test_utils::{carrier_106, carrier_52, full_band_grant, phy_state, NoopProcessor};

    fn published(state: PhyState) -> Arc<PhyState> {
        crate::phy::state::PhyStateHandle::new(state).snapshot()
    }

    fn far_deadline() -> Instant {
        Instant::now() + Duration::from_secs(10)
    }

    #[test]
    fn test_full_cycle() {
        let phy = published(phy_state(&[carrier_52(), carrier_106()]));
        let mut worker = SubframeWorker::new(0, &phy).unwrap();
        assert_eq!(worker.state(), WorkerState::Idle);

        worker.bind(Tti::new(7), &phy, far_deadline()).unwrap();
        assert_eq!(worker.state(), WorkerState::Bound);
        worker.carrier_mut(1).set_grant(full_band_grant(&carrier_106()));

        worker.run(&NoopProcessor, Duration::from_secs(1));
        assert_eq!(worker.state(), WorkerState::ReportPending);

        let report = worker.release();
        assert_eq!(worker.state(), WorkerState::Idle);
        assert_eq!(report.tti, Tti::new(7));
        assert_eq!(report.generation, 1);
        assert!(!report.late);
        assert_eq!(report.carriers.len(), 2);
        assert_eq!(report.carriers[0].outcome, CarrierOutcome::NoGrant);
        assert!(matches!(report.carriers[1].outcome, CarrierOutcome::Decoded(_)));
        assert_eq!(report.crc_counts(), (1, 0));
    }

    #[test]
    fn test_restocked_results_are_reused() {
        let phy = published(phy_state(&[carrier_52(), carrier_106()]));
        let mut worker = SubframeWorker::new(0, &phy).unwrap();

        worker.bind(Tti::new(0), &phy, far_deadline()).unwrap();
        worker.run(&NoopProcessor, Duration::from_secs(1));
        let report = worker.release();
        let storage = report.carriers.as_ptr();
        worker.restock(report.carriers);

        worker.bind(Tti::new(1), &phy, far_deadline()).unwrap();
        worker.run(&NoopProcessor, Duration::from_secs(1));
        let report = worker.release();
        assert_eq!(report.carriers.as_ptr(), storage);
        assert_eq!(report.tti, Tti::new(1));
        assert_eq!(report.carriers.len(), 2);
        assert_eq!(report.carriers[1].cc_idx, 1);
        assert_eq!(report.pdsch_symbols(1), Some(&[][..]));
        assert_eq!(report.pdsch_symbols(2), None);
    }

    #[test]
    fn test_bind_clears_previous_assignments() {
        let phy = published(phy_state(&[carrier_52()]));
        let mut worker = SubframeWorker::new(0, &phy).unwrap();

        worker.bind(Tti::new(0), &phy, far_deadline()).unwrap();
        worker.carrier_mut(0).set_grant(full_band_grant(&carrier_52()));
        worker.abandon();

        worker.bind(Tti::new(1), &phy, far_deadline()).unwrap();
        worker.run(&NoopProcessor, Duration::from_secs(1));
        assert_eq!(worker.release().carriers[0].outcome, CarrierOutcome::NoGrant);
    }

    #[test]
    fn test_bind_reconfigures_on_new_generation() {
        let handle = crate::phy::state::PhyStateHandle::new(phy_state(&[carrier_52()]));
        let mut worker = SubframeWorker::new(0, &handle.snapshot()).unwrap();
        assert_eq!(worker.carrier_mut(0).buffer_len(), 15360);

        let next = handle.publish(phy_state(&[carrier_106()]));
        worker.bind(Tti::new(0), &next, far_deadline()).unwrap();
        assert_eq!(worker.generation(), 2);
        assert_eq!(worker.carrier_mut(0).buffer_len(), 30720);
    }

    #[test]
    fn test_missed_deadline_is_late() {
        let phy = published(phy_state(&[carrier_52()]));
        let mut worker = SubframeWorker::new(0, &phy).unwrap();

        worker.bind(Tti::new(0), &phy, Instant::now()).unwrap();
        std::thread::sleep(Duration::from_millis(2));
        worker.run(&NoopProcessor, Duration::from_secs(1));
        assert!(worker.release().late);
    }

    #[test]
    fn test_fail_marks_every_carrier() {
        let phy = published(phy_state(&[carrier_52(), carrier_52()]));
        let mut worker = SubframeWorker::new(0, &phy).unwrap();

        worker.bind(Tti::new(0), &phy, far_deadline()).unwrap();
        worker.transition(WorkerState::Running);
        worker.fail("fault");

        let report = worker.release();
        assert!(report
            .carriers
            .iter()
            .all(|c| c.outcome == CarrierOutcome::Failed("fault".to_string())));
    }

    #[test]
    fn test_unusable_grant_counted() {
        let phy = published(phy_state(&[carrier_52()]));
        let mut worker = SubframeWorker::new(0, &phy).unwrap();
        let mut grant = full_band_grant(&carrier_52());
        grant.freq = PrbMask::from_range(60, 4);

        worker.bind(Tti::new(0), &phy, far_deadline()).unwrap();
        worker.carrier_mut(0).set_grant(grant);
        worker.run(&NoopProcessor, Duration::from_secs(1));
        assert_eq!(worker.release().unusable_grants(), 1);
    }

    #[test]
    #[should_panic(expected = "illegal transition")]
    fn test_run_requires_bound_worker() {
        let phy = published(phy_state(&[carrier_52()]));
        let mut worker = SubframeWorker::new(0, &phy).unwrap();
        worker.run(&NoopProcessor, Duration::from_secs(1));
    }

    #[test]
    #[should_panic(expected = "illegal transition")]
    fn test_double_bind_panics() {
        let phy = published(phy_state(&[carrier_52()]));
        let mut worker = SubframeWorker::new(0, &phy).unwrap();
        worker.bind(Tti::new(0), &phy, far_deadline()).unwrap();
        let _ = worker.bind(Tti::new(1), &phy, far_deadline());
    }

    #[test]
    #[should_panic(expected = "not configured")]
    fn test_unknown_carrier_panics() {
        let phy = published(phy_state(&[carrier_52()]));
        let mut worker = SubframeWorker::new(0, &phy).unwrap();
        worker.bind(Tti::new(0), &phy, far_deadline()).unwrap();
        worker.carrier_mut(3);
    }
}
