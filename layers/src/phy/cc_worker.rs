//! Component carrier worker
//!
//! One per carrier inside every subframe worker. Owns the carrier's
//! buffers and processes its PDSCH assignment for the bound TTI.

use super::buffers::CarrierBuffers;
use super::carrier::CarrierConfig;
use super::grant::PdschGrant;
use super::pdsch::PdschResult;
use super::ra_dl::RaError;
use crate::LayerError;
use common::types::Tti;
use num_complex::Complex32;
use std::time::{Duration, Instant};
use tracing::{trace, warn};

/// Physical channel processing run by carrier workers
///
/// Implementations are shared by every worker thread and must keep all
/// per-TTI state in the supplied buffers.
pub trait ChannelProcessor: Send + Sync {
    fn process_pdsch(
        &self,
        tti: Tti,
        carrier: &CarrierConfig,
        grant: &PdschGrant,
        buffers: &mut CarrierBuffers,
    ) -> Result<PdschResult, LayerError>;
}

/// What a carrier has to do in the bound TTI
#[derive(Debug, Clone, PartialEq)]
pub enum CarrierAssignment {
    Idle,
    Scheduled(PdschGrant),
    /// A DCI was received but its allocation could not be decoded
    Unusable(RaError),
}

#[derive(Debug, Clone, PartialEq)]
pub enum CarrierOutcome {
    NoGrant,
    NoUsableAllocation(RaError),
    Decoded(PdschResult),
    Failed(String),
}

/// Result of one carrier in one TTI
#[derive(Debug, Clone, PartialEq)]
pub struct CarrierResult {
    pub cc_idx: u32,
    pub outcome: CarrierOutcome,
    pub elapsed: Duration,
    /// Processing took longer than the per-carrier budget
    pub timing_violation: bool,
    /// Equalised PDSCH symbols, empty unless the carrier decoded a grant
    pub pdsch_symbols: Vec<Complex32>,
}

impl CarrierResult {
    pub fn new(cc_idx: u32, outcome: CarrierOutcome) -> Self {
        Self {
            cc_idx,
            outcome,
            elapsed: Duration::ZERO,
            timing_violation: false,
            pdsch_symbols: Vec::new(),
        }
    }
}

pub struct ComponentCarrierWorker {
    cc_idx: u32,
    buffers: CarrierBuffers,
    slot_len: usize,
    assignment: CarrierAssignment,
    result: Option<CarrierResult>,
}

impl ComponentCarrierWorker {
    pub fn new(cc_idx: u32, carrier: &CarrierConfig, nof_antennas: usize) -> Result<Self, LayerError> {
        Ok(Self {
            cc_idx,
            buffers: CarrierBuffers::new(carrier, nof_antennas)?,
            slot_len: carrier.slot_len(0),
            assignment: CarrierAssignment::Idle,
            result: None,
        })
    }

    pub fn cc_idx(&self) -> u32 {
        self.cc_idx
    }

    /// Reset for a new TTI
    pub fn prepare(&mut self, tti: Tti, carrier: &CarrierConfig) {
        self.slot_len = carrier.slot_len(tti.slot_in_subframe(carrier.scs));
        self.assignment = CarrierAssignment::Idle;
        self.result = None;
        self.buffers.equalized.clear();
    }

    pub fn set_grant(&mut self, grant: PdschGrant) {
        self.assignment = CarrierAssignment::Scheduled(grant);
    }

    pub fn set_decode_failure(&mut self, error: RaError) {
        self.assignment = CarrierAssignment::Unusable(error);
    }

    pub fn assignment(&self) -> &CarrierAssignment {
        &self.assignment
    }

    /// Samples of `antenna` for the bound slot
    pub fn buffer_mut(&mut self, antenna: usize) -> Option<&mut [Complex32]> {
        let slot_len = self.slot_len;
        self.buffers.antenna_mut(antenna).map(|s| &mut s[..slot_len])
    }

    /// Samples per antenna in the bound slot
    pub fn buffer_len(&self) -> usize {
        self.slot_len
    }

    pub fn nof_antennas(&self) -> usize {
        self.buffers.nof_antennas()
    }

    /// Process the assignment for `tti`
    pub fn work(&mut self, tti: Tti, carrier: &CarrierConfig, budget: Duration, processor: &dyn ChannelProcessor) {
        let start = Instant::now();

        let outcome = match &self.assignment {
            CarrierAssignment::Idle => CarrierOutcome::NoGrant,
            CarrierAssignment::Unusable(error) => CarrierOutcome::NoUsableAllocation(error.clone()),
            CarrierAssignment::Scheduled(grant) if !grant.fits(carrier) => {
                CarrierOutcome::NoUsableAllocation(RaError::AllocationOutsideCarrier {
                    cc_idx: self.cc_idx,
                    nof_prb: carrier.nof_prb,
                })
            }
            CarrierAssignment::Scheduled(grant) => {
                match processor.process_pdsch(tti, carrier, grant, &mut self.buffers) {
                    Ok(result) => CarrierOutcome::Decoded(result),
                    Err(e) => CarrierOutcome::Failed(e.to_string()),
                }
            }
        };

        if let CarrierOutcome::NoUsableAllocation(error) = &outcome {
            warn!("TTI {} cc={}: no usable allocation: {}", tti, self.cc_idx, error);
        }

        let elapsed = start.elapsed();
        let timing_violation = elapsed > budget;
        if timing_violation {
            warn!(
                "TTI {} cc={}: processing took {:?}, budget {:?}",
                tti, self.cc_idx, elapsed, budget
            );
        }
        trace!("TTI {} cc={} done in {:?}", tti, self.cc_idx, elapsed);

        self.result = Some(CarrierResult {
            cc_idx: self.cc_idx,
            outcome,
            elapsed,
            timing_violation,
            pdsch_symbols: Vec::new(),
        });
    }

    /// Replace the TTI result with a failure
    pub fn fail(&mut self, reason: &str) {
        self.result = Some(CarrierResult::new(
            self.cc_idx,
            CarrierOutcome::Failed(reason.to_string()),
        ));
    }

    /// Move the result of the last [`work`](Self::work) call into `out`.
    ///
    /// The equalised symbols are copied into `out.pdsch_symbols`, reusing
    /// its allocation.
    pub fn write_result(&mut self, out: &mut CarrierResult) {
        let result = self
            .result
            .take()
            .unwrap_or_else(|| CarrierResult::new(self.cc_idx, CarrierOutcome::NoGrant));

        out.cc_idx = result.cc_idx;
        out.elapsed = result.elapsed;
        out.timing_violation = result.timing_violation;
        out.pdsch_symbols.clear();
        if matches!(result.outcome, CarrierOutcome::Decoded(_)) {
            out.pdsch_symbols.extend_from_slice(&self.buffers.equalized);
        }
        out.outcome = result.outcome;
    }

    /// Hand out the result of the last [`work`](Self::work) call
    pub fn take_result(&mut self) -> CarrierResult {
        let mut out = CarrierResult::new(self.cc_idx, CarrierOutcome::NoGrant);
        self.write_result(&mut out);
        out
    }
}
