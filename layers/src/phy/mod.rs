//! Physical Layer (PHY) Submodules
//!
//! Downlink physical layer of the 5G NR UE: PDSCH resource allocation
//! decoding (TS 38.214 Section 5.1.2), DMRS generation (TS 38.211 Section
//! 7.4.1.1) and the real-time subframe worker pool that processes every
//! configured component carrier of each TTI.

pub mod buffers;
pub mod carrier;
pub mod cc_worker;
pub mod dci;
pub mod dmrs;
pub mod grant;
pub mod ofdm;
pub mod pdsch;
pub mod pool;
pub mod ra_dl;
pub mod sch_cfg;
pub mod sf_worker;
pub mod state;

#[cfg(test)]
pub(crate) mod test_utils;

// Re-export commonly used types
pub use carrier::{CarrierConfig, DmrsTypeAPos};
pub use cc_worker::{CarrierOutcome, CarrierResult, ChannelProcessor};
pub use dci::{DciDl, DciFormat, SearchSpaceType};
pub use grant::{PdschGrant, PrbMask, TimeAllocation};
pub use pdsch::{PdschReceiver, PdschResult, PdschTransmitter};
pub use pool::{PoolConfig, PoolError, PoolStats, SubframeLease, WorkerPool};
pub use ra_dl::{decode_grant, RaError};
pub use sch_cfg::SchConfig;
pub use sf_worker::SubframeReport;
pub use state::{CarrierSetup, CellParams, PhyState, PhyStateHandle};

use crate::LayerError;
use std::sync::Arc;
use tracing::{debug, info};

/// UE downlink PHY
///
/// Owns the published configuration and the worker pool. DCIs are decoded
/// against the current snapshot; subframes are processed through
/// [`UePhy::pool`].
pub struct UePhy {
    state: Arc<PhyStateHandle>,
    pool: WorkerPool,
}

impl UePhy {
    pub fn new(
        state: PhyState,
        pool_config: PoolConfig,
        processor: Arc<dyn ChannelProcessor>,
    ) -> Result<Self, LayerError> {
        let state = Arc::new(PhyStateHandle::new(state));
        let pool = WorkerPool::new(Arc::clone(&state), pool_config, processor)?;

        let snapshot = state.snapshot();
        for (cc_idx, setup) in snapshot.carriers().iter().enumerate() {
            info!(
                "Carrier {}: PCI {} {} PRBs at {} kHz, FFT size {}",
                cc_idx,
                setup.carrier.pci.0,
                setup.carrier.nof_prb,
                setup.carrier.scs.khz(),
                setup.carrier.fft_size()
            );
        }

        Ok(Self { state, pool })
    }

    /// PHY processing carriers with the built-in PDSCH receiver
    pub fn with_default_receiver(state: PhyState, pool_config: PoolConfig) -> Result<Self, LayerError> {
        Self::new(state, pool_config, Arc::new(PdschReceiver::new()))
    }

    /// Decode a downlink DCI received for carrier `cc_idx`
    pub fn decode_dl_dci(&self, cc_idx: u32, dci: &DciDl) -> Result<PdschGrant, LayerError> {
        let snapshot = self.state.snapshot();
        let setup = snapshot
            .carrier(cc_idx)
            .ok_or(LayerError::CarrierNotConfigured(cc_idx))?;

        let grant = decode_grant(&setup.carrier, &setup.pdsch, cc_idx, dci)?;
        debug!(
            "cc={} rnti={} PDSCH k0={} symbols {:?} PRBs {}",
            cc_idx,
            dci.rnti,
            grant.time.k0,
            grant.time.symbols(),
            grant.freq.count()
        );
        Ok(grant)
    }

    /// Replace the cell and carrier configuration, returning the new generation
    pub fn apply(&self, cell: CellParams, carriers: Vec<CarrierSetup>) -> Result<u64, LayerError> {
        let state = PhyState::new(cell, carriers)?;
        Ok(self.pool.apply(state)?)
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    /// Current configuration snapshot
    pub fn snapshot(&self) -> Arc<PhyState> {
        self.state.snapshot()
    }

    pub fn stats(&self) -> PoolStats {
        self.pool.stats()
    }
}
