//! Published PHY configuration
//!
//! Workers never read configuration that can change under them: they hold
//! an `Arc` to an immutable [`PhyState`] snapshot taken when they were bound.
//! Reconfiguration builds a new state and publishes it with a higher
//! generation number.

use super::carrier::CarrierConfig;
use super::sch_cfg::SchConfig;
use crate::LayerError;
use parking_lot::RwLock;
use std::sync::Arc;

/// Cell-wide receiver parameters
#[derive(Debug, Clone, PartialEq)]
pub struct CellParams {
    pub nof_rx_antennas: usize,
}

impl Default for CellParams {
    fn default() -> Self {
        Self { nof_rx_antennas: 1 }
    }
}

/// One configured component carrier
#[derive(Debug, Clone, PartialEq)]
pub struct CarrierSetup {
    pub carrier: CarrierConfig,
    pub pdsch: SchConfig,
}

/// Complete, validated PHY configuration
#[derive(Debug, Clone, PartialEq)]
pub struct PhyState {
    generation: u64,
    cell: CellParams,
    /// Indexed by component carrier index
    carriers: Vec<CarrierSetup>,
}

impl PhyState {
    pub fn new(cell: CellParams, carriers: Vec<CarrierSetup>) -> Result<Self, LayerError> {
        if carriers.is_empty() {
            return Err(LayerError::InvalidConfiguration(
                "at least one component carrier required".to_string(),
            ));
        }
        if cell.nof_rx_antennas == 0 {
            return Err(LayerError::InvalidConfiguration(
                "at least one receive antenna required".to_string(),
            ));
        }

        for (cc_idx, setup) in carriers.iter().enumerate() {
            setup.carrier.validate()?;
            setup.pdsch.validate()?;

            if setup.pdsch.typea_pos != setup.carrier.dmrs_type_a_pos {
                return Err(LayerError::InvalidConfiguration(format!(
                    "carrier {}: PDSCH dmrs-TypeA-Position {:?} differs from carrier {:?}",
                    cc_idx, setup.pdsch.typea_pos, setup.carrier.dmrs_type_a_pos
                )));
            }
        }

        Ok(Self {
            generation: 0,
            cell,
            carriers,
        })
    }

    /// Generation number assigned when published, 0 before
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn cell(&self) -> &CellParams {
        &self.cell
    }

    pub fn nof_carriers(&self) -> usize {
        self.carriers.len()
    }

    pub fn carrier(&self, cc_idx: u32) -> Option<&CarrierSetup> {
        self.carriers.get(cc_idx as usize)
    }

    pub fn carriers(&self) -> &[CarrierSetup] {
        &self.carriers
    }
}

/// Holder of the current [`PhyState`] snapshot
#[derive(Debug)]
pub struct PhyStateHandle {
    current: RwLock<Arc<PhyState>>,
}

impl PhyStateHandle {
    /// Publish `state` as generation 1
    pub fn new(mut state: PhyState) -> Self {
        state.generation = 1;
        Self {
            current: RwLock::new(Arc::new(state)),
        }
    }

    /// Current snapshot
    pub fn snapshot(&self) -> Arc<PhyState> {
        self.current.read().clone()
    }

    pub fn generation(&self) -> u64 {
        self.current.read().generation
    }

    /// Replace the snapshot. Callers must have quiesced the workers first.
    pub(crate) fn publish(&self, mut state: PhyState) -> Arc<PhyState> {
        let mut current = self.current.write();
        state.generation = current.generation + 1;
        let next = Arc::new(state);
        *current = Arc::clone(&next);
        next
    }
}
