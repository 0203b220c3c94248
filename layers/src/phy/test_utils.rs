//! Shared fixtures for the PHY unit tests

use super::buffers::CarrierBuffers;
use super::carrier::{CarrierConfig, DmrsTypeAPos};
use super::cc_worker::ChannelProcessor;
use super::dci::{DciDl, DciFormat, SearchSpaceType};
use super::grant::PdschGrant;
use super::pdsch::{nof_data_res, PdschResult};
use super::ra_dl::{decode_grant, riv_type1};
use super::sch_cfg::SchConfig;
use super::state::{CarrierSetup, CellParams, PhyState};
use crate::LayerError;
use bytes::Bytes;
use common::types::{CyclicPrefix, Pci, Rnti, RntiType, SubcarrierSpacing, Tti};
use std::time::Duration;

pub fn carrier(nof_prb: u32) -> CarrierConfig {
    CarrierConfig {
        pci: Pci(1),
        nof_prb,
        start: 0,
        scs: SubcarrierSpacing::Scs15,
        cyclic_prefix: CyclicPrefix::Normal,
        dmrs_type_a_pos: DmrsTypeAPos::Pos2,
    }
}

pub fn carrier_52() -> CarrierConfig {
    carrier(52)
}

pub fn carrier_106() -> CarrierConfig {
    carrier(106)
}

pub fn setup(carrier: CarrierConfig) -> CarrierSetup {
    CarrierSetup {
        pdsch: SchConfig::new(carrier.dmrs_type_a_pos),
        carrier,
    }
}

pub fn phy_state(carriers: &[CarrierConfig]) -> PhyState {
    PhyState::new(CellParams::default(), carriers.iter().cloned().map(setup).collect()).unwrap()
}

/// C-RNTI format 1_0 DCI in the UE search space
pub fn dci_1_0(freq_domain_assignment: u32, time_domain_assignment: u32) -> DciDl {
    DciDl {
        rnti: Rnti(0x4601),
        rnti_type: RntiType::C,
        ss_type: SearchSpaceType::Ue,
        coreset_id: 1,
        format: DciFormat::Format1_0,
        freq_domain_assignment,
        time_domain_assignment,
    }
}

/// Grant over the whole carrier with default time allocation row 0
pub fn full_band_grant(carrier: &CarrierConfig) -> PdschGrant {
    let cfg = SchConfig::new(carrier.dmrs_type_a_pos);
    let riv = riv_type1(carrier.nof_prb, 0, carrier.nof_prb).unwrap();
    decode_grant(carrier, &cfg, 0, &dci_1_0(riv, 0)).unwrap()
}

/// Processor reporting success without touching the samples
pub struct NoopProcessor;

impl ChannelProcessor for NoopProcessor {
    fn process_pdsch(
        &self,
        _tti: Tti,
        _carrier: &CarrierConfig,
        grant: &PdschGrant,
        _buffers: &mut CarrierBuffers,
    ) -> Result<PdschResult, LayerError> {
        Ok(PdschResult {
            payload: Bytes::new(),
            crc_ok: true,
            nof_re: nof_data_res(grant),
            rsrp_db: 0.0,
            snr_db: 30.0,
        })
    }
}

/// Processor stalling on one TTI
pub struct SleepyProcessor {
    pub tti: Tti,
    pub delay: Duration,
}

impl ChannelProcessor for SleepyProcessor {
    fn process_pdsch(
        &self,
        tti: Tti,
        carrier: &CarrierConfig,
        grant: &PdschGrant,
        buffers: &mut CarrierBuffers,
    ) -> Result<PdschResult, LayerError> {
        if tti == self.tti {
            std::thread::sleep(self.delay);
        }
        NoopProcessor.process_pdsch(tti, carrier, grant, buffers)
    }
}

/// Processor panicking on one TTI
pub struct PanickingProcessor {
    pub tti: Tti,
}

impl ChannelProcessor for PanickingProcessor {
    fn process_pdsch(
        &self,
        tti: Tti,
        carrier: &CarrierConfig,
        grant: &PdschGrant,
        buffers: &mut CarrierBuffers,
    ) -> Result<PdschResult, LayerError> {
        if tti == self.tti {
            panic!("processing fault in TTI {}", tti);
        }
        NoopProcessor.process_pdsch(tti, carrier, grant, buffers)
    }
}
