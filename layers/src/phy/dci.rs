//! Downlink DCI fields consumed by the resource allocation decoder
//!
//! Only the fields relevant to PDSCH allocation are carried; the PDCCH
//! blind decoding that produces them lives outside this crate.

use common::types::{Rnti, RntiType};

/// Search space type a DCI was detected in (TS 38.213 Section 10.1)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SearchSpaceType {
    /// Type0-PDCCH common search space (SIB1)
    Common0,
    /// Type0A-PDCCH common search space (other SI)
    Common0A,
    /// Type1-PDCCH common search space (random access)
    Common1,
    /// Type2-PDCCH common search space (paging)
    Common2,
    /// Type3-PDCCH common search space
    Common3,
    /// UE-specific search space
    Ue,
}

impl SearchSpaceType {
    pub fn is_common(&self) -> bool {
        !matches!(self, SearchSpaceType::Ue)
    }
}

/// Downlink DCI format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DciFormat {
    /// Fallback format
    Format1_0,
    /// Non-fallback format with its antenna ports field
    Format1_1 { antenna_ports: u8 },
}

/// Downlink DCI relevant to PDSCH resource allocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DciDl {
    pub rnti: Rnti,
    pub rnti_type: RntiType,
    pub ss_type: SearchSpaceType,
    /// CORESET the DCI was received in
    pub coreset_id: u32,
    pub format: DciFormat,
    /// Frequency domain resource assignment bitfield
    pub freq_domain_assignment: u32,
    /// Time domain resource assignment (row index m)
    pub time_domain_assignment: u32,
}
