//! PDSCH configuration supplied by upper layers
//!
//! Flattened view of the RRC `PDSCH-Config` / `PDSCH-ConfigCommon` fields the
//! resource allocation decoder needs (TS 38.331).

use super::carrier::DmrsTypeAPos;
use super::dmrs::{DmrsAdditionalPos, DmrsType};
use crate::LayerError;

/// Largest number of rows of a configured time domain allocation list
pub const MAX_TIME_RA_ROWS: usize = 16;

/// Largest SLIV value (7-bit start and length indicator)
pub const MAX_SLIV: u32 = 127;

/// PDSCH mapping type (TS 38.214 Section 5.1.2.1)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MappingType {
    /// Slot based
    A,
    /// Mini-slot based
    B,
}

/// Frequency domain resource allocation type (TS 38.214 Section 5.1.2.2)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceAllocationType {
    /// RBG bitmap
    Type0,
    /// Contiguous RIV
    Type1,
    /// Selected per DCI by its MSB
    DynamicSwitch,
}

/// One row of `PDSCH-TimeDomainResourceAllocationList`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PdschTimeRaConfig {
    /// Slot offset between DCI and PDSCH
    pub k0: u32,
    /// Mapping type
    pub mapping: MappingType,
    /// Start and length indicator
    pub sliv: u32,
}

/// `DMRS-DownlinkConfig` for one mapping type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DmrsSchConfig {
    pub dmrs_type: DmrsType,
    pub additional_pos: DmrsAdditionalPos,
    /// `scramblingID0`; the carrier PCI applies when absent
    pub scrambling_id: Option<u16>,
}

impl Default for DmrsSchConfig {
    fn default() -> Self {
        Self {
            dmrs_type: DmrsType::Type1,
            additional_pos: DmrsAdditionalPos::Pos2,
            scrambling_id: None,
        }
    }
}

/// PDSCH configuration of one carrier
#[derive(Debug, Clone, PartialEq)]
pub struct SchConfig {
    /// `dmrs-TypeA-Position`, must match the carrier
    pub typea_pos: DmrsTypeAPos,
    /// `resourceAllocation`
    pub resource_allocation: ResourceAllocationType,
    /// `rbg-Size` set to config2 when false
    pub rbg_size_cfg_1: bool,
    /// Time domain allocation list from `PDSCH-ConfigCommon`
    pub common_time_ra: Vec<PdschTimeRaConfig>,
    /// Time domain allocation list from `PDSCH-Config`
    pub dedicated_time_ra: Vec<PdschTimeRaConfig>,
    /// `dmrs-DownlinkForPDSCH-MappingTypeA`
    pub dmrs_type_a: Option<DmrsSchConfig>,
    /// `dmrs-DownlinkForPDSCH-MappingTypeB`
    pub dmrs_type_b: Option<DmrsSchConfig>,
}

impl SchConfig {
    /// Configuration before any dedicated RRC signalling: type 1 allocation,
    /// default tables and default DMRS for both mapping types.
    pub fn new(typea_pos: DmrsTypeAPos) -> Self {
        Self {
            typea_pos,
            resource_allocation: ResourceAllocationType::Type1,
            rbg_size_cfg_1: true,
            common_time_ra: Vec::new(),
            dedicated_time_ra: Vec::new(),
            dmrs_type_a: Some(DmrsSchConfig::default()),
            dmrs_type_b: Some(DmrsSchConfig::default()),
        }
    }

    /// DMRS configuration for a mapping type, if configured
    pub fn dmrs_config(&self, mapping: MappingType) -> Option<&DmrsSchConfig> {
        match mapping {
            MappingType::A => self.dmrs_type_a.as_ref(),
            MappingType::B => self.dmrs_type_b.as_ref(),
        }
    }

    pub fn validate(&self) -> Result<(), LayerError> {
        for (name, list) in [
            ("common", &self.common_time_ra),
            ("dedicated", &self.dedicated_time_ra),
        ] {
            if list.len() > MAX_TIME_RA_ROWS {
                return Err(LayerError::InvalidConfiguration(format!(
                    "{} time domain allocation list has {} rows, at most {} allowed",
                    name,
                    list.len(),
                    MAX_TIME_RA_ROWS
                )));
            }

            if let Some(row) = list.iter().find(|row| row.sliv > MAX_SLIV) {
                return Err(LayerError::InvalidConfiguration(format!(
                    "{} time domain allocation SLIV {} exceeds {}",
                    name, row.sliv, MAX_SLIV
                )));
            }
        }

        if self.typea_pos == DmrsTypeAPos::Pos3
            && self
                .dmrs_type_a
                .is_some_and(|dmrs| dmrs.additional_pos == DmrsAdditionalPos::Pos3)
        {
            return Err(LayerError::InvalidConfiguration(
                "dmrs-AdditionalPosition pos3 requires dmrs-TypeA-Position pos2".to_string(),
            ));
        }

        Ok(())
    }
}
