//! YAML configuration of the UE application
//!
//! Plain serde structures holding YAML primitives; conversion into the typed
//! layer configuration happens in [`UeConfig::to_phy_state`] and
//! [`UeConfig::to_pool_config`].

use anyhow::{anyhow, Result};
use common::types::{CyclicPrefix, Pci, SubcarrierSpacing};
use common::utils::time::slot_duration_us;
use layers::phy::dmrs::DmrsAdditionalPos;
use layers::phy::sch_cfg::{DmrsSchConfig, ResourceAllocationType};
use layers::phy::{CarrierConfig, CarrierSetup, CellParams, DmrsTypeAPos, PhyState, PoolConfig, SchConfig};
use num_traits::FromPrimitive;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UeConfig {
    /// Component carriers, indexed by position
    pub carriers: Vec<CarrierEntry>,
    /// Worker pool configuration
    #[serde(default)]
    pub pipeline: PipelineConfig,
    /// Simulated front-end
    #[serde(default)]
    pub sim: SimConfig,
    /// Logging configuration
    #[serde(default)]
    pub log: LogConfig,
}

/// One component carrier
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CarrierEntry {
    /// Physical cell ID (0-1007)
    pub pci: u16,
    /// Bandwidth in PRBs
    pub nof_prb: u32,
    /// Offset from common resource block 0
    #[serde(default)]
    pub start: u32,
    /// Subcarrier spacing in kHz
    #[serde(default = "default_scs_khz")]
    pub scs_khz: u32,
    #[serde(default)]
    pub extended_cp: bool,
    /// First DMRS symbol for mapping type A (2 or 3)
    #[serde(default = "default_dmrs_type_a_pos")]
    pub dmrs_type_a_pos: u32,
    /// dmrs-AdditionalPosition (0-3)
    #[serde(default = "default_dmrs_additional_pos")]
    pub dmrs_additional_pos: u32,
    /// Frequency allocation type for format 1_1 ("type0" or "type1")
    #[serde(default = "default_resource_allocation")]
    pub resource_allocation: String,
    /// PDSCH scheduled on this carrier by the simulated front-end
    #[serde(default)]
    pub schedule: Option<ScheduleConfig>,
}

fn default_scs_khz() -> u32 {
    15
}

fn default_dmrs_type_a_pos() -> u32 {
    2
}

fn default_dmrs_additional_pos() -> u32 {
    2
}

fn default_resource_allocation() -> String {
    "type1".to_string()
}

/// Periodic PDSCH schedule
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScheduleConfig {
    /// Schedule every `period` TTIs
    #[serde(default = "default_period")]
    pub period: u32,
    #[serde(default)]
    pub offset: u32,
    /// Time domain allocation row m
    #[serde(default)]
    pub time_domain_assignment: u32,
    /// First PRB of a type 1 allocation
    #[serde(default)]
    pub start_prb: u32,
    /// PRBs of a type 1 allocation, the rest of the carrier when absent
    #[serde(default)]
    pub nof_prb: Option<u32>,
    /// RBG bitmap of a type 0 allocation, every RBG when absent
    #[serde(default)]
    pub rbg_bitmap: Option<u32>,
    /// DCI 1_1 antenna ports field
    #[serde(default = "default_antenna_ports")]
    pub antenna_ports: u8,
}

fn default_period() -> u32 {
    1
}

fn default_antenna_ports() -> u8 {
    3
}

/// Worker pool configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PipelineConfig {
    #[serde(default = "default_nof_workers")]
    pub nof_workers: usize,
    #[serde(default = "default_nof_rx_antennas")]
    pub nof_rx_antennas: usize,
    /// TTI period in microseconds, the slot duration of carrier 0 when absent
    #[serde(default)]
    pub tti_period_us: Option<u64>,
    #[serde(default = "default_processing_deadline_us")]
    pub processing_deadline_us: u64,
    #[serde(default = "default_carrier_budget_us")]
    pub carrier_budget_us: u64,
    #[serde(default = "default_quiesce_timeout_ms")]
    pub quiesce_timeout_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            nof_workers: default_nof_workers(),
            nof_rx_antennas: default_nof_rx_antennas(),
            tti_period_us: None,
            processing_deadline_us: default_processing_deadline_us(),
            carrier_budget_us: default_carrier_budget_us(),
            quiesce_timeout_ms: default_quiesce_timeout_ms(),
        }
    }
}

fn default_nof_workers() -> usize {
    4
}

fn default_nof_rx_antennas() -> usize {
    1
}

fn default_processing_deadline_us() -> u64 {
    3000
}

fn default_carrier_budget_us() -> u64 {
    2000
}

fn default_quiesce_timeout_ms() -> u64 {
    100
}

/// Simulated front-end
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SimConfig {
    /// TTIs to run, 0 runs until interrupted
    #[serde(default = "default_nof_ttis")]
    pub nof_ttis: u64,
    /// C-RNTI of the simulated UE
    #[serde(default = "default_rnti")]
    pub rnti: u16,
    /// Statistics logging interval in seconds
    #[serde(default = "default_stats_interval_s")]
    pub stats_interval_s: u64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            nof_ttis: default_nof_ttis(),
            rnti: default_rnti(),
            stats_interval_s: default_stats_interval_s(),
        }
    }
}

fn default_nof_ttis() -> u64 {
    10_000
}

fn default_rnti() -> u16 {
    0x4601
}

fn default_stats_interval_s() -> u64 {
    5
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LogConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for UeConfig {
    /// Single 52 PRB carrier at 15 kHz, scheduled every TTI over the whole band
    fn default() -> Self {
        Self {
            carriers: vec![CarrierEntry {
                pci: 1,
                nof_prb: 52,
                start: 0,
                scs_khz: default_scs_khz(),
                extended_cp: false,
                dmrs_type_a_pos: default_dmrs_type_a_pos(),
                dmrs_additional_pos: default_dmrs_additional_pos(),
                resource_allocation: default_resource_allocation(),
                schedule: Some(ScheduleConfig {
                    period: default_period(),
                    offset: 0,
                    time_domain_assignment: 0,
                    start_prb: 0,
                    nof_prb: None,
                    rbg_bitmap: None,
                    antenna_ports: default_antenna_ports(),
                }),
            }],
            pipeline: PipelineConfig::default(),
            sim: SimConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl CarrierEntry {
    pub fn to_carrier_config(&self) -> Result<CarrierConfig> {
        let pci = Pci::new(self.pci).ok_or_else(|| anyhow!("Invalid PCI: {}", self.pci))?;
        let scs = SubcarrierSpacing::from_u32(self.scs_khz)
            .ok_or_else(|| anyhow!("Invalid subcarrier spacing: {} kHz", self.scs_khz))?;
        let dmrs_type_a_pos = DmrsTypeAPos::from_symbol(self.dmrs_type_a_pos)
            .ok_or_else(|| anyhow!("Invalid dmrs-TypeA-Position: {}", self.dmrs_type_a_pos))?;

        Ok(CarrierConfig {
            pci,
            nof_prb: self.nof_prb,
            start: self.start,
            scs,
            cyclic_prefix: if self.extended_cp {
                CyclicPrefix::Extended
            } else {
                CyclicPrefix::Normal
            },
            dmrs_type_a_pos,
        })
    }

    pub fn to_sch_config(&self) -> Result<SchConfig> {
        let typea_pos = DmrsTypeAPos::from_symbol(self.dmrs_type_a_pos)
            .ok_or_else(|| anyhow!("Invalid dmrs-TypeA-Position: {}", self.dmrs_type_a_pos))?;
        let additional_pos = DmrsAdditionalPos::from_index(self.dmrs_additional_pos)
            .ok_or_else(|| anyhow!("Invalid dmrs-AdditionalPosition: {}", self.dmrs_additional_pos))?;
        let resource_allocation = match self.resource_allocation.as_str() {
            "type0" => ResourceAllocationType::Type0,
            "type1" => ResourceAllocationType::Type1,
            other => return Err(anyhow!("Invalid resource allocation type: {}", other)),
        };

        let dmrs = DmrsSchConfig {
            additional_pos,
            ..DmrsSchConfig::default()
        };
        Ok(SchConfig {
            resource_allocation,
            dmrs_type_a: Some(dmrs),
            dmrs_type_b: Some(dmrs),
            ..SchConfig::new(typea_pos)
        })
    }
}

impl UeConfig {
    /// Load configuration from YAML file
    pub fn from_yaml_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: UeConfig = serde_yaml::from_str(&contents)?;
        Ok(config)
    }

    pub fn to_phy_state(&self) -> Result<PhyState> {
        let carriers = self
            .carriers
            .iter()
            .map(|entry| -> Result<CarrierSetup> {
                Ok(CarrierSetup {
                    carrier: entry.to_carrier_config()?,
                    pdsch: entry.to_sch_config()?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let cell = CellParams {
            nof_rx_antennas: self.pipeline.nof_rx_antennas,
        };
        Ok(PhyState::new(cell, carriers)?)
    }

    pub fn to_pool_config(&self) -> Result<PoolConfig> {
        let tti_period_us = match self.pipeline.tti_period_us {
            Some(us) => us,
            None => {
                let first = self
                    .carriers
                    .first()
                    .ok_or_else(|| anyhow!("No carrier configured"))?;
                u64::from(slot_duration_us(first.to_carrier_config()?.scs))
            }
        };

        let config = PoolConfig {
            nof_workers: self.pipeline.nof_workers,
            tti_period: Duration::from_micros(tti_period_us),
            processing_deadline: Duration::from_micros(self.pipeline.processing_deadline_us),
            carrier_budget: Duration::from_micros(self.pipeline.carrier_budget_us),
            quiesce_timeout: Duration::from_millis(self.pipeline.quiesce_timeout_ms),
        };
        config.validate()?;
        Ok(config)
    }
}
