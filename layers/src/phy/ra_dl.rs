//! NR downlink resource allocation
//!
//! Turns the time and frequency assignment fields of a downlink DCI into a
//! [`PdschGrant`] following TS 38.214 Sections 5.1.2 and 5.1.6.2.
//!
//! Every function here is pure: the output depends only on the arguments, so
//! any number of workers may decode concurrently against a shared
//! configuration snapshot.

use super::carrier::{CarrierConfig, DmrsTypeAPos};
use super::dci::{DciDl, DciFormat, SearchSpaceType};
use super::dmrs::{self, DmrsType};
use super::grant::{DmrsAllocation, PdschGrant, PrbMask, TimeAllocation};
use super::sch_cfg::{
    DmrsSchConfig, MappingType, PdschTimeRaConfig, ResourceAllocationType, SchConfig, MAX_SLIV,
};
use common::types::{CyclicPrefix, RntiType};
use thiserror::Error;

/// Symbols per slot the SLIV is defined over
const SLIV_SYMBOLS: u32 = 14;

/// Resource allocation decoding errors
///
/// These are data errors caused by the received DCI or the configured
/// tables; the affected carrier simply has no usable allocation this TTI.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RaError {
    #[error("time domain allocation index {m} outside table of {rows} rows")]
    InvalidAllocationIndex { m: u32, rows: usize },

    #[error("frequency assignment {assignment:#x} out of range for {nof_prb} PRBs")]
    FrequencyAllocationOutOfRange { assignment: u32, nof_prb: u32 },

    #[error("frequency assignment {assignment:#x} allocates no PRB")]
    EmptyFrequencyAllocation { assignment: u32 },

    #[error("unsupported resource allocation type {0:?}")]
    UnsupportedAllocationType(ResourceAllocationType),

    #[error("missing configuration: {0}")]
    MissingConfiguration(&'static str),

    #[error("no PDSCH time domain allocation table for {rnti_type:?} RNTI in {ss_type:?} search space")]
    NoApplicableTable {
        rnti_type: RntiType,
        ss_type: SearchSpaceType,
    },

    #[error("invalid SLIV {0}")]
    InvalidSliv(u32),

    #[error("invalid PDSCH time allocation S={start} L={length} for mapping type {mapping:?}")]
    InvalidTimeAllocation {
        start: u32,
        length: u32,
        mapping: MappingType,
    },

    #[error("reserved antenna ports value {0}")]
    InvalidAntennaPorts(u8),

    #[error("unsupported DMRS configuration: {0}")]
    UnsupportedDmrsConfiguration(&'static str),

    #[error("grant for carrier {cc_idx} does not fit its {nof_prb} PRBs")]
    AllocationOutsideCarrier { cc_idx: u32, nof_prb: u32 },
}

/// Row of the default PDSCH time domain allocation A, keyed by the DMRS
/// type A position
struct DefaultARow {
    mapping: MappingType,
    /// (S, L) for dmrs-TypeA-Position 2
    pos2: (u32, u32),
    /// (S, L) for dmrs-TypeA-Position 3
    pos3: (u32, u32),
}

const fn row(mapping: MappingType, pos2: (u32, u32), pos3: (u32, u32)) -> DefaultARow {
    DefaultARow { mapping, pos2, pos3 }
}

/// Default PDSCH time domain resource allocation A for normal CP
/// (TS 38.214 Table 5.1.2.1.1-2). K0 is 0 for every row.
const DEFAULT_A: [DefaultARow; 16] = [
    row(MappingType::A, (2, 12), (3, 11)),
    row(MappingType::A, (2, 10), (3, 9)),
    row(MappingType::A, (2, 9), (3, 8)),
    row(MappingType::A, (2, 7), (3, 6)),
    row(MappingType::A, (2, 5), (3, 4)),
    row(MappingType::B, (9, 4), (10, 4)),
    row(MappingType::B, (4, 4), (6, 4)),
    row(MappingType::B, (5, 7), (5, 7)),
    row(MappingType::B, (5, 2), (5, 2)),
    row(MappingType::B, (9, 2), (9, 2)),
    row(MappingType::B, (12, 2), (12, 2)),
    row(MappingType::A, (1, 13), (1, 13)),
    row(MappingType::A, (1, 6), (1, 6)),
    row(MappingType::A, (2, 4), (2, 4)),
    row(MappingType::B, (4, 7), (4, 7)),
    row(MappingType::B, (8, 4), (8, 4)),
];

/// Where the time domain allocation rows come from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TableSource {
    /// Default A regardless of configuration
    DefaultA,
    /// `pdsch-ConfigCommon` list, else default A
    Common,
    /// `pdsch-Config` list, else `pdsch-ConfigCommon` list, else default A
    Dedicated,
}

/// One row of TS 38.214 Table 5.1.2.1.1-1
struct TableRule {
    rnti_types: &'static [RntiType],
    search_space: fn(SearchSpaceType, u32) -> bool,
    source: TableSource,
}

fn is_type0_css(ss: SearchSpaceType, _coreset_id: u32) -> bool {
    ss == SearchSpaceType::Common0
}

fn is_type0a_css(ss: SearchSpaceType, _coreset_id: u32) -> bool {
    ss == SearchSpaceType::Common0A
}

fn is_type1_css(ss: SearchSpaceType, _coreset_id: u32) -> bool {
    ss == SearchSpaceType::Common1
}

fn is_type2_css(ss: SearchSpaceType, _coreset_id: u32) -> bool {
    ss == SearchSpaceType::Common2
}

fn is_css_on_coreset0(ss: SearchSpaceType, coreset_id: u32) -> bool {
    ss.is_common() && coreset_id == 0
}

fn is_css_off_coreset0_or_uss(ss: SearchSpaceType, coreset_id: u32) -> bool {
    !ss.is_common() || coreset_id != 0
}

const UE_DEDICATED_RNTIS: &[RntiType] = &[RntiType::C, RntiType::McsC, RntiType::Cs];

/// Applicable PDSCH time domain resource allocation table selection.
/// Row 1 assumes SS/PBCH block and CORESET multiplexing pattern 1.
const TABLE_RULES: [TableRule; 6] = [
    TableRule {
        rnti_types: &[RntiType::Si],
        search_space: is_type0_css,
        source: TableSource::DefaultA,
    },
    TableRule {
        rnti_types: &[RntiType::Si],
        search_space: is_type0a_css,
        source: TableSource::Common,
    },
    TableRule {
        rnti_types: &[RntiType::Ra, RntiType::Tc],
        search_space: is_type1_css,
        source: TableSource::Common,
    },
    TableRule {
        rnti_types: &[RntiType::P],
        search_space: is_type2_css,
        source: TableSource::Common,
    },
    TableRule {
        rnti_types: UE_DEDICATED_RNTIS,
        search_space: is_css_on_coreset0,
        source: TableSource::Common,
    },
    TableRule {
        rnti_types: UE_DEDICATED_RNTIS,
        search_space: is_css_off_coreset0_or_uss,
        source: TableSource::Dedicated,
    },
];

/// Decode the time domain resource assignment `m` of a DCI.
///
/// The applicable table is the first row of TS 38.214 Table 5.1.2.1.1-1
/// matching the RNTI type, search space and CORESET. Configured rows are
/// expanded from their SLIV. The result is checked against the valid S and L
/// combinations for the carrier's cyclic prefix.
pub fn decode_time_domain(
    cfg: &SchConfig,
    cyclic_prefix: CyclicPrefix,
    rnti_type: RntiType,
    ss_type: SearchSpaceType,
    coreset_id: u32,
    m: u32,
) -> Result<TimeAllocation, RaError> {
    let rule = TABLE_RULES
        .iter()
        .find(|rule| rule.rnti_types.contains(&rnti_type) && (rule.search_space)(ss_type, coreset_id))
        .ok_or(RaError::NoApplicableTable { rnti_type, ss_type })?;

    let rows: &[PdschTimeRaConfig] = match rule.source {
        TableSource::DefaultA => &[],
        TableSource::Common => &cfg.common_time_ra,
        TableSource::Dedicated if !cfg.dedicated_time_ra.is_empty() => &cfg.dedicated_time_ra,
        TableSource::Dedicated => &cfg.common_time_ra,
    };

    let time = if rows.is_empty() {
        decode_time_domain_default_a(m, cfg.typea_pos)?
    } else {
        let row = rows.get(m as usize).ok_or(RaError::InvalidAllocationIndex {
            m,
            rows: rows.len(),
        })?;
        let (start, length) = sliv_to_s_and_l(row.sliv)?;
        TimeAllocation {
            k0: row.k0,
            mapping: row.mapping,
            start,
            length,
        }
    };

    validate_time_allocation(&time, cyclic_prefix, cfg.typea_pos)?;
    Ok(time)
}

/// Default PDSCH time domain allocation A (TS 38.214 Table 5.1.2.1.1-2)
pub fn decode_time_domain_default_a(m: u32, typea_pos: DmrsTypeAPos) -> Result<TimeAllocation, RaError> {
    let row = DEFAULT_A.get(m as usize).ok_or(RaError::InvalidAllocationIndex {
        m,
        rows: DEFAULT_A.len(),
    })?;

    let (start, length) = match typea_pos {
        DmrsTypeAPos::Pos2 => row.pos2,
        DmrsTypeAPos::Pos3 => row.pos3,
    };

    Ok(TimeAllocation {
        k0: 0,
        mapping: row.mapping,
        start,
        length,
    })
}

/// Expand a start and length indicator into (S, L) (TS 38.214 Section 5.1.2.1)
pub fn sliv_to_s_and_l(sliv: u32) -> Result<(u32, u32), RaError> {
    if sliv > MAX_SLIV {
        return Err(RaError::InvalidSliv(sliv));
    }

    let low = sliv % SLIV_SYMBOLS;
    let high = sliv / SLIV_SYMBOLS;

    if high + 1 + low <= SLIV_SYMBOLS {
        Ok((low, high + 1))
    } else {
        Ok((SLIV_SYMBOLS - 1 - low, SLIV_SYMBOLS - high + 1))
    }
}

/// Check S and L against the valid combinations of TS 38.214 Table 5.1.2.1-1
pub fn validate_time_allocation(
    time: &TimeAllocation,
    cyclic_prefix: CyclicPrefix,
    typea_pos: DmrsTypeAPos,
) -> Result<(), RaError> {
    let (s, l) = (time.start, time.length);
    let end = s + l;
    // S = 3 is only allowed when the first DMRS sits on symbol 3
    let type_a_start_ok = s <= 3 && (s != 3 || typea_pos == DmrsTypeAPos::Pos3);

    let valid = match (cyclic_prefix, time.mapping) {
        (CyclicPrefix::Normal, MappingType::A) => {
            type_a_start_ok && (3..=14).contains(&l) && (3..=14).contains(&end)
        }
        (CyclicPrefix::Normal, MappingType::B) => {
            s <= 12 && matches!(l, 2 | 4 | 7) && (2..=14).contains(&end)
        }
        (CyclicPrefix::Extended, MappingType::A) => {
            type_a_start_ok && (3..=12).contains(&l) && (3..=12).contains(&end)
        }
        (CyclicPrefix::Extended, MappingType::B) => {
            s <= 10 && matches!(l, 2 | 4 | 6) && (2..=12).contains(&end)
        }
    };

    if valid {
        Ok(())
    } else {
        Err(RaError::InvalidTimeAllocation {
            start: s,
            length: l,
            mapping: time.mapping,
        })
    }
}

/// CDM groups without data for DCI format 1_0 (TS 38.214 Section 5.1.6.2)
///
/// One group when the PDSCH spans two symbols, two otherwise. Requires the
/// DMRS configuration of the allocation's mapping type.
pub fn nof_dmrs_cdm_groups_without_data_format_1_0(
    cfg: &SchConfig,
    time: &TimeAllocation,
) -> Result<u32, RaError> {
    dmrs_config(cfg, time.mapping)?;
    Ok(if time.length == 2 { 1 } else { 2 })
}

/// CDM groups without data for DCI format 1_1 from its antenna ports field,
/// single-symbol DMRS (TS 38.212 Tables 7.3.1.2.2-1 and 7.3.1.2.2-3)
pub fn nof_dmrs_cdm_groups_without_data_format_1_1(
    dmrs_type: DmrsType,
    antenna_ports: u8,
) -> Result<u32, RaError> {
    match (dmrs_type, antenna_ports) {
        (DmrsType::Type1, 0..=2) => Ok(1),
        (DmrsType::Type1, 3..=11) => Ok(2),
        (DmrsType::Type2, 0..=2) => Ok(1),
        (DmrsType::Type2, 3..=10) => Ok(2),
        (DmrsType::Type2, 11..=22) => Ok(3),
        (DmrsType::Type2, 23) => Ok(2),
        _ => Err(RaError::InvalidAntennaPorts(antenna_ports)),
    }
}

/// Decode the frequency domain resource assignment of a DCI.
///
/// Format 1_0 always uses type 1 over the carrier bandwidth; format 1_1 uses
/// the configured allocation type.
pub fn decode_frequency_domain(
    carrier: &CarrierConfig,
    cfg: &SchConfig,
    dci: &DciDl,
) -> Result<PrbMask, RaError> {
    let alloc_type = match dci.format {
        DciFormat::Format1_0 => ResourceAllocationType::Type1,
        DciFormat::Format1_1 { .. } => cfg.resource_allocation,
    };

    let assignment = dci.freq_domain_assignment;
    let mask = match alloc_type {
        ResourceAllocationType::Type0 => {
            decode_type0(carrier.nof_prb, carrier.start, cfg.rbg_size_cfg_1, assignment)?
        }
        ResourceAllocationType::Type1 => {
            let (start, len) = riv_to_start_and_len(carrier.nof_prb, assignment).ok_or(
                RaError::FrequencyAllocationOutOfRange {
                    assignment,
                    nof_prb: carrier.nof_prb,
                },
            )?;
            PrbMask::from_range(start, len)
        }
        ResourceAllocationType::DynamicSwitch => {
            return Err(RaError::UnsupportedAllocationType(alloc_type));
        }
    };

    if mask.is_empty() {
        return Err(RaError::EmptyFrequencyAllocation { assignment });
    }

    Ok(mask)
}

/// Nominal RBG size P (TS 38.214 Table 5.1.2.2.1-1)
pub fn nominal_rbg_size(bwp_size: u32, rbg_size_cfg_1: bool) -> u32 {
    match (bwp_size, rbg_size_cfg_1) {
        (0..=36, true) => 2,
        (0..=36, false) => 4,
        (37..=72, true) => 4,
        (37..=72, false) => 8,
        (73..=144, true) => 8,
        (73..=144, false) => 16,
        _ => 16,
    }
}

/// Type 0: bitmap over RBGs, MSB first. The first and last RBG are cut to
/// the carrier edges.
fn decode_type0(nof_prb: u32, start: u32, rbg_size_cfg_1: bool, bitmap: u32) -> Result<PrbMask, RaError> {
    let p = nominal_rbg_size(nof_prb, rbg_size_cfg_1);
    let nof_rbg = (nof_prb + start % p).div_ceil(p);

    if nof_rbg < 32 && bitmap >> nof_rbg != 0 {
        return Err(RaError::FrequencyAllocationOutOfRange {
            assignment: bitmap,
            nof_prb,
        });
    }

    let first_rbg_size = (p - start % p).min(nof_prb);
    let mut mask = PrbMask::new();

    for rbg in 0..nof_rbg {
        if (bitmap >> (nof_rbg - rbg - 1)) & 1 == 0 {
            continue;
        }

        if rbg == 0 {
            mask.set_range(0, first_rbg_size);
        } else {
            let rbg_start = first_rbg_size + (rbg - 1) * p;
            mask.set_range(rbg_start, p.min(nof_prb - rbg_start));
        }
    }

    Ok(mask)
}

/// Type 1: resource indication value to (start, length) over `n_bwp` PRBs
pub fn riv_to_start_and_len(n_bwp: u32, riv: u32) -> Option<(u32, u32)> {
    // Values above the last valid allocation are reserved
    if n_bwp == 0 || riv >= n_bwp * (n_bwp + 1) / 2 {
        return None;
    }

    let low = riv % n_bwp;
    let high = riv / n_bwp;

    let (start, len) = if high + 1 + low <= n_bwp {
        (low, high + 1)
    } else {
        (n_bwp - 1 - low, n_bwp - high + 1)
    };

    if len == 0 || start + len > n_bwp {
        return None;
    }

    Some((start, len))
}

/// Type 1 resource indication value for `len` PRBs from `start`
/// (TS 38.214 Section 5.1.2.2.2)
pub fn riv_type1(n_bwp: u32, start: u32, len: u32) -> Option<u32> {
    if len == 0 || start + len > n_bwp {
        return None;
    }

    if len - 1 <= n_bwp / 2 {
        Some(n_bwp * (len - 1) + start)
    } else {
        Some(n_bwp * (n_bwp - len + 1) + (n_bwp - 1 - start))
    }
}

fn dmrs_config(cfg: &SchConfig, mapping: MappingType) -> Result<&DmrsSchConfig, RaError> {
    cfg.dmrs_config(mapping).ok_or(match mapping {
        MappingType::A => RaError::MissingConfiguration("dmrs-DownlinkForPDSCH-MappingTypeA"),
        MappingType::B => RaError::MissingConfiguration("dmrs-DownlinkForPDSCH-MappingTypeB"),
    })
}

/// Decode a downlink DCI into a complete PDSCH grant for carrier `cc_idx`
pub fn decode_grant(
    carrier: &CarrierConfig,
    cfg: &SchConfig,
    cc_idx: u32,
    dci: &DciDl,
) -> Result<PdschGrant, RaError> {
    let time = decode_time_domain(
        cfg,
        carrier.cyclic_prefix,
        dci.rnti_type,
        dci.ss_type,
        dci.coreset_id,
        dci.time_domain_assignment,
    )?;

    let freq = decode_frequency_domain(carrier, cfg, dci)?;

    let dmrs_cfg = dmrs_config(cfg, time.mapping)?;
    let nof_cdm_groups_without_data = match dci.format {
        DciFormat::Format1_0 => nof_dmrs_cdm_groups_without_data_format_1_0(cfg, &time)?,
        DciFormat::Format1_1 { antenna_ports } => {
            nof_dmrs_cdm_groups_without_data_format_1_1(dmrs_cfg.dmrs_type, antenna_ports)?
        }
    };
    let symbols = dmrs::pdsch_dmrs_symbols(&time, cfg.typea_pos, dmrs_cfg.additional_pos)?;

    Ok(PdschGrant {
        cc_idx,
        rnti: dci.rnti,
        rnti_type: dci.rnti_type,
        time,
        freq,
        dmrs: DmrsAllocation {
            dmrs_type: dmrs_cfg.dmrs_type,
            symbols,
            nof_cdm_groups_without_data,
            n_id: dmrs_cfg.scrambling_id.unwrap_or(carrier.pci.0),
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::types::{Pci, Rnti, SubcarrierSpacing};

    const NORMAL: CyclicPrefix = CyclicPrefix::Normal;

    fn carrier_52() -> CarrierConfig {
        CarrierConfig {
            pci: Pci(500),
            nof_prb: 52,
            start: 0,
            scs: SubcarrierSpacing::Scs15,
            cyclic_prefix: CyclicPrefix::Normal,
            dmrs_type_a_pos: DmrsTypeAPos::Pos2,
        }
    }

    fn dci(rnti_type: RntiType, ss_type: SearchSpaceType, freq: u32, m: u32) -> DciDl {
        DciDl {
            rnti: Rnti(0x4601),
            rnti_type,
            ss_type,
            coreset_id: 1,
            format: DciFormat::Format1_0,
            freq_domain_assignment: freq,
            time_domain_assignment: m,
        }
    }

    fn time_row(mapping: MappingType, start: u32, length: u32) -> PdschTimeRaConfig {
        let sliv = if length - 1 <= 7 {
            14 * (length - 1) + start
        } else {
            14 * (14 - length + 1) + (14 - 1 - start)
        };
        PdschTimeRaConfig { k0: 0, mapping, sliv }
    }

    #[test]
    fn test_default_a_first_row() {
        let time = decode_time_domain_default_a(0, DmrsTypeAPos::Pos2).unwrap();
        assert_eq!(time.start, 2);
        assert_eq!(time.length, 12);
        assert_eq!(time.mapping, MappingType::A);
        assert_eq!(time.k0, 0);

        let time = decode_time_domain_default_a(0, DmrsTypeAPos::Pos3).unwrap();
        assert_eq!((time.start, time.length), (3, 11));
    }

    #[test]
    fn test_default_a_rows_are_valid() {
        for typea_pos in [DmrsTypeAPos::Pos2, DmrsTypeAPos::Pos3] {
            for m in 0..16 {
                let time = decode_time_domain_default_a(m, typea_pos).unwrap();
                assert!(time.end() <= 14, "row {} overruns the slot", m);
                assert!(
                    validate_time_allocation(&time, CyclicPrefix::Normal, typea_pos).is_ok(),
                    "row {} invalid for {:?}: {:?}",
                    m,
                    typea_pos,
                    time
                );
            }
        }
    }

    #[test]
    fn test_default_a_index_out_of_range() {
        for m in [16, 17, 255, u32::MAX] {
            assert_eq!(
                decode_time_domain_default_a(m, DmrsTypeAPos::Pos2),
                Err(RaError::InvalidAllocationIndex { m, rows: 16 })
            );
        }
    }

    #[test]
    fn test_sliv_decoding() {
        assert_eq!(sliv_to_s_and_l(53), Ok((2, 12)));
        assert_eq!(sliv_to_s_and_l(27), Ok((0, 14)));
        assert_eq!(sliv_to_s_and_l(44), Ok((2, 4)));
        assert_eq!(sliv_to_s_and_l(128), Err(RaError::InvalidSliv(128)));

        for sliv in 0..=MAX_SLIV {
            let (s, l) = sliv_to_s_and_l(sliv).unwrap();
            assert!(l >= 1 && s + l <= 14, "SLIV {} gives S={} L={}", sliv, s, l);
        }
    }

    #[test]
    fn test_si_rnti_type0_css_ignores_configured_list() {
        let mut cfg = SchConfig::new(DmrsTypeAPos::Pos2);
        cfg.common_time_ra = vec![time_row(MappingType::A, 1, 5)];

        let time = decode_time_domain(&cfg, NORMAL, RntiType::Si, SearchSpaceType::Common0, 0, 0).unwrap();
        assert_eq!((time.start, time.length), (2, 12));
    }

    #[test]
    fn test_common_rows_use_configured_list() {
        let mut cfg = SchConfig::new(DmrsTypeAPos::Pos2);
        for (rnti_type, ss_type) in [
            (RntiType::Si, SearchSpaceType::Common0A),
            (RntiType::Ra, SearchSpaceType::Common1),
            (RntiType::Tc, SearchSpaceType::Common1),
            (RntiType::P, SearchSpaceType::Common2),
        ] {
            cfg.common_time_ra.clear();
            let time = decode_time_domain(&cfg, NORMAL, rnti_type, ss_type, 0, 1).unwrap();
            assert_eq!((time.start, time.length), (2, 10), "{:?}", rnti_type);

            cfg.common_time_ra = vec![time_row(MappingType::A, 1, 5), time_row(MappingType::B, 5, 7)];
            let time = decode_time_domain(&cfg, NORMAL, rnti_type, ss_type, 0, 1).unwrap();
            assert_eq!((time.mapping, time.start, time.length), (MappingType::B, 5, 7));

            assert_eq!(
                decode_time_domain(&cfg, NORMAL, rnti_type, ss_type, 0, 2),
                Err(RaError::InvalidAllocationIndex { m: 2, rows: 2 })
            );
        }
    }

    #[test]
    fn test_c_rnti_table_selection() {
        let mut cfg = SchConfig::new(DmrsTypeAPos::Pos2);

        // Nothing configured: default A
        let time = decode_time_domain(&cfg, NORMAL, RntiType::C, SearchSpaceType::Ue, 1, 0).unwrap();
        assert_eq!((time.start, time.length), (2, 12));

        // Common list only
        cfg.common_time_ra = vec![time_row(MappingType::A, 1, 6)];
        let time = decode_time_domain(&cfg, NORMAL, RntiType::C, SearchSpaceType::Ue, 1, 0).unwrap();
        assert_eq!((time.start, time.length), (1, 6));

        // Dedicated list wins in the UE search space
        cfg.dedicated_time_ra = vec![time_row(MappingType::A, 0, 14)];
        let time = decode_time_domain(&cfg, NORMAL, RntiType::McsC, SearchSpaceType::Ue, 1, 0).unwrap();
        assert_eq!((time.start, time.length), (0, 14));

        // ...and in a common search space outside CORESET 0
        let time = decode_time_domain(&cfg, NORMAL, RntiType::Cs, SearchSpaceType::Common3, 2, 0).unwrap();
        assert_eq!((time.start, time.length), (0, 14));

        // Common search space on CORESET 0 never uses the dedicated list
        let time = decode_time_domain(&cfg, NORMAL, RntiType::C, SearchSpaceType::Common3, 0, 0).unwrap();
        assert_eq!((time.start, time.length), (1, 6));
    }

    #[test]
    fn test_no_applicable_table() {
        let cfg = SchConfig::new(DmrsTypeAPos::Pos2);
        assert_eq!(
            decode_time_domain(&cfg, NORMAL, RntiType::Ra, SearchSpaceType::Ue, 1, 0),
            Err(RaError::NoApplicableTable {
                rnti_type: RntiType::Ra,
                ss_type: SearchSpaceType::Ue
            })
        );
        assert!(decode_time_domain(&cfg, NORMAL, RntiType::SpCsi, SearchSpaceType::Ue, 1, 0).is_err());
    }

    #[test]
    fn test_configured_row_is_validated() {
        let mut cfg = SchConfig::new(DmrsTypeAPos::Pos2);
        // SLIV 89: S=5 L=7, not a legal type A start
        cfg.dedicated_time_ra = vec![PdschTimeRaConfig {
            k0: 0,
            mapping: MappingType::A,
            sliv: 14 * 6 + 5,
        }];
        let invalid = Err(RaError::InvalidTimeAllocation {
            start: 5,
            length: 7,
            mapping: MappingType::A,
        });
        assert_eq!(decode_time_domain(&cfg, NORMAL, RntiType::C, SearchSpaceType::Ue, 1, 0), invalid);

        // Same S and L are legal for mapping type B
        cfg.dedicated_time_ra[0].mapping = MappingType::B;
        let time = decode_time_domain(&cfg, NORMAL, RntiType::C, SearchSpaceType::Ue, 1, 0).unwrap();
        assert_eq!((time.start, time.length), (5, 7));

        // Full slot type A fits a normal CP slot but not an extended CP one
        cfg.dedicated_time_ra = vec![time_row(MappingType::A, 0, 14)];
        assert!(decode_time_domain(&cfg, NORMAL, RntiType::C, SearchSpaceType::Ue, 1, 0).is_ok());
        assert_eq!(
            decode_time_domain(&cfg, CyclicPrefix::Extended, RntiType::C, SearchSpaceType::Ue, 1, 0),
            Err(RaError::InvalidTimeAllocation {
                start: 0,
                length: 14,
                mapping: MappingType::A,
            })
        );

        let dci = dci(RntiType::C, SearchSpaceType::Ue, riv_type1(52, 0, 52).unwrap(), 0);
        cfg.dedicated_time_ra = vec![PdschTimeRaConfig {
            k0: 0,
            mapping: MappingType::A,
            sliv: 14 * 6 + 5,
        }];
        assert!(matches!(
            decode_grant(&carrier_52(), &cfg, 0, &dci),
            Err(RaError::InvalidTimeAllocation { .. })
        ));
    }

    #[test]
    fn test_time_allocation_validation() {
        let check = |mapping, start, length, cp, pos| {
            validate_time_allocation(&TimeAllocation { k0: 0, mapping, start, length }, cp, pos).is_ok()
        };
        let normal = CyclicPrefix::Normal;
        let extended = CyclicPrefix::Extended;

        assert!(check(MappingType::A, 0, 14, normal, DmrsTypeAPos::Pos2));
        assert!(!check(MappingType::A, 4, 10, normal, DmrsTypeAPos::Pos2));
        assert!(!check(MappingType::A, 3, 11, normal, DmrsTypeAPos::Pos2));
        assert!(check(MappingType::A, 3, 11, normal, DmrsTypeAPos::Pos3));
        assert!(!check(MappingType::A, 2, 2, normal, DmrsTypeAPos::Pos2));
        assert!(check(MappingType::B, 12, 2, normal, DmrsTypeAPos::Pos2));
        assert!(!check(MappingType::B, 5, 3, normal, DmrsTypeAPos::Pos2));
        assert!(!check(MappingType::B, 10, 7, normal, DmrsTypeAPos::Pos2));

        assert!(!check(MappingType::A, 2, 12, extended, DmrsTypeAPos::Pos2));
        assert!(check(MappingType::A, 2, 10, extended, DmrsTypeAPos::Pos2));
        assert!(check(MappingType::B, 6, 6, extended, DmrsTypeAPos::Pos2));
        assert!(!check(MappingType::B, 6, 7, extended, DmrsTypeAPos::Pos2));
    }

    #[test]
    fn test_cdm_groups_format_1_0() {
        let mut cfg = SchConfig::new(DmrsTypeAPos::Pos2);
        let long = decode_time_domain_default_a(0, DmrsTypeAPos::Pos2).unwrap();
        let short = decode_time_domain_default_a(8, DmrsTypeAPos::Pos2).unwrap();
        assert_eq!(short.length, 2);

        assert_eq!(nof_dmrs_cdm_groups_without_data_format_1_0(&cfg, &long), Ok(2));
        assert_eq!(nof_dmrs_cdm_groups_without_data_format_1_0(&cfg, &short), Ok(1));

        cfg.dmrs_type_b = None;
        assert!(matches!(
            nof_dmrs_cdm_groups_without_data_format_1_0(&cfg, &short),
            Err(RaError::MissingConfiguration(_))
        ));
        assert_eq!(nof_dmrs_cdm_groups_without_data_format_1_0(&cfg, &long), Ok(2));
    }

    #[test]
    fn test_cdm_groups_format_1_1() {
        assert_eq!(nof_dmrs_cdm_groups_without_data_format_1_1(DmrsType::Type1, 0), Ok(1));
        assert_eq!(nof_dmrs_cdm_groups_without_data_format_1_1(DmrsType::Type1, 7), Ok(2));
        assert_eq!(
            nof_dmrs_cdm_groups_without_data_format_1_1(DmrsType::Type1, 12),
            Err(RaError::InvalidAntennaPorts(12))
        );
        assert_eq!(nof_dmrs_cdm_groups_without_data_format_1_1(DmrsType::Type2, 15), Ok(3));
        assert_eq!(nof_dmrs_cdm_groups_without_data_format_1_1(DmrsType::Type2, 23), Ok(2));
        assert!(nof_dmrs_cdm_groups_without_data_format_1_1(DmrsType::Type2, 24).is_err());
    }

    #[test]
    fn test_type1_upper_half() {
        let carrier = carrier_52();
        let cfg = SchConfig::new(DmrsTypeAPos::Pos2);
        let riv = 52 * 25 + 26;
        let mask = decode_frequency_domain(&carrier, &cfg, &dci(RntiType::C, SearchSpaceType::Ue, riv, 0)).unwrap();

        assert_eq!(mask.first(), Some(26));
        assert_eq!(mask.last(), Some(51));
        assert_eq!(mask.count(), 26);
    }

    #[test]
    fn test_type1_full_bandwidth() {
        let carrier = carrier_52();
        let cfg = SchConfig::new(DmrsTypeAPos::Pos2);
        let riv = riv_type1(52, 0, 52).unwrap();
        let mask = decode_frequency_domain(&carrier, &cfg, &dci(RntiType::C, SearchSpaceType::Ue, riv, 0)).unwrap();

        assert_eq!(mask, PrbMask::from_range(0, 52));
    }

    #[test]
    fn test_riv_encoding_inverts_decoding() {
        for n in [1, 24, 52, 275] {
            for start in 0..n {
                for len in 1..=(n - start) {
                    let riv = riv_type1(n, start, len).unwrap();
                    assert_eq!(riv_to_start_and_len(n, riv), Some((start, len)));
                }
            }
            assert_eq!(riv_to_start_and_len(n, n * (n + 1) / 2), None);
        }
        assert_eq!(riv_type1(52, 50, 3), None);
        assert_eq!(riv_type1(52, 0, 0), None);
    }

    #[test]
    fn test_type1_out_of_range() {
        let carrier = carrier_52();
        let cfg = SchConfig::new(DmrsTypeAPos::Pos2);
        let riv = 52 * 53 / 2;
        assert_eq!(
            decode_frequency_domain(&carrier, &cfg, &dci(RntiType::C, SearchSpaceType::Ue, riv, 0)),
            Err(RaError::FrequencyAllocationOutOfRange { assignment: riv, nof_prb: 52 })
        );
    }

    #[test]
    fn test_type0_bitmap() {
        let carrier = carrier_52();
        let mut cfg = SchConfig::new(DmrsTypeAPos::Pos2);
        cfg.resource_allocation = ResourceAllocationType::Type0;
        let mut format_1_1 = dci(RntiType::C, SearchSpaceType::Ue, 0b1_0000_0000_0001, 0);
        format_1_1.format = DciFormat::Format1_1 { antenna_ports: 0 };

        // 13 RBGs of 4 PRBs: first and last
        let mask = decode_frequency_domain(&carrier, &cfg, &format_1_1).unwrap();
        assert_eq!(mask.iter().collect::<Vec<_>>(), vec![0, 1, 2, 3, 48, 49, 50, 51]);

        // Bit above the RBG count
        format_1_1.freq_domain_assignment = 1 << 13;
        assert!(matches!(
            decode_frequency_domain(&carrier, &cfg, &format_1_1),
            Err(RaError::FrequencyAllocationOutOfRange { .. })
        ));

        format_1_1.freq_domain_assignment = 0;
        assert_eq!(
            decode_frequency_domain(&carrier, &cfg, &format_1_1),
            Err(RaError::EmptyFrequencyAllocation { assignment: 0 })
        );
    }

    #[test]
    fn test_type0_unaligned_carrier() {
        let mut carrier = carrier_52();
        carrier.start = 2;
        let mut cfg = SchConfig::new(DmrsTypeAPos::Pos2);
        cfg.resource_allocation = ResourceAllocationType::Type0;
        let mut format_1_1 = dci(RntiType::C, SearchSpaceType::Ue, 0, 0);
        format_1_1.format = DciFormat::Format1_1 { antenna_ports: 3 };

        // 14 RBGs: first and last hold two PRBs each
        format_1_1.freq_domain_assignment = (1 << 13) | (1 << 12) | 1;
        let mask = decode_frequency_domain(&carrier, &cfg, &format_1_1).unwrap();
        assert_eq!(mask.iter().collect::<Vec<_>>(), vec![0, 1, 2, 3, 4, 5, 50, 51]);
    }

    #[test]
    fn test_format_1_0_ignores_configured_type0() {
        let carrier = carrier_52();
        let mut cfg = SchConfig::new(DmrsTypeAPos::Pos2);
        cfg.resource_allocation = ResourceAllocationType::Type0;
        let mask = decode_frequency_domain(&carrier, &cfg, &dci(RntiType::Tc, SearchSpaceType::Common1, 1326, 0)).unwrap();
        assert_eq!(mask, PrbMask::from_range(26, 26));
    }

    #[test]
    fn test_dynamic_switch_unsupported() {
        let carrier = carrier_52();
        let mut cfg = SchConfig::new(DmrsTypeAPos::Pos2);
        cfg.resource_allocation = ResourceAllocationType::DynamicSwitch;
        let mut format_1_1 = dci(RntiType::C, SearchSpaceType::Ue, 1326, 0);
        format_1_1.format = DciFormat::Format1_1 { antenna_ports: 0 };

        assert_eq!(
            decode_frequency_domain(&carrier, &cfg, &format_1_1),
            Err(RaError::UnsupportedAllocationType(ResourceAllocationType::DynamicSwitch))
        );
    }

    #[test]
    fn test_nominal_rbg_size() {
        assert_eq!(nominal_rbg_size(24, true), 2);
        assert_eq!(nominal_rbg_size(52, true), 4);
        assert_eq!(nominal_rbg_size(52, false), 8);
        assert_eq!(nominal_rbg_size(106, true), 8);
        assert_eq!(nominal_rbg_size(273, true), 16);
    }

    #[test]
    fn test_decode_grant() {
        let carrier = carrier_52();
        let cfg = SchConfig::new(DmrsTypeAPos::Pos2);
        let grant = decode_grant(&carrier, &cfg, 0, &dci(RntiType::C, SearchSpaceType::Ue, 1326, 0)).unwrap();

        assert_eq!(grant.cc_idx, 0);
        assert_eq!(grant.rnti, Rnti(0x4601));
        assert_eq!((grant.time.start, grant.time.length), (2, 12));
        assert_eq!(grant.freq, PrbMask::from_range(26, 26));
        assert_eq!(grant.dmrs.symbols.as_slice(), &[2, 7, 11]);
        assert_eq!(grant.dmrs.nof_cdm_groups_without_data, 2);
        assert_eq!(grant.dmrs.n_id, 500);
        assert!(grant.fits(&carrier));
    }

    #[test]
    fn test_decode_grant_is_idempotent() {
        let carrier = carrier_52();
        let mut cfg = SchConfig::new(DmrsTypeAPos::Pos2);
        cfg.dedicated_time_ra = vec![time_row(MappingType::B, 4, 7), time_row(MappingType::A, 0, 14)];
        let dci = dci(RntiType::C, SearchSpaceType::Ue, riv_type1(52, 10, 20).unwrap(), 1);

        let first = decode_grant(&carrier, &cfg, 0, &dci);
        let second = decode_grant(&carrier, &cfg, 0, &dci);
        assert!(first.is_ok());
        assert_eq!(first, second);
    }

    #[test]
    fn test_decode_grant_rejects_invalid_configured_row() {
        let carrier = carrier_52();
        let mut cfg = SchConfig::new(DmrsTypeAPos::Pos2);
        // Type A may not start at symbol 5
        cfg.dedicated_time_ra = vec![time_row(MappingType::A, 5, 7)];
        let dci = dci(RntiType::C, SearchSpaceType::Ue, 1326, 0);

        assert_eq!(
            decode_grant(&carrier, &cfg, 0, &dci),
            Err(RaError::InvalidTimeAllocation { start: 5, length: 7, mapping: MappingType::A })
        );
    }
}
