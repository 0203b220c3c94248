/// DMRS (Demodulation Reference Signal) for PDSCH
/// Based on 3GPP TS 38.211 Section 7.4.1.1

use super::carrier::DmrsTypeAPos;
use super::grant::{DmrsSymbols, TimeAllocation};
use super::ra_dl::RaError;
use super::sch_cfg::MappingType;
use num_complex::Complex32;

/// DMRS Type configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DmrsType {
    Type1,
    Type2,
}

impl DmrsType {
    /// Get number of DMRS per resource block of one CDM group
    pub fn nof_dmrs_per_rb(&self) -> usize {
        match self {
            DmrsType::Type1 => 6,  // Every other subcarrier
            DmrsType::Type2 => 4,  // Two groups of 2 consecutive subcarriers
        }
    }

    /// Number of CDM groups
    pub fn nof_cdm_groups(&self) -> u32 {
        match self {
            DmrsType::Type1 => 2,
            DmrsType::Type2 => 3,
        }
    }

    /// CDM group occupying subcarrier `k` of a resource block (0..12)
    pub fn cdm_group(&self, k: usize) -> u32 {
        match self {
            DmrsType::Type1 => (k % 2) as u32,
            DmrsType::Type2 => ((k % 6) / 2) as u32,
        }
    }
}

/// `dmrs-AdditionalPosition`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DmrsAdditionalPos {
    Pos0,
    Pos1,
    Pos2,
    Pos3,
}

impl DmrsAdditionalPos {
    pub fn from_index(index: u32) -> Option<Self> {
        match index {
            0 => Some(DmrsAdditionalPos::Pos0),
            1 => Some(DmrsAdditionalPos::Pos1),
            2 => Some(DmrsAdditionalPos::Pos2),
            3 => Some(DmrsAdditionalPos::Pos3),
            _ => None,
        }
    }
}

/// Single-symbol PDSCH DMRS positions (TS 38.211 Table 7.4.1.1.2-3)
///
/// Returns absolute symbol indices in the slot. Mapping type A positions are
/// keyed by the duration from slot start to the last PDSCH symbol and anchored
/// at `typea_pos`; mapping type B positions are keyed by the PDSCH duration and
/// anchored at its first symbol.
pub fn pdsch_dmrs_symbols(
    time: &TimeAllocation,
    typea_pos: DmrsTypeAPos,
    additional_pos: DmrsAdditionalPos,
) -> Result<DmrsSymbols, RaError> {
    use DmrsAdditionalPos::*;

    match time.mapping {
        MappingType::A => {
            if additional_pos == Pos3 && typea_pos != DmrsTypeAPos::Pos2 {
                return Err(RaError::UnsupportedDmrsConfiguration(
                    "dmrs-AdditionalPosition pos3 with dmrs-TypeA-Position pos3",
                ));
            }

            let l0 = typea_pos.symbol();
            let ld = time.end();
            let symbols = match (ld, additional_pos) {
                (0..=2, _) => {
                    return Err(RaError::UnsupportedDmrsConfiguration(
                        "mapping type A shorter than 3 symbols",
                    ))
                }
                (3..=7, _) | (_, Pos0) => DmrsSymbols::from_slice(&[l0]),
                (8..=9, _) => DmrsSymbols::from_slice(&[l0, 7]),
                (10..=11, Pos1) => DmrsSymbols::from_slice(&[l0, 9]),
                (10..=11, _) => DmrsSymbols::from_slice(&[l0, 6, 9]),
                (12, Pos1) => DmrsSymbols::from_slice(&[l0, 9]),
                (12, Pos2) => DmrsSymbols::from_slice(&[l0, 6, 9]),
                (12, _) => DmrsSymbols::from_slice(&[l0, 5, 8, 11]),
                (_, Pos1) => DmrsSymbols::from_slice(&[l0, 11]),
                (_, Pos2) => DmrsSymbols::from_slice(&[l0, 7, 11]),
                (_, _) => DmrsSymbols::from_slice(&[l0, 5, 8, 11]),
            };
            Ok(symbols)
        }
        MappingType::B => {
            let relative = match (time.length, additional_pos) {
                (2..=4, _) | (5..=7, Pos0) => DmrsSymbols::from_slice(&[0]),
                (5..=7, _) => DmrsSymbols::from_slice(&[0, 4]),
                _ => {
                    return Err(RaError::UnsupportedDmrsConfiguration(
                        "mapping type B duration without DMRS pattern",
                    ))
                }
            };
            Ok(relative.shifted(time.start))
        }
    }
}

/// DMRS sequence generator
pub struct DmrsSequenceGenerator {
    /// Gold sequence LFSR state
    x1: u32,
    x2: u32,
}

impl DmrsSequenceGenerator {
    /// Create new DMRS sequence generator with initialization value
    pub fn new(c_init: u32) -> Self {
        let mut generator = Self {
            x1: 1,
            x2: c_init & 0x7FFFFFFF,
        };

        // Advance LFSR by Nc=1600 iterations (TS 38.211 Section 5.2.1)
        for _ in 0..1600 {
            generator.advance();
        }

        generator
    }

    /// Advance LFSR state
    fn advance(&mut self) {
        // x1 sequence: x1(n+31) = (x1(n+3) + x1(n)) mod 2
        let x1_new = ((self.x1 >> 3) ^ self.x1) & 1;
        self.x1 = ((self.x1 >> 1) | (x1_new << 30)) & 0x7FFFFFFF;

        // x2 sequence: x2(n+31) = (x2(n+3) + x2(n+2) + x2(n+1) + x2(n)) mod 2
        let x2_new = ((self.x2 >> 3) ^ (self.x2 >> 2) ^ (self.x2 >> 1) ^ self.x2) & 1;
        self.x2 = ((self.x2 >> 1) | (x2_new << 30)) & 0x7FFFFFFF;
    }

    /// Generate next bit from the sequence
    pub fn next_bit(&mut self) -> u8 {
        let c = (self.x1 ^ self.x2) & 1;
        self.advance();
        c as u8
    }

    /// Generate QPSK symbol from sequence
    pub fn next_qpsk_symbol(&mut self, amplitude: f32) -> Complex32 {
        let c0 = self.next_bit();
        let c1 = self.next_bit();

        Complex32::new(
            amplitude * (1.0 - 2.0 * c0 as f32),
            amplitude * (1.0 - 2.0 * c1 as f32),
        )
    }

    /// Skip n symbols (2 bits per symbol for QPSK)
    pub fn skip(&mut self, n_symbols: usize) {
        for _ in 0..(n_symbols * 2) {
            self.advance();
        }
    }
}

/// Calculate PDSCH DMRS initialization value
/// c_init = (2^17 * (N_symb * n_slot + l + 1) * (2 * N_ID + 1) + 2 * N_ID + n_SCID) mod 2^31
pub fn calculate_pdsch_dmrs_cinit(
    symbols_per_slot: u32,
    slot: u32,
    symbol: u32,
    n_id: u16,
    n_scid: bool,
) -> u32 {
    let scid = if n_scid { 1 } else { 0 };
    let n_id = n_id as u64;
    let value = (1u64 << 17) * (symbols_per_slot as u64 * slot as u64 + symbol as u64 + 1) * (2 * n_id + 1)
        + 2 * n_id
        + scid;
    (value & 0x7FFFFFFF) as u32
}
