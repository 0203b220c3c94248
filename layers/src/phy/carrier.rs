//! Component carrier configuration
//!
//! Static description of one downlink carrier and the OFDM numerology derived
//! from it (TS 38.211 Section 5.3.1).

use crate::LayerError;
use common::types::{CyclicPrefix, Pci, SubcarrierSpacing};

/// Largest carrier bandwidth in PRBs (TS 38.101-1)
pub const MAX_PRB: u32 = 275;

/// Subcarriers per resource block
pub const NRE: usize = 12;

/// Largest offset of a carrier from common resource block 0
const MAX_CARRIER_START: u32 = 2199;

/// Minimum FFT size handled by the OFDM chain
const MIN_FFT_SIZE: usize = 128;

/// Position of the first DMRS symbol for PDSCH mapping type A
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DmrsTypeAPos {
    Pos2,
    Pos3,
}

impl DmrsTypeAPos {
    /// Symbol index l0 inside the slot
    pub fn symbol(&self) -> u32 {
        match self {
            DmrsTypeAPos::Pos2 => 2,
            DmrsTypeAPos::Pos3 => 3,
        }
    }

    pub fn from_symbol(symbol: u32) -> Option<Self> {
        match symbol {
            2 => Some(DmrsTypeAPos::Pos2),
            3 => Some(DmrsTypeAPos::Pos3),
            _ => None,
        }
    }
}

/// Downlink carrier configuration
///
/// Immutable once published in a [`PhyState`](super::state::PhyState);
/// reconfiguration replaces it wholesale.
#[derive(Debug, Clone, PartialEq)]
pub struct CarrierConfig {
    /// Physical cell identity of the serving cell on this carrier
    pub pci: Pci,
    /// Bandwidth in PRBs
    pub nof_prb: u32,
    /// Offset of the carrier from common resource block 0
    pub start: u32,
    /// Subcarrier spacing
    pub scs: SubcarrierSpacing,
    /// Cyclic prefix type
    pub cyclic_prefix: CyclicPrefix,
    /// First DMRS symbol for mapping type A
    pub dmrs_type_a_pos: DmrsTypeAPos,
}

impl CarrierConfig {
    pub fn validate(&self) -> Result<(), LayerError> {
        if self.nof_prb == 0 || self.nof_prb > MAX_PRB {
            return Err(LayerError::InvalidConfiguration(format!(
                "carrier bandwidth of {} PRBs outside 1..={}",
                self.nof_prb, MAX_PRB
            )));
        }

        if self.start > MAX_CARRIER_START {
            return Err(LayerError::InvalidConfiguration(format!(
                "carrier start {} exceeds {}",
                self.start, MAX_CARRIER_START
            )));
        }

        if self.cyclic_prefix == CyclicPrefix::Extended && self.scs != SubcarrierSpacing::Scs60 {
            return Err(LayerError::InvalidConfiguration(format!(
                "extended cyclic prefix requires 60 kHz SCS, got {} kHz",
                self.scs.khz()
            )));
        }

        Ok(())
    }

    pub fn symbols_per_slot(&self) -> u32 {
        self.cyclic_prefix.symbols_per_slot()
    }

    pub fn nof_subcarriers(&self) -> usize {
        self.nof_prb as usize * NRE
    }

    /// Smallest power-of-two FFT keeping the occupied band under 85% of the
    /// sampled bandwidth
    pub fn fft_size(&self) -> usize {
        let occupied = self.nof_subcarriers();
        let mut fft_size = MIN_FFT_SIZE;
        while occupied * 100 > fft_size * 85 {
            fft_size *= 2;
        }
        fft_size
    }

    /// Sample rate in Hz
    pub fn sample_rate_hz(&self) -> f64 {
        self.fft_size() as f64 * self.scs.khz() as f64 * 1e3
    }

    /// Cyclic prefix length in samples of `symbol` in slot `slot` of the subframe
    pub fn cp_length(&self, slot: u32, symbol: u32) -> usize {
        let fft_size = self.fft_size();
        match self.cyclic_prefix {
            CyclicPrefix::Normal => {
                let mu = self.scs.numerology();
                let base = 144 * fft_size / 2048;
                // Symbols 0 and 7 * 2^mu of each subframe carry 16 * kappa extra
                let index = (slot % self.scs.slots_per_subframe()) * 14 + symbol;
                if index % (7 << mu) == 0 {
                    base + (16 << mu) * fft_size / 2048
                } else {
                    base
                }
            }
            CyclicPrefix::Extended => 512 * fft_size / 2048,
        }
    }

    /// Offset of the first cyclic prefix sample of `symbol` inside the slot buffer
    pub fn symbol_offset(&self, slot: u32, symbol: u32) -> usize {
        let fft_size = self.fft_size();
        (0..symbol)
            .map(|l| self.cp_length(slot, l) + fft_size)
            .sum()
    }

    /// Slot length in samples
    pub fn slot_len(&self, slot: u32) -> usize {
        self.symbol_offset(slot, self.symbols_per_slot())
    }

    /// Capacity a per-antenna slot buffer needs for any slot of this carrier
    pub fn max_slot_len(&self) -> usize {
        (0..self.scs.slots_per_subframe())
            .map(|slot| self.slot_len(slot))
            .max()
            .unwrap_or(0)
    }

    /// Resource elements in one slot across the whole carrier
    pub fn max_re_per_slot(&self) -> usize {
        self.nof_subcarriers() * self.symbols_per_slot() as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn carrier(nof_prb: u32, scs: SubcarrierSpacing) -> CarrierConfig {
        CarrierConfig {
            pci: Pci(1),
            nof_prb,
            start: 0,
            scs,
            cyclic_prefix: CyclicPrefix::Normal,
            dmrs_type_a_pos: DmrsTypeAPos::Pos2,
        }
    }

    #[test]
    fn test_fft_size_calculation() {
        assert_eq!(carrier(6, SubcarrierSpacing::Scs15).fft_size(), 128);
        assert_eq!(carrier(25, SubcarrierSpacing::Scs15).fft_size(), 512);
        assert_eq!(carrier(52, SubcarrierSpacing::Scs15).fft_size(), 1024);
        assert_eq!(carrier(106, SubcarrierSpacing::Scs15).fft_size(), 2048);
        assert_eq!(carrier(273, SubcarrierSpacing::Scs30).fft_size(), 4096);
    }

    #[test]
    fn test_cp_lengths_15khz() {
        let c = carrier(52, SubcarrierSpacing::Scs15);
        assert_eq!(c.cp_length(0, 0), 80);
        assert_eq!(c.cp_length(0, 1), 72);
        assert_eq!(c.cp_length(0, 7), 80);
        assert_eq!(c.cp_length(0, 13), 72);
        // 1 ms at 15.36 Msps
        assert_eq!(c.slot_len(0), 15360);
        assert_eq!(c.max_slot_len(), 15360);
        assert_eq!(c.sample_rate_hz(), 15.36e6);
    }

    #[test]
    fn test_cp_lengths_30khz() {
        let c = carrier(273, SubcarrierSpacing::Scs30);
        // Both slots of the subframe start a half-subframe
        assert_eq!(c.cp_length(0, 0), 352);
        assert_eq!(c.cp_length(1, 0), 352);
        assert_eq!(c.cp_length(0, 7), 288);
        assert_eq!(c.slot_len(0), 61440);
        assert_eq!(c.slot_len(1), 61440);
    }

    #[test]
    fn test_cp_lengths_60khz() {
        let c = carrier(66, SubcarrierSpacing::Scs60);
        let fft = c.fft_size();
        assert_eq!(fft, 1024);
        assert!(c.slot_len(0) > c.slot_len(1));
        assert_eq!(c.slot_len(0), c.slot_len(2));
        // 0.25 ms per slot on average
        let subframe: usize = (0..4).map(|s| c.slot_len(s)).sum();
        assert_eq!(subframe, 15 * 4 * fft);
        assert_eq!(c.max_slot_len(), c.slot_len(0));
    }

    #[test]
    fn test_extended_cp() {
        let mut c = carrier(66, SubcarrierSpacing::Scs60);
        c.cyclic_prefix = CyclicPrefix::Extended;
        assert!(c.validate().is_ok());
        assert_eq!(c.symbols_per_slot(), 12);
        assert_eq!(c.cp_length(1, 5), 256);
        assert_eq!(c.slot_len(3), 12 * (1024 + 256));
    }

    #[test]
    fn test_symbol_offsets() {
        let c = carrier(52, SubcarrierSpacing::Scs15);
        assert_eq!(c.symbol_offset(0, 0), 0);
        assert_eq!(c.symbol_offset(0, 1), 1024 + 80);
        assert_eq!(c.symbol_offset(0, 2), 2 * 1024 + 80 + 72);
    }

    #[test]
    fn test_validation() {
        assert!(carrier(52, SubcarrierSpacing::Scs15).validate().is_ok());
        assert!(carrier(0, SubcarrierSpacing::Scs15).validate().is_err());
        assert!(carrier(276, SubcarrierSpacing::Scs15).validate().is_err());

        let mut c = carrier(52, SubcarrierSpacing::Scs15);
        c.cyclic_prefix = CyclicPrefix::Extended;
        assert!(c.validate().is_err());
    }

    #[test]
    fn test_dmrs_type_a_pos() {
        assert_eq!(DmrsTypeAPos::from_symbol(3), Some(DmrsTypeAPos::Pos3));
        assert_eq!(DmrsTypeAPos::from_symbol(4), None);
        assert_eq!(DmrsTypeAPos::Pos2.symbol(), 2);
    }
}
