//! Decoded PDSCH grant
//!
//! Everything the carrier worker needs to receive one PDSCH, built purely
//! from a DCI, the carrier and its PDSCH configuration.

use super::carrier::{CarrierConfig, MAX_PRB};
use super::dmrs::DmrsType;
use super::sch_cfg::MappingType;
use common::types::{Rnti, RntiType};
use std::fmt;
use std::ops::Range;

const MASK_WORDS: usize = (MAX_PRB as usize + 63) / 64;

/// Set of allocated PRBs, relative to the carrier start
///
/// Fixed-size bitset so grants can be copied around the real-time path
/// without touching the heap.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct PrbMask {
    words: [u64; MASK_WORDS],
}

impl PrbMask {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mask with `len` consecutive PRBs starting at `start`
    pub fn from_range(start: u32, len: u32) -> Self {
        let mut mask = Self::new();
        mask.set_range(start, len);
        mask
    }

    /// Mark `prb` as allocated. PRBs at or above [`MAX_PRB`] are ignored.
    pub fn set(&mut self, prb: u32) {
        if prb < MAX_PRB {
            self.words[prb as usize / 64] |= 1 << (prb % 64);
        }
    }

    pub fn set_range(&mut self, start: u32, len: u32) {
        for prb in start..start.saturating_add(len) {
            self.set(prb);
        }
    }

    pub fn contains(&self, prb: u32) -> bool {
        prb < MAX_PRB && self.words[prb as usize / 64] & (1 << (prb % 64)) != 0
    }

    /// Number of allocated PRBs
    pub fn count(&self) -> u32 {
        self.words.iter().map(|w| w.count_ones()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|&w| w == 0)
    }

    /// Lowest allocated PRB
    pub fn first(&self) -> Option<u32> {
        self.words
            .iter()
            .enumerate()
            .find(|&(_, &w)| w != 0)
            .map(|(i, w)| i as u32 * 64 + w.trailing_zeros())
    }

    /// Highest allocated PRB
    pub fn last(&self) -> Option<u32> {
        self.words
            .iter()
            .enumerate()
            .rev()
            .find(|&(_, &w)| w != 0)
            .map(|(i, w)| i as u32 * 64 + 63 - w.leading_zeros())
    }

    /// Allocated PRBs in ascending order
    pub fn iter(&self) -> PrbIter {
        PrbIter {
            words: self.words,
            word: 0,
        }
    }
}

impl fmt::Debug for PrbMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Print as runs, e.g. PrbMask[0..=3, 8..=11]
        let mut runs = Vec::new();
        let mut iter = self.iter().peekable();
        while let Some(first) = iter.next() {
            let mut last = first;
            while iter.peek() == Some(&(last + 1)) {
                last += 1;
                iter.next();
            }
            runs.push(format!("{}..={}", first, last));
        }
        write!(f, "PrbMask[{}]", runs.join(", "))
    }
}

/// Iterator over the PRBs of a [`PrbMask`]
pub struct PrbIter {
    words: [u64; MASK_WORDS],
    word: usize,
}

impl Iterator for PrbIter {
    type Item = u32;

    fn next(&mut self) -> Option<u32> {
        while self.word < MASK_WORDS {
            let w = self.words[self.word];
            if w != 0 {
                let bit = w.trailing_zeros();
                self.words[self.word] &= w - 1;
                return Some(self.word as u32 * 64 + bit);
            }
            self.word += 1;
        }
        None
    }
}

/// PDSCH time domain allocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeAllocation {
    /// Slot offset between DCI and PDSCH
    pub k0: u32,
    pub mapping: MappingType,
    /// First symbol S
    pub start: u32,
    /// Number of symbols L
    pub length: u32,
}

impl TimeAllocation {
    /// Symbol after the last allocated one
    pub fn end(&self) -> u32 {
        self.start + self.length
    }

    pub fn symbols(&self) -> Range<u32> {
        self.start..self.end()
    }
}

/// Maximum number of single-symbol DMRS positions in a slot
pub const MAX_DMRS_SYMBOLS: usize = 4;

/// DMRS symbol positions in a slot, ascending
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DmrsSymbols {
    positions: [u32; MAX_DMRS_SYMBOLS],
    len: usize,
}

impl DmrsSymbols {
    pub fn from_slice(positions: &[u32]) -> Self {
        let mut symbols = Self::default();
        for &l in positions.iter().take(MAX_DMRS_SYMBOLS) {
            symbols.positions[symbols.len] = l;
            symbols.len += 1;
        }
        symbols
    }

    /// Same positions moved by `offset` symbols
    pub fn shifted(&self, offset: u32) -> Self {
        let mut symbols = *self;
        for l in symbols.positions[..symbols.len].iter_mut() {
            *l += offset;
        }
        symbols
    }

    pub fn as_slice(&self) -> &[u32] {
        &self.positions[..self.len]
    }

    pub fn contains(&self, symbol: u32) -> bool {
        self.as_slice().contains(&symbol)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// DMRS part of a PDSCH grant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DmrsAllocation {
    pub dmrs_type: DmrsType,
    /// Absolute symbol indices in the slot
    pub symbols: DmrsSymbols,
    /// CDM groups on DMRS symbols that carry no data
    pub nof_cdm_groups_without_data: u32,
    /// Scrambling identity for the sequence initialisation
    pub n_id: u16,
}

/// Decoded PDSCH grant for one component carrier
#[derive(Debug, Clone, PartialEq)]
pub struct PdschGrant {
    pub cc_idx: u32,
    pub rnti: Rnti,
    pub rnti_type: RntiType,
    pub time: TimeAllocation,
    /// Allocated PRBs relative to the carrier start
    pub freq: PrbMask,
    pub dmrs: DmrsAllocation,
}

impl PdschGrant {
    /// Whether the grant lies inside `carrier`'s PRBs and slot
    pub fn fits(&self, carrier: &CarrierConfig) -> bool {
        self.freq.last().is_some_and(|prb| prb < carrier.nof_prb)
            && self.time.length > 0
            && self.time.end() <= carrier.symbols_per_slot()
    }
}
