//! Common Types for the 5G NR UE
//!
//! Defines fundamental types used throughout the downlink PHY

use num_derive::{FromPrimitive, ToPrimitive};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Radio Network Temporary Identifier (RNTI)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rnti(pub u16);

impl Rnti {
    /// SI-RNTI value fixed by TS 38.321
    pub const SI: Self = Self(0xFFFF);
    /// P-RNTI value fixed by TS 38.321
    pub const P: Self = Self(0xFFFE);

    /// Create a new RNTI
    pub fn new(value: u16) -> Self {
        Self(value)
    }

    /// Get the RNTI value
    pub fn value(&self) -> u16 {
        self.0
    }
}

impl fmt::Display for Rnti {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:04x}", self.0)
    }
}

/// Kind of RNTI a DCI was scrambled with (TS 38.321 Table 7.1-2)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RntiType {
    /// Cell RNTI
    C,
    /// Temporary cell RNTI
    Tc,
    /// Configured scheduling RNTI
    Cs,
    /// Random access RNTI
    Ra,
    /// System information RNTI
    Si,
    /// Paging RNTI
    P,
    /// Modulation and coding scheme C-RNTI
    McsC,
    /// Semi-persistent CSI RNTI
    SpCsi,
}

impl RntiType {
    /// RNTIs that carry UE-dedicated data scheduling
    pub fn is_ue_dedicated(&self) -> bool {
        matches!(self, RntiType::C | RntiType::McsC | RntiType::Cs)
    }
}

/// Physical Cell Identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Pci(pub u16);

impl Pci {
    /// Maximum valid PCI value (0-1007)
    pub const MAX: u16 = 1007;

    /// Create a new PCI with validation
    pub fn new(value: u16) -> Option<Self> {
        if value <= Self::MAX {
            Some(Self(value))
        } else {
            None
        }
    }
}

/// Transmission time interval index
///
/// Counts slots and wraps once per hyper-frame at the highest numerology
/// (1024 frames of 160 slots), which keeps every lower numerology aligned
/// to frame boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Tti(u32);

impl Tti {
    /// Number of distinct TTI indices before wrap-around
    pub const PERIOD: u32 = 1024 * 10 * 16;

    pub fn new(value: u32) -> Self {
        Self(value % Self::PERIOD)
    }

    pub fn value(&self) -> u32 {
        self.0
    }

    /// The following TTI, wrapping at [`Tti::PERIOD`]
    pub fn next(&self) -> Self {
        Self::new(self.0 + 1)
    }

    /// Slot index inside the subframe for the given numerology
    pub fn slot_in_subframe(&self, scs: SubcarrierSpacing) -> u32 {
        self.0 % scs.slots_per_subframe()
    }

    /// Slot index inside the radio frame for the given numerology
    pub fn slot_in_frame(&self, scs: SubcarrierSpacing) -> u32 {
        self.0 % (10 * scs.slots_per_subframe())
    }
}

impl fmt::Display for Tti {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Subcarrier spacing values in kHz
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromPrimitive, ToPrimitive, Serialize, Deserialize)]
pub enum SubcarrierSpacing {
    /// 15 kHz
    Scs15 = 15,
    /// 30 kHz
    Scs30 = 30,
    /// 60 kHz
    Scs60 = 60,
    /// 120 kHz
    Scs120 = 120,
    /// 240 kHz
    Scs240 = 240,
}

impl SubcarrierSpacing {
    /// Numerology µ (TS 38.211 Table 4.2-1)
    pub fn numerology(&self) -> u32 {
        match self {
            SubcarrierSpacing::Scs15 => 0,
            SubcarrierSpacing::Scs30 => 1,
            SubcarrierSpacing::Scs60 => 2,
            SubcarrierSpacing::Scs120 => 3,
            SubcarrierSpacing::Scs240 => 4,
        }
    }

    pub fn slots_per_subframe(&self) -> u32 {
        1 << self.numerology()
    }

    pub fn khz(&self) -> u32 {
        *self as u32
    }
}

/// Cyclic prefix type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CyclicPrefix {
    Normal,
    Extended,
}

impl CyclicPrefix {
    /// OFDM symbols per slot (TS 38.211 Tables 4.3.2-1/-2)
    pub fn symbols_per_slot(&self) -> u32 {
        match self {
            CyclicPrefix::Normal => 14,
            CyclicPrefix::Extended => 12,
        }
    }
}
