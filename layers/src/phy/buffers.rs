//! Per-carrier working memory
//!
//! Everything a carrier worker touches on the real-time path is allocated
//! here once, sized for the largest slot of the configured carrier.

use super::carrier::CarrierConfig;
use super::ofdm::OfdmDemodulator;
use crate::LayerError;
use num_complex::Complex32;

/// Sample, resource grid and bit buffers of one component carrier
pub struct CarrierBuffers {
    /// Time domain samples, one buffer per receive antenna
    pub samples: Vec<Vec<Complex32>>,
    /// Resource grid of one slot, symbol major
    pub grid: Vec<Complex32>,
    /// Channel estimate per PRB
    pub channel: Vec<Complex32>,
    /// Equalised PDSCH symbols of the last received grant, in RE order
    pub equalized: Vec<Complex32>,
    /// Hard bits, one per byte
    pub bits: Vec<u8>,
    /// Packed transport block
    pub payload: Vec<u8>,
    pub demodulator: OfdmDemodulator,
}

impl CarrierBuffers {
    pub fn new(carrier: &CarrierConfig, nof_antennas: usize) -> Result<Self, LayerError> {
        if nof_antennas == 0 {
            return Err(LayerError::InvalidConfiguration(
                "at least one receive antenna required".to_string(),
            ));
        }

        let zero = Complex32::new(0.0, 0.0);
        let max_re = carrier.max_re_per_slot();

        Ok(Self {
            samples: vec![vec![zero; carrier.max_slot_len()]; nof_antennas],
            grid: vec![zero; max_re],
            channel: vec![zero; carrier.nof_prb as usize],
            equalized: Vec::with_capacity(max_re),
            bits: vec![0; 2 * max_re],
            payload: vec![0; 2 * max_re / 8],
            demodulator: OfdmDemodulator::new(carrier.fft_size(), carrier.nof_subcarriers())?,
        })
    }

    pub fn nof_antennas(&self) -> usize {
        self.samples.len()
    }

    /// Full sample buffer of `antenna`, sized for the longest slot
    pub fn antenna_mut(&mut self, antenna: usize) -> Option<&mut [Complex32]> {
        self.samples.get_mut(antenna).map(|s| s.as_mut_slice())
    }

    pub fn antenna(&self, antenna: usize) -> Option<&[Complex32]> {
        self.samples.get(antenna).map(|s| s.as_slice())
    }

    /// Zero every antenna buffer
    pub fn clear_samples(&mut self) {
        for buffer in &mut self.samples {
            buffer.fill(Complex32::new(0.0, 0.0));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phy::test_utils::carrier_52;

    #[test]
    fn test_buffer_sizes() {
        let carrier = carrier_52();
        let buffers = CarrierBuffers::new(&carrier, 2).unwrap();

        assert_eq!(buffers.nof_antennas(), 2);
        assert_eq!(buffers.antenna(1).map(|s| s.len()), Some(15360));
        assert!(buffers.antenna(2).is_none());
        assert_eq!(buffers.grid.len(), 52 * 12 * 14);
        assert_eq!(buffers.channel.len(), 52);
        assert!(buffers.equalized.is_empty());
        assert!(buffers.equalized.capacity() >= 52 * 12 * 14);
        assert_eq!(buffers.payload.len(), 52 * 12 * 14 * 2 / 8);
        assert_eq!(buffers.demodulator.fft_size(), 1024);
    }

    #[test]
    fn test_no_antenna_rejected() {
        assert!(CarrierBuffers::new(&carrier_52(), 0).is_err());
    }

    #[test]
    fn test_clear_samples() {
        let mut buffers = CarrierBuffers::new(&carrier_52(), 1).unwrap();
        buffers.antenna_mut(0).unwrap()[7] = Complex32::new(1.0, 1.0);
        buffers.clear_samples();
        assert!(buffers.antenna(0).unwrap().iter().all(|s| s.norm_sqr() == 0.0));
    }
}
