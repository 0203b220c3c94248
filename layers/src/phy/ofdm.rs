//! OFDM Modulation and Demodulation for 5G NR
//!
//! Implements OFDM processing according to 3GPP TS 38.211 Section 5.3.1
//! using rustfft. Plans and scratch buffers are created once per carrier
//! configuration so the per-slot path never allocates.

use crate::LayerError;
use num_complex::Complex32;
use rustfft::{Fft, FftPlanner};
use std::sync::Arc;

/// FFT bin of subcarrier `k` when `nof_subcarriers` are centred on DC
fn subcarrier_bin(k: usize, nof_subcarriers: usize, fft_size: usize) -> usize {
    (k + fft_size - nof_subcarriers / 2) % fft_size
}

fn check_dimensions(fft_size: usize, nof_subcarriers: usize) -> Result<(), LayerError> {
    if fft_size == 0 || nof_subcarriers == 0 || nof_subcarriers > fft_size {
        return Err(LayerError::InvalidConfiguration(format!(
            "{} subcarriers do not fit a {}-point FFT",
            nof_subcarriers, fft_size
        )));
    }
    Ok(())
}

/// OFDM demodulator for the downlink receive path
pub struct OfdmDemodulator {
    fft_size: usize,
    nof_subcarriers: usize,
    fft: Arc<dyn Fft<f32>>,
    buffer: Vec<Complex32>,
    scratch: Vec<Complex32>,
    scale: f32,
}

impl OfdmDemodulator {
    /// Create a demodulator extracting `nof_subcarriers` from a `fft_size` FFT
    pub fn new(fft_size: usize, nof_subcarriers: usize) -> Result<Self, LayerError> {
        check_dimensions(fft_size, nof_subcarriers)?;

        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(fft_size);
        let scratch = vec![Complex32::new(0.0, 0.0); fft.get_inplace_scratch_len()];

        Ok(Self {
            fft_size,
            nof_subcarriers,
            fft,
            buffer: vec![Complex32::new(0.0, 0.0); fft_size],
            scratch,
            scale: 1.0 / (fft_size as f32).sqrt(),
        })
    }

    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    pub fn nof_subcarriers(&self) -> usize {
        self.nof_subcarriers
    }

    /// Demodulate one OFDM symbol.
    ///
    /// `samples` starts at the first cyclic prefix sample; the prefix is
    /// discarded and the occupied subcarriers are written to `out` in
    /// ascending frequency order.
    pub fn demodulate_symbol(
        &mut self,
        samples: &[Complex32],
        cp_len: usize,
        out: &mut [Complex32],
    ) -> Result<(), LayerError> {
        let expected_len = cp_len + self.fft_size;
        if samples.len() < expected_len {
            return Err(LayerError::ProcessingError(format!(
                "Expected {} samples, got {}",
                expected_len,
                samples.len()
            )));
        }
        if out.len() < self.nof_subcarriers {
            return Err(LayerError::ProcessingError(format!(
                "Output holds {} subcarriers, need {}",
                out.len(),
                self.nof_subcarriers
            )));
        }

        self.buffer.copy_from_slice(&samples[cp_len..expected_len]);
        self.fft.process_with_scratch(&mut self.buffer, &mut self.scratch);

        for (k, re) in out[..self.nof_subcarriers].iter_mut().enumerate() {
            *re = self.buffer[subcarrier_bin(k, self.nof_subcarriers, self.fft_size)] * self.scale;
        }

        Ok(())
    }
}

/// OFDM modulator, used to synthesise test and loopback signals
pub struct OfdmModulator {
    fft_size: usize,
    nof_subcarriers: usize,
    ifft: Arc<dyn Fft<f32>>,
    scratch: Vec<Complex32>,
    scale: f32,
}

impl OfdmModulator {
    pub fn new(fft_size: usize, nof_subcarriers: usize) -> Result<Self, LayerError> {
        check_dimensions(fft_size, nof_subcarriers)?;

        let mut planner = FftPlanner::new();
        let ifft = planner.plan_fft_inverse(fft_size);
        let scratch = vec![Complex32::new(0.0, 0.0); ifft.get_inplace_scratch_len()];

        Ok(Self {
            fft_size,
            nof_subcarriers,
            ifft,
            scratch,
            scale: 1.0 / (fft_size as f32).sqrt(),
        })
    }

    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    /// Modulate one OFDM symbol and prepend its cyclic prefix.
    ///
    /// `grid_symbol` holds the occupied subcarriers in ascending frequency
    /// order; `out` receives `cp_len + fft_size` samples.
    pub fn modulate_symbol(
        &mut self,
        grid_symbol: &[Complex32],
        cp_len: usize,
        out: &mut [Complex32],
    ) -> Result<(), LayerError> {
        let symbol_len = cp_len + self.fft_size;
        if grid_symbol.len() < self.nof_subcarriers || out.len() < symbol_len || cp_len > self.fft_size {
            return Err(LayerError::ProcessingError(format!(
                "Cannot modulate {} subcarriers into {} samples with CP {}",
                grid_symbol.len(),
                out.len(),
                cp_len
            )));
        }

        let body = &mut out[cp_len..symbol_len];
        body.fill(Complex32::new(0.0, 0.0));
        for (k, &re) in grid_symbol[..self.nof_subcarriers].iter().enumerate() {
            body[subcarrier_bin(k, self.nof_subcarriers, self.fft_size)] = re;
        }

        self.ifft.process_with_scratch(body, &mut self.scratch);
        for sample in body.iter_mut() {
            *sample *= self.scale;
        }

        // Cyclic prefix: copy of the symbol tail
        out.copy_within(self.fft_size..symbol_len, 0);

        Ok(())
    }
}
