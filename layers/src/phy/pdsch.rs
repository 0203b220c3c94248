/// PDSCH (Physical Downlink Shared Channel) implementation
/// Based on 3GPP TS 38.211 Sections 7.3.1 and 7.4.1.1
///
/// Single layer QPSK carrying one transport block protected by CRC24A.
/// Channel coding is not applied: the transport block bits are scrambled and
/// mapped straight onto the data resource elements.

use super::buffers::CarrierBuffers;
use super::carrier::{CarrierConfig, NRE};
use super::cc_worker::ChannelProcessor;
use super::dmrs::{calculate_pdsch_dmrs_cinit, DmrsSequenceGenerator};
use super::grant::PdschGrant;
use super::ofdm::OfdmModulator;
use crate::LayerError;
use bytes::Bytes;
use common::types::Tti;
use common::utils::{crc24a, pack_bits_into, unpack_bits_into};
use num_complex::Complex32;
use std::f32::consts::FRAC_1_SQRT_2;
use tracing::{debug, trace};

/// Transport block CRC length in bytes (CRC24A)
pub const TB_CRC_BYTES: usize = 3;

/// Bits per QPSK symbol
const QPSK_BITS: usize = 2;

/// Reported SNR when the measured noise is negligible
const MAX_SNR_DB: f32 = 60.0;

/// Channel power below which a resource element is not equalised
const MIN_CHANNEL_POWER: f32 = 1e-12;

/// Outcome of one PDSCH reception
#[derive(Debug, Clone, PartialEq)]
pub struct PdschResult {
    /// Transport block without CRC
    pub payload: Bytes,
    pub crc_ok: bool,
    /// Data resource elements demodulated
    pub nof_re: usize,
    /// Average DMRS received power in dB
    pub rsrp_db: f32,
    /// DMRS based SNR estimate in dB
    pub snr_db: f32,
}

fn is_data_subcarrier(grant: &PdschGrant, dmrs_symbol: bool, k: usize) -> bool {
    !dmrs_symbol || grant.dmrs.dmrs_type.cdm_group(k % NRE) >= grant.dmrs.nof_cdm_groups_without_data
}

/// Call `f` with the carrier subcarrier index of every data resource element
/// of symbol `l`, in mapping order
pub fn for_each_data_re(grant: &PdschGrant, l: u32, mut f: impl FnMut(usize)) {
    let dmrs_symbol = grant.dmrs.symbols.contains(l);

    for prb in grant.freq.iter() {
        let base = prb as usize * NRE;
        for k in base..base + NRE {
            if is_data_subcarrier(grant, dmrs_symbol, k) {
                f(k);
            }
        }
    }
}

/// Call `f` with the subcarrier index and reference symbol of every DMRS
/// resource element of symbol `l` (antenna port 1000, CDM group 0).
///
/// The sequence is referenced to common resource block 0, so PRBs are
/// offset by the carrier start.
pub fn for_each_dmrs_re(
    carrier: &CarrierConfig,
    slot_in_frame: u32,
    grant: &PdschGrant,
    l: u32,
    mut f: impl FnMut(usize, Complex32),
) {
    let dmrs_type = grant.dmrs.dmrs_type;
    let per_rb = dmrs_type.nof_dmrs_per_rb();
    let c_init = calculate_pdsch_dmrs_cinit(
        carrier.symbols_per_slot(),
        slot_in_frame,
        l,
        grant.dmrs.n_id,
        false,
    );
    let mut generator = DmrsSequenceGenerator::new(c_init);
    let mut next_crb = 0;

    for prb in grant.freq.iter() {
        let crb = carrier.start + prb;
        generator.skip((crb - next_crb) as usize * per_rb);

        let base = prb as usize * NRE;
        for k in 0..NRE {
            if dmrs_type.cdm_group(k) == 0 {
                f(base + k, generator.next_qpsk_symbol(FRAC_1_SQRT_2));
            }
        }
        next_crb = crb + 1;
    }
}

/// Number of data resource elements of the grant
pub fn nof_data_res(grant: &PdschGrant) -> usize {
    let nof_prb = grant.freq.count() as usize;

    grant
        .time
        .symbols()
        .map(|l| {
            let dmrs_symbol = grant.dmrs.symbols.contains(l);
            let per_prb = (0..NRE)
                .filter(|&k| is_data_subcarrier(grant, dmrs_symbol, k))
                .count();
            per_prb * nof_prb
        })
        .sum()
}

/// Transport block size in bytes, CRC included
pub fn transport_block_size(grant: &PdschGrant) -> usize {
    nof_data_res(grant) * QPSK_BITS / 8
}

/// Largest payload the grant can carry
pub fn payload_capacity(grant: &PdschGrant) -> usize {
    transport_block_size(grant).saturating_sub(TB_CRC_BYTES)
}

/// Data scrambling initialisation, codeword 0 (TS 38.211 Section 7.3.1.1)
fn scrambling_cinit(rnti: u16, n_id: u16) -> u32 {
    let c_init = (rnti as u32) * (1 << 15) + n_id as u32;
    c_init & 0x7FFFFFFF
}

fn scramble(bits: &mut [u8], c_init: u32) {
    let mut generator = DmrsSequenceGenerator::new(c_init);
    for bit in bits {
        *bit ^= generator.next_bit();
    }
}

fn modulate_qpsk(b0: u8, b1: u8) -> Complex32 {
    Complex32::new(
        FRAC_1_SQRT_2 * (1.0 - 2.0 * b0 as f32),
        FRAC_1_SQRT_2 * (1.0 - 2.0 * b1 as f32),
    )
}

fn checked_tbs(grant: &PdschGrant) -> Result<usize, LayerError> {
    let tbs = transport_block_size(grant);
    if tbs <= TB_CRC_BYTES {
        return Err(LayerError::ProcessingError(format!(
            "allocation of {} REs too small for a transport block",
            nof_data_res(grant)
        )));
    }
    Ok(tbs)
}

/// PDSCH transmitter producing one slot of time domain samples.
///
/// Used for loopback testing and by the simulated downlink front end.
pub struct PdschTransmitter {
    modulator: OfdmModulator,
    nof_subcarriers: usize,
    grid: Vec<Complex32>,
    tb: Vec<u8>,
    bits: Vec<u8>,
}

impl PdschTransmitter {
    pub fn new(carrier: &CarrierConfig) -> Result<Self, LayerError> {
        let nof_subcarriers = carrier.nof_subcarriers();
        let max_re = carrier.max_re_per_slot();

        Ok(Self {
            modulator: OfdmModulator::new(carrier.fft_size(), nof_subcarriers)?,
            nof_subcarriers,
            grid: vec![Complex32::new(0.0, 0.0); max_re],
            tb: Vec::with_capacity(max_re * QPSK_BITS / 8),
            bits: Vec::with_capacity(max_re * QPSK_BITS),
        })
    }

    /// Encode `payload` on `grant` and write the slot into `out`.
    ///
    /// The payload is zero padded or truncated to [`payload_capacity`].
    /// Returns the number of samples written.
    pub fn transmit(
        &mut self,
        carrier: &CarrierConfig,
        tti: Tti,
        grant: &PdschGrant,
        payload: &[u8],
        out: &mut [Complex32],
    ) -> Result<usize, LayerError> {
        if self.modulator.fft_size() != carrier.fft_size() || self.nof_subcarriers != carrier.nof_subcarriers() {
            return Err(LayerError::InvalidConfiguration(
                "PDSCH transmitter built for another carrier".to_string(),
            ));
        }
        if !grant.fits(carrier) {
            return Err(LayerError::ProcessingError(format!(
                "grant {:?} symbols {:?} outside carrier",
                grant.freq,
                grant.time.symbols()
            )));
        }

        let slot = tti.slot_in_subframe(carrier.scs);
        let slot_len = carrier.slot_len(slot);
        if out.len() < slot_len {
            return Err(LayerError::ProcessingError(format!(
                "slot needs {} samples, buffer holds {}",
                slot_len,
                out.len()
            )));
        }

        // Transport block with CRC24A
        let tbs = checked_tbs(grant)?;
        let payload_len = tbs - TB_CRC_BYTES;
        if payload.len() > payload_len {
            debug!("Truncating {} byte payload to {} bytes", payload.len(), payload_len);
        }
        self.tb.clear();
        self.tb.extend_from_slice(&payload[..payload.len().min(payload_len)]);
        self.tb.resize(payload_len, 0);
        let crc = crc24a(&self.tb);
        self.tb.extend_from_slice(&crc.to_be_bytes()[1..]);

        self.bits.resize(tbs * 8, 0);
        unpack_bits_into(&self.tb, &mut self.bits);
        scramble(&mut self.bits, scrambling_cinit(grant.rnti.0, carrier.pci.0));

        // Resource mapping
        let nsc = self.nof_subcarriers;
        let slot_in_frame = tti.slot_in_frame(carrier.scs);
        self.grid.fill(Complex32::new(0.0, 0.0));
        let mut symbols = self.bits.chunks_exact(QPSK_BITS).map(|b| modulate_qpsk(b[0], b[1]));

        for l in grant.time.symbols() {
            let row = &mut self.grid[l as usize * nsc..(l as usize + 1) * nsc];
            if grant.dmrs.symbols.contains(l) {
                for_each_dmrs_re(carrier, slot_in_frame, grant, l, |k, x| row[k] = x);
            }
            for_each_data_re(grant, l, |k| {
                if let Some(x) = symbols.next() {
                    row[k] = x;
                }
            });
        }

        // OFDM modulation of the whole slot
        for l in 0..carrier.symbols_per_slot() {
            let offset = carrier.symbol_offset(slot, l);
            let cp_len = carrier.cp_length(slot, l);
            let grid_symbol = &self.grid[l as usize * nsc..(l as usize + 1) * nsc];
            self.modulator.modulate_symbol(
                grid_symbol,
                cp_len,
                &mut out[offset..offset + cp_len + carrier.fft_size()],
            )?;
        }

        trace!(
            "PDSCH tx tti={} rnti={} tbs={} samples={}",
            tti,
            grant.rnti,
            tbs,
            slot_len
        );

        Ok(slot_len)
    }
}

/// PDSCH receiver: OFDM demodulation of receive antenna 0, per-PRB least
/// squares channel estimation from DMRS, zero forcing equalisation, hard
/// QPSK demapping and CRC check.
#[derive(Debug, Default, Clone, Copy)]
pub struct PdschReceiver;

impl PdschReceiver {
    pub fn new() -> Self {
        Self
    }
}

impl ChannelProcessor for PdschReceiver {
    fn process_pdsch(
        &self,
        tti: Tti,
        carrier: &CarrierConfig,
        grant: &PdschGrant,
        buffers: &mut CarrierBuffers,
    ) -> Result<PdschResult, LayerError> {
        let CarrierBuffers {
            samples,
            grid,
            channel,
            equalized,
            bits,
            payload,
            demodulator,
        } = buffers;
        equalized.clear();

        let nsc = carrier.nof_subcarriers();
        if demodulator.fft_size() != carrier.fft_size() || demodulator.nof_subcarriers() != nsc {
            return Err(LayerError::InvalidConfiguration(
                "carrier buffers do not match carrier configuration".to_string(),
            ));
        }
        if !grant.fits(carrier) || grant.dmrs.symbols.is_empty() {
            return Err(LayerError::ProcessingError(format!(
                "grant {:?} not receivable on this carrier",
                grant.freq
            )));
        }

        let rx = samples
            .first()
            .ok_or_else(|| LayerError::ProcessingError("no receive antenna".to_string()))?;
        let slot = tti.slot_in_subframe(carrier.scs);
        let slot_len = carrier.slot_len(slot);
        if rx.len() < slot_len {
            return Err(LayerError::ProcessingError(format!(
                "slot needs {} samples, buffer holds {}",
                slot_len,
                rx.len()
            )));
        }

        let tbs = checked_tbs(grant)?;
        if payload.len() < tbs {
            return Err(LayerError::ProcessingError(format!(
                "transport block of {} bytes exceeds buffer",
                tbs
            )));
        }

        for l in grant.time.symbols() {
            let offset = carrier.symbol_offset(slot, l);
            let cp_len = carrier.cp_length(slot, l);
            let l = l as usize;
            demodulator.demodulate_symbol(&rx[offset..], cp_len, &mut grid[l * nsc..(l + 1) * nsc])?;
        }

        // Least squares estimate averaged over each PRB
        let slot_in_frame = tti.slot_in_frame(carrier.scs);
        let nof_prb = grant.freq.count() as f32;
        let pilots_per_prb = (grant.dmrs.dmrs_type.nof_dmrs_per_rb() * grant.dmrs.symbols.len()) as f32;
        channel.fill(Complex32::new(0.0, 0.0));

        for &l in grant.dmrs.symbols.as_slice() {
            let row = &grid[l as usize * nsc..(l as usize + 1) * nsc];
            for_each_dmrs_re(carrier, slot_in_frame, grant, l, |k, x| {
                channel[k / NRE] += row[k] * x.conj();
            });
        }
        for prb in grant.freq.iter() {
            channel[prb as usize] /= pilots_per_prb;
        }

        let mut noise = 0.0f32;
        for &l in grant.dmrs.symbols.as_slice() {
            let row = &grid[l as usize * nsc..(l as usize + 1) * nsc];
            for_each_dmrs_re(carrier, slot_in_frame, grant, l, |k, x| {
                noise += (row[k] - channel[k / NRE] * x).norm_sqr();
            });
        }
        noise /= pilots_per_prb * nof_prb;

        let rsrp = grant
            .freq
            .iter()
            .map(|prb| channel[prb as usize].norm_sqr())
            .sum::<f32>()
            / nof_prb;
        let rsrp_db = 10.0 * rsrp.max(f32::MIN_POSITIVE).log10();
        let snr_db = if noise > 0.0 {
            (10.0 * (rsrp / noise).log10()).min(MAX_SNR_DB)
        } else {
            MAX_SNR_DB
        };

        // Equalisation and hard demapping
        let mut nof_re = 0;
        for l in grant.time.symbols() {
            let row = &grid[l as usize * nsc..(l as usize + 1) * nsc];
            for_each_data_re(grant, l, |k| {
                let h = channel[k / NRE];
                let power = h.norm_sqr();
                let y = if power > MIN_CHANNEL_POWER {
                    row[k] * h.conj() / power
                } else {
                    Complex32::new(0.0, 0.0)
                };
                equalized.push(y);
                bits[nof_re * QPSK_BITS] = (y.re < 0.0) as u8;
                bits[nof_re * QPSK_BITS + 1] = (y.im < 0.0) as u8;
                nof_re += 1;
            });
        }

        let nof_bits = tbs * 8;
        scramble(&mut bits[..nof_bits], scrambling_cinit(grant.rnti.0, carrier.pci.0));
        pack_bits_into(&bits[..nof_bits], &mut payload[..tbs]);

        let (data, crc) = payload[..tbs].split_at(tbs - TB_CRC_BYTES);
        let crc_ok = crc == &crc24a(data).to_be_bytes()[1..];

        debug!(
            "PDSCH rx tti={} cc={} rnti={} nof_re={} tbs={} crc={} rsrp={:.1}dB snr={:.1}dB",
            tti,
            grant.cc_idx,
            grant.rnti,
            nof_re,
            tbs,
            if crc_ok { "OK" } else { "KO" },
            rsrp_db,
            snr_db
        );

        Ok(PdschResult {
            payload: Bytes::copy_from_slice(data),
            crc_ok,
            nof_re,
            rsrp_db,
            snr_db,
        })
    }
}
