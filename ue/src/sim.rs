//! Simulated radio front-end
//!
//! Stands in for the PDCCH decoder and the radio: emits a DCI per scheduled
//! carrier, synthesises the matching PDSCH slot into the worker buffers and
//! tallies the decoded reports.

use crate::config::{ScheduleConfig, UeConfig};
use anyhow::{anyhow, Result};
use common::types::{Rnti, RntiType, Tti};
use common::utils::bytes_to_hex;
use layers::phy::pdsch::payload_capacity;
use layers::phy::ra_dl::{nominal_rbg_size, riv_type1};
use layers::phy::sch_cfg::ResourceAllocationType;
use layers::phy::{
    CarrierConfig, CarrierOutcome, DciDl, DciFormat, PdschGrant, PdschTransmitter, PhyState, PoolError, RaError,
    SchConfig, SearchSpaceType, SubframeReport, UePhy,
};
use layers::LayerError;
use num_complex::Complex32;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

/// CORESET carrying the UE-specific search space
const UE_CORESET_ID: u32 = 1;

/// Front-end counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimStats {
    pub ttis: u64,
    /// PDSCH grants handed to the pipeline
    pub scheduled: u64,
    /// TTIs rejected by the pool
    pub dropped: u64,
    /// DCIs whose allocation could not be decoded
    pub decode_failures: u64,
    pub crc_ok: u64,
    pub crc_failed: u64,
}

impl SimStats {
    fn account(&mut self, report: &SubframeReport) {
        let (ok, ko) = report.crc_counts();
        self.crc_ok += ok;
        self.crc_failed += ko;

        for carrier in &report.carriers {
            if let CarrierOutcome::Decoded(result) = &carrier.outcome {
                trace!(
                    "TTI {} cc={} crc={} snr={:.1} dB payload {}",
                    report.tti,
                    carrier.cc_idx,
                    result.crc_ok,
                    result.snr_db,
                    bytes_to_hex(&result.payload[..result.payload.len().min(8)])
                );
            }
        }
    }
}

/// Periodic DCI for one carrier
#[derive(Debug, Clone)]
struct CarrierSchedule {
    period: u32,
    offset: u32,
    dci: DciDl,
}

impl CarrierSchedule {
    fn new(schedule: &ScheduleConfig, carrier: &CarrierConfig, pdsch: &SchConfig, rnti: Rnti) -> Result<Self> {
        if schedule.period == 0 {
            return Err(anyhow!("Schedule period must be positive"));
        }

        let freq_domain_assignment = match pdsch.resource_allocation {
            ResourceAllocationType::Type0 => match schedule.rbg_bitmap {
                Some(bitmap) => bitmap,
                None => {
                    let p = nominal_rbg_size(carrier.nof_prb, pdsch.rbg_size_cfg_1);
                    let nof_rbg = (carrier.nof_prb + carrier.start % p).div_ceil(p);
                    u32::MAX >> (32 - nof_rbg.min(32))
                }
            },
            _ => {
                let len = schedule
                    .nof_prb
                    .unwrap_or_else(|| carrier.nof_prb.saturating_sub(schedule.start_prb));
                riv_type1(carrier.nof_prb, schedule.start_prb, len).ok_or_else(|| {
                    anyhow!(
                        "Allocation of {} PRBs from {} outside {} PRB carrier",
                        len,
                        schedule.start_prb,
                        carrier.nof_prb
                    )
                })?
            }
        };

        Ok(Self {
            period: schedule.period,
            offset: schedule.offset % schedule.period,
            dci: DciDl {
                rnti,
                rnti_type: RntiType::C,
                ss_type: SearchSpaceType::Ue,
                coreset_id: UE_CORESET_ID,
                format: DciFormat::Format1_1 {
                    antenna_ports: schedule.antenna_ports,
                },
                freq_domain_assignment,
                time_domain_assignment: schedule.time_domain_assignment,
            },
        })
    }

    fn hits(&self, tti: Tti) -> bool {
        tti.value() % self.period == self.offset
    }
}

/// Work for one carrier in one TTI
#[derive(Debug)]
enum Assignment {
    Grant(PdschGrant),
    DecodeFailure(u32, RaError),
}

/// One transmitter per carrier of a configuration generation
fn build_transmitters(phy: &PhyState) -> Result<(Vec<PdschTransmitter>, Vec<Complex32>)> {
    let transmitters = phy
        .carriers()
        .iter()
        .map(|setup| PdschTransmitter::new(&setup.carrier))
        .collect::<Result<Vec<_>, LayerError>>()?;
    let max_len = phy
        .carriers()
        .iter()
        .map(|setup| setup.carrier.max_slot_len())
        .max()
        .unwrap_or(0);
    Ok((transmitters, vec![Complex32::new(0.0, 0.0); max_len]))
}

pub struct Simulator {
    phy: Arc<UePhy>,
    schedules: Vec<Option<CarrierSchedule>>,
    transmitters: Vec<PdschTransmitter>,
    generation: u64,
    /// Assignments keyed by the TTI their PDSCH falls in
    pending: HashMap<Tti, Vec<Assignment>>,
    scratch: Vec<Complex32>,
    payload: Vec<u8>,
    next_tti: Tti,
    stats: SimStats,
}

impl Simulator {
    pub fn new(phy: Arc<UePhy>, config: &UeConfig) -> Result<Self> {
        let snapshot = phy.snapshot();
        let rnti = Rnti::new(config.sim.rnti);

        let schedules = config
            .carriers
            .iter()
            .zip(snapshot.carriers())
            .map(|(entry, setup)| {
                entry
                    .schedule
                    .as_ref()
                    .map(|s| CarrierSchedule::new(s, &setup.carrier, &setup.pdsch, rnti))
                    .transpose()
            })
            .collect::<Result<Vec<_>>>()?;

        let (transmitters, scratch) = build_transmitters(&snapshot)?;

        info!(
            "Simulated front-end: {} of {} carriers scheduled for RNTI {}",
            schedules.iter().filter(|s| s.is_some()).count(),
            schedules.len(),
            rnti
        );

        Ok(Self {
            phy,
            schedules,
            transmitters,
            generation: snapshot.generation(),
            pending: HashMap::new(),
            scratch,
            payload: Vec::new(),
            next_tti: Tti::new(0),
            stats: SimStats::default(),
        })
    }

    /// Emit this TTI's DCIs and queue their PDSCH for slot `tti + k0`
    fn schedule(&mut self, tti: Tti) -> Result<()> {
        for (cc_idx, schedule) in self.schedules.iter().enumerate() {
            let Some(schedule) = schedule.as_ref().filter(|s| s.hits(tti)) else {
                continue;
            };
            let cc_idx = cc_idx as u32;

            match self.phy.decode_dl_dci(cc_idx, &schedule.dci) {
                Ok(grant) => {
                    let slot = Tti::new(tti.value() + grant.time.k0);
                    self.pending.entry(slot).or_default().push(Assignment::Grant(grant));
                }
                Err(LayerError::Allocation(e)) => {
                    debug!("TTI {} cc={}: DCI not decodable: {}", tti, cc_idx, e);
                    self.stats.decode_failures += 1;
                    self.pending
                        .entry(tti)
                        .or_default()
                        .push(Assignment::DecodeFailure(cc_idx, e));
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// Run one TTI: schedule, fill and submit a subframe, then collect
    /// whatever reports are ready
    pub fn step(&mut self) -> Result<()> {
        let tti = self.next_tti;
        self.next_tti = tti.next();
        self.stats.ttis += 1;

        self.schedule(tti)?;
        let due = self.pending.remove(&tti).unwrap_or_default();

        let pool = self.phy.pool();
        let mut lease = match pool.acquire(tti) {
            Ok(lease) => lease,
            Err(PoolError::DeadlineExceeded { .. }) => {
                self.stats.dropped += 1;
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        let phy = lease
            .phy()
            .cloned()
            .ok_or_else(|| anyhow!("TTI {}: lease without configuration", tti))?;
        if phy.generation() != self.generation {
            let (transmitters, scratch) = build_transmitters(&phy)?;
            self.transmitters = transmitters;
            self.scratch = scratch;
            self.generation = phy.generation();
        }

        let nof_antennas = phy.cell().nof_rx_antennas;
        for (cc_idx, setup) in phy.carriers().iter().enumerate() {
            let cc_idx = cc_idx as u32;
            let len = lease.buffer_len(cc_idx).unwrap_or(0);
            let grant = due.iter().find_map(|a| match a {
                Assignment::Grant(g) if g.cc_idx == cc_idx && g.fits(&setup.carrier) => Some(g),
                _ => None,
            });

            match grant {
                Some(grant) => {
                    self.payload.clear();
                    self.payload
                        .extend((0..payload_capacity(grant)).map(|i| (i as u32).wrapping_add(tti.value()) as u8));
                    self.transmitters[cc_idx as usize].transmit(
                        &setup.carrier,
                        tti,
                        grant,
                        &self.payload,
                        &mut self.scratch[..len],
                    )?;
                    for antenna in 0..nof_antennas {
                        if let Some(buffer) = lease.buffer_mut(cc_idx, antenna) {
                            buffer.copy_from_slice(&self.scratch[..len]);
                        }
                    }
                }
                None => {
                    for antenna in 0..nof_antennas {
                        if let Some(buffer) = lease.buffer_mut(cc_idx, antenna) {
                            buffer.fill(Complex32::new(0.0, 0.0));
                        }
                    }
                }
            }
        }

        for assignment in due {
            // A carrier removed by a reconfiguration is logged and counted by the pool
            match assignment {
                Assignment::Grant(grant) => {
                    if lease.set_grant(grant).is_ok() {
                        self.stats.scheduled += 1;
                    }
                }
                Assignment::DecodeFailure(cc_idx, e) => {
                    let _ = lease.set_decode_failure(cc_idx, e);
                }
            }
        }
        lease.submit();

        while let Some(report) = pool.try_collect_next() {
            self.stats.account(&report);
            pool.reuse(report);
        }
        Ok(())
    }

    /// Collect every outstanding report
    pub fn finish(&mut self, timeout: Duration) {
        let pool = self.phy.pool();
        loop {
            match pool.collect_next(timeout) {
                Ok(report) => {
                    self.stats.account(&report);
                    pool.reuse(report);
                }
                Err(PoolError::NothingPending) => break,
                Err(e) => {
                    warn!("Outstanding reports abandoned: {}", e);
                    break;
                }
            }
        }
    }

    /// Run `nof_ttis` TTIs (0 for unlimited) paced by the TTI period, or
    /// until `stop` is set
    pub fn run(&mut self, nof_ttis: u64, stop: &AtomicBool) -> Result<SimStats> {
        let period = self.phy.pool().config().tti_period;
        let mut next = Instant::now();

        while (nof_ttis == 0 || self.stats.ttis < nof_ttis) && !stop.load(Ordering::Relaxed) {
            self.step()?;

            next += period;
            let now = Instant::now();
            if next > now {
                std::thread::sleep(next - now);
            } else if now - next > period * 10 {
                warn!("Front-end {:?} behind schedule, resynchronising", now - next);
                next = now;
            }
        }

        self.finish(Duration::from_secs(1));
        info!("Simulation finished after {} TTIs", self.stats.ttis);
        Ok(self.stats)
    }
}
