//! BPSK modulation and coherent chip recovery.

use crate::dsss::{CarrierParameters, Lock, SpreadingCode};

/// Map chips onto the carrier. Phase is zero at the first output sample.
pub fn modulate(chips: &[f32], carrier: &CarrierParameters) -> Vec<f32> {
    let spc = carrier.samples_per_chip;
    let omega = carrier.angular_step(0.0);
    let mut samples = Vec::with_capacity(chips.len() * spc);

    let mut n = 0u64;
    for &chip in chips {
        for _ in 0..spc {
            samples.push(chip * (omega * n as f64).cos() as f32);
            n += 1;
        }
    }

    samples
}

/// Complex-baseband chip integrals over an audio buffer.
///
/// The buffer is mixed down once (`I = r·cos`, `Q = -r·sin`) and stored as
/// prefix sums, so the integral over any chip window costs two lookups.
pub struct ChipIntegrator {
    i_sum: Vec<f64>,
    q_sum: Vec<f64>,
    samples_per_chip: usize,
}

impl ChipIntegrator {
    /// Mix `samples` against the carrier shifted by `freq_offset_hz`.
    pub fn new(samples: &[f32], carrier: &CarrierParameters, freq_offset_hz: f64) -> Self {
        let omega = carrier.angular_step(freq_offset_hz);
        let mut i_sum = Vec::with_capacity(samples.len() + 1);
        let mut q_sum = Vec::with_capacity(samples.len() + 1);
        let (mut i_acc, mut q_acc) = (0.0f64, 0.0f64);
        i_sum.push(0.0);
        q_sum.push(0.0);

        for (n, &r) in samples.iter().enumerate() {
            let (sin, cos) = (omega * n as f64).sin_cos();
            i_acc += r as f64 * cos;
            q_acc -= r as f64 * sin;
            i_sum.push(i_acc);
            q_sum.push(q_acc);
        }

        Self {
            i_sum,
            q_sum,
            samples_per_chip: carrier.samples_per_chip,
        }
    }

    /// Number of samples covered.
    pub fn len(&self) -> usize {
        self.i_sum.len() - 1
    }

    /// Check whether the buffer was empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Samples per chip.
    pub fn samples_per_chip(&self) -> usize {
        self.samples_per_chip
    }

    /// `(I, Q)` integral of the chip starting at sample `start`.
    pub fn chip(&self, start: usize) -> Option<(f64, f64)> {
        let end = start.checked_add(self.samples_per_chip)?;
        if end > self.len() {
            return None;
        }
        Some((self.i_sum[end] - self.i_sum[start], self.q_sum[end] - self.q_sum[start]))
    }

    /// Whole chips available from sample `start` to the end of the buffer.
    pub fn chips_from(&self, start: usize) -> usize {
        self.len().saturating_sub(start) / self.samples_per_chip
    }
}

/// Soft chip values from `lock.offset` to the end of the buffer.
///
/// Uses the carrier phase measured at acquisition and no tracking.
pub fn demodulate(samples: &[f32], carrier: &CarrierParameters, lock: &Lock) -> Vec<f32> {
    let integrator = ChipIntegrator::new(samples, carrier, lock.freq_offset_hz);
    let (sin, cos) = lock.phase.sin_cos();
    let spc = carrier.samples_per_chip;

    (0..integrator.chips_from(lock.offset))
        .filter_map(|k| integrator.chip(lock.offset + k * spc))
        .map(|(ci, cq)| (ci * cos + cq * sin) as f32)
        .collect()
}

/// One recovered information bit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BitDecision {
    /// Hard decision
    pub bit: u8,
    /// De-spreading confidence in `[0, 1]`
    pub confidence: f32,
}

/// Bit-by-bit coherent demodulator with decision-directed phase tracking.
pub struct Demodulator<'a> {
    integrator: ChipIntegrator,
    code: &'a SpreadingCode,
    cursor: usize,
    phase: f64,
    tracking_gain: f64,
    soft: Vec<f32>,
}

impl<'a> Demodulator<'a> {
    /// Start demodulating at sample `start` with the phase from `lock`.
    pub fn new(
        samples: &[f32],
        carrier: &CarrierParameters,
        code: &'a SpreadingCode,
        lock: &Lock,
        start: usize,
        tracking_gain: f64,
    ) -> Self {
        Self {
            integrator: ChipIntegrator::new(samples, carrier, lock.freq_offset_hz),
            code,
            cursor: start,
            phase: lock.phase,
            tracking_gain,
            soft: Vec::with_capacity(code.len()),
        }
    }

    /// Sample index of the next chip.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Current carrier phase estimate (radians).
    pub fn phase(&self) -> f64 {
        self.phase
    }

    /// Whole bits left in the buffer.
    pub fn remaining_bits(&self) -> usize {
        self.integrator.chips_from(self.cursor) / self.code.len()
    }

    /// Demodulate and de-spread the next bit, or `None` at end of buffer.
    pub fn next_bit(&mut self) -> Option<BitDecision> {
        if self.remaining_bits() == 0 {
            return None;
        }

        let spc = self.integrator.samples_per_chip();
        let (sin, cos) = self.phase.sin_cos();
        let (mut zi, mut zq) = (0.0f64, 0.0f64);
        self.soft.clear();

        for (k, &c) in self.code.chips().iter().enumerate() {
            let (ci, cq) = self.integrator.chip(self.cursor + k * spc)?;
            zi += c as f64 * ci;
            zq += c as f64 * cq;
            self.soft.push((ci * cos + cq * sin) as f32);
        }
        self.cursor += self.code.len() * spc;

        let (bit, confidence) = self.code.despread(&self.soft).ok()?;

        // Residual phase of the bit correlation after removing the decision
        let sign = if bit == 0 { 1.0 } else { -1.0 };
        let re = sign * (zi * cos + zq * sin);
        let im = sign * (zq * cos - zi * sin);
        if re != 0.0 || im != 0.0 {
            self.phase += self.tracking_gain * im.atan2(re);
        }

        Some(BitDecision { bit, confidence })
    }

    /// Demodulate `count` bits, or `None` if the buffer ends first.
    pub fn read_bits(&mut self, count: usize) -> Option<Vec<BitDecision>> {
        if self.remaining_bits() < count {
            return None;
        }
        (0..count).map(|_| self.next_bit()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lock_at(offset: usize, phase: f64) -> Lock {
        Lock {
            offset,
            phase,
            freq_offset_hz: 0.0,
            metric: 1.0,
        }
    }

    #[test]
    fn test_modulate_shape() {
        let carrier = CarrierParameters::default();
        let samples = modulate(&[1.0, -1.0], &carrier);
        assert_eq!(samples.len(), 88);
        assert_eq!(samples[0], 1.0);
        // Second chip starts with the carrier inverted
        let omega = carrier.angular_step(0.0);
        assert!((samples[44] + (omega * 44.0).cos() as f32).abs() < 1e-6);
        assert!(samples.iter().all(|s| s.abs() <= 1.0));
    }

    #[test]
    fn test_integrator_matches_direct_sum() {
        let carrier = CarrierParameters::default();
        let samples = modulate(&[1.0, -1.0, 1.0], &carrier);
        let integrator = ChipIntegrator::new(&samples, &carrier, 0.0);
        assert_eq!(integrator.len(), 132);
        assert_eq!(integrator.chips_from(0), 3);
        assert_eq!(integrator.chips_from(1), 2);

        let omega = carrier.angular_step(0.0);
        let direct: f64 = (44..88).map(|n| samples[n] as f64 * (omega * n as f64).cos()).sum();
        let (ci, _) = integrator.chip(44).unwrap();
        assert!((ci - direct).abs() < 1e-9);
        assert!(ci < -20.0);
        assert!(integrator.chip(89).is_none());
    }

    #[test]
    fn test_demodulate_noiseless() {
        let carrier = CarrierParameters::default();
        let code = SpreadingCode::reference();
        let bits = [0u8, 1, 1, 0, 1];
        let samples = modulate(&code.spread_bits(&bits), &carrier);

        let soft = demodulate(&samples, &carrier, &lock_at(0, 0.0));
        assert_eq!(soft.len(), bits.len() * 31);
        for (k, chunk) in soft.chunks(31).enumerate() {
            assert_eq!(code.despread(chunk).unwrap().0, bits[k]);
        }
    }

    #[test]
    fn test_demodulator_handles_offset_and_phase() {
        let carrier = CarrierParameters::default();
        let code = SpreadingCode::reference();
        let bits: Vec<u8> = (0..40).map(|i| ((i * 7) % 3 == 0) as u8).collect();

        // Signal starts 300 samples into the buffer
        let mut samples = vec![0.0f32; 300];
        samples.extend(modulate(&code.spread_bits(&bits), &carrier));

        // Mixing against buffer time puts the carrier at phase -omega*300
        let phase = -carrier.angular_step(0.0) * 300.0;
        let lock = lock_at(300, phase);
        let mut demod = Demodulator::new(&samples, &carrier, &code, &lock, 300, 0.05);
        assert_eq!(demod.remaining_bits(), 40);

        let decisions = demod.read_bits(40).unwrap();
        let recovered: Vec<u8> = decisions.iter().map(|d| d.bit).collect();
        assert_eq!(recovered, bits);
        assert!(decisions.iter().all(|d| d.confidence > 0.9));
        assert!(demod.next_bit().is_none());
        assert!(demod.read_bits(1).is_none());
    }

    #[test]
    fn test_phase_tracking_pulls_in() {
        let carrier = CarrierParameters::default();
        let code = SpreadingCode::reference();
        let bits = vec![0u8; 120];
        let samples = modulate(&code.spread_bits(&bits), &carrier);

        // Start with a 0.6 rad phase error
        let mut demod = Demodulator::new(&samples, &carrier, &code, &lock_at(0, 0.6), 0, 0.05);
        let decisions = demod.read_bits(120).unwrap();
        assert!(decisions.iter().all(|d| d.bit == 0));
        assert!(demod.phase().abs() < 0.05, "phase {}", demod.phase());
    }
}
