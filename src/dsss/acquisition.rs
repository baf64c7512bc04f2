//! Sync-word acquisition.
//!
//! Every transmission starts with a 64-bit sync word spread by the PN code.
//! The receiver slides the known preamble over the buffer:
//!
//! ```text
//!  coarse:  every `coarse_step` samples across the search window,
//!           for each candidate frequency offset
//!  fine:    every sample within ±coarse_step of the best coarse hit
//!  metric:  |Σ p_k (I_k + jQ_k)| / sqrt(K · Σ (I_k² + Q_k²))   in [0, 1]
//! ```
//!
//! The metric is insensitive to carrier phase, so the phase is read off the
//! winning correlation afterwards. Below `threshold` nothing is locked.

use serde::{Deserialize, Serialize};

use crate::dsss::{CarrierParameters, ChipIntegrator, SpreadingCode};
use crate::error::{Error, Result};
use crate::framing::bytes_to_bits;

/// Acquisition search parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcquisitionConfig {
    /// Minimum normalized preamble correlation to declare a lock
    #[serde(default = "default_threshold")]
    pub threshold: f32,
    /// Coarse search step in samples; `None` means a quarter chip
    #[serde(default)]
    pub coarse_step: Option<usize>,
    /// How far into the buffer the sync word may start (seconds)
    #[serde(default = "default_search_window_secs")]
    pub search_window_secs: f64,
    /// Carrier offsets to try (Hz)
    #[serde(default = "default_frequency_offsets_hz")]
    pub frequency_offsets_hz: Vec<f64>,
    /// Loop gain of the decision-directed phase tracker
    #[serde(default = "default_phase_tracking_gain")]
    pub phase_tracking_gain: f64,
}

fn default_threshold() -> f32 {
    0.12
}

fn default_search_window_secs() -> f64 {
    4.0
}

fn default_frequency_offsets_hz() -> Vec<f64> {
    vec![0.0]
}

fn default_phase_tracking_gain() -> f64 {
    0.05
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
            coarse_step: None,
            search_window_secs: default_search_window_secs(),
            frequency_offsets_hz: default_frequency_offsets_hz(),
            phase_tracking_gain: default_phase_tracking_gain(),
        }
    }
}

impl AcquisitionConfig {
    /// Effective coarse step for `carrier`.
    pub fn coarse_step_for(&self, carrier: &CarrierParameters) -> usize {
        self.coarse_step
            .unwrap_or(carrier.samples_per_chip / 4)
            .max(1)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if !(self.threshold > 0.0 && self.threshold < 1.0) {
            return Err("threshold must be in (0, 1)".into());
        }
        if self.coarse_step == Some(0) {
            return Err("coarse_step must be > 0".into());
        }
        if !self.search_window_secs.is_finite() || self.search_window_secs <= 0.0 {
            return Err("search_window_secs must be positive".into());
        }
        if self.frequency_offsets_hz.is_empty() {
            return Err("at least one frequency offset is required".into());
        }
        if self.frequency_offsets_hz.iter().any(|f| !f.is_finite()) {
            return Err("frequency offsets must be finite".into());
        }
        if !(0.0..1.0).contains(&self.phase_tracking_gain) {
            return Err("phase_tracking_gain must be in [0, 1)".into());
        }
        Ok(())
    }
}

/// Where and how the receiver locked onto a transmission.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Lock {
    /// Sample index where the sync word starts
    pub offset: usize,
    /// Carrier phase relative to the receiver's reference (radians)
    pub phase: f64,
    /// Carrier offset that gave the best correlation (Hz)
    pub freq_offset_hz: f64,
    /// Normalized preamble correlation
    pub metric: f32,
}

/// The spread sync word, MSB first.
pub fn preamble_chips(code: &SpreadingCode, sync_word: u64) -> Vec<f32> {
    code.spread_bits(&bytes_to_bits(&sync_word.to_be_bytes()))
}

struct Candidate {
    offset: usize,
    metric: f64,
    phase: f64,
}

fn evaluate(integrator: &ChipIntegrator, preamble: &[f32], start: usize) -> Option<Candidate> {
    let spc = integrator.samples_per_chip();
    let (mut ci, mut cq, mut energy) = (0.0f64, 0.0f64, 0.0f64);

    for (k, &p) in preamble.iter().enumerate() {
        let (i, q) = integrator.chip(start + k * spc)?;
        ci += p as f64 * i;
        cq += p as f64 * q;
        energy += i * i + q * q;
    }

    let metric = if energy > 0.0 {
        (ci * ci + cq * cq).sqrt() / (preamble.len() as f64 * energy).sqrt()
    } else {
        0.0
    };
    Some(Candidate {
        offset: start,
        metric,
        phase: cq.atan2(ci),
    })
}

fn best_of(
    integrator: &ChipIntegrator,
    preamble: &[f32],
    starts: impl Iterator<Item = usize>,
) -> Option<Candidate> {
    starts
        .filter_map(|start| evaluate(integrator, preamble, start))
        .fold(None, |best: Option<Candidate>, c| match best {
            Some(b) if b.metric >= c.metric => Some(b),
            _ => Some(c),
        })
}

/// Search `samples` for the preamble.
///
/// # Errors
///
/// [`Error::NoSignalAcquired`] if no candidate reaches the threshold,
/// including when the buffer is shorter than the preamble.
pub fn acquire(
    samples: &[f32],
    carrier: &CarrierParameters,
    preamble: &[f32],
    config: &AcquisitionConfig,
) -> Result<Lock> {
    let spc = carrier.samples_per_chip;
    let span = preamble.len() * spc;
    let no_lock = |peak: f64| Error::NoSignalAcquired {
        peak: peak as f32,
        threshold: config.threshold,
    };

    if preamble.is_empty() || samples.len() < span {
        return Err(no_lock(0.0));
    }

    let step = config.coarse_step_for(carrier);
    let window = (config.search_window_secs * carrier.sample_rate as f64).ceil() as usize;
    let last_coarse = (samples.len() - span).min(window);
    // The fine pass may look one step past the last coarse start
    let reach = (last_coarse + step + span).min(samples.len());
    let last_fine = reach - span;

    let mut best: Option<(Candidate, f64)> = None;
    for &freq_offset in &config.frequency_offsets_hz {
        let integrator = ChipIntegrator::new(&samples[..reach], carrier, freq_offset);

        let Some(coarse) = best_of(&integrator, preamble, (0..=last_coarse).step_by(step)) else {
            continue;
        };
        let lo = coarse.offset.saturating_sub(step);
        let hi = (coarse.offset + step).min(last_fine);
        let Some(fine) = best_of(&integrator, preamble, lo..=hi) else {
            continue;
        };

        tracing::trace!(
            freq_offset,
            offset = fine.offset,
            metric = fine.metric,
            "acquisition candidate"
        );
        if best.as_ref().map_or(true, |(b, _)| fine.metric > b.metric) {
            best = Some((fine, freq_offset));
        }
    }

    let Some((found, freq_offset_hz)) = best else {
        return Err(no_lock(0.0));
    };
    if found.metric < config.threshold as f64 {
        tracing::debug!(peak = found.metric, threshold = config.threshold, "no signal acquired");
        return Err(no_lock(found.metric));
    }

    tracing::debug!(
        offset = found.offset,
        metric = found.metric,
        freq_offset_hz,
        "sync word acquired"
    );
    Ok(Lock {
        offset: found.offset,
        phase: found.phase,
        freq_offset_hz,
        metric: found.metric as f32,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsss::{modulate, REFERENCE_SYNC_WORD};
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;
    use rand_distr::{Distribution, Normal};

    fn setup() -> (CarrierParameters, Vec<f32>) {
        let carrier = CarrierParameters::default();
        let preamble = preamble_chips(&SpreadingCode::reference(), REFERENCE_SYNC_WORD);
        (carrier, preamble)
    }

    /// Preamble plus a few payload bits, delayed by `delay` samples, with
    /// white noise at `snr_db` relative to the signal.
    fn buffer(
        carrier: &CarrierParameters,
        preamble: &[f32],
        delay: usize,
        snr_db: Option<f64>,
        seed: u64,
    ) -> Vec<f32> {
        let code = SpreadingCode::reference();
        let mut chips = preamble.to_vec();
        chips.extend(code.spread_bits(&[1, 0, 1, 1]));
        let signal = modulate(&chips, carrier);

        let mut samples = vec![0.0f32; delay];
        samples.extend(signal);
        samples.extend(vec![0.0f32; 2000]);

        if let Some(snr_db) = snr_db {
            // Signal power is 0.5 for a unit carrier
            let sigma = (0.5 / 10f64.powf(snr_db / 10.0)).sqrt();
            let normal = Normal::new(0.0, sigma).unwrap();
            let mut rng = ChaCha20Rng::seed_from_u64(seed);
            for s in samples.iter_mut() {
                *s += normal.sample(&mut rng) as f32;
            }
        }
        samples
    }

    #[test]
    fn test_preamble_layout() {
        let (_, preamble) = setup();
        assert_eq!(preamble.len(), 64 * 31);
        // 0x43 = 0100_0011: first bit 0 sends the code itself
        assert_eq!(&preamble[..31], SpreadingCode::reference().chips());
    }

    #[test]
    fn test_acquire_noiseless() {
        let (carrier, preamble) = setup();
        for delay in [0usize, 1, 17, 1234] {
            let samples = buffer(&carrier, &preamble, delay, None, 0);
            let config = AcquisitionConfig::default();
            let lock = acquire(&samples, &carrier, &preamble, &config).unwrap();
            assert_eq!(lock.offset, delay);
            assert!(lock.metric > 0.99, "metric {}", lock.metric);
        }
    }

    #[test]
    fn test_acquire_below_noise_floor() {
        let (carrier, preamble) = setup();
        let samples = buffer(&carrier, &preamble, 5_000, Some(-20.0), 11);
        let lock = acquire(&samples, &carrier, &preamble, &AcquisitionConfig::default()).unwrap();
        assert!(lock.offset.abs_diff(5_000) <= 2, "offset {}", lock.offset);
        assert!(lock.metric > 0.25);
    }

    #[test]
    fn test_noise_only_is_not_a_lock() {
        let (carrier, preamble) = setup();
        let normal = Normal::new(0.0, 0.3).unwrap();
        let mut rng = ChaCha20Rng::seed_from_u64(99);
        let samples: Vec<f32> = (0..100_000).map(|_| normal.sample(&mut rng) as f32).collect();

        match acquire(&samples, &carrier, &preamble, &AcquisitionConfig::default()) {
            Err(Error::NoSignalAcquired { peak, threshold }) => {
                assert!(peak < threshold);
                assert_eq!(threshold, 0.12);
            }
            other => panic!("expected NoSignalAcquired, got {:?}", other),
        }
    }

    #[test]
    fn test_short_or_silent_buffer() {
        let (carrier, preamble) = setup();
        let config = AcquisitionConfig::default();
        assert!(matches!(
            acquire(&[0.0; 100], &carrier, &preamble, &config),
            Err(Error::NoSignalAcquired { .. })
        ));
        assert!(matches!(
            acquire(&vec![0.0; 100_000], &carrier, &preamble, &config),
            Err(Error::NoSignalAcquired { .. })
        ));
    }

    #[test]
    fn test_signal_outside_window_is_missed() {
        let (carrier, preamble) = setup();
        let samples = buffer(&carrier, &preamble, 20_000, None, 0);
        let config = AcquisitionConfig {
            search_window_secs: 0.1,
            ..Default::default()
        };
        assert!(acquire(&samples, &carrier, &preamble, &config).is_err());
    }

    #[test]
    fn test_frequency_search() {
        let (carrier, preamble) = setup();
        let shifted = CarrierParameters {
            carrier_freq_hz: carrier.carrier_freq_hz + 8.0,
            ..carrier.clone()
        };
        let mut samples = vec![0.0f32; 400];
        samples.extend(modulate(&preamble, &shifted));

        let config = AcquisitionConfig {
            frequency_offsets_hz: vec![-8.0, 0.0, 8.0],
            ..Default::default()
        };
        let lock = acquire(&samples, &carrier, &preamble, &config).unwrap();
        assert_eq!(lock.freq_offset_hz, 8.0);
        assert_eq!(lock.offset, 400);
    }

    #[test]
    fn test_config_validation() {
        assert!(AcquisitionConfig::default().validate().is_ok());
        let bad = AcquisitionConfig {
            threshold: 1.5,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
        let bad = AcquisitionConfig {
            frequency_offsets_hz: vec![],
            ..Default::default()
        };
        assert!(bad.validate().is_err());
        let bad = AcquisitionConfig {
            coarse_step: Some(0),
            ..Default::default()
        };
        assert!(bad.validate().is_err());
        assert_eq!(AcquisitionConfig::default().coarse_step_for(&CarrierParameters::default()), 11);
    }
}
