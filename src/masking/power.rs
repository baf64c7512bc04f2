//! Power measurement, masking and SNR estimation.

use crate::error::{Error, Result};
use crate::masking::{MaskingConfig, CLIP_CEILING};

/// Mean square of `samples` (0 for an empty buffer).
pub fn power(samples: &[f32]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    samples.iter().map(|&s| s as f64 * s as f64).sum::<f64>() / samples.len() as f64
}

/// Root mean square of `samples`.
pub fn rms(samples: &[f32]) -> f64 {
    power(samples).sqrt()
}

/// Power ratio in dB.
pub fn power_db(power: f64) -> f64 {
    10.0 * power.log10()
}

/// Inverse of [`power_db`].
pub fn db_to_power_ratio(db: f64) -> f64 {
    10f64.powf(db / 10.0)
}

fn check_finite(samples: &[f32], what: &str) -> Result<()> {
    if samples.iter().any(|s| !s.is_finite()) {
        return Err(Error::signal(format!("{} contains non-finite samples", what)));
    }
    Ok(())
}

/// Result of [`mask`].
#[derive(Debug, Clone)]
pub struct Masked {
    /// Composite audio, same length as the bed
    pub samples: Vec<f32>,
    /// Gain applied to the signal before summing
    pub signal_gain: f32,
    /// Gain applied to the whole composite by clip protection (1.0 if none)
    pub output_gain: f32,
    /// Bed power over the span the signal occupies
    pub bed_power: f64,
    /// Target that was applied (dB)
    pub target_snr_db: f64,
}

/// Hide `signal` in `bed`, starting at the first bed sample.
pub fn mask(signal: &[f32], bed: &[f32], config: &MaskingConfig) -> Result<Masked> {
    mask_at(signal, bed, 0, config)
}

/// Hide `signal` in `bed`, starting at bed sample `offset`.
///
/// The bed power is measured over the span the signal will occupy.
///
/// # Errors
///
/// [`Error::Buffer`] if the signal does not fit in the bed;
/// [`Error::Signal`] for an empty signal, a silent bed, or non-finite input.
pub fn mask_at(
    signal: &[f32],
    bed: &[f32],
    offset: usize,
    config: &MaskingConfig,
) -> Result<Masked> {
    let end = offset + signal.len();
    if end > bed.len() {
        return Err(Error::Buffer {
            expected: end,
            actual: bed.len(),
        });
    }
    check_finite(signal, "signal")?;
    check_finite(bed, "carrier bed")?;

    let signal_power = power(signal);
    if signal_power == 0.0 {
        return Err(Error::signal("signal is empty or silent"));
    }
    let bed_power = power(&bed[offset..end]);
    if bed_power == 0.0 {
        return Err(Error::signal("carrier bed is silent where the signal goes"));
    }

    let target_snr_db = config.effective_snr_db();
    let signal_gain = (bed_power * db_to_power_ratio(target_snr_db) / signal_power).sqrt() as f32;

    let mut samples = bed.to_vec();
    for (out, &s) in samples[offset..end].iter_mut().zip(signal) {
        *out += s * signal_gain;
    }

    let mut output_gain = 1.0f32;
    if config.clip_protection {
        let peak = samples.iter().fold(0.0f32, |m, s| m.max(s.abs()));
        if peak > 1.0 {
            output_gain = CLIP_CEILING / peak;
            samples.iter_mut().for_each(|s| *s *= output_gain);
            tracing::debug!(peak, output_gain, "composite rescaled to avoid clipping");
        }
    }

    Ok(Masked {
        samples,
        signal_gain,
        output_gain,
        bed_power,
        target_snr_db,
    })
}

/// Estimate the SNR (dB) of `known_signal` inside `composite`.
///
/// The signal is least-squares fitted to the start of the composite, which
/// absorbs any gain applied by masking; everything left over counts as
/// noise. Returns `+inf` for a perfect fit.
pub fn estimate_snr(composite: &[f32], known_signal: &[f32]) -> Result<f64> {
    if composite.len() < known_signal.len() {
        return Err(Error::Buffer {
            expected: known_signal.len(),
            actual: composite.len(),
        });
    }
    let composite = &composite[..known_signal.len()];

    let cross: f64 = composite.iter().zip(known_signal).map(|(&c, &s)| c as f64 * s as f64).sum();
    let energy: f64 = known_signal.iter().map(|&s| s as f64 * s as f64).sum();
    if energy == 0.0 {
        return Err(Error::signal("known signal is empty or silent"));
    }
    let alpha = cross / energy;

    let fitted = alpha * alpha * energy;
    let residual: f64 = composite
        .iter()
        .zip(known_signal)
        .map(|(&c, &s)| {
            let r = c as f64 - alpha * s as f64;
            r * r
        })
        .sum();

    if residual == 0.0 {
        return Ok(f64::INFINITY);
    }
    Ok(10.0 * (fitted / residual).log10())
}
