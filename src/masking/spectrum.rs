//! Spectrum analysis for before/after inspection of masked audio.
//!
//! Magnitudes are averaged over half-overlapping Hann-windowed frames.

use std::f32::consts::PI;

use rustfft::{num_complex::Complex32, FftPlanner};

use crate::error::{Error, Result};

/// Default FFT frame length
pub const DEFAULT_FFT_LEN: usize = 4096;

/// Averaged magnitude spectrum, DC up to (not including) Nyquist.
#[derive(Debug, Clone)]
pub struct Spectrum {
    /// Width of one bin (Hz)
    pub bin_hz: f64,
    /// Mean linear magnitude per bin
    pub magnitudes: Vec<f32>,
    /// Number of frames averaged
    pub frames: usize,
}

impl Spectrum {
    /// Centre frequency of `bin`.
    pub fn frequency(&self, bin: usize) -> f64 {
        bin as f64 * self.bin_hz
    }

    fn band(&self, min_hz: f64, max_hz: f64) -> std::ops::Range<usize> {
        let lo = (min_hz / self.bin_hz).ceil().max(0.0) as usize;
        let hi = ((max_hz / self.bin_hz).floor() as usize + 1).min(self.magnitudes.len());
        lo.min(hi)..hi
    }

    /// Strongest bin within `[min_hz, max_hz]`.
    pub fn peak_in(&self, min_hz: f64, max_hz: f64) -> Option<(usize, f32)> {
        let band = self.band(min_hz, max_hz);
        let start = band.start;
        self.magnitudes[band]
            .iter()
            .enumerate()
            .fold(None, |best: Option<(usize, f32)>, (i, &m)| match best {
                Some((_, b)) if b >= m => best,
                _ => Some((start + i, m)),
            })
    }

    /// Median magnitude within `[min_hz, max_hz]`.
    pub fn median_in(&self, min_hz: f64, max_hz: f64) -> Option<f32> {
        let mut values = self.magnitudes[self.band(min_hz, max_hz)].to_vec();
        if values.is_empty() {
            return None;
        }
        values.sort_by(|a, b| a.total_cmp(b));
        Some(values[values.len() / 2])
    }
}

/// Compute the averaged magnitude spectrum with frames of `fft_len` samples.
///
/// # Errors
///
/// [`Error::Signal`] if `fft_len` is not a power of two or the buffer is
/// shorter than one frame.
pub fn magnitude_spectrum(samples: &[f32], sample_rate: u32, fft_len: usize) -> Result<Spectrum> {
    if !fft_len.is_power_of_two() || fft_len < 16 {
        return Err(Error::signal(format!("FFT length {} must be a power of two >= 16", fft_len)));
    }
    if samples.len() < fft_len {
        return Err(Error::Buffer {
            expected: fft_len,
            actual: samples.len(),
        });
    }

    let mut planner = FftPlanner::<f32>::new();
    let fft = planner.plan_fft_forward(fft_len);

    let window: Vec<f32> = (0..fft_len)
        .map(|i| 0.5 - 0.5 * (2.0 * PI * i as f32 / fft_len as f32).cos())
        .collect();

    let hop = fft_len / 2;
    let frames = 1 + (samples.len() - fft_len) / hop;
    let mut magnitudes = vec![0.0f32; fft_len / 2];
    let mut buffer = vec![Complex32::new(0.0, 0.0); fft_len];

    for frame in 0..frames {
        let start = frame * hop;
        for (i, slot) in buffer.iter_mut().enumerate() {
            *slot = Complex32::new(samples[start + i] * window[i], 0.0);
        }
        fft.process(&mut buffer);
        for (acc, bin) in magnitudes.iter_mut().zip(&buffer) {
            *acc += bin.norm();
        }
    }
    magnitudes.iter_mut().for_each(|m| *m /= frames as f32);

    Ok(Spectrum {
        bin_hz: sample_rate as f64 / fft_len as f64,
        magnitudes,
        frames,
    })
}

/// A detected spectral peak.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CarrierPeak {
    /// Peak frequency (Hz)
    pub freq_hz: f64,
    /// Peak level above the band median (dB)
    pub prominence_db: f64,
}

/// Find the dominant frequency within `[min_hz, max_hz]`.
///
/// A high prominence means a visible line; a carrier hidden under the
/// noise floor shows little.
pub fn detect_carrier(
    samples: &[f32],
    sample_rate: u32,
    min_hz: f64,
    max_hz: f64,
) -> Result<CarrierPeak> {
    let spectrum = magnitude_spectrum(samples, sample_rate, DEFAULT_FFT_LEN)?;
    let (Some((bin, peak)), Some(median)) =
        (spectrum.peak_in(min_hz, max_hz), spectrum.median_in(min_hz, max_hz))
    else {
        return Err(Error::signal(format!("band {}..{} Hz holds no bins", min_hz, max_hz)));
    };

    let prominence_db = if median > 0.0 {
        20.0 * (peak as f64 / median as f64).log10()
    } else {
        0.0
    };
    Ok(CarrierPeak {
        freq_hz: spectrum.frequency(bin),
        prominence_db,
    })
}
