//! Direct-sequence spread spectrum over a BPSK audio carrier.
//!
//! ## Transmit chain
//!
//! ```text
//!  bits ──► SpreadingCode::spread_bits ──► ±1 chips ──► modulate ──► samples
//!                (N chips per bit)          (samples_per_chip per chip,
//!                                            chip × cos(2π f_c n / f_s))
//! ```
//!
//! ## Receive chain
//!
//! ```text
//!  samples ──► ChipIntegrator (I/Q mix + prefix sums)
//!          ──► acquire (sync-word search: timing, frequency, phase)
//!          ──► Demodulator (coherent chips, phase tracking, despread)
//!          ──► bits + per-bit confidence
//! ```

mod acquisition;
mod code;
mod modem;

pub use acquisition::{acquire, preamble_chips, AcquisitionConfig, Lock};
pub use code::{CodeSpec, SpreadingCode};
pub use modem::{demodulate, modulate, BitDecision, ChipIntegrator, Demodulator};

use serde::{Deserialize, Serialize};

/// Reference sample rate (Hz)
pub const REFERENCE_SAMPLE_RATE: u32 = 44_100;

/// Reference carrier frequency (Hz)
pub const REFERENCE_CARRIER_HZ: f64 = 12_000.0;

/// Reference oversampling: 44 samples at 44.1 kHz is a ~1 ms chip
pub const REFERENCE_SAMPLES_PER_CHIP: usize = 44;

/// Reference sync word. Its aperiodic autocorrelation sidelobes stay at or
/// below 7/64.
pub const REFERENCE_SYNC_WORD: u64 = 0x4333_BB86_82D8_31EA;

/// Carrier and timing parameters shared by both ends of the link.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CarrierParameters {
    /// Audio sample rate (Hz)
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    /// Carrier frequency (Hz)
    #[serde(default = "default_carrier_hz")]
    pub carrier_freq_hz: f64,
    /// Samples per chip
    #[serde(default = "default_samples_per_chip")]
    pub samples_per_chip: usize,
}

fn default_sample_rate() -> u32 {
    REFERENCE_SAMPLE_RATE
}

fn default_carrier_hz() -> f64 {
    REFERENCE_CARRIER_HZ
}

fn default_samples_per_chip() -> usize {
    REFERENCE_SAMPLES_PER_CHIP
}

impl Default for CarrierParameters {
    fn default() -> Self {
        Self {
            sample_rate: REFERENCE_SAMPLE_RATE,
            carrier_freq_hz: REFERENCE_CARRIER_HZ,
            samples_per_chip: REFERENCE_SAMPLES_PER_CHIP,
        }
    }
}

impl CarrierParameters {
    /// Half the sample rate.
    pub fn nyquist_hz(&self) -> f64 {
        self.sample_rate as f64 / 2.0
    }

    /// Chips per second.
    pub fn chip_rate(&self) -> f64 {
        self.sample_rate as f64 / self.samples_per_chip as f64
    }

    /// Duration of one chip in seconds.
    pub fn chip_duration_secs(&self) -> f64 {
        self.samples_per_chip as f64 / self.sample_rate as f64
    }

    /// Samples in one information bit for a code of `code_len` chips.
    pub fn samples_per_bit(&self, code_len: usize) -> usize {
        self.samples_per_chip * code_len
    }

    /// Duration of one information bit: chip duration × code length.
    pub fn bit_duration_secs(&self, code_len: usize) -> f64 {
        self.chip_duration_secs() * code_len as f64
    }

    /// Carrier phase advance per sample (radians).
    pub(crate) fn angular_step(&self, freq_offset_hz: f64) -> f64 {
        let freq = self.carrier_freq_hz + freq_offset_hz;
        2.0 * std::f64::consts::PI * freq / self.sample_rate as f64
    }

    /// Validate Nyquist and bandwidth constraints.
    ///
    /// The BPSK main lobe spans `carrier ± chip_rate` and must sit strictly
    /// between DC and Nyquist.
    pub fn validate(&self) -> Result<(), String> {
        if self.sample_rate == 0 {
            return Err("sample_rate must be > 0".into());
        }
        if self.samples_per_chip < 2 {
            return Err("samples_per_chip must be at least 2".into());
        }
        if !self.carrier_freq_hz.is_finite() || self.carrier_freq_hz <= 0.0 {
            return Err("carrier_freq_hz must be positive".into());
        }
        if self.carrier_freq_hz >= self.nyquist_hz() {
            return Err(format!(
                "carrier {} Hz violates Nyquist for {} Hz sampling",
                self.carrier_freq_hz, self.sample_rate
            ));
        }
        let chip_rate = self.chip_rate();
        if self.carrier_freq_hz + chip_rate >= self.nyquist_hz()
            || self.carrier_freq_hz <= chip_rate
        {
            return Err(format!(
                "main lobe {:.0}..{:.0} Hz does not fit between DC and Nyquist",
                self.carrier_freq_hz - chip_rate,
                self.carrier_freq_hz + chip_rate
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_carrier() {
        let carrier = CarrierParameters::default();
        assert!(carrier.validate().is_ok());
        assert!((carrier.chip_duration_secs() - 0.001).abs() < 0.0001);
        assert_eq!(carrier.samples_per_bit(31), 1364);
        assert!((carrier.bit_duration_secs(31) - 1364.0 / 44_100.0).abs() < 1e-12);
    }

    #[test]
    fn test_nyquist_violations() {
        let mut carrier = CarrierParameters::default();
        carrier.carrier_freq_hz = 23_000.0;
        assert!(carrier.validate().is_err());

        // Main lobe would cross Nyquist
        carrier.carrier_freq_hz = 21_500.0;
        assert!(carrier.validate().is_err());

        carrier.carrier_freq_hz = 12_000.0;
        carrier.samples_per_chip = 1;
        assert!(carrier.validate().is_err());

        // Chip rate wider than the carrier
        carrier.samples_per_chip = 2;
        assert!(carrier.validate().is_err());
    }

    #[test]
    fn test_serde_defaults() {
        let carrier: CarrierParameters =
            serde_json::from_str(r#"{"carrier_freq_hz": 9000.0}"#).unwrap();
        assert_eq!(carrier.sample_rate, REFERENCE_SAMPLE_RATE);
        assert_eq!(carrier.samples_per_chip, REFERENCE_SAMPLES_PER_CHIP);
        assert_eq!(carrier.carrier_freq_hz, 9000.0);
    }

    #[test]
    fn test_sync_word_sidelobes() {
        let bits: Vec<f32> = (0..64)
            .map(|i| if (REFERENCE_SYNC_WORD >> (63 - i)) & 1 == 1 { 1.0 } else { -1.0 })
            .collect();
        for lag in 1..64 {
            let side: f32 = (0..64 - lag).map(|i| bits[i] * bits[i + lag]).sum();
            assert!(side.abs() <= 7.0, "lag {} sidelobe {}", lag, side);
        }
    }
}
