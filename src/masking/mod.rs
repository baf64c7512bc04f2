//! Noise-floor masking and power budgeting.
//!
//! The modulated signal is scaled so its power sits a fixed number of dB
//! below the cover ("bed") audio, then summed with it. All levels are in
//! the power domain: `dB = 10·log10(P_signal / P_bed)`.
//!
//! ```text
//!  signal ──► × g ──┐
//!                   (+) ──► clip guard ──► composite
//!  bed ─────────────┘
//!
//!  g = sqrt(P_bed · 10^(snr/10) / P_signal)
//! ```

mod bed;
mod power;
#[cfg(feature = "spectrum")]
mod spectrum;

pub use bed::{synthesize_bed, white_noise_bed, NoiseFloor};
pub use power::{db_to_power_ratio, estimate_snr, mask, mask_at, power, power_db, rms, Masked};
#[cfg(feature = "spectrum")]
pub use spectrum::{detect_carrier, magnitude_spectrum, CarrierPeak, Spectrum};

use serde::{Deserialize, Serialize};

/// Quietest supported target (dB below the bed)
pub const MIN_TARGET_SNR_DB: f64 = -30.0;

/// Loudest supported target
pub const MAX_TARGET_SNR_DB: f64 = -10.0;

/// Default target
pub const DEFAULT_TARGET_SNR_DB: f64 = -20.0;

/// Peak level the composite is pulled back to when it would clip
pub const CLIP_CEILING: f32 = 0.99;

/// RMS of the synthesized bed when no cover audio is supplied (about -20 dBFS)
pub const DEFAULT_BED_RMS: f64 = 0.1;

/// Masking parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaskingConfig {
    /// Signal power relative to the bed (dB, negative)
    #[serde(default = "default_target_snr_db")]
    pub target_snr_db: f64,
    /// Rescale the composite to [`CLIP_CEILING`] when it would clip
    #[serde(default = "default_clip_protection")]
    pub clip_protection: bool,
}

fn default_target_snr_db() -> f64 {
    DEFAULT_TARGET_SNR_DB
}

fn default_clip_protection() -> bool {
    true
}

impl Default for MaskingConfig {
    fn default() -> Self {
        Self {
            target_snr_db: DEFAULT_TARGET_SNR_DB,
            clip_protection: true,
        }
    }
}

impl MaskingConfig {
    /// Create a config, clamping the target into the supported range.
    pub fn new(target_snr_db: f64) -> Self {
        let clamped = clamp_target(target_snr_db);
        if clamped != target_snr_db {
            tracing::debug!(requested = target_snr_db, clamped, "masking target clamped");
        }
        Self {
            target_snr_db: clamped,
            ..Self::default()
        }
    }

    /// Target actually applied: the configured value clamped into range.
    pub fn effective_snr_db(&self) -> f64 {
        clamp_target(self.target_snr_db)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if !self.target_snr_db.is_finite() {
            return Err("target_snr_db must be finite".into());
        }
        if !(MIN_TARGET_SNR_DB..=MAX_TARGET_SNR_DB).contains(&self.target_snr_db) {
            return Err(format!(
                "target_snr_db {} outside {}..={} dB",
                self.target_snr_db, MIN_TARGET_SNR_DB, MAX_TARGET_SNR_DB
            ));
        }
        Ok(())
    }
}

fn clamp_target(db: f64) -> f64 {
    if db.is_nan() {
        return DEFAULT_TARGET_SNR_DB;
    }
    db.clamp(MIN_TARGET_SNR_DB, MAX_TARGET_SNR_DB)
}
