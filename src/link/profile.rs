//! Versioned link profile.
//!
//! Both ends of a link must agree on every field here. Changing any of
//! them (code length, carrier, sync word) is a protocol change and bumps
//! `version`.

use serde::{Deserialize, Serialize};

use crate::crypto::{CryptoEngine, Salt, PBKDF2_ITERATIONS, TAG_SIZE};
use crate::dsss::{
    preamble_chips, AcquisitionConfig, CarrierParameters, CodeSpec, SpreadingCode,
    REFERENCE_SYNC_WORD,
};
use crate::error::{Error, Result};
use crate::framing::frame_bits_for;
use crate::masking::MaskingConfig;

/// Profile format understood by this build.
pub const PROFILE_VERSION: u32 = 1;

/// Bits in the sync word.
pub const SYNC_BITS: usize = 64;

/// Passphrase key schedule shared by both ends. The salt is not secret.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeySchedule {
    /// PBKDF2 salt (hex in profile files)
    pub salt: Salt,
    /// PBKDF2 iterations
    #[serde(default = "default_iterations")]
    pub iterations: u32,
}

fn default_iterations() -> u32 {
    PBKDF2_ITERATIONS
}

impl KeySchedule {
    /// A fresh random salt with the default iteration count.
    pub fn generate() -> Self {
        Self {
            salt: Salt::random(),
            iterations: PBKDF2_ITERATIONS,
        }
    }

    /// Derive a crypto engine from `passphrase`.
    pub fn engine(&self, passphrase: &[u8]) -> Result<CryptoEngine> {
        CryptoEngine::from_passphrase(passphrase, &self.salt, self.iterations)
    }
}

/// Everything both ends of a link must share.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkProfile {
    /// Profile format version
    pub version: u32,
    /// Carrier and chip timing
    #[serde(default)]
    pub carrier: CarrierParameters,
    /// Spreading code generator
    #[serde(default)]
    pub code: CodeSpec,
    /// Sync word preceding every frame (hex in profile files)
    #[serde(with = "hex_u64", default = "default_sync_word")]
    pub sync_word: u64,
    /// Masking target
    #[serde(default)]
    pub masking: MaskingConfig,
    /// Receiver search parameters
    #[serde(default)]
    pub acquisition: AcquisitionConfig,
    /// Passphrase key schedule, when keys are passphrase-derived
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_schedule: Option<KeySchedule>,
}

fn default_sync_word() -> u64 {
    REFERENCE_SYNC_WORD
}

impl Default for LinkProfile {
    fn default() -> Self {
        Self::reference()
    }
}

impl LinkProfile {
    /// Protocol version 1: 44.1 kHz, 12 kHz carrier, ~1 ms chips, 31-chip
    /// m-sequence, -20 dB masking.
    pub fn reference() -> Self {
        Self {
            version: PROFILE_VERSION,
            carrier: CarrierParameters::default(),
            code: CodeSpec::REFERENCE,
            sync_word: REFERENCE_SYNC_WORD,
            masking: MaskingConfig::default(),
            acquisition: AcquisitionConfig::default(),
            key_schedule: None,
        }
    }

    /// Parse and validate a JSON profile.
    pub fn from_json(json: &str) -> Result<Self> {
        let profile: Self = serde_json::from_str(json)
            .map_err(|e| Error::config(format!("invalid profile: {}", e)))?;
        profile.validate()?;
        Ok(profile)
    }

    /// Serialize as pretty JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::config(e.to_string()))
    }

    /// Validate the whole profile.
    pub fn validate(&self) -> Result<()> {
        if self.version != PROFILE_VERSION {
            return Err(Error::config(format!(
                "unsupported profile version {} (expected {})",
                self.version, PROFILE_VERSION
            )));
        }
        self.carrier.validate().map_err(Error::Config)?;
        self.code.build()?;
        if self.sync_word.count_ones() < 16 || self.sync_word.count_zeros() < 16 {
            return Err(Error::config("sync word is too unbalanced to correlate reliably"));
        }
        self.masking.validate().map_err(Error::Config)?;
        self.acquisition.validate().map_err(Error::Config)?;
        Ok(())
    }

    /// Build the spreading code.
    pub fn spreading_code(&self) -> Result<SpreadingCode> {
        self.code.build()
    }

    /// Build the spread sync word.
    pub fn preamble(&self) -> Result<Vec<f32>> {
        Ok(preamble_chips(&self.spreading_code()?, self.sync_word))
    }

    /// Audio samples for one transmission carrying `payload_len` plaintext bytes.
    pub fn transmission_samples(&self, payload_len: usize) -> usize {
        let bits = SYNC_BITS + frame_bits_for(payload_len + TAG_SIZE);
        bits * self.carrier.samples_per_bit(self.code.code_len())
    }

    /// Information bit rate (bits per second).
    pub fn bit_rate(&self) -> f64 {
        1.0 / self.carrier.bit_duration_secs(self.code.code_len())
    }
}

mod hex_u64 {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &u64, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(value.to_be_bytes()))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<u64, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let s = s.trim_start_matches("0x");
        let bytes = hex::decode(s).map_err(serde::de::Error::custom)?;
        let arr: [u8; 8] = bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("sync word must be 8 bytes"))?;
        Ok(u64::from_be_bytes(arr))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_profile_is_valid() {
        let profile = LinkProfile::reference();
        profile.validate().unwrap();
        assert_eq!(profile.spreading_code().unwrap(), SpreadingCode::reference());
        assert_eq!(profile.preamble().unwrap().len(), SYNC_BITS * 31);
        assert!((profile.bit_rate() - 44_100.0 / 1364.0).abs() < 1e-9);
    }

    #[test]
    fn test_json_roundtrip() {
        let mut profile = LinkProfile::reference();
        profile.key_schedule = Some(KeySchedule::generate());
        let json = profile.to_json().unwrap();
        assert!(json.contains("\"sync_word\": \"4333bb8682d831ea\""));
        assert_eq!(LinkProfile::from_json(&json).unwrap(), profile);
    }

    #[test]
    fn test_minimal_json_uses_reference_values() {
        let profile = LinkProfile::from_json(r#"{"version": 1}"#).unwrap();
        assert_eq!(profile, LinkProfile::reference());

        let profile =
            LinkProfile::from_json(r#"{"version": 1, "sync_word": "0x4333BB8682D831EA"}"#)
                .unwrap();
        assert_eq!(profile.sync_word, REFERENCE_SYNC_WORD);
    }

    #[test]
    fn test_rejects_invalid_profiles() {
        assert!(matches!(LinkProfile::from_json(r#"{"version": 2}"#), Err(Error::Config(_))));
        assert!(LinkProfile::from_json("not json").is_err());
        for bad in [
            r#"{"version": 1, "carrier": {"carrier_freq_hz": 30000.0}}"#,
            r#"{"version": 1, "code": {"degree": 5, "taps": 3, "seed": 1}}"#,
            r#"{"version": 1, "sync_word": "ffffffffffffffff"}"#,
            r#"{"version": 1, "acquisition": {"threshold": 0.0}}"#,
        ] {
            assert!(LinkProfile::from_json(bad).is_err(), "{}", bad);
        }
    }

    #[test]
    fn test_transmission_length() {
        let profile = LinkProfile::reference();
        // 64 sync bits + (31 header + 5 payload + 16 tag) bytes
        assert_eq!(profile.transmission_samples(5), (64 + 52 * 8) * 1364);
    }
}
