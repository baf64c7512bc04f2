//! Receive path: acquire, demodulate, de-spread, de-frame, decrypt.

use std::sync::Arc;

use crate::crypto::{CryptoEngine, TAG_SIZE};
use crate::dsss::{acquire, BitDecision, Demodulator, Lock, SpreadingCode};
use crate::error::{Error, FrameError, Result};
use crate::framing::{
    deframe, frame_bits_for, read_uint, Priority, LENGTH_PREFIX_BITS, MAX_BODY_LEN,
};
use crate::link::{LinkProfile, LinkStats};

/// Link quality measured while decoding.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SignalQuality {
    /// Sample where the sync word was found
    pub lock_offset: usize,
    /// Normalized sync-word correlation
    pub acquisition_metric: f32,
    /// Carrier offset that locked (Hz)
    pub freq_offset_hz: f64,
    /// Mean de-spreading confidence over the frame
    pub mean_confidence: f32,
    /// Weakest bit in the frame
    pub min_confidence: f32,
}

/// An authenticated, decrypted message.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedMessage {
    /// Precedence
    pub priority: Priority,
    /// Plaintext command
    pub payload: Vec<u8>,
    /// Sender's sequence number
    pub sequence_id: u64,
    /// Sender's timestamp (ms since the Unix epoch)
    pub timestamp: u64,
    /// Link quality
    pub quality: SignalQuality,
}

/// The receiving end of a link.
///
/// `receive` takes `&self`; one receiver can serve several threads.
pub struct Receiver {
    profile: LinkProfile,
    code: SpreadingCode,
    preamble: Vec<f32>,
    engine: Arc<CryptoEngine>,
    stats: LinkStats,
}

impl Receiver {
    /// Create a receiver. The profile is validated here.
    pub fn new(profile: LinkProfile, engine: Arc<CryptoEngine>) -> Result<Self> {
        profile.validate()?;
        let code = profile.spreading_code()?;
        let preamble = profile.preamble()?;
        Ok(Self {
            profile,
            code,
            preamble,
            engine,
            stats: LinkStats::new(),
        })
    }

    /// The link profile.
    pub fn profile(&self) -> &LinkProfile {
        &self.profile
    }

    /// The crypto engine.
    pub fn engine(&self) -> &Arc<CryptoEngine> {
        &self.engine
    }

    /// Receive statistics.
    pub fn stats(&self) -> &LinkStats {
        &self.stats
    }

    /// Decode one message from an audio buffer.
    ///
    /// # Errors
    ///
    /// In the order they can occur: [`Error::KeyWiped`] (checked before any
    /// signal processing), [`Error::NoSignalAcquired`], [`Error::Frame`],
    /// [`Error::Authentication`].
    pub fn receive(&self, samples: &[f32]) -> Result<DecodedMessage> {
        let result = self.decode(samples);
        match &result {
            Ok(message) => {
                self.stats.record_decoded();
                tracing::debug!(
                    priority = %message.priority,
                    sequence_id = message.sequence_id,
                    mean_confidence = message.quality.mean_confidence,
                    "frame decoded"
                );
            }
            Err(Error::Authentication) => {
                self.stats.record_failure(&Error::Authentication);
                tracing::warn!("frame failed authentication: tampering or wrong key");
            }
            Err(e) => {
                self.stats.record_failure(e);
                tracing::debug!(error = %e, "receive failed");
            }
        }
        result
    }

    /// Acquire and demodulate `count` bits following the sync word.
    ///
    /// Raw access for link measurements; nothing is authenticated. A wiped
    /// session returns [`Error::KeyWiped`] without touching the buffer.
    pub fn demodulate_bits(
        &self,
        samples: &[f32],
        count: usize,
    ) -> Result<(Lock, Vec<BitDecision>)> {
        if self.engine.vault().is_wiped() {
            return Err(Error::KeyWiped);
        }
        let (lock, mut demod) = self.lock_on(samples)?;
        let available = demod.remaining_bits();
        let bits = demod.read_bits(count).ok_or(FrameError::Truncated {
            needed: count,
            available,
        })?;
        Ok((lock, bits))
    }

    fn lock_on<'a>(&'a self, samples: &[f32]) -> Result<(Lock, Demodulator<'a>)> {
        if samples.iter().any(|s| !s.is_finite()) {
            return Err(Error::signal("buffer contains non-finite samples"));
        }

        let carrier = &self.profile.carrier;
        let lock = acquire(samples, carrier, &self.preamble, &self.profile.acquisition)?;
        let start = lock.offset + self.preamble.len() * carrier.samples_per_chip;
        let demod = Demodulator::new(
            samples,
            carrier,
            &self.code,
            &lock,
            start,
            self.profile.acquisition.phase_tracking_gain,
        );
        Ok((lock, demod))
    }

    fn decode(&self, samples: &[f32]) -> Result<DecodedMessage> {
        // Fail closed before touching the signal
        if self.engine.vault().is_wiped() {
            return Err(Error::KeyWiped);
        }

        let (lock, mut demod) = self.lock_on(samples)?;

        let available = demod.remaining_bits();
        let mut decisions = demod.read_bits(LENGTH_PREFIX_BITS).ok_or(FrameError::Truncated {
            needed: LENGTH_PREFIX_BITS,
            available,
        })?;
        let prefix: Vec<u8> = decisions.iter().map(|d| d.bit).collect();
        let body_len = read_uint(&prefix, LENGTH_PREFIX_BITS).unwrap_or(0) as usize;
        if !(TAG_SIZE..=MAX_BODY_LEN).contains(&body_len) {
            return Err(FrameError::LengthOutOfRange(body_len).into());
        }

        let total = frame_bits_for(body_len);
        let available = LENGTH_PREFIX_BITS + demod.remaining_bits();
        let rest = demod.read_bits(total - LENGTH_PREFIX_BITS).ok_or(FrameError::Truncated {
            needed: total,
            available,
        })?;
        decisions.extend(rest);

        let bits: Vec<u8> = decisions.iter().map(|d| d.bit).collect();
        let frame = deframe(&bits)?;
        let payload = self.engine.decrypt(&frame.sealed, &frame.header.aad())?;

        let sum: f32 = decisions.iter().map(|d| d.confidence).sum();
        let min_confidence = decisions.iter().map(|d| d.confidence).fold(f32::INFINITY, f32::min);

        Ok(DecodedMessage {
            priority: frame.header.priority,
            payload,
            sequence_id: frame.header.sequence_id,
            timestamp: frame.header.timestamp,
            quality: SignalQuality {
                lock_offset: lock.offset,
                acquisition_metric: lock.metric,
                freq_offset_hz: lock.freq_offset_hz,
                mean_confidence: sum / decisions.len() as f32,
                min_confidence,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::AeadKey;
    use crate::framing::bytes_to_bits;
    use crate::link::Transmitter;
    use crate::masking::{mask_at, white_noise_bed, MaskingConfig, DEFAULT_TARGET_SNR_DB};
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha20Rng;

    const KEY: [u8; 32] = [0x21; 32];

    /// Loud enough that a whole frame decodes without a single bit error.
    const DECODE_SNR_DB: f64 = -15.0;

    fn profile_at(snr_db: f64) -> LinkProfile {
        LinkProfile {
            masking: MaskingConfig::new(snr_db),
            ..LinkProfile::reference()
        }
    }

    fn link_at(snr_db: f64) -> (Transmitter, Receiver) {
        let tx = Transmitter::new(
            profile_at(snr_db),
            Arc::new(CryptoEngine::new(AeadKey::from_bytes(KEY))),
        )
        .unwrap();
        let rx = Receiver::new(
            profile_at(snr_db),
            Arc::new(CryptoEngine::new(AeadKey::from_bytes(KEY))),
        )
        .unwrap();
        (tx, rx)
    }

    fn link() -> (Transmitter, Receiver) {
        link_at(DECODE_SNR_DB)
    }

    /// Mask an encoded signal into independent seeded white noise.
    fn over_seeded_noise(signal: &[f32], lead: usize, snr_db: f64, seed: u64) -> Vec<f32> {
        let mut rng = ChaCha20Rng::seed_from_u64(seed);
        let bed = white_noise_bed(lead + signal.len() + 2_000, 0.1, &mut rng);
        mask_at(signal, &bed, lead, &MaskingConfig::new(snr_db))
            .unwrap()
            .samples
    }

    #[test]
    fn test_end_to_end_over_noise() {
        let (tx, rx) = link();
        let encoded = tx.encode(Priority::Flash, b"ALL UNITS RTB").unwrap();
        let samples = over_seeded_noise(&encoded.signal, 0, DECODE_SNR_DB, 1);
        let message = rx.receive(&samples).unwrap();

        assert_eq!(message.priority, Priority::Flash);
        assert_eq!(message.payload, b"ALL UNITS RTB");
        assert_eq!(message.sequence_id, encoded.header.sequence_id);
        assert_eq!(message.timestamp, encoded.header.timestamp);
        assert_eq!(message.quality.lock_offset, 0);
        assert!(message.quality.acquisition_metric > 0.25);
        assert_eq!(rx.stats().snapshot().frames_decoded, 1);
    }

    #[test]
    fn test_thousand_bit_payload_at_masking_snr() {
        let (tx, rx) = link_at(DEFAULT_TARGET_SNR_DB);
        let mut rng = ChaCha20Rng::seed_from_u64(1000);
        let payload: Vec<u8> = (0..125).map(|_| rng.gen()).collect();
        assert_eq!(bytes_to_bits(&payload).len(), 1000);

        let encoded = tx.encode(Priority::Routine, &payload).unwrap();
        let samples = over_seeded_noise(&encoded.signal, 3_000, DEFAULT_TARGET_SNR_DB, 77);

        // Raw bit recovery across the whole frame
        let (lock, decisions) = rx.demodulate_bits(&samples, encoded.frame_bits.len()).unwrap();
        assert!(lock.offset.abs_diff(3_000) <= 2);
        let correct = decisions
            .iter()
            .zip(&encoded.frame_bits)
            .filter(|(d, &b)| d.bit == b)
            .count();
        let ratio = correct as f64 / encoded.frame_bits.len() as f64;
        assert!(ratio > 0.95, "recovered {:.3}", ratio);
        assert!(decisions.iter().map(|d| d.confidence).sum::<f32>() / decisions.len() as f32 > 0.3);
    }

    #[test]
    fn test_thousand_bit_payload_decodes() {
        let (tx, rx) = link();
        let payload: Vec<u8> = (0..125u8).map(|i| i.wrapping_mul(37)).collect();
        let encoded = tx.encode(Priority::Routine, &payload).unwrap();
        let samples = over_seeded_noise(&encoded.signal, 3_000, DECODE_SNR_DB, 78);

        let message = rx.receive(&samples).unwrap();
        assert_eq!(message.payload, payload);
        assert_eq!(message.quality.lock_offset, 3_000);
        assert!(message.quality.min_confidence > 0.0);
    }

    #[test]
    fn test_wrong_key_is_authentication_failure() {
        let (tx, _) = link();
        let rx = Receiver::new(
            LinkProfile::reference(),
            Arc::new(CryptoEngine::new(AeadKey::from_bytes([0x22; 32]))),
        )
        .unwrap();

        let encoded = tx.encode(Priority::Immediate, b"SECRET").unwrap();
        let samples = over_seeded_noise(&encoded.signal, 500, DECODE_SNR_DB, 2);
        assert!(matches!(rx.receive(&samples), Err(Error::Authentication)));
        assert_eq!(rx.stats().snapshot().auth_failures, 1);
    }

    #[test]
    fn test_noise_only_reports_no_signal() {
        let (_, rx) = link();
        let mut rng = ChaCha20Rng::seed_from_u64(5);
        let noise = white_noise_bed(120_000, 0.1, &mut rng);
        let err = rx.receive(&noise).unwrap_err();
        assert!(matches!(err, Error::NoSignalAcquired { .. }));
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_truncated_buffer_is_frame_error() {
        let (tx, rx) = link();
        let encoded = tx.encode(Priority::Routine, b"CUT SHORT").unwrap();
        // Keep the sync word and a few hundred bits, drop the tail
        let keep = encoded.signal.len() - 100 * 1364;
        let samples = over_seeded_noise(&encoded.signal[..keep], 0, DECODE_SNR_DB, 9);
        let err = rx.receive(&samples).unwrap_err();
        assert!(matches!(err, Error::Frame(FrameError::Truncated { .. })), "{err:?}");
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_wiped_receiver_fails_closed() {
        let (tx, rx) = link();
        let encoded = tx.encode(Priority::Flash, b"LAST ORDER").unwrap();
        let samples = over_seeded_noise(&encoded.signal, 0, DECODE_SNR_DB, 3);
        rx.engine().vault().wipe();

        for _ in 0..3 {
            assert!(matches!(rx.receive(&samples), Err(Error::KeyWiped)));
        }
        // Even garbage input never reaches the signal path
        assert!(matches!(rx.receive(&[f32::NAN; 4]), Err(Error::KeyWiped)));
        assert_eq!(rx.stats().snapshot().wiped_rejections, 4);
    }

    #[test]
    fn test_demodulate_bits_after_wipe_fails_closed() {
        let (tx, rx) = link();
        let encoded = tx.encode(Priority::Routine, b"MEASURE").unwrap();
        let samples = over_seeded_noise(&encoded.signal, 0, DECODE_SNR_DB, 4);
        assert!(rx.demodulate_bits(&samples, encoded.frame_bits.len()).is_ok());

        rx.engine().vault().wipe();
        for _ in 0..3 {
            let result = rx.demodulate_bits(&samples, encoded.frame_bits.len());
            assert!(matches!(result, Err(Error::KeyWiped)));
        }
        // Refused before the buffer is inspected
        assert!(matches!(rx.demodulate_bits(&[f32::NAN; 4], 8), Err(Error::KeyWiped)));
    }

    #[test]
    fn test_non_finite_input_rejected() {
        let (_, rx) = link();
        assert!(matches!(rx.receive(&[0.0, f32::NAN]), Err(Error::Signal(_))));
    }

    #[test]
    fn test_parallel_receivers() {
        let (tx, rx) = link();
        let buffers: Vec<Vec<f32>> = (0..4u64)
            .map(|i| {
                let payload = format!("SECTOR {i} CLEAR");
                let encoded = tx.encode(Priority::Priority, payload.as_bytes()).unwrap();
                over_seeded_noise(&encoded.signal, 0, DECODE_SNR_DB, 10 + i)
            })
            .collect();

        std::thread::scope(|s| {
            for (i, samples) in buffers.iter().enumerate() {
                let rx = &rx;
                s.spawn(move || {
                    let message = rx.receive(samples).unwrap();
                    assert_eq!(message.payload, format!("SECTOR {i} CLEAR").as_bytes());
                    assert_eq!(message.sequence_id, i as u64);
                });
            }
        });
        assert_eq!(rx.stats().snapshot().frames_decoded, 4);
    }
}
