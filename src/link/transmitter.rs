//! Transmit path: encrypt, frame, spread, modulate, mask.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::crypto::{CryptoEngine, TAG_SIZE};
use crate::dsss::{modulate, SpreadingCode};
use crate::error::{Error, FrameError, Result};
use crate::framing::{frame, MessageHeader, Priority, MAX_PAYLOAD_LEN};
use crate::link::{LinkProfile, LinkStats};
use crate::masking::{mask_at, synthesize_bed, DEFAULT_BED_RMS};

/// A frame modulated onto the carrier but not yet masked.
#[derive(Debug, Clone)]
pub struct Encoded {
    /// Header as sent
    pub header: MessageHeader,
    /// Frame bitstream, excluding the sync word
    pub frame_bits: Vec<u8>,
    /// Unit-amplitude modulated audio: sync word then frame
    pub signal: Vec<f32>,
}

/// A masked transmission ready for output.
#[derive(Debug, Clone)]
pub struct Transmission {
    /// Header as sent
    pub header: MessageHeader,
    /// Composite audio
    pub samples: Vec<f32>,
    /// Sample where the sync word starts
    pub signal_offset: usize,
    /// Length of the hidden signal in samples
    pub signal_len: usize,
    /// Gain applied to the signal by masking
    pub signal_gain: f32,
    /// Gain applied to the composite by clip protection
    pub output_gain: f32,
}

/// The transmitting end of a link.
pub struct Transmitter {
    profile: LinkProfile,
    code: SpreadingCode,
    preamble: Vec<f32>,
    engine: Arc<CryptoEngine>,
    next_sequence: AtomicU64,
    stats: LinkStats,
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

impl Transmitter {
    /// Create a transmitter. The profile is validated here.
    pub fn new(profile: LinkProfile, engine: Arc<CryptoEngine>) -> Result<Self> {
        profile.validate()?;
        let code = profile.spreading_code()?;
        let preamble = profile.preamble()?;
        Ok(Self {
            profile,
            code,
            preamble,
            engine,
            next_sequence: AtomicU64::new(0),
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

    /// Transmit statistics.
    pub fn stats(&self) -> &LinkStats {
        &self.stats
    }

    /// Start numbering messages from `sequence_id`.
    pub fn set_next_sequence(&self, sequence_id: u64) {
        self.next_sequence.store(sequence_id, Ordering::SeqCst);
    }

    /// Encrypt, frame, spread and modulate one message.
    ///
    /// # Errors
    ///
    /// [`Error::KeyWiped`] after Protocol Zero, checked before anything
    /// else; [`FrameError::LengthOutOfRange`] if the payload does not fit in
    /// one frame.
    pub fn encode(&self, priority: Priority, payload: &[u8]) -> Result<Encoded> {
        if self.engine.vault().is_wiped() {
            return Err(Error::KeyWiped);
        }
        if payload.len() > MAX_PAYLOAD_LEN {
            return Err(FrameError::LengthOutOfRange(payload.len() + TAG_SIZE).into());
        }

        let header = MessageHeader {
            priority,
            sequence_id: self.next_sequence.fetch_add(1, Ordering::SeqCst),
            timestamp: now_millis(),
        };
        let sealed = self.engine.encrypt(payload, &header.aad())?;
        let frame_bits = frame(&header, &sealed)?;

        let mut chips = self.preamble.clone();
        chips.extend(self.code.spread_bits(&frame_bits));
        let signal = modulate(&chips, &self.profile.carrier);

        tracing::debug!(
            priority = %priority,
            sequence_id = header.sequence_id,
            bits = frame_bits.len(),
            samples = signal.len(),
            "frame encoded"
        );
        Ok(Encoded {
            header,
            frame_bits,
            signal,
        })
    }

    /// Hide one message in `bed`, starting at bed sample `offset`.
    pub fn transmit(
        &self,
        priority: Priority,
        payload: &[u8],
        bed: &[f32],
        offset: usize,
    ) -> Result<Transmission> {
        let encoded = self.encode(priority, payload)?;
        let masked = mask_at(&encoded.signal, bed, offset, &self.profile.masking)?;
        self.stats.record_sent(masked.samples.len());

        Ok(Transmission {
            header: encoded.header,
            samples: masked.samples,
            signal_offset: offset,
            signal_len: encoded.signal.len(),
            signal_gain: masked.signal_gain,
            output_gain: masked.output_gain,
        })
    }

    /// Hide one message in freshly synthesized white noise.
    ///
    /// One bit period of noise is appended after the signal.
    pub fn transmit_over_noise(&self, priority: Priority, payload: &[u8]) -> Result<Transmission> {
        let encoded = self.encode(priority, payload)?;
        let tail = self.profile.carrier.samples_per_bit(self.code.len());
        let bed = synthesize_bed(encoded.signal.len() + tail, DEFAULT_BED_RMS)?;
        let masked = mask_at(&encoded.signal, &bed, 0, &self.profile.masking)?;
        self.stats.record_sent(masked.samples.len());

        Ok(Transmission {
            header: encoded.header,
            samples: masked.samples,
            signal_offset: 0,
            signal_len: encoded.signal.len(),
            signal_gain: masked.signal_gain,
            output_gain: masked.output_gain,
        })
    }
}
