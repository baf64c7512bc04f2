//! Pseudo-noise spreading codes.
//!
//! Codes are maximal-length sequences from a Fibonacci LFSR. Bit 0 is sent
//! as the code, bit 1 as its complement:
//!
//! ```text
//!   bit 0  ──►  +c0 +c1 +c2 ... +c(N-1)
//!   bit 1  ──►  -c0 -c1 -c2 ... -c(N-1)
//! ```
//!
//! De-spreading is a dot product against the code; the sign gives the bit
//! and the normalized magnitude gives a confidence in `[0, 1]`.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// LFSR parameters that generate a spreading code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeSpec {
    /// Register length; the code has `2^degree - 1` chips
    pub degree: u32,
    /// Feedback tap mask (bit `i` taps stage `i`)
    pub taps: u32,
    /// Initial register state, non-zero
    pub seed: u32,
}

impl CodeSpec {
    /// x^5 + x^2 + 1 from the all-ones state: the 31-chip reference code.
    pub const REFERENCE: CodeSpec = CodeSpec {
        degree: 5,
        taps: 0b00101,
        seed: 0b11111,
    };

    /// Chips per bit the generated code will have.
    pub fn code_len(&self) -> usize {
        1usize.checked_shl(self.degree).map_or(0, |v| v - 1)
    }

    /// Generate the m-sequence these parameters describe.
    pub fn build(&self) -> Result<SpreadingCode> {
        SpreadingCode::m_sequence(self.degree, self.taps, self.seed)
    }
}

impl Default for CodeSpec {
    fn default() -> Self {
        Self::REFERENCE
    }
}

/// A bipolar (±1) pseudo-noise sequence of odd length.
#[derive(Debug, Clone, PartialEq)]
pub struct SpreadingCode {
    chips: Vec<f32>,
}

fn lfsr_chips(degree: u32, taps: u32, seed: u32) -> (Vec<f32>, u32, bool) {
    let len = (1usize << degree) - 1;
    let mut state = seed;
    let mut chips = Vec::with_capacity(len);
    let mut early_repeat = false;

    for step in 0..len {
        chips.push(if state & 1 == 1 { 1.0 } else { -1.0 });
        let feedback = (state & taps).count_ones() & 1;
        state = (state >> 1) | (feedback << (degree - 1));
        if state == seed && step + 1 < len {
            early_repeat = true;
        }
    }

    (chips, state, early_repeat)
}

impl SpreadingCode {
    /// The 31-chip reference code, `1111100011011101010000100101100`.
    pub fn reference() -> Self {
        let CodeSpec { degree, taps, seed } = CodeSpec::REFERENCE;
        Self {
            chips: lfsr_chips(degree, taps, seed).0,
        }
    }

    /// Generate a maximal-length sequence.
    ///
    /// # Errors
    ///
    /// [`Error::Config`] if the parameters are out of range or the taps do
    /// not give a maximal period.
    pub fn m_sequence(degree: u32, taps: u32, seed: u32) -> Result<Self> {
        if !(2..=16).contains(&degree) {
            return Err(Error::config(format!("LFSR degree {} outside 2..=16", degree)));
        }
        let mask = (1u32 << degree) - 1;
        if seed == 0 || seed & !mask != 0 {
            return Err(Error::config("LFSR seed must be non-zero and fit the register"));
        }
        if taps == 0 || taps & !mask != 0 {
            return Err(Error::config("LFSR taps must be non-zero and fit the register"));
        }

        let (chips, final_state, early_repeat) = lfsr_chips(degree, taps, seed);
        if early_repeat || final_state != seed {
            return Err(Error::config(format!(
                "taps 0x{:x} do not give a maximal-length sequence",
                taps
            )));
        }
        Ok(Self { chips })
    }

    /// Use an externally supplied chip sequence.
    ///
    /// The sequence must have odd length, hold only ±1, and have a peaked
    /// periodic autocorrelation (every sidelobe at most a quarter of the peak).
    pub fn from_chips(chips: Vec<f32>) -> Result<Self> {
        if chips.len() < 3 || chips.len() % 2 == 0 {
            return Err(Error::config(format!(
                "spreading code length {} must be odd and at least 3",
                chips.len()
            )));
        }
        if chips.iter().any(|&c| c != 1.0 && c != -1.0) {
            return Err(Error::config("spreading code chips must be +1 or -1"));
        }

        let code = Self { chips };
        let limit = code.len() as f32 / 4.0;
        if let Some(lag) = (1..code.len()).find(|&lag| code.autocorrelation(lag).abs() > limit) {
            return Err(Error::config(format!(
                "spreading code autocorrelation sidelobe at lag {} exceeds {:.1}",
                lag, limit
            )));
        }
        Ok(code)
    }

    /// Number of chips per information bit.
    pub fn len(&self) -> usize {
        self.chips.len()
    }

    /// Always false; codes have at least 3 chips.
    pub fn is_empty(&self) -> bool {
        self.chips.is_empty()
    }

    /// The bipolar chips.
    pub fn chips(&self) -> &[f32] {
        &self.chips
    }

    /// Chips as a `0`/`1` string, for display.
    pub fn to_bit_string(&self) -> String {
        self.chips.iter().map(|&c| if c > 0.0 { '1' } else { '0' }).collect()
    }

    /// Spread one bit.
    pub fn spread(&self, bit: u8) -> Vec<f32> {
        let sign = if bit == 0 { 1.0 } else { -1.0 };
        self.chips.iter().map(|&c| sign * c).collect()
    }

    /// Spread a bitstream into one contiguous chip sequence.
    pub fn spread_bits(&self, bits: &[u8]) -> Vec<f32> {
        let mut out = Vec::with_capacity(bits.len() * self.len());
        for &bit in bits {
            let sign = if bit == 0 { 1.0 } else { -1.0 };
            out.extend(self.chips.iter().map(|&c| sign * c));
        }
        out
    }

    /// Raw correlation of one bit period against the code.
    pub fn correlate(&self, received: &[f32]) -> f32 {
        received.iter().zip(&self.chips).map(|(r, c)| r * c).sum()
    }

    /// Recover one bit and its confidence from a bit period of soft chips.
    ///
    /// Confidence is `|corr| / sqrt(N * sum(r^2))`: `1.0` for a clean,
    /// correctly aligned bit, near zero for noise or silence.
    ///
    /// # Errors
    ///
    /// [`Error::Buffer`] if `received` is not exactly one code length.
    pub fn despread(&self, received: &[f32]) -> Result<(u8, f32)> {
        if received.len() != self.len() {
            return Err(Error::Buffer {
                expected: self.len(),
                actual: received.len(),
            });
        }

        let corr = self.correlate(received);
        let energy: f32 = received.iter().map(|r| r * r).sum();
        let bit = if corr >= 0.0 { 0 } else { 1 };
        let confidence = if energy > 0.0 {
            (corr.abs() / (self.len() as f32 * energy).sqrt()).min(1.0)
        } else {
            0.0
        };
        Ok((bit, confidence))
    }

    /// Processing gain in dB: `10 * log10(N)`.
    pub fn processing_gain_db(&self) -> f64 {
        10.0 * (self.len() as f64).log10()
    }

    /// Periodic autocorrelation at `lag` chips.
    pub fn autocorrelation(&self, lag: usize) -> f32 {
        let n = self.len();
        (0..n).map(|i| self.chips[i] * self.chips[(i + lag) % n]).sum()
    }
}
