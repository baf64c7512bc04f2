//! Error types for the covert signaling core.

use thiserror::Error;

/// Result type alias for milcodec operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur anywhere in the transmit or receive pipeline.
#[derive(Error, Debug)]
pub enum Error {
    /// The demodulator could not lock onto a signal in the buffer.
    ///
    /// Recoverable: retry with a later buffer.
    #[error("no signal acquired: correlation peak {peak:.3} below threshold {threshold:.3}")]
    NoSignalAcquired {
        /// Best normalized correlation seen during the search
        peak: f32,
        /// Configured acquisition threshold
        threshold: f32,
    },

    /// Frame structure or length is invalid. The frame is discarded.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// Tag mismatch: tampering, corruption past the framer, or the wrong key.
    #[error("authentication failed")]
    Authentication,

    /// Key material was destroyed by Protocol Zero. Terminal for the session.
    #[error("key material wiped")]
    KeyWiped,

    /// Cryptographic operation failed for a reason other than authentication
    #[error("cryptographic error: {0}")]
    Crypto(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Audio buffer cannot be processed (silent bed, NaN samples, ...)
    #[error("signal error: {0}")]
    Signal(String),

    /// Buffer overflow/underflow
    #[error("buffer error: expected {expected} bytes, got {actual}")]
    Buffer { expected: usize, actual: usize },

    /// Invalid message format outside the link framing (envelopes, KEM blobs)
    #[error("invalid message format: {0}")]
    InvalidMessage(String),

    /// Protocol Zero confirmation was refused
    #[error("wipe confirmation rejected: {0}")]
    WipeConfirmation(String),
}

/// Structural problems detected while de-framing a bitstream.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Fewer bits than the header, or than the length prefix announces
    #[error("truncated frame: need {needed} bits, have {available}")]
    Truncated { needed: usize, available: usize },

    /// Length prefix disagrees with the number of bytes actually received
    #[error("length prefix {declared} does not match received body of {actual} bytes")]
    LengthMismatch { declared: usize, actual: usize },

    /// Length prefix outside the legal range
    #[error("length prefix {0} out of range")]
    LengthOutOfRange(usize),

    /// Priority tag is not one of the four precedence levels
    #[error("unknown priority tag 0x{0:02x}")]
    UnknownPriority(u8),

    /// Bitstream length is not a whole number of bytes
    #[error("bitstream of {0} bits is not byte aligned")]
    PartialByte(usize),
}

impl Error {
    /// Create a new cryptographic error
    pub fn crypto(msg: impl Into<String>) -> Self {
        Error::Crypto(msg.into())
    }

    /// Create a new configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Create a new signal error
    pub fn signal(msg: impl Into<String>) -> Self {
        Error::Signal(msg.into())
    }

    /// Check if the caller may retry with a later buffer
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::NoSignalAcquired { .. })
    }

    /// Check if this error indicates authentication failure
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, Error::Authentication)
    }

    /// Check if this error is terminal for the session
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::KeyWiped)
    }

    /// Check if this error came from frame validation
    pub fn is_frame_error(&self) -> bool {
        matches!(self, Error::Frame(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::Authentication;
        assert_eq!(err.to_string(), "authentication failed");

        let err = Error::KeyWiped;
        assert_eq!(err.to_string(), "key material wiped");

        let err = Error::from(FrameError::UnknownPriority(0x7f));
        assert_eq!(err.to_string(), "frame error: unknown priority tag 0x7f");
    }

    #[test]
    fn test_error_classification() {
        let acquisition = Error::NoSignalAcquired {
            peak: 0.05,
            threshold: 0.12,
        };
        assert!(acquisition.is_recoverable());
        assert!(!acquisition.is_fatal());

        assert!(Error::KeyWiped.is_fatal());
        assert!(!Error::KeyWiped.is_recoverable());

        assert!(Error::Authentication.is_auth_failure());
        assert!(!Error::Authentication.is_frame_error());

        let frame = Error::from(FrameError::PartialByte(7));
        assert!(frame.is_frame_error());
        assert!(!frame.is_auth_failure());
    }
}
