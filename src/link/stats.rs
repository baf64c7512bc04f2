//! Link statistics.
//!
//! Aggregate counters only; nothing about message content is recorded.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use serde::Serialize;

use crate::error::Error;

/// Counters shared by a transmitter or receiver.
pub struct LinkStats {
    start_time: Instant,
    frames_sent: AtomicU64,
    samples_generated: AtomicU64,
    buffers_processed: AtomicU64,
    frames_decoded: AtomicU64,
    acquisition_failures: AtomicU64,
    frame_errors: AtomicU64,
    auth_failures: AtomicU64,
    wiped_rejections: AtomicU64,
    other_errors: AtomicU64,
}

impl LinkStats {
    /// Create a zeroed collector.
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            frames_sent: AtomicU64::new(0),
            samples_generated: AtomicU64::new(0),
            buffers_processed: AtomicU64::new(0),
            frames_decoded: AtomicU64::new(0),
            acquisition_failures: AtomicU64::new(0),
            frame_errors: AtomicU64::new(0),
            auth_failures: AtomicU64::new(0),
            wiped_rejections: AtomicU64::new(0),
            other_errors: AtomicU64::new(0),
        }
    }

    /// Record a transmitted frame of `samples` audio samples.
    pub fn record_sent(&self, samples: usize) {
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
        self.samples_generated.fetch_add(samples as u64, Ordering::Relaxed);
    }

    /// Record a successfully decoded frame.
    pub fn record_decoded(&self) {
        self.buffers_processed.fetch_add(1, Ordering::Relaxed);
        self.frames_decoded.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a failed receive, bucketed by error kind.
    pub fn record_failure(&self, error: &Error) {
        self.buffers_processed.fetch_add(1, Ordering::Relaxed);
        let counter = match error {
            Error::NoSignalAcquired { .. } => &self.acquisition_failures,
            Error::Frame(_) => &self.frame_errors,
            Error::Authentication => &self.auth_failures,
            Error::KeyWiped => &self.wiped_rejections,
            _ => &self.other_errors,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Get a snapshot of all counters.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            uptime_secs: self.start_time.elapsed().as_secs(),
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            samples_generated: self.samples_generated.load(Ordering::Relaxed),
            buffers_processed: self.buffers_processed.load(Ordering::Relaxed),
            frames_decoded: self.frames_decoded.load(Ordering::Relaxed),
            acquisition_failures: self.acquisition_failures.load(Ordering::Relaxed),
            frame_errors: self.frame_errors.load(Ordering::Relaxed),
            auth_failures: self.auth_failures.load(Ordering::Relaxed),
            wiped_rejections: self.wiped_rejections.load(Ordering::Relaxed),
            other_errors: self.other_errors.load(Ordering::Relaxed),
        }
    }

    /// Format counters as a simple text report.
    pub fn format_report(&self) -> String {
        let s = self.snapshot();

        format!(
            r#"Milcodec Link Statistics
========================
Uptime: {} seconds

Transmit:
  Frames sent:       {}
  Samples generated: {}

Receive:
  Buffers processed: {}
  Frames decoded:    {}
  Decode rate:       {:.1}%

Failures:
  No signal:         {}
  Frame errors:      {}
  Auth failures:     {}
  Key wiped:         {}
  Other:             {}
"#,
            s.uptime_secs,
            s.frames_sent,
            s.samples_generated,
            s.buffers_processed,
            s.frames_decoded,
            s.decode_rate() * 100.0,
            s.acquisition_failures,
            s.frame_errors,
            s.auth_failures,
            s.wiped_rejections,
            s.other_errors,
        )
    }
}

impl Default for LinkStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Counters at a point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[allow(missing_docs)]
pub struct StatsSnapshot {
    pub uptime_secs: u64,
    pub frames_sent: u64,
    pub samples_generated: u64,
    pub buffers_processed: u64,
    pub frames_decoded: u64,
    pub acquisition_failures: u64,
    pub frame_errors: u64,
    pub auth_failures: u64,
    pub wiped_rejections: u64,
    pub other_errors: u64,
}

impl StatsSnapshot {
    /// Fraction of processed buffers that yielded a message.
    pub fn decode_rate(&self) -> f64 {
        if self.buffers_processed == 0 {
            0.0
        } else {
            self.frames_decoded as f64 / self.buffers_processed as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FrameError;

    #[test]
    fn test_failure_buckets() {
        let stats = LinkStats::new();
        stats.record_sent(1000);
        stats.record_decoded();
        stats.record_failure(&Error::Authentication);
        stats.record_failure(&Error::KeyWiped);
        stats.record_failure(&FrameError::PartialByte(3).into());
        stats.record_failure(&Error::NoSignalAcquired {
            peak: 0.01,
            threshold: 0.12,
        });
        stats.record_failure(&Error::config("x"));

        let s = stats.snapshot();
        assert_eq!(s.frames_sent, 1);
        assert_eq!(s.samples_generated, 1000);
        assert_eq!(s.buffers_processed, 6);
        assert_eq!(s.frames_decoded, 1);
        assert_eq!(s.auth_failures, 1);
        assert_eq!(s.wiped_rejections, 1);
        assert_eq!(s.frame_errors, 1);
        assert_eq!(s.acquisition_failures, 1);
        assert_eq!(s.other_errors, 1);
        assert!((s.decode_rate() - 1.0 / 6.0).abs() < 1e-12);
    }

    #[test]
    fn test_report_format() {
        let stats = LinkStats::default();
        assert_eq!(stats.snapshot().decode_rate(), 0.0);
        let report = stats.format_report();
        assert!(report.contains("Frames decoded:    0"));
        assert!(report.contains("Auth failures:     0"));
    }
}
