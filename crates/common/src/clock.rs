//! Clock, timing, and cancellation utilities for compilation runs.
//!
//! Every compilation run is anchored to a [`RunClock`] started when the
//! run begins. This module provides utilities for:
//! - Timing a run against a monotonic epoch
//! - Frame/sample arithmetic for a fixed output frame rate
//! - Cooperative cancellation shared between a run and its owner

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// A run clock that provides monotonic timestamps relative to a fixed
/// epoch (the moment the run started).
#[derive(Debug, Clone)]
pub struct RunClock {
    /// The instant the run started.
    epoch: Instant,

    /// Wall-clock time at epoch (RFC 3339 string).
    epoch_wall: String,
}

impl RunClock {
    /// Create a new clock anchored to now.
    pub fn start() -> Self {
        Self {
            epoch: Instant::now(),
            epoch_wall: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// Milliseconds elapsed since the run started.
    pub fn elapsed_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    /// Wall-clock time at run start.
    pub fn epoch_wall(&self) -> &str {
        &self.epoch_wall
    }
}

/// Frame and audio-sample arithmetic for a fixed output rate.
///
/// Audio is carried as interleaved stereo `f32`; a "sample frame" is one
/// sample per channel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameClock {
    fps: u32,
    sample_rate: u32,
}

impl FrameClock {
    /// Output channel count for mixed audio.
    pub const CHANNELS: usize = 2;

    pub fn new(fps: u32, sample_rate: u32) -> Self {
        Self {
            fps: fps.max(1),
            sample_rate: sample_rate.max(1),
        }
    }

    pub fn fps(&self) -> u32 {
        self.fps
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Duration of a single video frame in seconds.
    pub fn frame_interval_secs(&self) -> f64 {
        1.0 / self.fps as f64
    }

    /// Convert a frame count to seconds.
    pub fn frames_to_secs(&self, frames: u64) -> f64 {
        frames as f64 / self.fps as f64
    }

    /// Number of frames needed to cover `secs`, rounded up.
    pub fn frames_for_secs(&self, secs: f64) -> u64 {
        if secs <= 0.0 || !secs.is_finite() {
            return 0;
        }
        // Tolerate float noise such as 2.0000000001 * 30.
        (secs * self.fps as f64 - 1e-6).ceil().max(0.0) as u64
    }

    /// Audio sample frames belonging to video frame `index`.
    ///
    /// Computed from cumulative boundaries so rates that do not divide
    /// evenly (44100 / 30 etc.) never drift.
    pub fn samples_for_frame(&self, index: u64) -> usize {
        let start = self.sample_boundary(index);
        let end = self.sample_boundary(index + 1);
        (end - start) as usize
    }

    /// Interleaved `f32` values for video frame `index`.
    pub fn interleaved_len_for_frame(&self, index: u64) -> usize {
        self.samples_for_frame(index) * Self::CHANNELS
    }

    fn sample_boundary(&self, frame: u64) -> u64 {
        frame * self.sample_rate as u64 / self.fps as u64
    }
}

/// Cooperative cancellation flag.
///
/// Cloning shares the flag. A run checks it at every suspension boundary;
/// setting it never interrupts work in progress.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Whether `other` shares this token's flag.
    pub fn same_as(&self, other: &CancelToken) -> bool {
        Arc::ptr_eq(&self.flag, &other.flag)
    }

    /// Return `Err(ReelError::Cancelled)` if cancellation was requested.
    pub fn check(&self) -> crate::error::ReelResult<()> {
        if self.is_cancelled() {
            Err(crate::error::ReelError::Cancelled)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_elapsed() {
        let clock = RunClock::start();
        assert!(clock.elapsed_ms() < 1000);
        assert!(!clock.epoch_wall().is_empty());
    }

    #[test]
    fn test_frames_for_secs_rounds_up() {
        let clock = FrameClock::new(30, 48000);
        assert_eq!(clock.frames_for_secs(2.0), 60);
        assert_eq!(clock.frames_for_secs(1.01), 31);
        assert_eq!(clock.frames_for_secs(0.0), 0);
        assert!((clock.frames_to_secs(45) - 1.5).abs() < 1e-9);
    }

    #[test]
    fn test_samples_for_frame_even_rate() {
        let clock = FrameClock::new(30, 48000);
        assert_eq!(clock.samples_for_frame(0), 1600);
        assert_eq!(clock.interleaved_len_for_frame(7), 3200);
    }

    #[test]
    fn test_samples_for_frame_uneven_rate_does_not_drift() {
        let clock = FrameClock::new(30, 44100);
        let total: usize = (0..30).map(|i| clock.samples_for_frame(i)).sum();
        assert_eq!(total, 44100);
    }

    #[test]
    fn test_cancel_token_is_shared_between_clones() {
        let token = CancelToken::new();
        let other = token.clone();
        assert!(token.check().is_ok());
        assert!(token.same_as(&other));
        assert!(!token.same_as(&CancelToken::new()));
        other.cancel();
        assert!(token.is_cancelled());
        assert!(token.check().unwrap_err().is_cancelled());
    }
}
