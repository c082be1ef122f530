//! Clock and frame scheduling utilities for export capture.
//!
//! An export captures frames on a fixed cadence anchored to the moment
//! capture started. This module provides:
//! - The capture epoch
//! - The nominal frame schedule (deadlines, timestamps, keyframe cadence)
//! - Lag measurement between the schedule and the actual capture time

use std::time::{Duration, Instant};

/// A capture clock that provides monotonic time relative to a fixed epoch
/// (the moment the capture loop started).
#[derive(Debug, Clone)]
pub struct ExportClock {
    /// The instant capture started.
    epoch: Instant,

    /// Wall-clock time at epoch (RFC 3339 string).
    epoch_wall: String,
}

impl ExportClock {
    /// Create a new clock anchored to now.
    pub fn start() -> Self {
        Self {
            epoch: Instant::now(),
            epoch_wall: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// Microseconds elapsed since capture start.
    pub fn elapsed_us(&self) -> u64 {
        self.epoch.elapsed().as_micros() as u64
    }

    /// Seconds elapsed since capture start.
    pub fn elapsed_secs(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64()
    }

    /// Wall-clock time at capture start.
    pub fn epoch_wall(&self) -> &str {
        &self.epoch_wall
    }

    /// The underlying epoch instant.
    pub fn epoch(&self) -> Instant {
        self.epoch
    }
}

/// Nominal timing of every frame in one export.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameSchedule {
    fps: u32,
    total_frames: u64,
}

impl FrameSchedule {
    /// Schedule `round(duration / interval)` frames at `fps`, never fewer than one.
    pub fn new(fps: u32, duration_ms: u64) -> Self {
        let fps = fps.max(1);
        let interval_ms = 1000.0 / fps as f64;
        let total_frames = ((duration_ms as f64 / interval_ms).round() as u64).max(1);
        Self { fps, total_frames }
    }

    pub fn fps(&self) -> u32 {
        self.fps
    }

    pub fn total_frames(&self) -> u64 {
        self.total_frames
    }

    /// Time between two frame deadlines.
    pub fn interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.fps as f64)
    }

    /// Nominal frame interval in whole microseconds.
    pub fn interval_us(&self) -> u64 {
        (1_000_000.0 / self.fps as f64).round() as u64
    }

    /// Offset from the epoch at which frame `index` should be captured.
    pub fn deadline(&self, index: u64) -> Duration {
        Duration::from_micros(self.timestamp_us(index))
    }

    /// Presentation timestamp of frame `index`, in microseconds since capture start.
    pub fn timestamp_us(&self, index: u64) -> u64 {
        (index as f64 * 1_000_000.0 / self.fps as f64).round() as u64
    }

    /// Whether frame `index` must be encoded as a keyframe.
    ///
    /// The first frame always is; after that one keyframe per second of output.
    pub fn is_keyframe(&self, index: u64) -> bool {
        index % u64::from(self.fps) == 0
    }
}

/// Lag between when a frame was scheduled and when it was actually captured.
#[derive(Debug, Clone, Copy)]
pub struct FrameLag {
    /// Scheduled offset from the epoch (us).
    pub scheduled_us: u64,
    /// Actual offset from the epoch (us).
    pub actual_us: u64,
}

impl FrameLag {
    /// Lag in microseconds (positive = captured late).
    pub fn lag_us(&self) -> i64 {
        self.actual_us as i64 - self.scheduled_us as i64
    }

    /// Lag in milliseconds.
    pub fn lag_ms(&self) -> f64 {
        self.lag_us() as f64 / 1_000.0
    }

    /// Whether the frame was captured later than `threshold` after its deadline.
    pub fn exceeds(&self, threshold: Duration) -> bool {
        self.lag_us() > threshold.as_micros() as i64
    }
}
