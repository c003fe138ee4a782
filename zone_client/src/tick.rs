//! Tick driver.
//!
//! Turns render callbacks into frame deltas and decides when the local pose
//! is due for broadcast. Broadcasts happen at the tick rate, independent of
//! (and normally slower than) the frame rate.
//!
//! Some browsers and sandboxed runtimes coarsen their clocks for privacy,
//! which shows up as every frame lasting exactly [`SUSPECT_FRAME_DELTA`].
//! After [`SUSPECT_FRAME_LIMIT`] such frames in a row the driver stops
//! trusting the clock for the rest of the session and uses `1 / frame_rate`.

use std::time::{Duration, Instant};

use tracing::warn;

/// A frame delta that, repeated, indicates a clamped clock.
pub const SUSPECT_FRAME_DELTA: Duration = Duration::from_millis(100);

/// Consecutive suspect frames before falling back to a fixed delta.
pub const SUSPECT_FRAME_LIMIT: u32 = 5;

/// Outcome of one render callback.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameStep {
    /// Seconds to advance simulation and interpolation by.
    pub dt: f32,
    /// Whether the local pose should be broadcast this frame.
    pub broadcast: bool,
}

#[derive(Debug)]
pub struct TickDriver {
    tick_rate: f32,
    frame_rate: f32,
    accumulated: f32,
    use_delta_timing: bool,
    anomaly_count: u32,
    prev: Option<Instant>,
}

impl TickDriver {
    pub fn new(tick_rate: u32, frame_rate: u32) -> Self {
        Self {
            tick_rate: tick_rate.max(1) as f32,
            frame_rate: frame_rate.max(1) as f32,
            accumulated: 0.0,
            use_delta_timing: true,
            anomaly_count: 0,
            prev: None,
        }
    }

    pub fn tick_rate(&self) -> f32 {
        self.tick_rate
    }

    pub fn uses_delta_timing(&self) -> bool {
        self.use_delta_timing
    }

    /// Render callback at wall-clock `now`. The first call has a zero delta.
    pub fn frame(&mut self, now: Instant) -> FrameStep {
        let elapsed = self
            .prev
            .map(|prev| now.saturating_duration_since(prev))
            .unwrap_or(Duration::ZERO);
        self.prev = Some(now);
        self.step(elapsed)
    }

    /// Advances by a measured frame duration.
    pub fn step(&mut self, elapsed: Duration) -> FrameStep {
        let dt = if self.use_delta_timing {
            if elapsed == SUSPECT_FRAME_DELTA {
                self.anomaly_count += 1;
                if self.anomaly_count >= SUSPECT_FRAME_LIMIT {
                    self.use_delta_timing = false;
                    warn!(
                        frames = self.anomaly_count,
                        fallback_hz = self.frame_rate,
                        "Clock keeps reporting identical frame deltas, switching to fixed timestep"
                    );
                }
            } else {
                self.anomaly_count = 0;
            }
            elapsed.as_secs_f32()
        } else {
            1.0 / self.frame_rate
        };

        self.accumulated += dt;
        let broadcast = self.accumulated >= 1.0 / self.tick_rate;
        if broadcast {
            self.accumulated = 0.0;
        }
        FrameStep { dt, broadcast }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broadcast_cadence_follows_tick_rate() {
        let mut driver = TickDriver::new(15, 60);
        let frame = Duration::from_micros(16_667);
        let broadcasts = (0..600).filter(|_| driver.step(frame).broadcast).count();
        // 10 seconds at 60 fps; every 4th frame crosses 1/15 s.
        assert!((140..=151).contains(&broadcasts), "{broadcasts}");
    }

    #[test]
    fn zero_rates_are_clamped() {
        let mut driver = TickDriver::new(0, 0);
        assert_eq!(driver.tick_rate(), 1.0);
        assert!(!driver.step(Duration::from_millis(500)).broadcast);
        assert!(driver.step(Duration::from_millis(500)).broadcast);
    }

    #[test]
    fn five_suspect_frames_switch_to_fixed_timestep() {
        let mut driver = TickDriver::new(15, 60);
        for _ in 0..4 {
            assert_eq!(driver.step(SUSPECT_FRAME_DELTA).dt, 0.1);
        }
        assert!(driver.uses_delta_timing());
        driver.step(SUSPECT_FRAME_DELTA);
        assert!(!driver.uses_delta_timing());

        // Permanently fixed, whatever the clock says afterwards.
        let step = driver.step(Duration::from_millis(3));
        assert!((step.dt - 1.0 / 60.0).abs() < 1e-6);
        assert!(!driver.uses_delta_timing());
    }

    #[test]
    fn suspect_run_must_be_consecutive() {
        let mut driver = TickDriver::new(15, 60);
        for _ in 0..4 {
            driver.step(SUSPECT_FRAME_DELTA);
        }
        driver.step(Duration::from_millis(16));
        for _ in 0..4 {
            driver.step(SUSPECT_FRAME_DELTA);
        }
        assert!(driver.uses_delta_timing());
    }

    #[test]
    fn first_frame_has_zero_delta() {
        let mut driver = TickDriver::new(15, 60);
        let t0 = Instant::now();
        assert_eq!(driver.frame(t0).dt, 0.0);
        let step = driver.frame(t0 + Duration::from_millis(70));
        assert!((step.dt - 0.07).abs() < 1e-6);
        assert!(step.broadcast);
    }
}
