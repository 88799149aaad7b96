//! Callback rate limiting

use std::time::{Instant, SystemTime, UNIX_EPOCH};

/// Decides whether a captured buffer is processed at all.
///
/// Throttled buffers skip metering too, so smoothing only sees the buffers
/// that pass.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    min_interval_ms: f64,
    last_emit_ms: Option<f64>,
}

impl RateLimiter {
    pub fn new(callback_rate_hz: f64) -> Self {
        Self {
            min_interval_ms: 1000.0 / callback_rate_hz,
            last_emit_ms: None,
        }
    }

    pub fn should_process(&mut self, now_ms: f64) -> bool {
        if let Some(last) = self.last_emit_ms {
            if now_ms - last < self.min_interval_ms {
                return false;
            }
        }
        self.last_emit_ms = Some(now_ms);
        true
    }

    pub fn min_interval_ms(&self) -> f64 {
        self.min_interval_ms
    }
}

/// Monotonic millisecond clock anchored to wall-clock time at session start
#[derive(Debug, Clone, Copy)]
pub struct SessionClock {
    origin: Instant,
    origin_epoch_ms: f64,
}

impl SessionClock {
    pub fn start() -> Self {
        let origin_epoch_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64() * 1000.0)
            .unwrap_or(0.0);
        Self {
            origin: Instant::now(),
            origin_epoch_ms,
        }
    }

    /// Milliseconds since the Unix epoch, never going backwards within a session
    pub fn now_ms(&self) -> f64 {
        self.origin_epoch_ms + self.origin.elapsed().as_secs_f64() * 1000.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_frame_always_passes() {
        let mut limiter = RateLimiter::new(30.0);
        assert!(limiter.should_process(0.0));
    }

    #[test]
    fn hundred_frames_inside_one_interval_pass_once() {
        let mut limiter = RateLimiter::new(10.0);
        let passed = (0..100)
            .filter(|i| limiter.should_process(5_000.0 + *i as f64 * 0.99))
            .count();
        assert_eq!(passed, 1);
    }

    #[test]
    fn passes_again_once_interval_elapsed() {
        let mut limiter = RateLimiter::new(20.0);
        assert_eq!(limiter.min_interval_ms(), 50.0);

        assert!(limiter.should_process(100.0));
        assert!(!limiter.should_process(149.9));
        assert!(limiter.should_process(150.0));
        assert!(!limiter.should_process(160.0));
        assert!(limiter.should_process(200.0));
    }

    #[test]
    fn throttled_frames_do_not_move_the_window() {
        let mut limiter = RateLimiter::new(1.0);
        assert!(limiter.should_process(0.0));
        for t in (100..1000).step_by(100) {
            assert!(!limiter.should_process(t as f64));
        }
        assert!(limiter.should_process(1000.0));
    }

    #[test]
    fn session_clock_is_monotonic() {
        let clock = SessionClock::start();
        let a = clock.now_ms();
        let b = clock.now_ms();
        assert!(b >= a);
        assert!(a > 1_000_000_000_000.0);
    }
}
