//! Capacity-driven throttle.
//!
//! Each worker owns one [`RateLimiter`] sized to its share of the table's
//! provisioned capacity. Callers report the capacity units a request actually
//! consumed; whole units are paid for by waiting on permits issued at the
//! worker's steady rate, and the fractional remainder carries over to the next
//! request.

use std::time::Duration;

use governor::{DefaultDirectRateLimiter, Quota};
use tracing::trace;

use crate::error::ConfigError;

pub struct RateLimiter {
    limiter: DefaultDirectRateLimiter,
    permits_per_second: f64,
    accumulated: f64,
}

impl RateLimiter {
    /// Build a limiter issuing `capacity * percent / 100 / workers` permits per
    /// second. Fails if that rate is not positive.
    pub fn new(capacity: f64, percent: u32, workers: u32) -> Result<Self, ConfigError> {
        let rate = capacity * f64::from(percent) / 100.0 / f64::from(workers);
        let too_low = || ConfigError::RateTooLow {
            capacity,
            percent,
            workers,
            rate,
        };
        if !rate.is_finite() || rate <= 0.0 {
            return Err(too_low());
        }
        let period = Duration::try_from_secs_f64(1.0 / rate)
            .map_err(|_| too_low())?
            .max(Duration::from_nanos(1));
        let quota = Quota::with_period(period).ok_or_else(too_low)?;
        Ok(Self {
            limiter: governor::RateLimiter::direct(quota),
            permits_per_second: rate,
            accumulated: 0.0,
        })
    }

    pub fn permits_per_second(&self) -> f64 {
        self.permits_per_second
    }

    /// Fractional capacity carried over to the next call.
    pub fn accumulated(&self) -> f64 {
        self.accumulated
    }

    /// Account for `units` of consumed capacity, blocking the calling thread
    /// until the whole units accumulated so far have been paid for.
    ///
    /// Returns the number of permits acquired.
    pub fn consume(&mut self, units: f64) -> u64 {
        if !units.is_finite() || units <= 0.0 {
            return 0;
        }
        self.accumulated += units;
        if self.accumulated <= 1.0 {
            return 0;
        }
        let whole = self.accumulated.trunc();
        let permits = whole as u64;
        let limiter = &self.limiter;
        futures::executor::block_on(async {
            for _ in 0..permits {
                limiter.until_ready().await;
            }
        });
        self.accumulated -= whole;
        trace!(
            permits,
            remainder = self.accumulated,
            "acquired rate limiter permits"
        );
        permits
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;

    #[test]
    fn test_rate_per_worker() {
        let limiter = RateLimiter::new(400.0, 25, 4).unwrap();
        assert_eq!(limiter.permits_per_second(), 25.0);

        let limiter = RateLimiter::new(100.0, 1, 1).unwrap();
        assert_eq!(limiter.permits_per_second(), 1.0);
    }

    #[test]
    fn test_rate_too_low() {
        match RateLimiter::new(0.0, 25, 1) {
            Err(ConfigError::RateTooLow { .. }) => {}
            Err(e) => panic!("expected RateTooLow, got {e:?}"),
            Ok(_) => panic!("expected RateTooLow, got a limiter"),
        }
        match RateLimiter::new(100.0, 25, 0) {
            Err(ConfigError::RateTooLow { .. }) => {}
            Err(e) => panic!("expected RateTooLow, got {e:?}"),
            Ok(_) => panic!("expected RateTooLow, got a limiter"),
        }
    }

    #[test]
    fn test_rate_with_unrepresentable_period() {
        // one permit every 1e22 seconds does not fit in a Duration
        match RateLimiter::new(1e-20, 1, 1) {
            Err(ConfigError::RateTooLow { rate, .. }) => assert!(rate > 0.0),
            Err(e) => panic!("expected RateTooLow, got {e:?}"),
            Ok(_) => panic!("expected RateTooLow, got a limiter"),
        }
    }

    #[test]
    fn test_fractions_accumulate() {
        let mut limiter = RateLimiter::new(1_000_000.0, 100, 1).unwrap();

        assert_eq!(limiter.consume(0.5), 0);
        assert_eq!(limiter.consume(0.5), 0);
        assert!((limiter.accumulated() - 1.0).abs() < 1e-9);

        assert_eq!(limiter.consume(0.7), 1);
        assert!((limiter.accumulated() - 0.7).abs() < 1e-9);

        assert_eq!(limiter.consume(3.5), 4);
        assert!((limiter.accumulated() - 0.2).abs() < 1e-9);
    }

    #[test]
    fn test_ignores_non_positive_units() {
        let mut limiter = RateLimiter::new(100.0, 50, 1).unwrap();
        assert_eq!(limiter.consume(0.0), 0);
        assert_eq!(limiter.consume(-4.0), 0);
        assert_eq!(limiter.consume(f64::NAN), 0);
        assert_eq!(limiter.accumulated(), 0.0);
    }

    #[test]
    fn test_consume_blocks_at_steady_rate() {
        // 20 permits per second: 5 whole units need at least ~200ms after the
        // first permit, which is available immediately.
        let mut limiter = RateLimiter::new(20.0, 100, 1).unwrap();
        let start = Instant::now();
        assert_eq!(limiter.consume(5.0), 5);
        assert!(start.elapsed() >= Duration::from_millis(150));
    }
}
