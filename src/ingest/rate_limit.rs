//! Adaptive request pacing driven by provider rate-limit headers

use log::{debug, warn};
use reqwest::header::HeaderMap;
use std::time::{Duration, Instant};

/// Rate-limit counters read from provider response headers
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RateLimitHeaders {
    pub limit: Option<i64>,
    pub remaining: Option<i64>,
}

impl RateLimitHeaders {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let parse = |name: &str| -> Option<i64> {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.trim().parse().ok())
        };
        RateLimitHeaders {
            limit: parse("x-ratelimit-limit"),
            remaining: parse("x-ratelimit-remaining"),
        }
    }
}

/// Paces requests against a per-minute quota.
///
/// The minimum interval between requests adapts to the advertised limit
/// (60 seconds divided by the per-minute quota) and is never lowered once
/// raised. When the remaining quota drops to the low watermark the limiter
/// sleeps through the rest of the minute up front.
pub struct RateLimiter {
    pub min_interval_s: f64,
    pub last_request_monotonic: Option<f64>,
    pub minute_limit_low_watermark: i64,
    now: Box<dyn FnMut() -> f64>,
    sleep: Box<dyn FnMut(f64)>,
}

impl RateLimiter {
    pub fn new() -> Self {
        let origin = Instant::now();
        Self::with_clock(
            Box::new(move || origin.elapsed().as_secs_f64()),
            Box::new(|seconds| std::thread::sleep(Duration::from_secs_f64(seconds))),
        )
    }

    /// Injectable clock and sleep, for tests
    pub fn with_clock(now: Box<dyn FnMut() -> f64>, sleep: Box<dyn FnMut(f64)>) -> Self {
        RateLimiter {
            min_interval_s: 0.0,
            last_request_monotonic: None,
            minute_limit_low_watermark: 2,
            now,
            sleep,
        }
    }

    /// Block until the minimum interval since the previous request has passed
    pub fn before_request(&mut self) {
        if self.min_interval_s > 0.0 {
            if let Some(last) = self.last_request_monotonic {
                let elapsed = (self.now)() - last;
                if elapsed < self.min_interval_s {
                    (self.sleep)(self.min_interval_s - elapsed);
                }
            }
        }
        self.last_request_monotonic = Some((self.now)());
    }

    /// Adapt pacing to the counters the provider just returned
    pub fn after_response(&mut self, headers: RateLimitHeaders) {
        if let Some(limit) = headers.limit {
            if limit > 0 {
                let interval = 60.0 / limit as f64;
                if interval > self.min_interval_s {
                    debug!(
                        "Rate limit {}/min; request interval now {:.2}s",
                        limit, interval
                    );
                    self.min_interval_s = interval;
                }
            }
        }

        if let Some(remaining) = headers.remaining {
            if remaining <= self.minute_limit_low_watermark {
                let cooldown = if remaining <= 1 { 60.0 } else { 10.0 };
                warn!(
                    "Minute quota nearly exhausted (remaining={}); cooling down {:.0}s",
                    remaining, cooldown
                );
                (self.sleep)(cooldown);
            }
        }

        // Interval pacing runs from the end of the response, so time spent
        // waiting on the provider or cooling down counts toward the interval.
        self.last_request_monotonic = Some((self.now)());
    }

    /// Unconditional pause, used between retries after an HTTP 429
    pub fn cooldown(&mut self, seconds: f64) {
        (self.sleep)(seconds);
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn recording_limiter(now: f64) -> (RateLimiter, Rc<RefCell<Vec<f64>>>) {
        let sleeps = Rc::new(RefCell::new(Vec::new()));
        let sleeps_clone = Rc::clone(&sleeps);
        let limiter = RateLimiter::with_clock(
            Box::new(move || now),
            Box::new(move |s| sleeps_clone.borrow_mut().push(s)),
        );
        (limiter, sleeps)
    }

    fn stepped_limiter() -> (RateLimiter, Rc<RefCell<f64>>, Rc<RefCell<Vec<f64>>>) {
        let clock = Rc::new(RefCell::new(0.0));
        let sleeps = Rc::new(RefCell::new(Vec::new()));
        let clock_clone = Rc::clone(&clock);
        let sleeps_clone = Rc::clone(&sleeps);
        let limiter = RateLimiter::with_clock(
            Box::new(move || *clock_clone.borrow()),
            Box::new(move |s| sleeps_clone.borrow_mut().push(s)),
        );
        (limiter, clock, sleeps)
    }

    #[test]
    fn test_paces_requests() {
        let (mut limiter, sleeps) = recording_limiter(0.25);
        limiter.min_interval_s = 1.0;
        limiter.last_request_monotonic = Some(0.0);

        limiter.before_request();
        assert_eq!(sleeps.borrow().as_slice(), &[0.75]);
    }

    #[test]
    fn test_no_sleep_when_interval_elapsed() {
        let (mut limiter, sleeps) = recording_limiter(5.0);
        limiter.min_interval_s = 1.0;
        limiter.last_request_monotonic = Some(0.0);

        limiter.before_request();
        assert!(sleeps.borrow().is_empty());
    }

    #[test]
    fn test_headers_drive_minute_cooldown() {
        let (mut limiter, sleeps) = recording_limiter(123.0);

        limiter.after_response(RateLimitHeaders {
            limit: Some(300),
            remaining: Some(1),
        });
        assert!(limiter.min_interval_s > 0.0);
        assert!(sleeps.borrow().contains(&60.0));
    }

    #[test]
    fn test_low_watermark_short_cooldown() {
        let (mut limiter, sleeps) = recording_limiter(0.0);

        limiter.after_response(RateLimitHeaders {
            limit: Some(300),
            remaining: Some(2),
        });
        assert!(sleeps.borrow().contains(&10.0));
    }

    #[test]
    fn test_response_stamps_request_time() {
        let (mut limiter, _sleeps) = recording_limiter(123.0);

        limiter.after_response(RateLimitHeaders {
            limit: Some(300),
            remaining: Some(250),
        });
        assert_eq!(limiter.last_request_monotonic, Some(123.0));
    }

    #[test]
    fn test_pacing_runs_from_response_end() {
        let (mut limiter, clock, sleeps) = stepped_limiter();

        // 2 requests/min advertises a 30s interval.
        limiter.before_request();
        *clock.borrow_mut() = 50.0;
        limiter.after_response(RateLimitHeaders {
            limit: Some(2),
            remaining: None,
        });
        assert_eq!(limiter.last_request_monotonic, Some(50.0));

        // 5s after the response, 25s of the interval remain.
        *clock.borrow_mut() = 55.0;
        limiter.before_request();
        assert_eq!(sleeps.borrow().as_slice(), &[25.0]);
    }

    #[test]
    fn test_interval_never_lowered() {
        let (mut limiter, _sleeps) = recording_limiter(0.0);

        limiter.after_response(RateLimitHeaders {
            limit: Some(60),
            remaining: Some(50),
        });
        assert_eq!(limiter.min_interval_s, 1.0);

        limiter.after_response(RateLimitHeaders {
            limit: Some(600),
            remaining: Some(500),
        });
        assert_eq!(limiter.min_interval_s, 1.0);
    }
}
