//! Token-bucket throttling.
//!
//! Each session lazily gets a [`RateLimiterPair`] the first time one of its
//! messages is validated. The pair lives in the session's typed state and is
//! dropped with it.

use std::time::Duration;

use tokio::time::Instant;

use super::{Rejection, Validator};
use crate::protocol::Message;
use crate::session::Session;

/// Which bucket refused a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThrottleDimension {
    PerSecond,
    PerMinute,
}

impl ThrottleDimension {
    pub fn as_str(&self) -> &'static str {
        match self {
            ThrottleDimension::PerSecond => "per-second",
            ThrottleDimension::PerMinute => "per-minute",
        }
    }
}

/// Accumulates `rate` permits per second up to `capacity`.
#[derive(Debug, Clone)]
pub struct TokenBucket {
    rate: f64,
    capacity: f64,
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    /// A full bucket.
    pub fn new(rate_per_sec: f64, capacity: u32) -> Self {
        Self {
            rate: rate_per_sec,
            capacity: capacity as f64,
            tokens: capacity as f64,
            last_refill: Instant::now(),
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.rate).min(self.capacity);
        self.last_refill = now;
    }

    /// Whole permits currently available.
    pub fn available(&mut self) -> u32 {
        self.refill(Instant::now());
        self.tokens.floor() as u32
    }

    fn has_permit(&mut self, now: Instant) -> bool {
        self.refill(now);
        self.tokens >= 1.0
    }

    fn take(&mut self) {
        self.tokens -= 1.0;
    }

    /// Takes one permit if available.
    pub fn try_acquire(&mut self) -> bool {
        if self.has_permit(Instant::now()) {
            self.take();
            true
        } else {
            false
        }
    }

    /// Time until the next permit accrues.
    pub fn retry_after(&self) -> Duration {
        if self.tokens >= 1.0 || self.rate <= 0.0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64((1.0 - self.tokens) / self.rate)
    }
}

/// Per-second and per-minute buckets for one session.
#[derive(Debug, Clone)]
pub struct RateLimiterPair {
    per_second: TokenBucket,
    per_minute: TokenBucket,
}

impl RateLimiterPair {
    pub fn new(requests_per_second: u32, requests_per_minute: u32) -> Self {
        Self {
            per_second: TokenBucket::new(requests_per_second as f64, requests_per_second),
            per_minute: TokenBucket::new(requests_per_minute as f64 / 60.0, requests_per_minute),
        }
    }

    /// Admits a request only if both buckets have a permit, consuming one
    /// from each. A refusal consumes nothing.
    pub fn check(&mut self) -> Result<(), (ThrottleDimension, Duration)> {
        let now = Instant::now();
        if !self.per_second.has_permit(now) {
            return Err((ThrottleDimension::PerSecond, self.per_second.retry_after()));
        }
        if !self.per_minute.has_permit(now) {
            return Err((ThrottleDimension::PerMinute, self.per_minute.retry_after()));
        }
        self.per_second.take();
        self.per_minute.take();
        Ok(())
    }
}

pub struct ThrottleValidator {
    default_requests_per_minute: u32,
    default_requests_per_second: u32,
}

impl ThrottleValidator {
    pub fn new(default_requests_per_minute: u32, default_requests_per_second: u32) -> Self {
        Self {
            default_requests_per_minute,
            default_requests_per_second,
        }
    }
}

impl Validator for ThrottleValidator {
    fn name(&self) -> &'static str {
        "throttle"
    }

    fn validate(&self, session: &Session, _message: &Message) -> Result<(), Rejection> {
        session
            .with_state(|state| {
                let rpm = state
                    .rpm_override
                    .unwrap_or(self.default_requests_per_minute);
                let rps = state
                    .rps_override
                    .unwrap_or(self.default_requests_per_second);
                state
                    .limiters
                    .get_or_insert_with(|| RateLimiterPair::new(rps, rpm))
                    .check()
            })
            .map_err(|(dimension, retry_after)| Rejection::Throttled {
                dimension,
                retry_after,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{SessionKind, SessionParams};
    use crate::validation::{DEFAULT_REQUESTS_PER_MINUTE, DEFAULT_REQUESTS_PER_SECOND};

    fn ping() -> Message {
        Message::request("1", "ping", None)
    }

    fn session_with_rps(rps: u32) -> Session {
        Session::detached(
            "throttled",
            SessionKind::Server,
            SessionParams {
                requests_per_second: Some(rps),
                ..SessionParams::default()
            },
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_bucket_refills_over_time() {
        let mut bucket = TokenBucket::new(1.0, 3);
        assert_eq!(bucket.available(), 3);
        assert!(bucket.try_acquire());
        assert!(bucket.try_acquire());
        assert!(bucket.try_acquire());
        assert!(!bucket.try_acquire());
        assert_eq!(bucket.retry_after(), Duration::from_secs(1));

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(bucket.available(), 2);

        tokio::time::advance(Duration::from_secs(60)).await;
        assert_eq!(bucket.available(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rps_two_admits_two_per_second() {
        let validator = ThrottleValidator::new(DEFAULT_REQUESTS_PER_MINUTE, DEFAULT_REQUESTS_PER_SECOND);
        let session = session_with_rps(2);

        assert!(validator.validate(&session, &ping()).is_ok());
        assert!(validator.validate(&session, &ping()).is_ok());
        let rejection = validator.validate(&session, &ping()).unwrap_err();
        assert!(matches!(
            rejection,
            Rejection::Throttled {
                dimension: ThrottleDimension::PerSecond,
                ..
            }
        ));

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(validator.validate(&session, &ping()).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_per_minute_dimension_reported() {
        let validator = ThrottleValidator::new(3, 100);
        let session = Session::detached("minute", SessionKind::Server, SessionParams::default());

        for _ in 0..3 {
            assert!(validator.validate(&session, &ping()).is_ok());
        }
        match validator.validate(&session, &ping()) {
            Err(Rejection::Throttled {
                dimension,
                retry_after,
            }) => {
                assert_eq!(dimension, ThrottleDimension::PerMinute);
                assert!((retry_after.as_secs_f64() - 20.0).abs() < 0.001);
            }
            other => panic!("expected per-minute throttle, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_refusal_consumes_nothing() {
        let mut pair = RateLimiterPair::new(1, 2);
        assert!(pair.check().is_ok());
        assert!(pair.check().is_err());

        // The refused per-second check must not have drained the per-minute bucket.
        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(pair.check().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_limiter_created_once_per_session() {
        let validator = ThrottleValidator::new(600, 5);
        let session = session_with_rps(1);
        assert!(session.with_state(|state| state.limiters.is_none()));

        assert!(validator.validate(&session, &ping()).is_ok());
        assert!(session.with_state(|state| state.limiters.is_some()));

        // Later overrides do not rebuild the cached pair.
        session.with_state(|state| state.rps_override = Some(50));
        assert!(validator.validate(&session, &ping()).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sessions_do_not_share_buckets() {
        let validator = ThrottleValidator::new(600, 1);
        let first = Session::detached("a", SessionKind::Server, SessionParams::default());
        let second = Session::detached("b", SessionKind::Server, SessionParams::default());

        assert!(validator.validate(&first, &ping()).is_ok());
        assert!(validator.validate(&first, &ping()).is_err());
        assert!(validator.validate(&second, &ping()).is_ok());
    }
}
