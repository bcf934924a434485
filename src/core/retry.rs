// src/core/retry.rs

//! Exponential backoff with jitter for flaky operations.
//!
//! Only errors whose [`Retryable::is_retryable`] returns `true` are retried;
//! anything else comes back immediately as [`RetryError::Permanent`].

use rand::Rng;
use std::io;
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Classifies an error as transient.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

impl Retryable for io::Error {
    fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            io::ErrorKind::TimedOut
                | io::ErrorKind::Interrupted
                | io::ErrorKind::WouldBlock
                | io::ErrorKind::ConnectionRefused
                | io::ErrorKind::ConnectionReset
                | io::ErrorKind::ConnectionAborted
                | io::ErrorKind::NotConnected
                | io::ErrorKind::BrokenPipe
                | io::ErrorKind::UnexpectedEof
        )
    }
}

#[derive(Error, Debug)]
pub enum RetryError<E> {
    #[error("Gave up after {attempts} attempt(s) in {elapsed:.1?}: {last}")]
    Exhausted {
        #[source]
        last: E,
        attempts: u32,
        elapsed: Duration,
    },
    #[error(transparent)]
    Permanent(E),
}

impl<E> RetryError<E> {
    /// The underlying error, whichever way the policy ended.
    pub fn into_inner(self) -> E {
        match self {
            Self::Exhausted { last, .. } | Self::Permanent(last) => last,
        }
    }
}

/// When to stop retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopCondition {
    MaxAttempts(u32),
    MaxElapsed(Duration),
}

/// State shared with the operation across attempts.
#[derive(Debug)]
pub struct RetryContext<E> {
    /// 1-based number of the attempt about to run.
    pub attempt: u32,
    pub elapsed: Duration,
    pub last_error: Option<E>,
    /// Delays slept so far, in order.
    pub delays: Vec<Duration>,
}

/// Time source for the retry loop, so tests never really sleep.
pub trait Clock {
    fn now(&self) -> Instant;
    fn sleep(&mut self, duration: Duration);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&mut self, duration: Duration) {
        thread::sleep(duration);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
    /// Upper bound of the random extra delay, as a fraction of the nominal delay.
    pub jitter: f64,
    pub stop: StopCondition,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(200),
            multiplier: 2.0,
            max_delay: Duration::from_secs(10),
            jitter: 0.1,
            stop: StopCondition::MaxAttempts(5),
        }
    }
}

impl RetryPolicy {
    pub fn with_stop(stop: StopCondition) -> Self {
        Self {
            stop,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    #[must_use]
    pub fn multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = if multiplier.is_finite() {
            multiplier.max(1.0)
        } else {
            1.0
        };
        self
    }

    #[must_use]
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    #[must_use]
    pub fn jitter(mut self, fraction: f64) -> Self {
        self.jitter = if fraction.is_finite() {
            fraction.clamp(0.0, 1.0)
        } else {
            0.0
        };
        self
    }

    /// Nominal (jitter-free) delay after the `attempt`-th failure.
    pub fn nominal_delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let seconds = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        Duration::try_from_secs_f64(seconds)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    fn jittered(&self, nominal: Duration) -> Duration {
        if self.jitter <= 0.0 {
            return nominal;
        }
        let extra = rand::thread_rng().gen_range(0.0..=self.jitter);
        nominal + nominal.mul_f64(extra)
    }

    /// Runs `op` until it succeeds, fails permanently or the stop condition hits.
    pub fn run<T, E, F>(&self, op: F) -> Result<T, RetryError<E>>
    where
        E: Retryable + std::fmt::Display,
        F: FnMut(&RetryContext<E>) -> Result<T, E>,
    {
        self.run_with_clock(&mut SystemClock, op)
    }

    pub fn run_with_clock<T, E, F, C>(&self, clock: &mut C, mut op: F) -> Result<T, RetryError<E>>
    where
        E: Retryable + std::fmt::Display,
        F: FnMut(&RetryContext<E>) -> Result<T, E>,
        C: Clock,
    {
        let started = clock.now();
        let mut ctx = RetryContext {
            attempt: 0,
            elapsed: Duration::ZERO,
            last_error: None,
            delays: Vec::new(),
        };

        loop {
            ctx.attempt += 1;
            let error = match op(&ctx) {
                Ok(value) => return Ok(value),
                Err(e) if !e.is_retryable() => return Err(RetryError::Permanent(e)),
                Err(e) => e,
            };

            ctx.elapsed = clock.now().saturating_duration_since(started);
            let delay = self.jittered(self.nominal_delay(ctx.attempt));
            let exhausted = match self.stop {
                StopCondition::MaxAttempts(max) => ctx.attempt >= max.max(1),
                StopCondition::MaxElapsed(limit) => ctx.elapsed + delay >= limit,
            };
            if exhausted {
                return Err(RetryError::Exhausted {
                    last: error,
                    attempts: ctx.attempt,
                    elapsed: ctx.elapsed,
                });
            }

            log::debug!(
                "Attempt {} failed ({error}); retrying in {delay:.2?}",
                ctx.attempt
            );
            ctx.last_error = Some(error);
            ctx.delays.push(delay);
            clock.sleep(delay);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    /// Advances virtual time instead of sleeping and records every delay.
    struct FakeClock {
        start: Instant,
        offset: Duration,
        slept: Vec<Duration>,
    }

    impl FakeClock {
        fn new() -> Self {
            Self {
                start: Instant::now(),
                offset: Duration::ZERO,
                slept: Vec::new(),
            }
        }
    }

    impl Clock for FakeClock {
        fn now(&self) -> Instant {
            self.start + self.offset
        }

        fn sleep(&mut self, duration: Duration) {
            self.offset += duration;
            self.slept.push(duration);
        }
    }

    fn transient() -> io::Error {
        io::Error::new(io::ErrorKind::ConnectionRefused, "collector down")
    }

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::with_stop(StopCondition::MaxAttempts(max_attempts))
            .base_delay(Duration::from_millis(100))
            .multiplier(2.0)
            .max_delay(Duration::from_secs(5))
            .jitter(0.0)
    }

    #[test]
    fn test_succeeds_after_failures_below_limit() {
        // --- Setup ---
        let failures = 3;
        let calls = RefCell::new(0u32);
        let mut clock = FakeClock::new();

        // --- Execute ---
        let result = policy(5).run_with_clock(&mut clock, |_| {
            *calls.borrow_mut() += 1;
            if *calls.borrow() <= failures {
                Err(transient())
            } else {
                Ok("sent")
            }
        });

        // --- Assert ---
        assert_eq!(result.unwrap(), "sent");
        assert_eq!(*calls.borrow(), failures + 1);
        assert_eq!(
            clock.slept,
            vec![
                Duration::from_millis(100),
                Duration::from_millis(200),
                Duration::from_millis(400)
            ]
        );
        assert!(clock.slept.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_exhausts_after_exactly_max_attempts() {
        let calls = RefCell::new(0u32);
        let mut clock = FakeClock::new();

        let result: Result<(), _> = policy(4).run_with_clock(&mut clock, |_| {
            *calls.borrow_mut() += 1;
            Err(transient())
        });

        match result {
            Err(RetryError::Exhausted { attempts, last, .. }) => {
                assert_eq!(attempts, 4);
                assert_eq!(last.kind(), io::ErrorKind::ConnectionRefused);
            }
            other => panic!("expected exhaustion, got {other:?}"),
        }
        assert_eq!(*calls.borrow(), 4);
    }

    #[test]
    fn test_permanent_errors_are_not_retried() {
        let calls = RefCell::new(0u32);
        let mut clock = FakeClock::new();

        let result: Result<(), _> = policy(5).run_with_clock(&mut clock, |_| {
            *calls.borrow_mut() += 1;
            Err(io::Error::new(io::ErrorKind::InvalidInput, "bad payload"))
        });

        assert!(matches!(result, Err(RetryError::Permanent(_))));
        assert_eq!(*calls.borrow(), 1);
        assert!(clock.slept.is_empty());
    }

    #[test]
    fn test_max_elapsed_stops_on_time_budget() {
        let mut clock = FakeClock::new();
        let policy = RetryPolicy::with_stop(StopCondition::MaxElapsed(Duration::from_millis(700)))
            .base_delay(Duration::from_millis(100))
            .jitter(0.0);

        let result: Result<(), _> = policy.run_with_clock(&mut clock, |_| Err(transient()));

        // Sleeps of 100, 200 fit; the next 400 would cross 700ms.
        match result {
            Err(RetryError::Exhausted { attempts, elapsed, .. }) => {
                assert_eq!(attempts, 3);
                assert_eq!(elapsed, Duration::from_millis(300));
            }
            other => panic!("expected exhaustion, got {other:?}"),
        }
    }

    #[test]
    fn test_context_carries_last_error() {
        let mut clock = FakeClock::new();
        let mut seen = Vec::new();

        let _ = policy(3).run_with_clock(&mut clock, |ctx: &RetryContext<io::Error>| {
            seen.push((ctx.attempt, ctx.last_error.is_some()));
            Err::<(), _>(transient())
        });

        assert_eq!(seen, vec![(1, false), (2, true), (3, true)]);
    }

    #[test]
    fn test_delay_is_capped_and_jitter_bounded() {
        let policy = policy(10).max_delay(Duration::from_millis(250)).jitter(0.5);

        assert_eq!(policy.nominal_delay(1), Duration::from_millis(100));
        assert_eq!(policy.nominal_delay(5), Duration::from_millis(250));
        for _ in 0..20 {
            let delay = policy.jittered(policy.nominal_delay(2));
            assert!(delay >= Duration::from_millis(200));
            assert!(delay <= Duration::from_millis(300));
        }
    }
}
