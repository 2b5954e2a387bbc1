//! Circuit breaker with lock-free state transitions.
//!
//! Three states per protected dependency: Closed (calls pass, failures
//! counted), Open (calls rejected until the reset timeout elapses), and
//! HalfOpen (exactly one probe in flight). Every transition is a
//! compare-and-swap on an atomic state byte, so concurrent callers can
//! never double-transition: only one of N callers racing an expired Open
//! state wins the CAS into HalfOpen and carries the probe.

use std::sync::atomic::{AtomicU8, AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use smol_str::SmolStr;
use tracing::{info, warn};

/// Operational mode of a [`CircuitBreaker`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CircuitState {
    /// Normal operation; calls pass through and failures are counted.
    Closed = 0,
    /// Failing fast; calls are rejected without touching the dependency.
    Open = 1,
    /// One probe allowed through to test recovery.
    HalfOpen = 2,
}

impl From<u8> for CircuitState {
    fn from(value: u8) -> Self {
        match value {
            0 => CircuitState::Closed,
            2 => CircuitState::HalfOpen,
            // Unknown encodings collapse to the safest state.
            _ => CircuitState::Open,
        }
    }
}

/// Circuit breaker for one named dependency.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: SmolStr,
    state: AtomicU8,
    consecutive_failures: AtomicU32,
    /// Instant of the most recent failure, as nanoseconds since `origin`.
    last_failure_nanos: AtomicU64,
    origin: Instant,
    max_failures: u32,
    reset_timeout: Duration,
}

impl CircuitBreaker {
    /// Creates a breaker that opens after `max_failures` consecutive
    /// failures and probes again `reset_timeout` after the last one.
    pub fn new(name: impl Into<SmolStr>, max_failures: u32, reset_timeout: Duration) -> Self {
        Self {
            name: name.into(),
            state: AtomicU8::new(CircuitState::Closed as u8),
            consecutive_failures: AtomicU32::new(0),
            last_failure_nanos: AtomicU64::new(0),
            origin: Instant::now(),
            max_failures: max_failures.max(1),
            reset_timeout,
        }
    }

    /// Dependency name this breaker guards.
    pub fn name(&self) -> &SmolStr {
        &self.name
    }

    /// Current state.
    pub fn state(&self) -> CircuitState {
        CircuitState::from(self.state.load(Ordering::Acquire))
    }

    /// Admission check. `true` means the caller may proceed and must report
    /// the outcome via [`record_success`](Self::record_success) or
    /// [`record_failure`](Self::record_failure).
    pub fn try_acquire(&self) -> bool {
        match self.state() {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let last = self.last_failure_nanos.load(Ordering::Acquire);
                if self.elapsed_nanos().saturating_sub(last) < self.reset_timeout.as_nanos() as u64
                {
                    return false;
                }
                // The CAS winner becomes the single half-open probe.
                let admitted = self
                    .state
                    .compare_exchange(
                        CircuitState::Open as u8,
                        CircuitState::HalfOpen as u8,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    )
                    .is_ok();
                if admitted {
                    info!(breaker = %self.name, "circuit breaker half-open, probing");
                }
                admitted
            }
            CircuitState::HalfOpen => false,
        }
    }

    /// Reports a successful call.
    pub fn record_success(&self) {
        self.consecutive_failures.store(0, Ordering::Release);
        if self
            .state
            .compare_exchange(
                CircuitState::HalfOpen as u8,
                CircuitState::Closed as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
        {
            info!(breaker = %self.name, "circuit breaker closed");
        }
    }

    /// Reports a failed call.
    pub fn record_failure(&self) {
        match self.state() {
            CircuitState::Closed => {
                let failures = self.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;
                if failures >= self.max_failures {
                    self.trip(CircuitState::Closed);
                }
            }
            // The probe failed; back to Open with a fresh timestamp.
            CircuitState::HalfOpen => self.trip(CircuitState::HalfOpen),
            CircuitState::Open => {
                self.last_failure_nanos
                    .store(self.elapsed_nanos(), Ordering::Release);
            }
        }
    }

    fn trip(&self, from: CircuitState) {
        // Timestamp first: an Open observer must see a fresh last-failure.
        self.last_failure_nanos
            .store(self.elapsed_nanos(), Ordering::Release);
        if self
            .state
            .compare_exchange(
                from as u8,
                CircuitState::Open as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
        {
            warn!(
                breaker = %self.name,
                max_failures = self.max_failures,
                reset_timeout_ms = self.reset_timeout.as_millis() as u64,
                "circuit breaker opened, failing fast"
            );
        }
    }

    fn elapsed_nanos(&self) -> u64 {
        self.origin.elapsed().as_nanos() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(max_failures: u32, reset_timeout: Duration) -> CircuitBreaker {
        CircuitBreaker::new("test", max_failures, reset_timeout)
    }

    #[test]
    fn opens_after_max_consecutive_failures() {
        let cb = breaker(3, Duration::from_secs(60));
        assert_eq!(cb.state(), CircuitState::Closed);

        for _ in 0..2 {
            assert!(cb.try_acquire());
            cb.record_failure();
            assert_eq!(cb.state(), CircuitState::Closed);
        }
        assert!(cb.try_acquire());
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.try_acquire());
    }

    #[test]
    fn success_resets_the_failure_counter() {
        let cb = breaker(2, Duration::from_secs(60));
        assert!(cb.try_acquire());
        cb.record_failure();
        assert!(cb.try_acquire());
        cb.record_success();
        assert!(cb.try_acquire());
        cb.record_failure();
        // One failure after the reset: still closed.
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn half_open_after_reset_timeout_then_closed_on_success() {
        let cb = breaker(1, Duration::from_millis(20));
        assert!(cb.try_acquire());
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.try_acquire());

        std::thread::sleep(Duration::from_millis(30));

        // Exactly one caller wins the probe slot.
        assert!(cb.try_acquire());
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert!(!cb.try_acquire());

        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.try_acquire());
    }

    #[test]
    fn half_open_failure_reopens() {
        let cb = breaker(1, Duration::from_millis(20));
        assert!(cb.try_acquire());
        cb.record_failure();
        std::thread::sleep(Duration::from_millis(30));
        assert!(cb.try_acquire());
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        // Timestamp was refreshed: still rejecting right away.
        assert!(!cb.try_acquire());
    }

    #[test]
    fn concurrent_probe_admission_is_single() {
        let cb = std::sync::Arc::new(breaker(1, Duration::from_millis(10)));
        assert!(cb.try_acquire());
        cb.record_failure();
        std::thread::sleep(Duration::from_millis(20));

        let admitted: usize = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    let cb = cb.clone();
                    scope.spawn(move || cb.try_acquire() as usize)
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).sum()
        });
        assert_eq!(admitted, 1);
    }
}
