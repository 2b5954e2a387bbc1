//! Metrics declaration and recording helpers.
//!
//! All helpers compile to empty functions when the `metrics` feature is
//! disabled and are eliminated by the compiler.

#[cfg(feature = "metrics")]
use lazy_static::lazy_static;

#[cfg(feature = "metrics")]
lazy_static! {
    // Lookup outcome counters

    /// Track number of local (first-tier) cache hits.
    pub static ref LOCAL_HIT_COUNTER: &'static str = {
        metrics::describe_counter!(
            "stampede_local_hit_total",
            "Total number of local cache hits."
        );
        "stampede_local_hit_total"
    };
    /// Track number of distributed cache hits.
    pub static ref REMOTE_HIT_COUNTER: &'static str = {
        metrics::describe_counter!(
            "stampede_remote_hit_total",
            "Total number of distributed cache hits."
        );
        "stampede_remote_hit_total"
    };
    /// Track number of full cache misses (a computation was required).
    pub static ref MISS_COUNTER: &'static str = {
        metrics::describe_counter!(
            "stampede_miss_total",
            "Total number of cache misses requiring computation."
        );
        "stampede_miss_total"
    };

    // Leader / waiter counters

    /// Track number of leader elections won by this process.
    pub static ref ELECTION_WON_COUNTER: &'static str = {
        metrics::describe_counter!(
            "stampede_elections_won_total",
            "Total number of distributed leader elections won."
        );
        "stampede_elections_won_total"
    };
    /// Track number of waiters woken by a completion signal.
    pub static ref NOTIFY_WAKEUP_COUNTER: &'static str = {
        metrics::describe_counter!(
            "stampede_notify_wakeups_total",
            "Total number of local waiters woken by completion signals."
        );
        "stampede_notify_wakeups_total"
    };
    /// Track number of waits that expired without a signal.
    pub static ref NOTIFY_TIMEOUT_COUNTER: &'static str = {
        metrics::describe_counter!(
            "stampede_notify_timeouts_total",
            "Total number of waits that timed out before a completion signal."
        );
        "stampede_notify_timeouts_total"
    };

    // Resilience counters

    /// Track calls rejected by an open circuit breaker.
    pub static ref BREAKER_REJECTED_COUNTER: &'static str = {
        metrics::describe_counter!(
            "stampede_breaker_rejected_total",
            "Total number of calls rejected by an open circuit breaker."
        );
        "stampede_breaker_rejected_total"
    };
    /// Track calls rejected by the flow controller.
    pub static ref FLOW_REJECTED_COUNTER: &'static str = {
        metrics::describe_counter!(
            "stampede_flow_rejected_total",
            "Total number of calls rejected by the concurrency limiter."
        );
        "stampede_flow_rejected_total"
    };

    // Latency

    /// Histogram of get_or_compute duration.
    pub static ref DO_DURATION_HISTOGRAM: &'static str = {
        metrics::describe_histogram!(
            "stampede_do_duration_seconds",
            metrics::Unit::Seconds,
            "Duration of get_or_compute calls in seconds."
        );
        "stampede_do_duration_seconds"
    };
}

#[cfg(feature = "metrics")]
mod imp {
    use std::time::Duration;

    use super::*;

    #[inline]
    pub fn record_local_hit() {
        metrics::counter!(*LOCAL_HIT_COUNTER).increment(1);
    }

    #[inline]
    pub fn record_remote_hit() {
        metrics::counter!(*REMOTE_HIT_COUNTER).increment(1);
    }

    #[inline]
    pub fn record_miss() {
        metrics::counter!(*MISS_COUNTER).increment(1);
    }

    #[inline]
    pub fn record_election_won() {
        metrics::counter!(*ELECTION_WON_COUNTER).increment(1);
    }

    #[inline]
    pub fn record_notify_wakeup(woken: usize) {
        metrics::counter!(*NOTIFY_WAKEUP_COUNTER).increment(woken as u64);
    }

    #[inline]
    pub fn record_notify_timeout() {
        metrics::counter!(*NOTIFY_TIMEOUT_COUNTER).increment(1);
    }

    #[inline]
    pub fn record_breaker_rejection() {
        metrics::counter!(*BREAKER_REJECTED_COUNTER).increment(1);
    }

    #[inline]
    pub fn record_flow_rejection() {
        metrics::counter!(*FLOW_REJECTED_COUNTER).increment(1);
    }

    #[inline]
    pub fn record_do_duration(duration: Duration, outcome: &'static str) {
        metrics::histogram!(*DO_DURATION_HISTOGRAM, "outcome" => outcome)
            .record(duration.as_secs_f64());
    }
}

#[cfg(not(feature = "metrics"))]
mod imp {
    use std::time::Duration;

    #[inline]
    pub fn record_local_hit() {}
    #[inline]
    pub fn record_remote_hit() {}
    #[inline]
    pub fn record_miss() {}
    #[inline]
    pub fn record_election_won() {}
    #[inline]
    pub fn record_notify_wakeup(_woken: usize) {}
    #[inline]
    pub fn record_notify_timeout() {}
    #[inline]
    pub fn record_breaker_rejection() {}
    #[inline]
    pub fn record_flow_rejection() {}
    #[inline]
    pub fn record_do_duration(_duration: Duration, _outcome: &'static str) {}
}

pub use imp::*;
