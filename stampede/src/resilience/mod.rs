//! Circuit breaker and flow control guarding the distributed path.
//!
//! The manager composes two independent admission checks: a
//! [`FlowController`] bounding how many executions contend for the
//! distributed path at once, and a [`CircuitBreaker`] that stops calling a
//! failing dependency for a cooldown period. Both fail fast; neither
//! queues.

mod breaker;
mod flow;

pub use breaker::{CircuitBreaker, CircuitState};
pub use flow::FlowController;

use std::future::Future;

use smol_str::SmolStr;

use crate::config::ResilienceConfig;
use crate::error::CacheError;
use crate::metrics;

/// RAII flow permit; releases the slot on every exit path, including
/// unwinds.
struct FlowPermit<'a>(&'a FlowController);

impl Drop for FlowPermit<'_> {
    fn drop(&mut self) {
        self.0.release();
    }
}

/// Breaker plus flow controller for one named dependency.
#[derive(Debug)]
pub struct ResilienceManager {
    enabled: bool,
    breaker: CircuitBreaker,
    flow: FlowController,
}

impl ResilienceManager {
    /// Creates a manager for the dependency `name` from configuration.
    pub fn new(name: impl Into<SmolStr>, config: &ResilienceConfig) -> Self {
        let name = name.into();
        Self {
            enabled: config.enabled,
            breaker: CircuitBreaker::new(name, config.max_failures, config.reset_timeout),
            flow: FlowController::new(config.max_inflight),
        }
    }

    /// Current breaker state, for observability.
    pub fn breaker_state(&self) -> CircuitState {
        self.breaker.state()
    }

    /// Currently occupied flow slots.
    pub fn inflight(&self) -> u32 {
        self.flow.inflight()
    }

    /// Runs `op` under flow-control admission and the circuit breaker.
    ///
    /// When resilience is disabled by configuration the operation runs
    /// directly. Only dependency failures count against the breaker: an
    /// upstream computation error or a waiter timeout passing through here
    /// proves the dependency worked and is recorded as a success.
    pub async fn execute<F, Fut, T>(&self, op: F) -> Result<T, CacheError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, CacheError>>,
    {
        if !self.enabled {
            return op().await;
        }

        if !self.flow.try_acquire() {
            metrics::record_flow_rejection();
            return Err(CacheError::FlowLimitExceeded);
        }
        let _permit = FlowPermit(&self.flow);

        if !self.breaker.try_acquire() {
            metrics::record_breaker_rejection();
            return Err(CacheError::CircuitOpen(self.breaker.name().clone()));
        }

        let result = op().await;
        match &result {
            Err(error) if error.is_dependency_failure() => self.breaker.record_failure(),
            _ => self.breaker.record_success(),
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::backend::BackendError;

    fn manager(config: ResilienceConfig) -> ResilienceManager {
        ResilienceManager::new("redis", &config)
    }

    fn backend_failure<T>() -> Result<T, CacheError> {
        Err(CacheError::Backend(BackendError::connection(
            std::io::Error::other("connection refused"),
        )))
    }

    #[tokio::test]
    async fn disabled_manager_is_passthrough() {
        let manager = manager(ResilienceConfig {
            enabled: false,
            max_inflight: 1,
            max_failures: 1,
            ..Default::default()
        });
        for _ in 0..3 {
            let result = manager.execute(|| async { backend_failure::<()>() }).await;
            assert!(matches!(result, Err(CacheError::Backend(_))));
        }
        assert_eq!(manager.breaker_state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn breaker_opens_and_fails_fast() {
        let manager = manager(ResilienceConfig {
            max_failures: 2,
            reset_timeout: Duration::from_secs(60),
            ..Default::default()
        });
        for _ in 0..2 {
            let _ = manager.execute(|| async { backend_failure::<()>() }).await;
        }
        assert_eq!(manager.breaker_state(), CircuitState::Open);

        let result = manager.execute(|| async { Ok(()) }).await;
        assert!(matches!(result, Err(CacheError::CircuitOpen(_))));
    }

    #[tokio::test]
    async fn upstream_errors_do_not_trip_the_breaker() {
        let manager = manager(ResilienceConfig {
            max_failures: 1,
            ..Default::default()
        });
        for _ in 0..3 {
            let result: Result<(), _> = manager
                .execute(|| async { Err(CacheError::Upstream("query exploded".into())) })
                .await;
            assert!(matches!(result, Err(CacheError::Upstream(_))));
        }
        assert_eq!(manager.breaker_state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn notify_timeouts_do_not_trip_the_breaker() {
        let manager = manager(ResilienceConfig {
            max_failures: 1,
            ..Default::default()
        });
        let result: Result<(), _> = manager
            .execute(|| async { Err(CacheError::NotifyTimeout) })
            .await;
        assert!(matches!(result, Err(CacheError::NotifyTimeout)));
        assert_eq!(manager.breaker_state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn flow_saturation_fails_fast() {
        let manager = std::sync::Arc::new(manager(ResilienceConfig {
            max_inflight: 1,
            ..Default::default()
        }));

        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        let occupant = {
            let manager = manager.clone();
            tokio::spawn(async move {
                manager
                    .execute(|| async {
                        let _ = release_rx.await;
                        Ok(())
                    })
                    .await
            })
        };
        // Let the occupant take the only slot.
        tokio::task::yield_now().await;
        while manager.inflight() == 0 {
            tokio::task::yield_now().await;
        }

        let result = manager.execute(|| async { Ok(()) }).await;
        assert!(matches!(result, Err(CacheError::FlowLimitExceeded)));

        let _ = release_tx.send(());
        assert!(occupant.await.unwrap().is_ok());
        assert_eq!(manager.inflight(), 0);
    }

    #[tokio::test]
    async fn permit_released_on_error() {
        let manager = manager(ResilienceConfig {
            max_inflight: 1,
            max_failures: 100,
            ..Default::default()
        });
        let _ = manager.execute(|| async { backend_failure::<()>() }).await;
        assert_eq!(manager.inflight(), 0);
        assert!(manager.execute(|| async { Ok(()) }).await.is_ok());
    }

    #[tokio::test]
    async fn half_open_probe_recovers() {
        let manager = manager(ResilienceConfig {
            max_failures: 1,
            reset_timeout: Duration::from_millis(20),
            ..Default::default()
        });
        let _ = manager.execute(|| async { backend_failure::<()>() }).await;
        assert_eq!(manager.breaker_state(), CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(30)).await;

        let result = manager.execute(|| async { Ok("fresh") }).await;
        assert_eq!(result.unwrap(), "fresh");
        assert_eq!(manager.breaker_state(), CircuitState::Closed);
    }
}
