//! The Redis backend needs a live server for its data path; these tests
//! only cover what works without one.

use std::time::Duration;

use stampede::backend::RemoteBackend;
use stampede::{CacheConfig, CacheService, KeyScheme};
use stampede_redis::RedisBackend;

#[tokio::test]
async fn service_over_unreachable_redis_constructs_and_shuts_down() {
    let backend = RedisBackend::builder()
        .server("redis://127.0.0.1:1/")
        .key_scheme(KeyScheme::new("dsg"))
        .build()
        .unwrap();
    assert_eq!(backend.name(), "redis");

    // Background tasks retry against the dead server until told to stop.
    let service = CacheService::new(backend, CacheConfig::default());
    tokio::time::timeout(Duration::from_secs(5), service.shutdown())
        .await
        .expect("shutdown should not wait on the dead server");
}
