use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use bytes::Bytes;
use stampede::backend::RemoteBackend;
use stampede::{CacheConfig, CacheError, CacheService, UpstreamError};
use stampede_test::MockBackend;

fn quick_config() -> CacheConfig {
    CacheConfig {
        execute_ttl: Duration::from_millis(500),
        lock_ttl: Duration::from_secs(5),
        ..Default::default()
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_callers_execute_the_computation_once() {
    let backend = MockBackend::new();
    let service = Arc::new(CacheService::new(backend.clone(), quick_config()));
    let executions = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for _ in 0..3 {
        let service = Arc::clone(&service);
        let executions = Arc::clone(&executions);
        handles.push(tokio::spawn(async move {
            service
                .get_or_compute("report", move || async move {
                    executions.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(200)).await;
                    Ok(Bytes::from_static(b"payload"))
                })
                .await
        }));
    }
    for handle in handles {
        let payload = handle.await.unwrap().unwrap();
        assert_eq!(payload, Bytes::from_static(b"payload"));
    }

    assert_eq!(executions.load(Ordering::SeqCst), 1);
    assert_eq!(backend.lock_won_count(), 1);
    service.shutdown().await;
}

#[tokio::test]
async fn repeat_calls_are_served_from_the_local_tier() {
    let backend = MockBackend::new();
    let service = CacheService::new(backend.clone(), quick_config());

    let first = service
        .get_or_compute("report", || async {
            Ok::<_, UpstreamError>(Bytes::from_static(b"payload"))
        })
        .await
        .unwrap();
    let reads_after_first = backend.read_count();

    let second = service
        .get_or_compute("report", || async {
            Ok::<_, UpstreamError>(Bytes::from_static(b"recomputed"))
        })
        .await
        .unwrap();

    assert_eq!(first, second);
    assert_eq!(backend.read_count(), reads_after_first);
    service.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn waiter_receives_result_announced_elsewhere() {
    let backend = MockBackend::new();
    // Another process already leads this key.
    backend.hold_lock("shared", Duration::from_secs(5));
    let service = CacheService::new(backend.clone(), quick_config());

    let publisher = backend.clone();
    let announce = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        publisher.insert_payload("shared", Bytes::from_static(b"remote"));
        publisher.publish_done("shared").await.unwrap();
    });

    let executions = Arc::new(AtomicUsize::new(0));
    let flag = Arc::clone(&executions);
    let payload = service
        .get_or_compute("shared", move || async move {
            flag.fetch_add(1, Ordering::SeqCst);
            Ok(Bytes::from_static(b"never"))
        })
        .await
        .unwrap();

    assert_eq!(payload, Bytes::from_static(b"remote"));
    assert_eq!(executions.load(Ordering::SeqCst), 0);
    announce.await.unwrap();
    service.shutdown().await;
}

#[tokio::test]
async fn waiter_times_out_when_no_completion_arrives() {
    let backend = MockBackend::new();
    backend.hold_lock("stuck", Duration::from_secs(60));
    let config = CacheConfig {
        execute_ttl: Duration::from_millis(100),
        ..quick_config()
    };
    let service = CacheService::new(backend.clone(), config);

    let executions = Arc::new(AtomicUsize::new(0));
    let flag = Arc::clone(&executions);
    let result = service
        .get_or_compute("stuck", move || async move {
            flag.fetch_add(1, Ordering::SeqCst);
            Ok(Bytes::from_static(b"never"))
        })
        .await;

    assert!(matches!(result, Err(CacheError::NotifyTimeout)));
    assert_eq!(executions.load(Ordering::SeqCst), 0);
    service.shutdown().await;
}

#[tokio::test]
async fn upstream_failure_propagates_and_caches_nothing() {
    let backend = MockBackend::new();
    let service = CacheService::new(backend.clone(), quick_config());

    let result = service
        .get_or_compute("broken", || async {
            Err::<Bytes, UpstreamError>("query exploded".into())
        })
        .await;

    assert!(matches!(result, Err(CacheError::Upstream(_))));
    assert!(!backend.contains("broken"));
    service.shutdown().await;
}

#[tokio::test]
async fn bounded_write_evicts_oldest_entries() {
    let backend = MockBackend::bounded(3);
    for i in 0..5u8 {
        let key = format!("k{i}");
        backend
            .write_bounded(&key, Bytes::from(vec![i]), Duration::from_secs(30))
            .await
            .unwrap();
    }

    assert_eq!(backend.entry_count(), 3);
    assert!(!backend.contains("k0"));
    assert!(!backend.contains("k1"));
    assert!(backend.contains("k2"));
    assert!(backend.contains("k4"));
}

#[tokio::test(flavor = "multi_thread")]
async fn keeper_renews_the_lease_during_a_long_computation() {
    let backend = MockBackend::new();
    let config = CacheConfig {
        renew_interval: Some(Duration::from_millis(50)),
        lock_ttl: Duration::from_secs(1),
        ..quick_config()
    };
    let service = CacheService::new(backend.clone(), config);

    service
        .get_or_compute("slow", || async {
            tokio::time::sleep(Duration::from_millis(250)).await;
            Ok::<_, UpstreamError>(Bytes::from_static(b"payload"))
        })
        .await
        .unwrap();

    let renewals = backend.renewals();
    assert!(
        renewals.iter().any(|batch| batch.iter().any(|k| k == "slow")),
        "no renewal carried the led key: {renewals:?}"
    );
    service.shutdown().await;
}

#[tokio::test]
async fn skip_rules_and_master_switch_are_exposed() {
    let backend = MockBackend::new();
    let mut config = quick_config();
    config.skip.methods.push("HEAD".to_string());
    config.skip.paths.push("/query/ts/*".to_string());
    let service = CacheService::new(backend, config);

    assert!(service.is_enabled());
    assert!(service.should_skip("HEAD", "/query"));
    assert!(service.should_skip("GET", "/query/ts/promql"));
    assert!(!service.should_skip("GET", "/query/raw"));
    service.shutdown().await;
}

#[tokio::test]
async fn shutdown_joins_background_tasks() {
    let backend = MockBackend::new();
    let service = CacheService::new(backend, quick_config());

    tokio::time::timeout(Duration::from_secs(1), service.shutdown())
        .await
        .expect("shutdown should complete promptly");
}
