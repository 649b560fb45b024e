//! End-to-end reload tests against a file origin.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use reloadkit::{Bootstrap, ComponentKind, PipelineState, RuntimeOverrides, SlotAction};

mod common;

use common::{cache_config, wait_until, OriginFile, TICK};

#[tokio::test]
async fn test_file_origin_end_to_end() {
    let origin = OriginFile::new(&cache_config("h1"));
    let applied = Arc::new(AtomicUsize::new(0));

    let handle = Bootstrap::new(origin.descriptor())
        .with_poll_interval(TICK)
        .with_hook({
            let applied = Arc::clone(&applied);
            move |_event, _report| {
                applied.fetch_add(1, Ordering::SeqCst);
            }
        })
        .start()
        .await
        .unwrap();
    let registry = Arc::clone(handle.registry());
    assert_eq!(registry.cache().unwrap().host(), "h1");

    // Change: swapped within a few polls.
    origin.write(&cache_config("h2"));
    let swapped = wait_until(Duration::from_secs(2), || applied.load(Ordering::SeqCst) == 1).await;
    assert!(swapped, "reload never applied");
    let h2_client = registry.cache().unwrap();
    assert_eq!(h2_client.host(), "h2");

    // Malformed: nothing reaches the registry.
    origin.write("{not-json");
    tokio::time::sleep(TICK * 6).await;
    assert!(Arc::ptr_eq(&h2_client, &registry.cache().unwrap()));
    assert_eq!(applied.load(Ordering::SeqCst), 1);
    assert_eq!(handle.current_snapshot().unwrap().config().cache.host, "h2");

    // Cancellation is single-shot and closes the pipeline.
    assert!(handle.cancel());
    assert!(!handle.cancel());
    handle.join().await;
    assert!(registry.is_live(ComponentKind::Cache));
}

#[tokio::test]
async fn test_unchanged_origin_never_reloads() {
    let origin = OriginFile::new(&cache_config("h1"));
    let applied = Arc::new(AtomicUsize::new(0));

    let handle = Bootstrap::new(origin.descriptor())
        .with_poll_interval(TICK)
        .with_hook({
            let applied = Arc::clone(&applied);
            move |_event, _report| {
                applied.fetch_add(1, Ordering::SeqCst);
            }
        })
        .start()
        .await
        .unwrap();
    let before = handle.registry().cache().unwrap();

    // Rewriting identical bytes is not a change.
    origin.write(&cache_config("h1"));
    tokio::time::sleep(TICK * 6).await;

    assert_eq!(applied.load(Ordering::SeqCst), 0);
    assert_eq!(handle.current_snapshot().unwrap().revision(), 1);
    assert!(Arc::ptr_eq(&before, &handle.registry().cache().unwrap()));

    handle.cancel();
    handle.join().await;
}

#[tokio::test]
async fn test_disable_then_reenable() {
    let origin = OriginFile::new(&cache_config("h1"));
    let actions = Arc::new(std::sync::Mutex::new(Vec::new()));

    let handle = Bootstrap::new(origin.descriptor())
        .with_poll_interval(TICK)
        .with_hook({
            let actions = Arc::clone(&actions);
            move |_event, report| {
                actions
                    .lock()
                    .unwrap()
                    .push(report.and_then(|r| r.action(ComponentKind::Cache)));
            }
        })
        .start()
        .await
        .unwrap();
    let registry = Arc::clone(handle.registry());

    origin.write(r#"{"cache":{"enable":false,"host":"h1"}}"#);
    assert!(wait_until(Duration::from_secs(2), || registry.cache().is_none()).await);

    origin.write(&cache_config("h3"));
    assert!(
        wait_until(Duration::from_secs(2), || {
            registry.cache().map(|c| c.host() == "h3").unwrap_or(false)
        })
        .await
    );

    handle.cancel();
    handle.join().await;
    assert_eq!(
        *actions.lock().unwrap(),
        vec![Some(SlotAction::Retired), Some(SlotAction::Built)]
    );
}

#[tokio::test]
async fn test_overrides_survive_reload() {
    let origin = OriginFile::new(
        r#"{"log_conf":{"level":"warn","format":"json"},"cache":{"enable":true,"host":"h1"}}"#,
    );

    let handle = Bootstrap::new(origin.descriptor())
        .with_poll_interval(TICK)
        .with_overrides(RuntimeOverrides {
            log_level: "debug".into(),
            port: 7070,
            ..Default::default()
        })
        .start()
        .await
        .unwrap();
    let registry = Arc::clone(handle.registry());
    assert_eq!(registry.logger().unwrap().config().level, "debug");
    assert_eq!(registry.logger().unwrap().config().format, "json");

    origin.write(
        r#"{"log_conf":{"level":"error","format":"text"},"cache":{"enable":true,"host":"h1"}}"#,
    );
    assert!(
        wait_until(Duration::from_secs(2), || {
            registry.logger().map(|l| l.config().format == "text").unwrap_or(false)
        })
        .await
    );
    let logging = registry.snapshot().unwrap().config().logging.clone();
    assert_eq!(logging.level, "debug");
    assert_eq!(registry.snapshot().unwrap().config().discovery.server_port, 7070);

    handle.cancel();
    handle.join().await;
}

#[tokio::test]
async fn test_cancel_stops_within_one_poll() {
    let origin = OriginFile::new(&cache_config("h1"));
    let handle = Bootstrap::new(origin.descriptor())
        .with_poll_interval(Duration::from_secs(30))
        .start()
        .await
        .unwrap();
    assert_eq!(handle.state(), PipelineState::Watching);

    handle.cancel();
    assert_eq!(handle.state(), PipelineState::Cancelled);
    tokio::time::timeout(Duration::from_secs(1), handle.join())
        .await
        .expect("pipeline should stop without waiting for the next poll");
}

#[tokio::test]
async fn test_bootstrap_from_descriptor_file() {
    let origin = OriginFile::new(&cache_config("h1"));
    let descriptor_path = origin.path().with_file_name("reloadkit.json");
    std::fs::write(
        &descriptor_path,
        serde_json::to_vec(&origin.descriptor()).unwrap(),
    )
    .unwrap();

    let bootstrap = Bootstrap::from_path(&descriptor_path).unwrap();
    assert_eq!(bootstrap.descriptor().engine_type, "file");

    let handle = bootstrap.with_poll_interval(TICK).start().await.unwrap();
    assert_eq!(handle.registry().cache().unwrap().host(), "h1");
    handle.cancel();
    handle.join().await;
}
