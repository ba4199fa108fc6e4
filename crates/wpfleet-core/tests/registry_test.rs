#![allow(clippy::unwrap_used)]
// Registry persistence across reopen.

use std::time::Duration;

use pretty_assertions::assert_eq;

use wpfleet_core::{CoreError, LifecyclePhase, SiteId, SiteRegistry, SiteStatus};

#[tokio::test]
async fn reopen_keeps_order_status_and_id_sequence() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state").join("sites.json");

    {
        let registry = SiteRegistry::open(&path, "localhost").await.unwrap();
        let a = registry.create("Alpha", "first").await.unwrap().id;
        let b = registry.create("Beta", "second").await.unwrap().id;
        let c = registry.create("Gamma", "third").await.unwrap().id;
        registry
            .update_status(&a, LifecyclePhase::Running, Some(8000), None)
            .await
            .unwrap();
        registry.delete(&b).await.unwrap();
        assert_eq!(c.as_str(), "s3");
    }

    let registry = SiteRegistry::open(&path, "example.test").await.unwrap();
    let sites = registry.list().await;
    let names: Vec<_> = sites.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, ["Alpha", "Gamma"]);
    assert_eq!(sites[0].status, SiteStatus::Running);
    assert_eq!(sites[0].url.as_deref(), Some("http://example.test:8000"));

    // A deleted id is never handed out again.
    let next = registry.create("Delta", "fourth").await.unwrap();
    assert_eq!(next.id, SiteId::from("s4"));
}

#[tokio::test]
async fn missing_file_is_an_empty_registry() {
    let dir = tempfile::tempdir().unwrap();
    let registry = SiteRegistry::open(dir.path().join("sites.json"), "localhost")
        .await
        .unwrap();
    assert!(registry.list().await.is_empty());
    assert!(!dir.path().join("sites.json").exists());
}

#[tokio::test]
async fn malformed_file_is_a_storage_error_and_left_alone() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sites.json");
    std::fs::write(&path, "{ not json").unwrap();

    let err = SiteRegistry::open(&path, "localhost").await.err().unwrap();
    assert!(matches!(err, CoreError::Storage { .. }), "got: {err:?}");
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "{ not json");
}

#[tokio::test]
async fn failed_validation_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sites.json");
    let registry = SiteRegistry::open(&path, "localhost").await.unwrap();

    assert!(registry.create("", "").await.is_err());
    assert!(!path.exists());

    registry.create("Blog", "My blog").await.unwrap();
    let raw = std::fs::read_to_string(&path).unwrap();
    assert!(raw.contains("\"Blog\""));
    assert!(!dir.path().join("sites.json.tmp").exists());
}

#[tokio::test]
async fn version_keeps_counting_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sites.json");

    let cursor = {
        let registry = SiteRegistry::open(&path, "localhost").await.unwrap();
        for n in 0..5 {
            registry.create(&format!("Site {n}"), "desc").await.unwrap();
        }
        registry.version()
    };
    assert_eq!(cursor, 5);

    let registry = std::sync::Arc::new(SiteRegistry::open(&path, "localhost").await.unwrap());
    assert_eq!(registry.version(), cursor);

    let writer = std::sync::Arc::clone(&registry);
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        writer
            .update_status(&SiteId::from("s1"), LifecyclePhase::Stopped, None, None)
            .await
            .unwrap();
    });

    let started = std::time::Instant::now();
    let (version, sites) = registry.changes_since(cursor, Duration::from_secs(25)).await;
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(version, 6);
    assert_eq!(sites[0].status, SiteStatus::Stopped);
}

#[tokio::test]
async fn cursor_ahead_of_registry_is_answered_at_once() {
    let registry = SiteRegistry::in_memory("localhost");
    registry.create("Blog", "My blog").await.unwrap();

    let started = std::time::Instant::now();
    let (version, sites) = registry.changes_since(42, Duration::from_secs(25)).await;
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(version, 1);
    assert_eq!(sites.len(), 1);
}
