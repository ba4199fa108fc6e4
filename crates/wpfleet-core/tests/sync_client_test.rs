#![allow(clippy::unwrap_used)]
// SyncClient against a mocked backend. Runs on real time: reqwest
// timeouts and wiremock delays do not mix with a paused clock.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use pretty_assertions::assert_eq;
use serde_json::json;
use url::Url;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use wpfleet_core::{CoreError, DeleteOutcome, SiteId, SiteStatus, SyncClient, SyncConfig};

// ── Helpers ─────────────────────────────────────────────────────────

async fn setup(refresh_delay: Duration) -> (MockServer, SyncClient) {
    let server = MockServer::start().await;
    let mut config = SyncConfig::new(Url::parse(&server.uri()).unwrap());
    config.timeout = Duration::from_secs(5);
    config.refresh_delay = refresh_delay;
    config.long_poll_wait = Duration::from_secs(1);
    let client = SyncClient::new(config).unwrap();
    (server, client)
}

fn site(id: &str, status: &str, port: Option<&str>) -> serde_json::Value {
    json!({
        "id": id,
        "name": format!("Site {id}"),
        "description": "desc",
        "url": port.map(|p| format!("http://localhost:{p}")).unwrap_or_default(),
        "port": port.unwrap_or_default(),
        "status": status,
        "createdAt": "2024-06-15T10:30:00Z"
    })
}

async fn mount_list(server: &MockServer, sites: serde_json::Value) {
    Mock::given(method("GET"))
        .and(path("/api/sites"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "sites": sites })))
        .mount(server)
        .await;
}

async fn wait_for_generation(client: &SyncClient, at_least: u64) {
    let mut rx = client.subscribe();
    tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|g| *g >= at_least))
        .await
        .unwrap()
        .unwrap();
}

// ── Reads ───────────────────────────────────────────────────────────

#[tokio::test]
async fn fetch_all_replaces_snapshot() {
    let (server, client) = setup(Duration::from_secs(60)).await;
    mount_list(
        &server,
        json!([site("s1", "running", Some("8000")), site("s2", "paused", None)]),
    )
    .await;

    let snapshot = client.fetch_all().await.unwrap();

    assert_eq!(snapshot.generation, 1);
    assert_eq!(snapshot.sites.len(), 2);
    assert_eq!(snapshot.sites[0].port, Some(8000));
    assert_eq!(snapshot.sites[1].status, SiteStatus::Stopped);
    assert!(snapshot.fetched_at.is_some());
    assert_eq!(client.snapshot(), snapshot);
}

#[tokio::test]
async fn empty_backend_gives_empty_view() {
    let (server, client) = setup(Duration::from_secs(60)).await;
    mount_list(&server, json!([])).await;

    let snapshot = client.fetch_all().await.unwrap();
    assert!(snapshot.is_empty());
    assert_eq!(client.last_error(), None);
}

// ── Create ──────────────────────────────────────────────────────────

#[tokio::test]
async fn blank_create_sends_nothing() {
    let (server, client) = setup(Duration::from_secs(60)).await;

    let err = client.create("  ", "desc").await.unwrap_err();

    assert!(matches!(err, CoreError::Validation { .. }), "got: {err:?}");
    assert_eq!(
        client.last_error().as_deref(),
        Some("Site name and description are required")
    );
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn create_appends_optimistically_then_refreshes() {
    let (server, client) = setup(Duration::from_millis(200)).await;
    Mock::given(method("POST"))
        .and(path("/api/sites"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "message": "Site created successfully",
            "site": site("s1", "created", None)
        })))
        .mount(&server)
        .await;
    mount_list(&server, json!([site("s1", "running", Some("8000"))])).await;

    let created = client.create("Site s1", "desc").await.unwrap();

    assert_eq!(created.status, SiteStatus::Created);
    let snapshot = client.snapshot();
    assert_eq!(snapshot.sites.len(), 1);
    assert_eq!(snapshot.sites[0].status, SiteStatus::Created);

    wait_for_generation(&client, 2).await;
    let snapshot = client.snapshot();
    assert_eq!(snapshot.sites[0].status, SiteStatus::Running);
    assert_eq!(
        snapshot.sites[0].url.as_deref(),
        Some("http://localhost:8000")
    );
    client.shutdown().await;
}

// ── Commands ────────────────────────────────────────────────────────

#[tokio::test]
async fn start_refreshes_even_on_success() {
    let (server, client) = setup(Duration::from_secs(60)).await;
    Mock::given(method("POST"))
        .and(path("/api/sites/s1/start"))
        .respond_with(ResponseTemplate::new(202).set_body_json(json!({
            "message": "Site start initiated"
        })))
        .expect(1)
        .mount(&server)
        .await;
    mount_list(&server, json!([site("s1", "restarting", None)])).await;

    client.start(&SiteId::from("s1")).await.unwrap();

    assert_eq!(client.snapshot().sites[0].status, SiteStatus::Restarting);
    assert_eq!(client.last_error(), None);
}

#[tokio::test]
async fn busy_rejection_surfaces_server_message_and_still_refreshes() {
    let (server, client) = setup(Duration::from_secs(60)).await;
    Mock::given(method("POST"))
        .and(path("/api/sites/s1/stop"))
        .respond_with(ResponseTemplate::new(423).set_body_json(json!({
            "error": "Site s1 is busy with another operation",
            "code": "busy"
        })))
        .mount(&server)
        .await;
    mount_list(&server, json!([site("s1", "restarting", None)])).await;

    let err = client.stop(&SiteId::from("s1")).await.unwrap_err();

    assert!(matches!(err, CoreError::Busy { .. }), "got: {err:?}");
    assert_eq!(
        client.last_error().as_deref(),
        Some("Site s1 is busy with another operation")
    );
    assert_eq!(client.snapshot().generation, 1);

    client.dismiss_error();
    assert_eq!(client.last_error(), None);
}

#[tokio::test]
async fn failed_refresh_keeps_the_rejected_command_message() {
    let (server, client) = setup(Duration::from_secs(60)).await;
    Mock::given(method("POST"))
        .and(path("/api/sites/s1/start"))
        .respond_with(ResponseTemplate::new(423).set_body_json(json!({
            "error": "Site s1 is busy with another operation",
            "code": "busy"
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/sites"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;

    let err = client.start(&SiteId::from("s1")).await.unwrap_err();

    assert!(matches!(err, CoreError::Busy { .. }), "got: {err:?}");
    assert_eq!(
        client.last_error().as_deref(),
        Some("Site s1 is busy with another operation")
    );
    assert_eq!(client.snapshot().generation, 0);
}

#[tokio::test]
async fn delete_declined_sends_nothing() {
    let (server, client) = setup(Duration::from_secs(60)).await;
    mount_list(&server, json!([site("s1", "stopped", None)])).await;
    client.fetch_all().await.unwrap();

    let seen = AtomicBool::new(false);
    let outcome = client
        .delete(&SiteId::from("s1"), |site| {
            seen.store(site.is_some(), Ordering::SeqCst);
            false
        })
        .await
        .unwrap();

    assert_eq!(outcome, DeleteOutcome::Cancelled);
    assert!(seen.load(Ordering::SeqCst));
    let requests = server.received_requests().await.unwrap();
    assert!(requests.iter().all(|r| r.method.as_str() == "GET"));
}

#[tokio::test]
async fn delete_running_site_reports_conflict() {
    let (server, client) = setup(Duration::from_secs(60)).await;
    Mock::given(method("DELETE"))
        .and(path("/api/sites/s1"))
        .respond_with(ResponseTemplate::new(409).set_body_json(json!({
            "error": "Cannot delete a running site. Please stop it first."
        })))
        .mount(&server)
        .await;
    mount_list(&server, json!([site("s1", "running", Some("8000"))])).await;

    let err = client
        .delete(&SiteId::from("s1"), |_| true)
        .await
        .unwrap_err();

    assert!(matches!(err, CoreError::Conflict { .. }), "got: {err:?}");
    assert_eq!(
        client.last_error().as_deref(),
        Some("Cannot delete a running site. Please stop it first.")
    );
    assert_eq!(client.snapshot().sites.len(), 1);
}

#[tokio::test]
async fn confirmed_delete_refreshes_view() {
    let (server, client) = setup(Duration::from_secs(60)).await;
    Mock::given(method("DELETE"))
        .and(path("/api/sites/s1"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;
    mount_list(&server, json!([])).await;

    let outcome = client.delete(&SiteId::from("s1"), |_| true).await.unwrap();

    assert_eq!(outcome, DeleteOutcome::Deleted);
    assert!(client.snapshot().is_empty());
}

#[tokio::test]
async fn unreachable_backend_is_network_error() {
    let config = SyncConfig::new(Url::parse("http://127.0.0.1:1").unwrap());
    let client = SyncClient::new(config).unwrap();

    let err = client.fetch_all().await.unwrap_err();

    assert!(matches!(err, CoreError::Network { .. }), "got: {err:?}");
    assert!(client.last_error().is_some());
}

#[tokio::test]
async fn slow_backend_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/sites"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "sites": [] }))
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&server)
        .await;
    let mut config = SyncConfig::new(Url::parse(&server.uri()).unwrap());
    config.timeout = Duration::from_millis(200);
    let client = SyncClient::new(config).unwrap();

    let err = client.fetch_all().await.unwrap_err();

    assert!(matches!(err, CoreError::Timeout { .. }), "got: {err:?}");
}

// ── Waiting / listening ─────────────────────────────────────────────

#[tokio::test]
async fn wait_until_settled_returns_failed_site() {
    let (server, client) = setup(Duration::from_secs(60)).await;
    Mock::given(method("GET"))
        .and(path("/api/sites"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "sites": [site("s1", "restarting", None)]
        })))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    let mut exited = site("s1", "exited", None);
    exited["error"] = json!("start timed out after 300s");
    mount_list(&server, json!([exited])).await;

    let settled = client
        .wait_until_settled(&SiteId::from("s1"), Duration::from_secs(10))
        .await
        .unwrap();

    assert_eq!(settled.status, SiteStatus::Exited);
    assert_eq!(settled.error.as_deref(), Some("start timed out after 300s"));
}

#[tokio::test]
async fn wait_until_reports_missing_site() {
    let (server, client) = setup(Duration::from_secs(60)).await;
    mount_list(&server, json!([])).await;

    let err = client
        .wait_until_settled(&SiteId::from("s9"), Duration::from_secs(5))
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::NotFound { .. }), "got: {err:?}");
}

#[tokio::test]
async fn change_listener_publishes_long_poll_results() {
    let (server, client) = setup(Duration::from_secs(60)).await;
    Mock::given(method("GET"))
        .and(path("/api/sites"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "sites": [site("s1", "restarting", None)],
            "version": 3
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/sites/changes"))
        .and(query_param("since", "3"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "sites": [site("s1", "running", Some("8000"))],
            "version": 4
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/sites/changes"))
        .and(query_param("since", "4"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "sites": [site("s1", "running", Some("8000"))], "version": 4 }))
                .set_delay(Duration::from_millis(500)),
        )
        .mount(&server)
        .await;

    let _listener = client.spawn_change_listener();
    wait_for_generation(&client, 2).await;

    let snapshot = client.snapshot();
    assert_eq!(snapshot.server_version, Some(4));
    assert_eq!(snapshot.sites[0].status, SiteStatus::Running);
    client.shutdown().await;
}
