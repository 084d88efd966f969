//! Wire-level tests against a mocked qBittorrent endpoint.

use std::time::Duration;

use flotilla_core::{ErrorKind, Kinded};
use flotilla_qbit::{BulkVerb, QbitClient, QbitClientConfig};
use wiremock::matchers::{body_string_contains, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn mock_login(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/api/v2/auth/login"))
        .respond_with(ResponseTemplate::new(200).set_body_string("Ok."))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v2/app/version"))
        .respond_with(ResponseTemplate::new(200).set_body_string("v5.0.2"))
        .mount(server)
        .await;
}

fn config(server: &MockServer) -> QbitClientConfig {
    let mut config = QbitClientConfig::new(server.uri(), "admin", "adminadmin");
    config.timeout = Duration::from_secs(5);
    config
}

#[tokio::test]
async fn connect_logs_in_and_records_version() {
    let server = MockServer::start().await;
    mock_login(&server).await;

    let client = QbitClient::connect(config(&server)).await.expect("connect");
    assert_eq!(client.version().await.as_deref(), Some("v5.0.2"));
}

#[tokio::test]
async fn rejected_credentials_surface_unauthorized() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v2/auth/login"))
        .respond_with(ResponseTemplate::new(200).set_body_string("Fails."))
        .mount(&server)
        .await;

    let err = QbitClient::connect(config(&server))
        .await
        .expect_err("login should fail");
    assert_eq!(err.kind(), ErrorKind::Unauthorized);
}

#[tokio::test]
async fn expired_session_triggers_single_relogin() {
    let server = MockServer::start().await;
    mock_login(&server).await;

    // First listing hits a stale session, the retry after re-login works.
    Mock::given(method("GET"))
        .and(path("/api/v2/torrents/info"))
        .respond_with(ResponseTemplate::new(403))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v2/torrents/info"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
            { "hash": "aa", "name": "one", "state": "uploading" }
        ])))
        .mount(&server)
        .await;

    let client = QbitClient::connect(config(&server)).await.expect("connect");
    let torrents = client.get_torrents(None).await.expect("list after relogin");
    assert_eq!(torrents.len(), 1);
    assert_eq!(torrents[0].hash, "aa");
}

#[tokio::test]
async fn persistent_rejection_surfaces_unauthorized() {
    let server = MockServer::start().await;
    mock_login(&server).await;
    Mock::given(method("GET"))
        .and(path("/api/v2/torrents/info"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;

    let client = QbitClient::connect(config(&server)).await.expect("connect");
    let err = client.get_torrents(None).await.expect_err("must reject");
    assert_eq!(err.kind(), ErrorKind::Unauthorized);
}

#[tokio::test]
async fn transient_read_failures_are_retried() {
    let server = MockServer::start().await;
    mock_login(&server).await;
    Mock::given(method("GET"))
        .and(path("/api/v2/sync/maindata"))
        .respond_with(ResponseTemplate::new(502))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v2/sync/maindata"))
        .and(query_param("rid", "0"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "rid": 1,
            "full_update": true,
            "torrents": {}
        })))
        .mount(&server)
        .await;

    let client = QbitClient::connect(config(&server)).await.expect("connect");
    let maindata = client.get_maindata(0).await.expect("retried read");
    assert_eq!(maindata.rid, 1);
    assert_eq!(maindata.full_update, Some(true));
}

#[tokio::test]
async fn mutations_are_not_retried_on_transient_failures() {
    let server = MockServer::start().await;
    mock_login(&server).await;
    Mock::given(method("POST"))
        .and(path("/api/v2/torrents/stop"))
        .respond_with(ResponseTemplate::new(502))
        .expect(1)
        .mount(&server)
        .await;

    let client = QbitClient::connect(config(&server)).await.expect("connect");
    let err = client
        .bulk_action(BulkVerb::Stop, &["aa".to_string()])
        .await
        .expect_err("must fail");
    assert_eq!(err.kind(), ErrorKind::UpstreamTransient);
}

#[tokio::test]
async fn bulk_delete_carries_delete_files_flag() {
    let server = MockServer::start().await;
    mock_login(&server).await;
    Mock::given(method("POST"))
        .and(path("/api/v2/torrents/delete"))
        .and(body_string_contains("hashes=aa%7Cbb"))
        .and(body_string_contains("deleteFiles=true"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let client = QbitClient::connect(config(&server)).await.expect("connect");
    client
        .bulk_action(
            BulkVerb::Delete { delete_files: true },
            &["aa".to_string(), "bb".to_string()],
        )
        .await
        .expect("delete dispatch");
}

#[tokio::test]
async fn conflict_statuses_classify_as_conflict() {
    let server = MockServer::start().await;
    mock_login(&server).await;
    Mock::given(method("POST"))
        .and(path("/api/v2/torrents/setCategory"))
        .respond_with(ResponseTemplate::new(409).set_body_string("category does not exist"))
        .mount(&server)
        .await;

    let client = QbitClient::connect(config(&server)).await.expect("connect");
    let err = client
        .set_category(&["aa".to_string()], "missing")
        .await
        .expect_err("must conflict");
    assert_eq!(err.kind(), ErrorKind::Conflict);
}

#[tokio::test]
async fn creator_api_is_version_gated() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v2/auth/login"))
        .respond_with(ResponseTemplate::new(200).set_body_string("Ok."))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v2/app/version"))
        .respond_with(ResponseTemplate::new(200).set_body_string("v4.6.7"))
        .mount(&server)
        .await;

    let client = QbitClient::connect(config(&server)).await.expect("connect");
    let err = client
        .creator_task_status(None)
        .await
        .expect_err("must be gated");
    assert_eq!(err.kind(), ErrorKind::UnsupportedVersion);
}
