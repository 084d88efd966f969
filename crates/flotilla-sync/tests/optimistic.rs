//! Optimistic mutation and availability scenarios over a mocked
//! upstream.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use flotilla_core::{ErrorKind, Instance, Kinded};
use flotilla_pool::{ClientPool, Crypter, InstanceDirectory};
use flotilla_sync::SyncService;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

struct StaticDirectory {
    instances: Vec<Instance>,
}

#[async_trait]
impl InstanceDirectory for StaticDirectory {
    async fn instance(&self, id: i64) -> anyhow::Result<Option<Instance>> {
        Ok(self.instances.iter().find(|i| i.id == id).cloned())
    }
}

fn crypter() -> Crypter {
    Crypter::new(&[5u8; 32])
}

fn instance(id: i64, base_url: &str, enabled: bool) -> Instance {
    Instance {
        id,
        name: format!("box-{id}"),
        base_url: base_url.to_string(),
        username: "admin".to_string(),
        encrypted_password: crypter().encrypt("adminadmin").expect("encrypt"),
        basic_username: None,
        encrypted_basic_password: None,
        tls_skip_verify: false,
        has_local_filesystem_access: false,
        enabled,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

async fn mock_upstream() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v2/auth/login"))
        .respond_with(ResponseTemplate::new(200).set_body_string("Ok."))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v2/app/version"))
        .respond_with(ResponseTemplate::new(200).set_body_string("v5.0.2"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v2/sync/maindata"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "rid": 1,
            "full_update": true,
            "torrents": {
                "h1": { "name": "one", "state": "uploading", "tags": "" }
            }
        })))
        .mount(&server)
        .await;
    server
}

fn service(instances: Vec<Instance>) -> SyncService {
    let pool = Arc::new(ClientPool::new(
        Arc::new(StaticDirectory { instances }),
        crypter(),
        Duration::from_secs(5),
    ));
    SyncService::new(pool, Duration::from_secs(60), Duration::from_secs(2))
}

#[tokio::test]
async fn tag_mutations_are_visible_before_the_next_refresh() {
    let server = mock_upstream().await;
    Mock::given(method("POST"))
        .and(path("/api/v2/torrents/addTags"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let sync = service(vec![instance(1, &server.uri(), true)]);
    let before = sync.read(1).await.expect("populate");
    let version_before = before.snapshot.serving_version;
    assert!(before.snapshot.torrents["h1"].tags.is_empty());

    sync.add_tags(1, vec!["H1".to_string()], vec!["x".to_string()])
        .await
        .expect("add tags");

    // The very next read observes the patch with a bumped version even
    // though no refresh has happened (the TTL window is 60 s here).
    let after = sync.read(1).await.expect("read");
    assert!(after.snapshot.serving_version > version_before);
    assert!(after.snapshot.torrents["h1"].tags.contains("x"));
}

#[tokio::test]
async fn failed_mutation_invalidates_the_snapshot() {
    let server = mock_upstream().await;
    Mock::given(method("POST"))
        .and(path("/api/v2/torrents/setCategory"))
        .respond_with(ResponseTemplate::new(409).set_body_string("no such category"))
        .mount(&server)
        .await;

    let sync = service(vec![instance(1, &server.uri(), true)]);
    sync.read(1).await.expect("populate");

    let err = sync
        .set_category(1, vec!["h1".to_string()], "missing".to_string())
        .await
        .expect_err("must conflict");
    assert_eq!(err.kind(), ErrorKind::Conflict);

    // The snapshot was rolled back to stale; the next read serves it
    // while a refresh repairs the view.
    let read = sync.read(1).await.expect("stale read");
    assert!(!read.is_fresh());
}

#[tokio::test]
async fn delete_patch_removes_the_record_immediately() {
    let server = mock_upstream().await;
    Mock::given(method("POST"))
        .and(path("/api/v2/torrents/delete"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let sync = service(vec![instance(1, &server.uri(), true)]);
    sync.read(1).await.expect("populate");

    sync.bulk_action(
        1,
        flotilla_qbit::BulkVerb::Delete {
            delete_files: false,
        },
        vec!["h1".to_string()],
    )
    .await
    .expect("delete");

    let read = sync.read(1).await.expect("read");
    assert!(read.snapshot.torrents.is_empty());
}

#[tokio::test]
async fn disabled_instances_surface_upstream_disabled() {
    let server = mock_upstream().await;
    let sync = service(vec![instance(1, &server.uri(), false)]);

    let err = sync.read(1).await.expect_err("must refuse");
    assert_eq!(err.kind(), ErrorKind::UpstreamDisabled);
}
