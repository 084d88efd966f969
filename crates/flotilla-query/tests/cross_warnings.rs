//! Cross-instance listings degrade unavailable instances to warnings
//! while serving results from the reachable ones.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use flotilla_core::Instance;
use flotilla_pool::{ClientPool, Crypter, InstanceDirectory};
use flotilla_query::{ListRequest, ListingService};
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
    Crypter::new(&[9u8; 32])
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

async fn mock_upstream_with_torrent(hash: &str) -> MockServer {
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
                hash: { "name": "survivor", "state": "uploading", "size": 1000 }
            }
        })))
        .mount(&server)
        .await;
    server
}

fn listing(instances: Vec<Instance>) -> ListingService {
    let pool = Arc::new(ClientPool::new(
        Arc::new(StaticDirectory { instances }),
        crypter(),
        Duration::from_secs(2),
    ));
    let sync = Arc::new(SyncService::new(
        pool,
        Duration::from_secs(5),
        Duration::from_secs(2),
    ));
    ListingService::new(sync)
}

#[tokio::test]
async fn disabled_instance_degrades_to_warning_and_others_still_serve() {
    // Instance 1 is disabled; instance 2 is reachable and reports one
    // torrent. The merged listing carries instance 2's rows plus exactly
    // one warning naming instance 1.
    let server = mock_upstream_with_torrent("hb").await;
    let listing = listing(vec![
        instance(1, "http://127.0.0.1:9", false),
        instance(2, &server.uri(), true),
    ]);

    let response = listing
        .list_cross(vec![1, 2], ListRequest::default())
        .await
        .expect("cross listing succeeds with warnings");

    assert_eq!(response.total, 1);
    assert_eq!(response.data.len(), 1);
    assert_eq!(response.data[0].instance_id, 2);
    assert_eq!(response.data[0].torrent.hash, "hb");
    assert_eq!(response.data[0].torrent.name, "survivor");

    assert_eq!(response.warnings.len(), 1);
    assert_eq!(response.warnings[0].instance_id, 1);
    assert_eq!(response.warnings[0].code, "upstream_disabled");
}

#[tokio::test]
async fn all_instances_disabled_yields_empty_page_with_warnings() {
    let listing = listing(vec![instance(1, "http://127.0.0.1:9", false)]);

    let response = listing
        .list_cross(vec![1], ListRequest::default())
        .await
        .expect("cross listing succeeds with warnings");
    assert!(response.data.is_empty());
    assert_eq!(response.total, 0);
    assert_eq!(response.warnings.len(), 1);
    assert_eq!(response.warnings[0].instance_id, 1);
    assert_eq!(response.warnings[0].code, "upstream_disabled");
}
