//! End-to-end engine scenarios against a mocked upstream.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use flotilla_core::Instance;
use flotilla_data::{ActivityQuery, Database, NewInstance};
use flotilla_pool::{ClientPool, Crypter, InstanceDirectory};
use flotilla_rules::{
    ActionConditions, RuleEngine, RuleEngineConfig, RulePayload, ShareLimitsAction,
};
use flotilla_sync::SyncService;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

struct DbDirectory {
    db: Database,
}

#[async_trait]
impl InstanceDirectory for DbDirectory {
    async fn instance(&self, id: i64) -> anyhow::Result<Option<Instance>> {
        Ok(self.db.instances().find(id).await?)
    }
}

fn crypter() -> Crypter {
    Crypter::new(&[11u8; 32])
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
                "h1": {
                    "name": "matching",
                    "state": "uploading",
                    "tags": "freeleech",
                    "ratio": 1.2
                },
                "h2": {
                    "name": "other",
                    "state": "uploading",
                    "tags": "",
                    "ratio": 5.0
                }
            }
        })))
        .mount(&server)
        .await;
    server
}

async fn harness(server: &MockServer) -> (RuleEngine, Database, i64) {
    let db = Database::open_in_memory().await.expect("open db");
    let instance = db
        .instances()
        .create(NewInstance {
            name: "box".to_string(),
            base_url: server.uri(),
            username: "admin".to_string(),
            encrypted_password: crypter().encrypt("adminadmin").expect("encrypt"),
            basic_username: None,
            encrypted_basic_password: None,
            tls_skip_verify: false,
            has_local_filesystem_access: false,
            enabled: true,
        })
        .await
        .expect("instance");

    let pool = Arc::new(ClientPool::new(
        Arc::new(DbDirectory { db: db.clone() }),
        crypter(),
        Duration::from_secs(5),
    ));
    let sync = Arc::new(SyncService::new(
        pool,
        Duration::from_secs(5),
        Duration::from_secs(2),
    ));
    let engine = RuleEngine::new(sync, db.clone(), RuleEngineConfig::default());
    (engine, db, instance.id)
}

fn share_limit_payload(dry_run: bool) -> RulePayload {
    RulePayload {
        name: "freeleech unlimited".to_string(),
        enabled: true,
        dry_run,
        sort_order: 0,
        tracker_scope: "*".to_string(),
        interval_seconds: None,
        conditions: ActionConditions {
            share_limits: Some(ShareLimitsAction {
                condition: Some(
                    serde_json::from_value(serde_json::json!({
                        "combinator": "and",
                        "children": [
                            { "field": "tags", "op": "contains", "value": "freeleech" },
                            { "field": "ratio", "op": ">=", "value": 1.0 }
                        ]
                    }))
                    .expect("tree"),
                ),
                ratio_limit: -1.0,
                seeding_time_limit: -1,
                inactive_seeding_time_limit: -2,
            }),
            ..ActionConditions::default()
        },
        free_space_source: None,
    }
}

#[tokio::test]
async fn apply_once_dispatches_exactly_one_share_limit_call() {
    let server = mock_upstream().await;
    Mock::given(method("POST"))
        .and(path("/api/v2/torrents/setShareLimits"))
        .and(body_string_contains("hashes=h1"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let (engine, db, instance_id) = harness(&server).await;
    let rule = engine
        .create_rule(instance_id, share_limit_payload(false))
        .await
        .expect("create rule");

    let summary = engine.apply_once(rule.id, false).await.expect("apply");
    assert_eq!(summary.actions_planned, 1);
    assert_eq!(summary.actions_dispatched, 1);
    assert_eq!(summary.errors, 0);

    // The buffered writer flushes within 200 ms.
    tokio::time::sleep(Duration::from_millis(400)).await;
    let records = db
        .activity()
        .list(&ActivityQuery {
            rule_id: Some(rule.id),
            limit: 10,
            ..ActivityQuery::default()
        })
        .await
        .expect("activity");
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].hash, "h1");
    assert_eq!(records[0].outcome, "applied");
    assert_eq!(records[0].action, "set_share_limit");
}

#[tokio::test]
async fn dry_run_emits_no_mutations_and_identical_payload() {
    let server = mock_upstream().await;
    // No setShareLimits mock is mounted: any call would 404 and the run
    // would report an error instead of a clean dry run.
    let (engine, db, instance_id) = harness(&server).await;
    let rule = engine
        .create_rule(instance_id, share_limit_payload(true))
        .await
        .expect("create rule");

    let summary = engine.apply_once(rule.id, false).await.expect("apply");
    assert_eq!(summary.actions_planned, 1);
    assert_eq!(summary.actions_dispatched, 0);
    assert_eq!(summary.errors, 0);

    tokio::time::sleep(Duration::from_millis(400)).await;
    let records = db
        .activity()
        .list(&ActivityQuery {
            rule_id: Some(rule.id),
            limit: 10,
            ..ActivityQuery::default()
        })
        .await
        .expect("activity");
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].outcome, "would_have_applied");
    // The recorded payload matches what a real run would dispatch.
    let detail = records[0].detail.clone().expect("detail");
    assert!(detail.contains("set_share_limit"));
    assert!(detail.contains("-1"));
}

#[tokio::test]
async fn preview_returns_candidates_without_dispatching() {
    let server = mock_upstream().await;
    let (engine, _db, instance_id) = harness(&server).await;

    let (items, total) = engine
        .preview(instance_id, share_limit_payload(false), 0, 100)
        .await
        .expect("preview");
    assert_eq!(total, 1);
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].hash, "h1");
}

#[tokio::test]
async fn invalid_payloads_are_rejected_before_persistence() {
    let server = mock_upstream().await;
    let (engine, db, instance_id) = harness(&server).await;

    let mut payload = share_limit_payload(false);
    payload.name = String::new();
    assert!(engine.create_rule(instance_id, payload).await.is_err());
    assert!(
        db.rules()
            .list_for_instance(instance_id)
            .await
            .expect("list")
            .is_empty()
    );
}
