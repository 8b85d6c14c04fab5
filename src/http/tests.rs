use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
};
use http_body_util::BodyExt;
use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use tokio::sync::{Mutex, watch};
use tower::util::ServiceExt;

use super::{AppState, build_router};
use crate::{
    apply::{ApplyReply, Dispatcher, DispatcherConfig},
    command::RaftRequest,
    metrics::ApplyMetrics,
    raft::{
        NodeId, NodeMeta,
        app::{BoxFuture, LocalRaft, RaftFacade},
    },
    storage::{AlarmType, Backend, BackendQuota},
};

fn app_with(config: DispatcherConfig) -> (Router, Arc<Mutex<Dispatcher>>) {
    let metrics = Arc::new(ApplyMetrics::default());
    let dispatcher = Arc::new(Mutex::new(Dispatcher::new(
        config,
        Backend::default(),
        metrics.clone(),
    )));

    let mut raft_metrics = openraft::RaftMetrics::new_initial(1);
    raft_metrics.current_term = 1;
    raft_metrics.state = openraft::ServerState::Leader;
    raft_metrics.current_leader = Some(1);
    let (_tx, rx) = watch::channel(raft_metrics);
    let raft: Arc<dyn RaftFacade> = Arc::new(LocalRaft::new(dispatcher.clone(), rx));

    let state = AppState::new(1, raft, dispatcher.clone(), metrics);
    (build_router(state, None), dispatcher)
}

fn app() -> Router {
    app_with(DispatcherConfig::default()).0
}

async fn body_json(res: axum::response::Response) -> Value {
    let bytes = res.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

async fn post_command(app: &Router, body: Value) -> (StatusCode, Value) {
    let res = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/commands")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = res.status();
    (status, body_json(res).await)
}

async fn get(app: &Router, uri: &str) -> axum::response::Response {
    app.clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap()
}

fn put(key: &str, value: &str) -> Value {
    use base64::Engine as _;
    let b64 = base64::engine::general_purpose::STANDARD;
    json!({
        "op": "put",
        "request": { "key": b64.encode(key), "value": b64.encode(value) }
    })
}

#[tokio::test]
async fn put_then_range_returns_value() {
    let app = app();
    let (status, body) = post_command(&app, json!({ "command": put("foo", "bar") })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({ "response": { "op": "put", "response": { "revision": 2 } } })
    );

    let (status, body) = post_command(
        &app,
        json!({ "command": { "op": "range", "request": { "key": "Zm9v" } } }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["response"]["response"]["count"], json!(1));
    assert_eq!(
        body["response"]["response"]["kvs"][0]["value"],
        json!("YmFy")
    );
}

#[tokio::test]
async fn malformed_body_is_invalid_request() {
    let app = app();
    let (status, body) = post_command(&app, json!({ "command": { "op": "put" } })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], json!("invalid_request"));
}

#[tokio::test]
async fn user_add_commits_only_the_hash() {
    let (app, dispatcher) = app_with(DispatcherConfig::default());
    let (status, _) = post_command(
        &app,
        json!({
            "command": {
                "op": "auth_user_add",
                "request": { "name": "alice", "password": "s3cret" }
            }
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let dispatcher = dispatcher.lock().await;
    let user = dispatcher.backend().auth.user("alice").unwrap();
    assert!(user.password_hash.starts_with("$argon2id$"));
    assert!(!user.password_hash.contains("s3cret"));
}

#[tokio::test]
async fn authenticate_verifies_password_and_issues_token() {
    let app = app();
    for command in [
        json!({ "op": "auth_user_add", "request": { "name": "root", "password": "pw" } }),
        json!({ "op": "auth_user_grant_role", "request": { "user": "root", "role": "root" } }),
        json!({ "op": "auth_enable" }),
    ] {
        let (status, body) = post_command(&app, json!({ "command": command })).await;
        assert_eq!(status, StatusCode::OK, "{body}");
    }

    let (status, body) = post_command(
        &app,
        json!({ "command": { "op": "authenticate", "request": { "name": "root", "password": "nope" } } }),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], json!("auth_failed"));

    let (status, body) = post_command(
        &app,
        json!({ "command": { "op": "authenticate", "request": { "name": "root", "password": "pw" } } }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let token = body["response"]["response"]["token"].as_str().unwrap().to_string();
    assert!(!token.is_empty());

    let (status, body) = post_command(&app, json!({ "command": put("k", "v") })).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], json!("user_empty"));

    let (status, _) =
        post_command(&app, json!({ "token": token, "command": put("k", "v") })).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) =
        post_command(&app, json!({ "token": "forged", "command": put("k", "v") })).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], json!("unauthorized"));
}

#[tokio::test]
async fn lease_grant_without_id_gets_one() {
    let app = app();
    let (status, body) = post_command(
        &app,
        json!({ "command": { "op": "lease_grant", "request": { "ttl": 30 } } }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["response"]["response"]["id"].as_i64().unwrap() > 0);
    assert_eq!(body["response"]["response"]["ttl"], json!(30));
}

#[tokio::test]
async fn exhausted_quota_raises_no_space_alarm() {
    let (app, dispatcher) = app_with(DispatcherConfig {
        quota: BackendQuota::from_config(1),
        ..DispatcherConfig::default()
    });

    let (status, body) = post_command(&app, json!({ "command": put("a", "1") })).await;
    assert_eq!(status, StatusCode::INSUFFICIENT_STORAGE);
    assert_eq!(body["error"]["code"], json!("no_space"));
    assert!(dispatcher.lock().await.backend().alarms.is_active(AlarmType::NoSpace));

    let res = get(&app, "/api/alarms").await;
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(
        body_json(res).await,
        json!({
            "response": {
                "op": "alarm",
                "response": { "alarms": [{ "member_id": 1, "alarm": "no_space" }] }
            }
        })
    );

    let (status, _) = post_command(
        &app,
        json!({ "command": { "op": "range", "request": { "key": "YQ==" } } }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn metrics_expose_apply_histogram() {
    let app = app();
    post_command(&app, json!({ "command": put("a", "1") })).await;

    let res = get(&app, "/metrics").await;
    assert_eq!(res.status(), StatusCode::OK);
    let text = String::from_utf8(
        res.into_body()
            .collect()
            .await
            .unwrap()
            .to_bytes()
            .to_vec(),
    )
    .unwrap();
    assert!(text.contains(
        "kvapply_apply_duration_seconds_count{version=\"v3\",op=\"Put\",success=\"true\"} 1"
    ));
}

#[tokio::test]
async fn proposals_need_a_leader() {
    let metrics = Arc::new(ApplyMetrics::default());
    let dispatcher = Arc::new(Mutex::new(Dispatcher::new(
        DispatcherConfig::default(),
        Backend::default(),
        metrics.clone(),
    )));
    let (_tx, rx) = watch::channel(openraft::RaftMetrics::new_initial(1));
    let raft: Arc<dyn RaftFacade> = Arc::new(LocalRaft::new(dispatcher.clone(), rx));
    let app = build_router(AppState::new(1, raft, dispatcher.clone(), metrics), None);

    let (status, body) = post_command(&app, json!({ "command": put("a", "1") })).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"]["code"], json!("unavailable"));
    assert_eq!(dispatcher.lock().await.backend().kv.current_revision(), 1);
}

/// Accepts every proposal without applying it, keeping a copy.
struct RecordingRaft {
    proposed: std::sync::Mutex<Vec<RaftRequest>>,
    metrics: watch::Receiver<openraft::RaftMetrics<NodeId, NodeMeta>>,
}

impl RaftFacade for RecordingRaft {
    fn metrics(&self) -> watch::Receiver<openraft::RaftMetrics<NodeId, NodeMeta>> {
        self.metrics.clone()
    }

    fn client_write(&self, req: RaftRequest) -> BoxFuture<'_, anyhow::Result<ApplyReply>> {
        self.proposed.lock().unwrap().push(req);
        Box::pin(async { Ok(ApplyReply::default()) })
    }
}

#[tokio::test]
async fn non_client_ops_are_never_proposed() {
    let mut raft_metrics = openraft::RaftMetrics::new_initial(1);
    raft_metrics.current_leader = Some(1);
    let (_tx, rx) = watch::channel(raft_metrics);
    let recording = Arc::new(RecordingRaft {
        proposed: std::sync::Mutex::new(Vec::new()),
        metrics: rx,
    });
    let metrics = Arc::new(ApplyMetrics::default());
    let dispatcher = Arc::new(Mutex::new(Dispatcher::new(
        DispatcherConfig::default(),
        Backend::default(),
        metrics.clone(),
    )));
    let app = build_router(
        AppState::new(1, recording.clone(), dispatcher, metrics),
        None,
    );

    for command in [
        json!({ "op": "bogus" }),
        json!({ "op": "lease_renew_v4", "request": { "id": 5 } }),
        json!({ "op": "cluster_version_set", "request": { "ver": "9.9.9" } }),
        json!({ "op": "downgrade_info_set", "request": { "enabled": true, "ver": "3.4.0" } }),
        json!({ "op": "cluster_member_attr_set", "request": { "member_id": 1, "name": "x" } }),
    ] {
        let (status, body) = post_command(&app, json!({ "command": command })).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{command}");
        assert_eq!(body["error"]["code"], json!("invalid_request"));
    }
    assert!(recording.proposed.lock().unwrap().is_empty());

    let (status, _) = post_command(&app, json!({ "command": put("a", "1") })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(recording.proposed.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn identity_comes_only_from_token() {
    let (app, dispatcher) = app_with(DispatcherConfig::default());
    for command in [
        json!({ "op": "auth_user_add", "request": { "name": "root", "password": "pw" } }),
        json!({ "op": "auth_user_grant_role", "request": { "user": "root", "role": "root" } }),
        json!({ "op": "auth_enable" }),
    ] {
        let (status, body) = post_command(&app, json!({ "command": command })).await;
        assert_eq!(status, StatusCode::OK, "{body}");
    }

    let (status, body) = post_command(
        &app,
        json!({ "username": "root", "command": put("k", "v") }),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], json!("user_empty"));

    let (status, _) = post_command(
        &app,
        json!({ "username": "root", "command": { "op": "auth_disable" } }),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let dispatcher = dispatcher.lock().await;
    assert!(dispatcher.backend().auth.is_enabled());
    assert_eq!(dispatcher.backend().kv.current_revision(), 1);
}
