#![allow(dead_code)]

use std::sync::Arc;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use qahub_db::DbPool;
use qahub_events::{Consumer, LogProducer};
use qahub_server::config::{Config, EventsConfig};
use qahub_server::originator::Originator;
use qahub_server::{app, background, AppState};
use serde_json::{json, Value};
use tokio::sync::watch;
use tower::ServiceExt;

pub struct TestServer {
    pub state: AppState,
    pub router: Router,
    pub pool: DbPool,
    pub shutdown_tx: watch::Sender<bool>,
    _dir: tempfile::TempDir,
}

pub fn test_config(db_path: &str) -> Config {
    let mut config = Config::default();
    config.database.path = db_path.to_string();
    config.auth.token_secret = "integration-test-secret".to_string();
    config.auth.bcrypt_cost = 4;
    config.hub.keep_alive_secs = 1;
    config
}

pub async fn setup() -> TestServer {
    setup_with(|_| {}).await
}

pub async fn setup_with(customize: impl FnOnce(&mut Config)) -> TestServer {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("qahub.db");
    let mut config = test_config(path.to_str().unwrap());
    customize(&mut config);

    let pool = qahub_db::create_pool(&config.database.path, Default::default()).unwrap();
    qahub_db::run_migrations(&pool.get().unwrap()).unwrap();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (state, _hub_task) = AppState::from_config(&config, pool.clone(), shutdown_rx).unwrap();
    let router = app(state.clone());

    TestServer {
        state,
        router,
        pool,
        shutdown_tx,
        _dir: dir,
    }
}

impl TestServer {
    /// A consumer on `notification_events` wired to this server's
    /// notification service; tests drive it with `poll_once`.
    pub fn consumer(&self) -> Consumer {
        background::notification_consumer(
            self.pool.clone(),
            self.state.notifications.clone(),
            &EventsConfig::default(),
        )
    }

    pub fn originator(&self) -> Originator {
        Originator::new(Arc::new(LogProducer::new(self.pool.clone())))
    }

    pub async fn rpc(&self, method: &str, token: Option<&str>, body: Value) -> (StatusCode, Value) {
        rpc(&self.router, method, token, body).await
    }

    /// Registers `username` with a fixed password and logs in.
    /// Returns `(user_id, token)`.
    pub async fn signup(&self, username: &str) -> (i64, String) {
        let creds = json!({"username": username, "password": "hunter22"});
        let (status, body) = self.rpc("user.UserService/Register", None, creds.clone()).await;
        assert_eq!(status, StatusCode::OK, "register failed: {body}");

        let (status, body) = self.rpc("user.UserService/Login", None, creds).await;
        assert_eq!(status, StatusCode::OK, "login failed: {body}");
        (
            body["user_id"].as_i64().unwrap(),
            body["token"].as_str().unwrap().to_string(),
        )
    }
}

pub async fn rpc(app: &Router, method: &str, token: Option<&str>, body: Value) -> (StatusCode, Value) {
    let mut builder = Request::builder()
        .method("POST")
        .uri(format!("/{method}"))
        .header("content-type", "application/json");
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {token}"));
    }

    let response = app
        .clone()
        .oneshot(builder.body(Body::from(body.to_string())).unwrap())
        .await
        .unwrap();

    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json)
}
