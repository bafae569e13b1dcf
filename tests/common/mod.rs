#![allow(dead_code)]

use axum::Router;
use axum::body::Body;
use axum::http::{Request, header};
use axum::response::Response;
use tower::ServiceExt;

use janus::AppState;
use janus::api::build_app;
use janus::auth::users::{NewApiKey, create_api_key, create_organization, create_user};
use janus::balancer::{BackendConfig, ModelGroup, StrategyKind};
use janus::config::Config;
use janus::db::Database;
use janus::spend::SpendFlusher;

pub const ADMIN_KEY: &str = "admin-secret";

pub struct TestGateway {
    pub state: AppState,
    pub flusher: SpendFlusher,
    pub app: Router,
}

pub fn group(name: &str, backends: Vec<BackendConfig>) -> ModelGroup {
    ModelGroup {
        name: name.to_string(),
        strategy: StrategyKind::RoundRobin,
        models: backends,
        cost_per_input_token: 0.001,
        cost_per_output_token: 0.002,
    }
}

pub fn gateway(groups: Vec<ModelGroup>) -> TestGateway {
    let mut config = Config::default();
    config.auth.admin_key = Some(ADMIN_KEY.to_string());
    config.model_groups = groups;

    let db = Database::open_in_memory().unwrap();
    let (state, flusher) = AppState::new(config, db).unwrap();
    let app = build_app(state.clone());
    TestGateway { state, flusher, app }
}

impl TestGateway {
    /// Issue a key for a fresh user and make it visible to the cache.
    pub fn issue_key(&self, user: &str, models: &[&str]) -> String {
        let org = format!("{user}-org");
        create_organization(&self.state.db, &org).unwrap();
        create_user(&self.state.db, user, &org).unwrap();
        let created = create_api_key(
            &self.state.db,
            &NewApiKey {
                name: format!("{user} key"),
                models: models.iter().map(|m| m.to_string()).collect(),
                user: user.to_string(),
                organization: org,
                expires_in_days: None,
            },
        )
        .unwrap();
        self.state.key_cache.refresh(&self.state.db).unwrap();
        created.plaintext
    }

    pub async fn send(&self, request: Request<Body>) -> Response {
        self.app.clone().oneshot(request).await.unwrap()
    }

    pub async fn admin(&self, method: &str, uri: &str, body: Option<serde_json::Value>) -> Response {
        let builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::AUTHORIZATION, format!("Bearer {ADMIN_KEY}"));
        let request = match body {
            Some(json) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        self.send(request).await
    }
}

pub fn chat_request(key: Option<&str>, body: serde_json::Value) -> Request<Body> {
    let mut builder = Request::post("/v1/chat/completions")
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(key) = key {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {key}"));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

pub async fn json_body(resp: Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}
