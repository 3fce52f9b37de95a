#![allow(dead_code)]

use std::str::FromStr;
use std::sync::Arc;

use ai_gateway_lib::{
    AuthService, BalanceService, Database, GatewayConfig, LedgerQueue, Model, Provider,
    ProxyState, QuotaDefaults, SqliteLedgerQueue,
};
use axum::body::Body;
use axum::http::{HeaderMap, Request, StatusCode};
use axum::Router;
use rust_decimal::Decimal;
use serde_json::Value;
use tower::ServiceExt;

pub const USER_ID: &str = "user-1";

pub fn dec(text: &str) -> Decimal {
    Decimal::from_str(text).expect("valid decimal")
}

pub fn provider(id: &str, name: &str, base_url: &str, api_key: &str) -> Provider {
    Provider {
        id: id.to_string(),
        name: name.to_string(),
        base_url: base_url.to_string(),
        api_key: api_key.to_string(),
        active: true,
    }
}

pub fn model(id: &str, name: &str, provider_id: &str) -> Model {
    Model {
        id: id.to_string(),
        name: name.to_string(),
        provider_id: provider_id.to_string(),
        input_price_per_1k: dec("0.005"),
        output_price_per_1k: dec("0.015"),
        max_tokens: None,
        active: true,
    }
}

pub struct TestGateway {
    pub db: Arc<Database>,
    pub queue: Arc<dyn LedgerQueue>,
    pub state: ProxyState,
    pub api_key: String,
}

impl TestGateway {
    pub fn router(&self) -> Router {
        ai_gateway_lib::proxy::router(self.state.clone())
    }

    /// 发送 chat-completion 请求，返回状态码、响应头和 JSON 响应体
    pub async fn chat(&self, body: Value) -> (StatusCode, HeaderMap, Value) {
        let request = Request::builder()
            .method("POST")
            .uri("/v1/chat/completions")
            .header("content-type", "application/json")
            .header("authorization", format!("Bearer {}", self.api_key))
            .body(Body::from(body.to_string()))
            .expect("build request");
        send(self.router(), request).await
    }

    pub async fn get(&self, uri: &str) -> (StatusCode, HeaderMap, Value) {
        let request = Request::builder()
            .method("GET")
            .uri(uri)
            .header("x-api-key", self.api_key.clone())
            .body(Body::empty())
            .expect("build request");
        send(self.router(), request).await
    }
}

pub async fn send(router: Router, request: Request<Body>) -> (StatusCode, HeaderMap, Value) {
    let response = router.oneshot(request).await.expect("router response");
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read body");
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, headers, body)
}

/// 内存数据库上的完整网关：写入目录、创建 Key 并充值
pub fn build_gateway(
    providers: Vec<Provider>,
    models: Vec<Model>,
    defaults: QuotaDefaults,
    paid: Option<&str>,
    production: bool,
) -> TestGateway {
    let db = Arc::new(Database::memory().expect("memory db"));
    build_gateway_on(db, providers, models, defaults, paid, production)
}

/// 在给定数据库上构建网关
pub fn build_gateway_on(
    db: Arc<Database>,
    providers: Vec<Provider>,
    models: Vec<Model>,
    defaults: QuotaDefaults,
    paid: Option<&str>,
    production: bool,
) -> TestGateway {
    for p in &providers {
        db.upsert_provider(p).expect("seed provider");
    }
    for m in &models {
        db.upsert_model(m).expect("seed model");
    }

    let (_, api_key) = AuthService::new(db.clone())
        .create_api_key(USER_ID, Some("test"))
        .expect("create api key");
    if let Some(amount) = paid {
        BalanceService::new(db.clone())
            .record_payment(USER_ID, dec(amount))
            .expect("record payment");
    }

    let config = GatewayConfig {
        production,
        request_timeout_secs: 5,
        default_max_tokens: 256,
        quota_defaults: defaults,
        ..GatewayConfig::default()
    };
    let queue: Arc<dyn LedgerQueue> = Arc::new(SqliteLedgerQueue::new(db.clone()));
    let state = ProxyState::new(db.clone(), Arc::new(config), queue.clone()).expect("state");

    TestGateway {
        db,
        queue,
        state,
        api_key,
    }
}

/// 不受限流影响的默认配额
pub fn relaxed_defaults() -> QuotaDefaults {
    QuotaDefaults {
        rate_limit_per_minute: 0,
        rate_limit_per_hour: 0,
        ..QuotaDefaults::default()
    }
}
