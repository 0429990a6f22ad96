#![allow(dead_code)]

use axum::body::Body;
use axum::http::{header, HeaderMap, Request, Response, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use paymongo_gateway::paymongo::PayMongoClient;
use paymongo_gateway::webhook::compute_signature;
use paymongo_gateway::{
    router, AppState, Currency, InMemoryStore, PayMongoProvider, ProviderRegistry, Transaction,
    TransactionStore,
};
use rust_decimal::Decimal;
use secrecy::SecretString;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

pub const WEBHOOK_SECRET: &str = "whsk_test_integration";
pub const TOKEN_SECRET: &str = "token-secret";
pub const TIMESTAMP: &str = "1700000000";

pub struct TestApp {
    pub app: Router,
    pub store: Arc<InMemoryStore>,
}

/// Nothing listens on port 9, so any PayMongo API call fails fast.
pub fn test_app() -> TestApp {
    test_app_with_api("http://127.0.0.1:9")
}

pub fn test_app_with_api(api_base: &str) -> TestApp {
    let store = Arc::new(InMemoryStore::new());

    let mut providers = ProviderRegistry::new();
    providers.register(Arc::new(test_provider(api_base)));

    let app = router(AppState {
        store: store.clone(),
        providers,
    });

    TestApp { app, store }
}

pub fn test_provider(api_base: &str) -> PayMongoProvider {
    let client = PayMongoClient::with_base_url("sk_test_integration", api_base).unwrap();
    PayMongoProvider::new(
        client,
        SecretString::new(WEBHOOK_SECRET.to_string()),
        SecretString::new(TOKEN_SECRET.to_string()),
        "https://shop.example",
    )
}

/// Serves `POST /v1/checkout_sessions` on a local port with a canned answer and
/// returns the base URL. Requests without Basic auth or line items get a 400.
pub async fn spawn_paymongo_api(status: StatusCode, response: Value) -> String {
    let app = Router::new().route(
        "/v1/checkout_sessions",
        post(move |headers: HeaderMap, Json(request): Json<Value>| {
            let response = response.clone();
            async move {
                let authorized = headers
                    .get(header::AUTHORIZATION)
                    .and_then(|v| v.to_str().ok())
                    .map_or(false, |v| v.starts_with("Basic "));
                if !authorized || request["data"]["attributes"]["line_items"].as_array().is_none() {
                    return (
                        StatusCode::BAD_REQUEST,
                        Json(json!({"errors": [{"detail": "malformed checkout request"}]})),
                    );
                }
                (status, Json(response))
            }
        }),
    );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    format!("http://{}", addr)
}

pub async fn seed(store: &InMemoryStore, reference: &str, amount: Decimal) -> Transaction {
    let tx = Transaction::new(reference, "paymongo", amount, Currency::php());
    store.insert(&tx).await.unwrap();
    tx
}

pub fn event(kind: &str, reference: &str, livemode: bool) -> Value {
    json!({
        "data": {
            "id": "evt_1",
            "attributes": {
                "type": kind,
                "livemode": livemode,
                "data": {
                    "id": "cs_test_1",
                    "attributes": {
                        "metadata": {"odoo_tx_ref": reference},
                        "reference_number": reference,
                        "payments": [{"attributes": {"amount": 25000, "currency": "PHP"}}]
                    }
                }
            }
        }
    })
}

pub fn signature_header(body: &[u8], livemode: bool) -> String {
    let sig = compute_signature(WEBHOOK_SECRET, TIMESTAMP, body).unwrap();
    if livemode {
        format!("t={},te=,li={}", TIMESTAMP, sig)
    } else {
        format!("t={},te={},li=", TIMESTAMP, sig)
    }
}

pub async fn post_webhook(app: &Router, body: Vec<u8>, signature: Option<String>) -> Response<Body> {
    let mut request = Request::builder()
        .method("POST")
        .uri("/payment/paymongo/webhook")
        .header("content-type", "application/json");
    if let Some(signature) = signature {
        request = request.header("Paymongo-Signature", signature);
    }

    app.clone()
        .oneshot(request.body(Body::from(body)).unwrap())
        .await
        .unwrap()
}

pub async fn body_json(response: Response<Body>) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}
