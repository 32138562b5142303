//! Control API through the axum router

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use hmac::{Hmac, Mac};
use serde_json::{json, Value};
use sha2::Sha256;
use tower::ServiceExt;
use uuid::Uuid;

use royale_orchestrator::app::AppState;
use royale_orchestrator::config::{Config, MatchConfig};
use royale_orchestrator::http::build_router;
use royale_orchestrator::store::MemoryStore;

const SECRET: &str = "test-jwt-secret";

fn app() -> Router {
    let config = Config {
        server_addr: "127.0.0.1:0".parse().unwrap(),
        log_level: "debug".to_string(),
        supabase: None,
        supabase_jwt_secret: SECRET.to_string(),
        client_origin: "http://localhost:3000".to_string(),
        current_season: "season-1".to_string(),
        default_match: MatchConfig::default(),
    };
    build_router(AppState::with_store(config, Arc::new(MemoryStore::new())))
}

fn token() -> String {
    let exp = chrono::Utc::now().timestamp() + 3600;
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(
        json!({ "sub": Uuid::new_v4(), "exp": exp, "role": "service_role" }).to_string(),
    );
    let mut mac = Hmac::<Sha256>::new_from_slice(SECRET.as_bytes()).unwrap();
    mac.update(format!("{}.{}", header, payload).as_bytes());
    let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());
    format!("{}.{}.{}", header, payload, signature)
}

async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let mut request = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {}", token()));
    let body = match body {
        Some(value) => {
            request = request.header(header::CONTENT_TYPE, "application/json");
            Body::from(value.to_string())
        }
        None => Body::empty(),
    };

    let response = app
        .clone()
        .oneshot(request.body(body).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

#[tokio::test]
async fn health_is_public() {
    let response = app()
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["active_matches"], 0);
}

#[tokio::test]
async fn control_routes_require_a_token() {
    let response = app()
        .oneshot(
            Request::post("/matches")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json!({ "players": [Uuid::new_v4()] }).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app()
        .oneshot(
            Request::get(format!("/matches/{}", Uuid::new_v4()))
                .header(header::AUTHORIZATION, "Bearer not.a.token")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn match_lifecycle_over_http() {
    let app = app();
    let players = [Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4()];

    let (status, created) = call(
        &app,
        "POST",
        "/matches",
        Some(json!({ "players": players, "config": { "initial_loot_count": 3 } })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["status"], "waiting");
    let id = created["id"].as_str().unwrap().to_string();

    let (status, started) = call(&app, "POST", &format!("/matches/{id}/start"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(started["status"], "in_progress");

    let (status, _) = call(&app, "POST", &format!("/matches/{id}/start"), None).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let eliminate = format!("/matches/{id}/players/{}/eliminate", players[2]);
    let (status, body) = call(&app, "POST", &eliminate, Some(json!({ "cause": "disconnect" }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["eliminated"], true);
    let (_, body) = call(&app, "POST", &eliminate, Some(json!({ "cause": "disconnect" }))).await;
    assert_eq!(body["eliminated"], false);

    let (status, details) = call(&app, "GET", &format!("/matches/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(details["players"].as_array().unwrap().len(), 3);
    assert_eq!(details["zones"][0]["zone_number"], 0);

    let (status, ended) = call(
        &app,
        "POST",
        &format!("/matches/{id}/end"),
        Some(json!({ "reason": "cancelled" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ended["settled"], true);
    let placements = ended["settlement"]["placements"].as_array().unwrap();
    assert_eq!(placements.len(), 3);
    assert_eq!(placements[2]["user_id"], json!(players[2]));

    let (status, again) = call(&app, "POST", &format!("/matches/{id}/end"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(again["settled"], false);
}

#[tokio::test]
async fn unknown_match_and_bad_input() {
    let app = app();

    let (status, body) = call(&app, "POST", &format!("/matches/{}/start", Uuid::new_v4()), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap().contains("not found"));

    let (status, _) = call(&app, "POST", "/matches", Some(json!({ "players": [] }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = call(
        &app,
        "POST",
        "/matches",
        Some(json!({
            "players": [Uuid::new_v4()],
            "config": { "min_zone_radius": 5000.0 }
        })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
