//! Functional tests for the HTTP API

use axum::{
    body::Body,
    http::{header::CONTENT_TYPE, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;
use zimage_server::{
    api::create_router,
    config::{Settings, DEFAULT_MODEL_ID},
    engine::SyntheticEngine,
    generation::encoding,
    AppState,
};

fn test_settings(dir: &TempDir) -> Settings {
    let mut settings = Settings::default();
    settings.storage.config_file = dir.path().join("config.json");
    settings.storage.output_dir = dir.path().join("output");
    settings
}

fn create_test_app(dir: &TempDir, engine: SyntheticEngine) -> (Router, Arc<AppState>) {
    let state = Arc::new(AppState::new(test_settings(dir), Arc::new(engine)));
    (create_router(state.clone()), state)
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn output_files(dir: &TempDir) -> Vec<std::path::PathBuf> {
    match std::fs::read_dir(dir.path().join("output")) {
        Ok(entries) => entries.map(|e| e.unwrap().path()).collect(),
        Err(_) => Vec::new(),
    }
}

fn decode_image(body: &Value) -> image::DynamicImage {
    let data_url = body["image"].as_str().unwrap();
    assert!(data_url.starts_with("data:image/png;base64,"));
    let png = encoding::decode(data_url).unwrap();
    image::load_from_memory(&png).unwrap()
}

#[tokio::test]
async fn test_health() {
    let dir = tempfile::tempdir().unwrap();
    let (app, _) = create_test_app(&dir, SyntheticEngine::new());

    let (status, body) = send(&app, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"status": "ok"}));
}

#[tokio::test]
async fn test_settings_defaults_without_config_file() {
    let dir = tempfile::tempdir().unwrap();
    let (app, _) = create_test_app(&dir, SyntheticEngine::new());

    let (status, body) = send(&app, get("/settings")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({
            "cache_dir": "",
            "model_id": DEFAULT_MODEL_ID,
            "gpu_device": 1,
            "cpu_offload": true,
            "fp8_quantization": true
        })
    );
}

#[tokio::test]
async fn test_settings_update_then_read() {
    let dir = tempfile::tempdir().unwrap();
    let (app, _) = create_test_app(&dir, SyntheticEngine::new());
    let cache_dir = dir.path().join("models").to_string_lossy().to_string();

    let (status, body) = send(
        &app,
        post_json("/settings/model-path", &json!({"cache_dir": cache_dir, "gpu_device": 2})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "success");
    assert!(dir.path().join("models").is_dir());

    let (_, body) = send(&app, get("/settings")).await;
    assert_eq!(
        body,
        json!({
            "cache_dir": cache_dir,
            "model_id": DEFAULT_MODEL_ID,
            "gpu_device": 2,
            "cpu_offload": false,
            "fp8_quantization": false
        })
    );

    // Persisted for the next process start
    let on_disk: Value =
        serde_json::from_str(&std::fs::read_to_string(dir.path().join("config.json")).unwrap())
            .unwrap();
    assert_eq!(on_disk["gpu_device"], 2);
}

#[tokio::test]
async fn test_settings_update_invalidates_pipeline() {
    let dir = tempfile::tempdir().unwrap();
    let (app, state) = create_test_app(&dir, SyntheticEngine::new());
    let request = json!({"prompt": "a red cube", "height": 32, "width": 32, "steps": 1, "seed": 1});

    let (status, _) = send(&app, post_json("/generate", &request)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(state.pipelines.constructions(), 1);

    let (status, _) = send(&app, post_json("/generate", &request)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(state.pipelines.constructions(), 1);

    let settings = json!({"cache_dir": ""});
    send(&app, post_json("/settings/model-path", &settings)).await;
    assert!(!state.pipelines.is_loaded());
    assert_eq!(state.pipelines.constructions(), 1);

    // Resubmitting identical values is still an update
    send(&app, post_json("/settings/model-path", &settings)).await;
    let (status, _) = send(&app, post_json("/generate", &request)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(state.pipelines.constructions(), 2);
}

#[tokio::test]
async fn test_generate_end_to_end_on_cpu() {
    let dir = tempfile::tempdir().unwrap();
    let (app, _) = create_test_app(&dir, SyntheticEngine::new());
    let request = json!({
        "prompt": "a red cube",
        "height": 512,
        "width": 512,
        "steps": 4,
        "guidance_scale": 0.0,
        "seed": 42
    });

    let (status, first) = send(&app, post_json("/generate", &request)).await;
    assert_eq!(status, StatusCode::OK);
    let first_image = decode_image(&first);
    assert_eq!((first_image.width(), first_image.height()), (512, 512));

    let files = output_files(&dir);
    assert_eq!(files.len(), 1);
    let name = files[0].file_name().unwrap().to_str().unwrap();
    assert!(name.ends_with(".png"));
    // {YYYYmmdd}_{HHMMSS}_{8 hex}.png
    assert_eq!(name.len(), "20240101_000000_abcdef01.png".len());

    let (status, second) = send(&app, post_json("/generate", &request)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first_image.as_bytes(), decode_image(&second).as_bytes());
    assert_eq!(output_files(&dir).len(), 2);
}

#[tokio::test]
async fn test_generate_rejects_bad_dimensions() {
    let dir = tempfile::tempdir().unwrap();
    let (app, state) = create_test_app(&dir, SyntheticEngine::new());

    let (status, body) = send(
        &app,
        post_json("/generate", &json!({"prompt": "a red cube", "height": 100, "width": 512})),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["detail"].as_str().unwrap().contains("divisible by 16"));
    assert_eq!(body["error"]["type"], "invalid_request_error");
    assert!(output_files(&dir).is_empty());
    assert_eq!(state.pipelines.constructions(), 0);
}

#[tokio::test]
async fn test_generate_rejects_oversized_dimensions() {
    let dir = tempfile::tempdir().unwrap();
    let (app, state) = create_test_app(&dir, SyntheticEngine::new());

    let (status, body) = send(
        &app,
        post_json(
            "/generate",
            &json!({"prompt": "a red cube", "height": 1048576, "width": 1048576, "steps": 1}),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["detail"].as_str().unwrap().contains("at most 2048"));
    assert!(output_files(&dir).is_empty());
    assert_eq!(state.pipelines.constructions(), 0);

    // The server keeps serving afterwards
    let (status, _) = send(&app, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_generate_rejects_malformed_body() {
    let dir = tempfile::tempdir().unwrap();
    let (app, _) = create_test_app(&dir, SyntheticEngine::new());

    let (status, body) = send(&app, post_json("/generate", &json!({"height": 512}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["detail"].as_str().unwrap().contains("prompt"));
}

#[tokio::test]
async fn test_construction_failure_is_server_error_and_retryable() {
    let dir = tempfile::tempdir().unwrap();
    let (app, state) = create_test_app(&dir, SyntheticEngine::new());
    let request = json!({"prompt": "a red cube", "height": 16, "width": 16, "steps": 1});

    // The synthetic engine refuses an empty model id
    let mut broken = (*state.config_store.snapshot()).clone();
    broken.model_id = String::new();
    state.config_store.replace(broken);

    let (status, body) = send(&app, post_json("/generate", &request)).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"]["code"], "pipeline_unavailable");
    assert!(!state.pipelines.is_loaded());

    send(
        &app,
        post_json(
            "/settings/model-path",
            &json!({"cache_dir": "", "model_id": DEFAULT_MODEL_ID}),
        ),
    )
    .await;
    let (status, _) = send(&app, post_json("/generate", &request)).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_out_of_range_gpu_falls_back_and_persists() {
    let dir = tempfile::tempdir().unwrap();
    let engine = SyntheticEngine::new().with_accelerators(vec!["Sim GPU".to_string()]);
    let (app, _) = create_test_app(&dir, engine);

    // Defaults ask for device 1 but only device 0 exists
    let (status, _) = send(
        &app,
        post_json(
            "/generate",
            &json!({"prompt": "a red cube", "height": 16, "width": 16, "steps": 1}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = send(&app, get("/settings")).await;
    assert_eq!(body["gpu_device"], 0);
}

#[tokio::test]
async fn test_system_info_lists_devices() {
    let dir = tempfile::tempdir().unwrap();
    let engine = SyntheticEngine::new()
        .with_accelerators(vec!["Sim GPU A".to_string(), "Sim GPU B".to_string()]);
    let (app, _) = create_test_app(&dir, engine);

    let (status, body) = send(&app, get("/system-info")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body["gpus"],
        json!([{"id": 0, "name": "Sim GPU A"}, {"id": 1, "name": "Sim GPU B"}])
    );
    assert_eq!(body["pipeline_loaded"], false);
    assert_eq!(body["queue"]["pending"], 0);
    assert_eq!(body["queue"]["skipped"], 0);
}
