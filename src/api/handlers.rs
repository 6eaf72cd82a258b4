//! HTTP handlers for settings, system info and generation

use axum::{
    extract::{rejection::JsonRejection, State},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{error, info};

use crate::config::ModelConfig;
use crate::engine::DeviceInfo;
use crate::error::{AppError, Result};
use crate::generation::GenerationRequest;
use crate::queue::QueueStats;
use crate::AppState;

/// Settings update payload
#[derive(Debug, Clone, Deserialize)]
pub struct SettingsRequest {
    pub cache_dir: String,
    #[serde(default)]
    pub cpu_offload: bool,
    #[serde(default)]
    pub gpu_device: i64,
    #[serde(default)]
    pub fp8_quantization: bool,
    /// Keeps the current model when omitted
    #[serde(default)]
    pub model_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SettingsResponse {
    pub status: String,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct SystemInfo {
    pub gpus: Vec<DeviceInfo>,
    pub engine: String,
    pub pipeline_loaded: bool,
    pub queue: QueueStats,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GenerateResponse {
    /// PNG as a data URL
    pub image: String,
}

fn json_body<T>(payload: std::result::Result<Json<T>, JsonRejection>) -> Result<T> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| AppError::InvalidRequest(rejection.body_text()))
}

/// POST /settings/model-path
pub async fn update_settings(
    State(state): State<Arc<AppState>>,
    payload: std::result::Result<Json<SettingsRequest>, JsonRejection>,
) -> Result<Json<SettingsResponse>> {
    let request = json_body(payload)?;

    // Invalidation may wait for an in-progress model load
    tokio::task::spawn_blocking(move || apply_settings(&state, request))
        .await
        .map_err(|e| AppError::Internal(format!("Settings update failed: {}", e)))??;

    Ok(Json(SettingsResponse {
        status: "success".to_string(),
        message: "Settings saved. Model will reload on next generation.".to_string(),
    }))
}

fn apply_settings(state: &AppState, request: SettingsRequest) -> Result<()> {
    if !request.cache_dir.is_empty() {
        std::fs::create_dir_all(&request.cache_dir)?;
    }

    let current = state.config_store.snapshot();
    let next = ModelConfig {
        cache_dir: request.cache_dir,
        model_id: request.model_id.unwrap_or_else(|| current.model_id.clone()),
        gpu_device: request.gpu_device,
        cpu_offload: request.cpu_offload,
        fp8_quantization: request.fp8_quantization,
    };
    info!(?next, "Updating model settings");

    state.config_store.replace(next);
    state.pipelines.invalidate();
    Ok(())
}

/// GET /settings
pub async fn get_settings(State(state): State<Arc<AppState>>) -> Json<ModelConfig> {
    Json((*state.config_store.snapshot()).clone())
}

/// GET /system-info
pub async fn system_info(State(state): State<Arc<AppState>>) -> Json<SystemInfo> {
    let engine = state.pipelines.engine();
    Json(SystemInfo {
        gpus: engine.devices(),
        engine: engine.name().to_string(),
        pipeline_loaded: state.pipelines.is_loaded(),
        queue: state.queue.stats(),
    })
}

/// POST /generate
pub async fn generate(
    State(state): State<Arc<AppState>>,
    payload: std::result::Result<Json<GenerationRequest>, JsonRejection>,
) -> Result<Json<GenerateResponse>> {
    let request = json_body(payload)?;

    match state.queue.submit(request).await {
        Ok(result) => Ok(Json(GenerateResponse {
            image: result.data_url(),
        })),
        Err(e) => {
            if !e.is_client_error() {
                error!(error = %e, "Error generating image");
            }
            Err(e)
        }
    }
}

/// GET /health
pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
