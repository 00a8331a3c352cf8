use anyhow::{Context, Result};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post, put};
use axum::Router;
use serde::Deserialize;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

use crate::calibration::{CalibrationMode, CalibrationPoint};
use crate::config::StageProfile;
use crate::context::UpdateError;
use crate::control::{run_tick, Controller, Trigger};
use crate::humidity::HumidityMode;
use crate::light::LightSchedule;
use crate::state::SharedState;

#[derive(Clone)]
pub struct AppState {
    pub controller: Arc<Controller>,
    pub shared: SharedState,
}

// ---------------------------------------------------------------------------
// Routes
// ---------------------------------------------------------------------------

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/status", get(api_status))
        .route("/api/control/run", post(api_run_tick))
        .route("/api/calibration/points", post(api_add_calibration_point))
        .route("/api/calibration/reset", post(api_reset_calibration))
        .route("/api/calibration/mode", put(api_set_calibration_mode))
        .route("/api/stage", put(api_set_stage))
        .route("/api/stages/{name}", put(api_set_stage_profile))
        .route("/api/humidity-mode", put(api_set_humidity_mode))
        .route("/api/light-schedule", put(api_set_light_schedule))
        .with_state(state)
}

#[derive(Deserialize)]
struct StageBody {
    stage: String,
}

#[derive(Deserialize)]
struct HumidityModeBody {
    mode: HumidityMode,
}

#[derive(Deserialize)]
struct CalibrationModeBody {
    mode: CalibrationMode,
}

fn update_error(e: UpdateError) -> Response {
    let status = match e {
        UpdateError::Persist(_) => StatusCode::INTERNAL_SERVER_ERROR,
        _ => StatusCode::UNPROCESSABLE_ENTITY,
    };
    (status, Json(json!({ "error": e.to_string() }))).into_response()
}

fn updated(state: &AppState) -> Response {
    let version = state.controller.context.snapshot().version;
    Json(json!({ "ok": true, "config_version": version })).into_response()
}

async fn api_status(State(state): State<AppState>) -> impl IntoResponse {
    let ctx = state.controller.context.snapshot();
    let st = state.shared.read().await;
    Json(st.to_status(ctx.version, &ctx.config.current_stage))
}

async fn api_run_tick(State(state): State<AppState>) -> impl IntoResponse {
    let report = run_tick(&state.controller, Trigger::OnDemand).await;
    state.shared.write().await.record_tick(report.clone());
    Json(report)
}

async fn api_add_calibration_point(
    State(state): State<AppState>,
    Json(point): Json<CalibrationPoint>,
) -> Response {
    match state.controller.context.add_calibration_point(point).await {
        Ok(progress) => {
            let message = progress.to_string();
            state
                .shared
                .write()
                .await
                .record_system(format!("calibration: {message}"));
            Json(json!({ "progress": progress, "message": message })).into_response()
        }
        Err(e) => update_error(e),
    }
}

async fn api_reset_calibration(State(state): State<AppState>) -> Response {
    match state.controller.context.reset_calibration().await {
        Ok(()) => updated(&state),
        Err(e) => update_error(e),
    }
}

async fn api_set_calibration_mode(
    State(state): State<AppState>,
    Json(body): Json<CalibrationModeBody>,
) -> Response {
    match state.controller.context.set_calibration_mode(body.mode).await {
        Ok(()) => {
            state
                .shared
                .write()
                .await
                .record_system(format!("calibration mode set to {:?}", body.mode));
            updated(&state)
        }
        Err(e) => update_error(e),
    }
}

async fn api_set_stage(State(state): State<AppState>, Json(body): Json<StageBody>) -> Response {
    match state.controller.context.set_stage(&body.stage).await {
        Ok(()) => {
            state
                .shared
                .write()
                .await
                .record_system(format!("stage set to {}", body.stage));
            updated(&state)
        }
        Err(e) => update_error(e),
    }
}

async fn api_set_stage_profile(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(profile): Json<StageProfile>,
) -> Response {
    match state.controller.context.set_stage_profile(&name, profile).await {
        Ok(()) => updated(&state),
        Err(e) => update_error(e),
    }
}

async fn api_set_humidity_mode(
    State(state): State<AppState>,
    Json(body): Json<HumidityModeBody>,
) -> Response {
    match state.controller.context.set_humidity_mode(body.mode).await {
        Ok(()) => updated(&state),
        Err(e) => update_error(e),
    }
}

async fn api_set_light_schedule(
    State(state): State<AppState>,
    Json(schedule): Json<LightSchedule>,
) -> Response {
    match state.controller.context.set_light_schedule(schedule).await {
        Ok(()) => updated(&state),
        Err(e) => update_error(e),
    }
}

// ---------------------------------------------------------------------------
// Server entry-point
// ---------------------------------------------------------------------------

pub async fn serve(state: AppState, port: u16) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind web port {port}"))?;

    info!("web api listening on http://{addr}");

    axum::serve(listener, router(state))
        .await
        .context("web server error")
}

// ===========================================================================
// Tests
// ===========================================================================
