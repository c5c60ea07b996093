//! API handlers wrapping the core service operations.

use axum::extract::{Path, Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::Response;
use axum::Json;
use chrono::{Duration, Utc};
use futures::Stream;
use serde::Deserialize;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::ai::AiClient;
use crate::events::EventBus;
use crate::historian::ExtruderPoller;
use crate::pipeline::TickProcessor;
use crate::profiles::ProfileError;
use crate::storage::Store;

use super::envelope::{ApiErrorResponse, ApiResponse};

/// Shared state for all API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub store: Store,
    pub poller: Arc<ExtruderPoller>,
    pub processor: Arc<TickProcessor>,
    pub events: EventBus,
    pub ai: Option<AiClient>,
}

// ============================================================================
// Health and status
// ============================================================================

/// GET /health - liveness plus a coarse component overview.
pub async fn get_health(State(state): State<ApiState>) -> Response {
    let poller = state.poller.status();
    ApiResponse::ok(serde_json::json!({
        "status": "ok",
        "poller_running": poller.running,
        "poller_effective_enabled": poller.effective_enabled,
        "ai_configured": state.ai.is_some(),
    }))
}

/// GET /extruder/status - the poller's read-only status view.
pub async fn get_extruder_status(State(state): State<ApiState>) -> Response {
    ApiResponse::ok(state.poller.status())
}

/// GET /extruder/derived - the latest evaluation result.
pub async fn get_extruder_derived(State(state): State<ApiState>) -> Response {
    match state.processor.latest_evaluation().await {
        Some(evaluation) => ApiResponse::ok(evaluation),
        None => ApiResponse::ok(serde_json::json!({
            "evaluation_enabled": false,
            "message": "No evaluation yet - waiting for historian data",
        })),
    }
}

/// GET /ai/health - probe the anomaly-inference service.
pub async fn get_ai_health(State(state): State<ApiState>) -> Response {
    match &state.ai {
        Some(ai) => ApiResponse::ok(serde_json::json!({
            "configured": true,
            "base_url": ai.base_url(),
            "healthy": ai.health().await,
        })),
        None => ApiResponse::ok(serde_json::json!({
            "configured": false,
            "healthy": false,
        })),
    }
}

/// GET /overview - platform counters for the dashboard header.
pub async fn get_overview(State(state): State<ApiState>) -> Response {
    let machines = match state.store.list_machines().await {
        Ok(machines) => machines,
        Err(e) => return ApiErrorResponse::internal(e.to_string()),
    };
    let active_alarms = match state.store.count_active_alarms().await {
        Ok(n) => n,
        Err(e) => return ApiErrorResponse::internal(e.to_string()),
    };
    ApiResponse::ok(serde_json::json!({
        "machines": { "total": machines.len() },
        "alarms": { "active": active_alarms },
    }))
}

/// GET /machines
pub async fn list_machines(State(state): State<ApiState>) -> Response {
    match state.store.list_machines().await {
        Ok(machines) => ApiResponse::ok(machines),
        Err(e) => ApiErrorResponse::internal(e.to_string()),
    }
}

/// GET /machines/:id/sensors
pub async fn list_sensors(
    State(state): State<ApiState>,
    Path(machine_id): Path<Uuid>,
) -> Response {
    match state.store.list_sensors(machine_id).await {
        Ok(sensors) => ApiResponse::ok(sensors),
        Err(e) => ApiErrorResponse::internal(e.to_string()),
    }
}

/// GET /machines/:id/predictions/latest
pub async fn get_latest_prediction(
    State(state): State<ApiState>,
    Path(machine_id): Path<Uuid>,
) -> Response {
    match state.store.latest_prediction(machine_id).await {
        Ok(Some(prediction)) => ApiResponse::ok(prediction),
        Ok(None) => ApiErrorResponse::not_found("no predictions for machine"),
        Err(e) => ApiErrorResponse::internal(e.to_string()),
    }
}

// ============================================================================
// Machine state
// ============================================================================

/// GET /state - current states of all registered machines.
pub async fn get_all_machine_states(State(state): State<ApiState>) -> Response {
    let states = state
        .processor
        .registry()
        .all_states(Utc::now())
        .await
        .into_iter()
        .map(|(machine_id, info)| serde_json::json!({ "machine_id": machine_id, "state": info }))
        .collect::<Vec<_>>();
    ApiResponse::ok(states)
}

/// GET /state/:machine_id - current detector state.
pub async fn get_machine_state(
    State(state): State<ApiState>,
    Path(machine_id): Path<Uuid>,
) -> Response {
    match state
        .processor
        .registry()
        .current_state(machine_id, Utc::now())
        .await
    {
        Some(info) => ApiResponse::ok(info),
        None => ApiErrorResponse::not_found("no state detector for machine"),
    }
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    #[serde(default = "default_history_limit")]
    pub limit: i64,
}

fn default_history_limit() -> i64 {
    100
}

/// GET /state/:machine_id/history - recent transitions, newest first.
pub async fn get_state_history(
    State(state): State<ApiState>,
    Path(machine_id): Path<Uuid>,
    Query(query): Query<HistoryQuery>,
) -> Response {
    match state
        .store
        .state_history(machine_id, None, None, query.limit.clamp(1, 1000))
        .await
    {
        Ok(history) => ApiResponse::ok(history),
        Err(e) => ApiErrorResponse::internal(e.to_string()),
    }
}

#[derive(Debug, Deserialize)]
pub struct StatisticsQuery {
    /// Lookback period in hours.
    #[serde(default = "default_statistics_hours")]
    pub hours: i64,
}

fn default_statistics_hours() -> i64 {
    24
}

/// GET /state/:machine_id/statistics - time-in-state over a period.
pub async fn get_state_statistics(
    State(state): State<ApiState>,
    Path(machine_id): Path<Uuid>,
    Query(query): Query<StatisticsQuery>,
) -> Response {
    let end = Utc::now();
    let start = end - Duration::hours(query.hours.clamp(1, 24 * 90));
    match state.store.state_statistics(machine_id, start, end).await {
        Ok(stats) => ApiResponse::ok(stats),
        Err(e) => ApiErrorResponse::internal(e.to_string()),
    }
}

/// PUT /state/:machine_id/thresholds (admin) - replace the machine's
/// detection thresholds and drop its detector so the next tick rebuilds it.
pub async fn put_state_thresholds(
    State(state): State<ApiState>,
    Path(machine_id): Path<Uuid>,
    Json(thresholds): Json<crate::types::StateThresholds>,
) -> Response {
    match state.store.put_state_thresholds(machine_id, &thresholds).await {
        Ok(()) => {
            state.processor.registry().remove(machine_id);
            ApiResponse::ok(thresholds)
        }
        Err(e) => ApiErrorResponse::internal(e.to_string()),
    }
}

// ============================================================================
// Profiles and baseline lifecycle
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct CreateProfileRequest {
    pub machine_id: Option<Uuid>,
    pub material_id: String,
}

/// POST /profiles - create an active profile (admin).
pub async fn create_profile(
    State(state): State<ApiState>,
    Json(req): Json<CreateProfileRequest>,
) -> Response {
    match state
        .store
        .create_profile(req.machine_id, &req.material_id)
        .await
    {
        Ok(profile) => ApiResponse::ok(profile),
        Err(e) => profile_error_response(e),
    }
}

/// POST /profiles/:id/baseline/start (admin)
pub async fn start_baseline(
    State(state): State<ApiState>,
    Path(profile_id): Path<Uuid>,
) -> Response {
    match state.store.start_baseline_learning(profile_id).await {
        Ok(()) => ApiResponse::ok(serde_json::json!({"baseline_learning": true})),
        Err(e) => profile_error_response(e),
    }
}

/// POST /profiles/:id/baseline/finalize (admin)
pub async fn finalize_baseline(
    State(state): State<ApiState>,
    Path(profile_id): Path<Uuid>,
) -> Response {
    match state.store.finalize_baseline(profile_id).await {
        Ok(()) => ApiResponse::ok(serde_json::json!({"baseline_ready": true})),
        Err(e) => profile_error_response(e),
    }
}

/// POST /profiles/:id/baseline/reset (admin)
pub async fn reset_baseline(
    State(state): State<ApiState>,
    Path(profile_id): Path<Uuid>,
) -> Response {
    match state.store.reset_baseline(profile_id, true).await {
        Ok(()) => ApiResponse::ok(serde_json::json!({
            "baseline_learning": false,
            "baseline_ready": false,
        })),
        Err(e) => profile_error_response(e),
    }
}

fn profile_error_response(e: ProfileError) -> Response {
    match e {
        ProfileError::NotFound(_) => ApiErrorResponse::not_found(e.to_string()),
        ProfileError::AlreadyLearning(_)
        | ProfileError::NotLearning(_)
        | ProfileError::DuplicateActiveProfile => ApiErrorResponse::conflict(e.to_string()),
        ProfileError::NoSamples(_) | ProfileError::InsufficientSamples { .. } => {
            ApiErrorResponse::bad_request(e.to_string())
        }
        ProfileError::Storage(_) => ApiErrorResponse::internal(e.to_string()),
    }
}

// ============================================================================
// Alarms
// ============================================================================

#[derive(Debug, Deserialize, Default)]
pub struct ResolveAlarmRequest {
    pub notes: Option<String>,
}

/// POST /alarms/:id/resolve (admin)
pub async fn resolve_alarm(
    State(state): State<ApiState>,
    Path(alarm_id): Path<Uuid>,
    Json(req): Json<ResolveAlarmRequest>,
) -> Response {
    match state.store.resolve_alarm(alarm_id, req.notes.as_deref()).await {
        Ok(Some(alarm)) => ApiResponse::ok(alarm),
        Ok(None) => ApiErrorResponse::not_found("alarm not found"),
        Err(e) => ApiErrorResponse::internal(e.to_string()),
    }
}

// ============================================================================
// Settings
// ============================================================================

/// GET /settings
pub async fn list_settings(State(state): State<ApiState>) -> Response {
    match state.store.list_settings().await {
        Ok(settings) => ApiResponse::ok(settings),
        Err(e) => ApiErrorResponse::internal(e.to_string()),
    }
}

#[derive(Debug, Deserialize)]
pub struct PutSettingRequest {
    pub value_type: String,
    pub value: String,
}

/// PUT /settings/:key (admin) - the poller picks changes up within 30 s.
pub async fn put_setting(
    State(state): State<ApiState>,
    Path(key): Path<String>,
    Json(req): Json<PutSettingRequest>,
) -> Response {
    if !matches!(req.value_type.as_str(), "string" | "json" | "int" | "bool") {
        return ApiErrorResponse::bad_request("value_type must be string|json|int|bool");
    }
    if req.value_type == "json" && serde_json::from_str::<serde_json::Value>(&req.value).is_err() {
        return ApiErrorResponse::bad_request("value is not valid JSON");
    }
    match state
        .store
        .put_setting(&key, &req.value_type, &req.value)
        .await
    {
        Ok(()) => ApiResponse::ok(serde_json::json!({"key": key})),
        Err(e) => ApiErrorResponse::internal(e.to_string()),
    }
}

// ============================================================================
// Event stream
// ============================================================================

/// GET /events - SSE drain of the broadcast bus.
pub async fn sse_events(
    State(state): State<ApiState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.events.subscribe();
    let stream = futures::stream::unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    let payload = serde_json::to_string(&event).unwrap_or_default();
                    let sse = Event::default().event(event.event_type).data(payload);
                    return Some((Ok::<_, Infallible>(sse), rx));
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "SSE subscriber lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}
