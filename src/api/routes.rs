//! API route definitions.
//!
//! - `/api/v1/health` - liveness and component overview
//! - `/api/v1/extruder/status` - poller status view
//! - `/api/v1/extruder/derived` - latest evaluation
//! - `/api/v1/state/...` - machine state, history, statistics
//! - `/api/v1/events` - SSE event stream
//! - admin-gated: profile/baseline lifecycle, alarm resolution, settings

use axum::routing::{get, post, put};
use axum::Router;

use super::handlers::{self, ApiState};
use super::middleware::{require_admin, RequireRole};

/// Build the full API router.
pub fn api_routes(state: ApiState, admin_token: &str) -> Router {
    let guard = RequireRole {
        admin_token: admin_token.to_string(),
    };

    let admin = Router::new()
        .route("/profiles", post(handlers::create_profile))
        .route("/profiles/:id/baseline/start", post(handlers::start_baseline))
        .route(
            "/profiles/:id/baseline/finalize",
            post(handlers::finalize_baseline),
        )
        .route("/profiles/:id/baseline/reset", post(handlers::reset_baseline))
        .route("/alarms/:id/resolve", post(handlers::resolve_alarm))
        .route(
            "/state/:machine_id/thresholds",
            put(handlers::put_state_thresholds),
        )
        .route("/settings/:key", put(handlers::put_setting))
        .layer(axum::middleware::from_fn_with_state(guard, require_admin));

    Router::new()
        .route("/health", get(handlers::get_health))
        .route("/overview", get(handlers::get_overview))
        .route("/ai/health", get(handlers::get_ai_health))
        .route("/extruder/status", get(handlers::get_extruder_status))
        .route("/extruder/derived", get(handlers::get_extruder_derived))
        .route("/machines", get(handlers::list_machines))
        .route("/machines/:machine_id/sensors", get(handlers::list_sensors))
        .route(
            "/machines/:machine_id/predictions/latest",
            get(handlers::get_latest_prediction),
        )
        .route("/state", get(handlers::get_all_machine_states))
        .route("/state/:machine_id", get(handlers::get_machine_state))
        .route("/state/:machine_id/history", get(handlers::get_state_history))
        .route(
            "/state/:machine_id/statistics",
            get(handlers::get_state_statistics),
        )
        .route("/settings", get(handlers::list_settings))
        .route("/events", get(handlers::sse_events))
        .merge(admin)
        .with_state(state)
}
