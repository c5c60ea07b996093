//! HTTP surface.
//!
//! A thin wrapper over the library-level service operations; all business
//! logic lives in the domain modules. The platform's full REST CRUD,
//! authentication, and notification transports are external collaborators.

pub mod envelope;
pub mod handlers;
pub mod middleware;
pub mod routes;

pub use handlers::ApiState;

use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Build the application router with CORS and request tracing.
pub fn create_app(state: ApiState, admin_token: &str) -> Router {
    Router::new()
        .nest("/api/v1", routes::api_routes(state, admin_token))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}
