//! API middleware layers.
//!
//! Full authentication and user management are platform collaborators; the
//! core only guards its mutating routes with a shared-secret admin role.

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;

use super::envelope::ApiErrorResponse;

/// Role guard configuration for a route group.
#[derive(Clone)]
pub struct RequireRole {
    /// Shared secret expected in `X-Admin-Token`; empty disables the guard
    /// (development mode).
    pub admin_token: String,
}

/// Axum middleware enforcing the admin role on mutating routes.
pub async fn require_admin(
    State(guard): State<RequireRole>,
    request: Request,
    next: Next,
) -> Response {
    if guard.admin_token.is_empty() {
        return next.run(request).await;
    }

    let presented = request
        .headers()
        .get("x-admin-token")
        .and_then(|v| v.to_str().ok());
    if presented == Some(guard.admin_token.as_str()) {
        next.run(request).await
    } else {
        ApiErrorResponse::forbidden("admin role required")
    }
}
