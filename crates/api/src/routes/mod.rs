pub mod announcements;
pub mod health;
pub mod notifications;
pub mod tasks;

use axum::Router;
use sqlx::PgPool;
use tower_http::limit::RequestBodyLimitLayer;
use uuid::Uuid;

use atrium_common::error::AppError;
use atrium_common::types::UserId;

use crate::state::AppState;

const MAX_BODY_BYTES: usize = 64 * 1024;

/// Build the complete API router with all routes.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .merge(health::router())
        .merge(tasks::router())
        .merge(announcements::router())
        .merge(notifications::router())
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .with_state(state)
}

/// Reject actors that do not belong to `workspace_id`.
pub(crate) async fn require_member(
    pool: &PgPool,
    workspace_id: Uuid,
    user: UserId,
) -> Result<(), AppError> {
    let is_member: bool = sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM members WHERE workspace_id = $1 AND user_id = $2)",
    )
    .bind(workspace_id)
    .bind(user.0)
    .fetch_one(pool)
    .await?;

    if is_member {
        Ok(())
    } else {
        Err(AppError::Auth(format!(
            "Not a member of workspace {}",
            workspace_id
        )))
    }
}
