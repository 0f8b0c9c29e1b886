//! Inbox listing for the acting user.

use axum::extract::{Query, State};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use atrium_common::error::AppError;

use crate::middleware::auth::AuthUser;
use crate::state::AppState;

const DEFAULT_LIMIT: i64 = 50;
const MAX_LIMIT: i64 = 200;

pub fn router() -> Router<AppState> {
    Router::new().route("/api/notifications", get(list_notifications))
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct NotificationView {
    pub id: Uuid,
    pub channel: String,
    pub payload: serde_json::Value,
}

/// GET /api/notifications: newest notifications addressed to the caller.
async fn list_notifications(
    State(state): State<AppState>,
    auth: AuthUser,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<NotificationView>>, AppError> {
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let rows = state
        .notifications
        .list_for_user(auth.user_id, limit)
        .await
        .map_err(|e| AppError::Internal(e.to_string()))?;

    Ok(Json(
        rows.into_iter()
            .map(|(id, channel, payload)| NotificationView {
                id,
                channel,
                payload,
            })
            .collect(),
    ))
}
