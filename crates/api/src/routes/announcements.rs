//! Workspace-wide announcements.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use atrium_common::error::AppError;
use atrium_common::types::{EventKind, NotificationPayload, TriggerEvent};

use crate::middleware::auth::AuthUser;
use crate::notify::{Audience, notify_best_effort};
use crate::routes::require_member;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route(
        "/api/workspaces/{workspace_id}/announcements",
        post(create_announcement),
    )
}

#[derive(Debug, Deserialize)]
pub struct AnnouncementRequest {
    pub title: String,
    pub body: String,
    /// Also send by email when email delivery is configured
    #[serde(default)]
    pub email: bool,
}

#[derive(Debug, Serialize)]
pub struct AnnouncementResponse {
    pub event_id: Uuid,
    pub scheduled: usize,
}

/// POST /api/workspaces/:workspace_id/announcements: notify every member.
async fn create_announcement(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(workspace_id): Path<Uuid>,
    Json(req): Json<AnnouncementRequest>,
) -> Result<(StatusCode, Json<AnnouncementResponse>), AppError> {
    if req.title.trim().is_empty() {
        return Err(AppError::Validation("title must not be empty".to_string()));
    }
    require_member(&state.pool, workspace_id, auth.user_id).await?;

    let event = TriggerEvent::new(EventKind::Announcement, workspace_id, Some(auth.user_id));
    let payload = NotificationPayload {
        title: req.title,
        body: req.body,
        link: Some(format!("/workspaces/{}", workspace_id)),
        metadata: serde_json::json!({ "workspace_id": workspace_id }),
    };
    let scheduled = notify_best_effort(
        &state.dispatcher,
        &state.channels(req.email),
        &event,
        Audience::Workspace(workspace_id),
        payload,
    )
    .await;

    Ok((
        StatusCode::ACCEPTED,
        Json(AnnouncementResponse {
            event_id: event.id,
            scheduled,
        }),
    ))
}
