//! Task assignment routes.

use std::collections::HashSet;

use axum::extract::{Path, State};
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use atrium_common::error::AppError;
use atrium_common::types::{EventKind, MemberId, NotificationPayload, TriggerEvent};

use crate::middleware::auth::AuthUser;
use crate::notify::{Audience, notify_best_effort};
use crate::routes::require_member;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route(
        "/api/workspaces/{workspace_id}/tasks/{task_id}/assignees",
        post(assign_members),
    )
}

#[derive(Debug, Deserialize)]
pub struct AssignRequest {
    pub member_ids: Vec<MemberId>,
}

#[derive(Debug, Serialize)]
pub struct AssignResponse {
    pub task_id: Uuid,
    /// Memberships newly assigned by this request
    pub assigned: Vec<MemberId>,
    pub notifications_scheduled: usize,
}

/// POST /api/workspaces/:workspace_id/tasks/:task_id/assignees
///
/// Ids that are already assigned or belong to another workspace are ignored.
async fn assign_members(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((workspace_id, task_id)): Path<(Uuid, Uuid)>,
    Json(req): Json<AssignRequest>,
) -> Result<Json<AssignResponse>, AppError> {
    if req.member_ids.is_empty() {
        return Err(AppError::Validation("member_ids must not be empty".to_string()));
    }
    require_member(&state.pool, workspace_id, auth.user_id).await?;

    let title: String =
        sqlx::query_scalar("SELECT title FROM tasks WHERE id = $1 AND workspace_id = $2")
            .bind(task_id)
            .bind(workspace_id)
            .fetch_optional(&state.pool)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Task {} not found", task_id)))?;

    let requested: Vec<Uuid> = req.member_ids.iter().map(|id| id.0).collect();
    let assigned: Vec<MemberId> = sqlx::query_scalar(
        r#"
        INSERT INTO task_assignments (task_id, member_id, assigned_by)
        SELECT $1, m.id, $3
        FROM members m
        WHERE m.id = ANY($2) AND m.workspace_id = $4
        ON CONFLICT (task_id, member_id) DO NOTHING
        RETURNING member_id
        "#,
    )
    .bind(task_id)
    .bind(&requested)
    .bind(auth.user_id.0)
    .bind(workspace_id)
    .fetch_all(&state.pool)
    .await?;

    tracing::info!(
        task_id = %task_id,
        requested = requested.len(),
        assigned = assigned.len(),
        "Task assignees added"
    );

    let event = TriggerEvent::new(EventKind::TaskAssigned, workspace_id, Some(auth.user_id));
    let payload = NotificationPayload {
        title: format!("You were assigned: {}", title),
        body: format!("You have been assigned to the task \"{}\".", title),
        link: Some(format!("/workspaces/{}/tasks/{}", workspace_id, task_id)),
        metadata: serde_json::json!({ "task_id": task_id }),
    };
    let audience = Audience::Members(assigned.iter().copied().collect::<HashSet<_>>());
    let notifications_scheduled = notify_best_effort(
        &state.dispatcher,
        &state.channels(true),
        &event,
        audience,
        payload,
    )
    .await;

    Ok(Json(AssignResponse {
        task_id,
        assigned,
        notifications_scheduled,
    }))
}
