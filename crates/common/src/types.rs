use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier of a membership record (one person inside one workspace).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type,
)]
#[serde(transparent)]
#[sqlx(transparent)]
pub struct MemberId(pub Uuid);

/// Identifier of a user account, the unit notifications are addressed to.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type,
)]
#[serde(transparent)]
#[sqlx(transparent)]
pub struct UserId(pub Uuid);

impl MemberId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl UserId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for MemberId {
    fn default() -> Self {
        Self::new()
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MemberId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Channel a notification is delivered through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum DeliveryChannel {
    InApp,
    Email,
}

impl std::fmt::Display for DeliveryChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeliveryChannel::InApp => write!(f, "in_app"),
            DeliveryChannel::Email => write!(f, "email"),
        }
    }
}

/// Kinds of workspace activity that fan out notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    TaskAssigned,
    ProjectCreated,
    InvoiceIssued,
    DocumentShared,
    MemberJoined,
    Announcement,
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventKind::TaskAssigned => write!(f, "task_assigned"),
            EventKind::ProjectCreated => write!(f, "project_created"),
            EventKind::InvoiceIssued => write!(f, "invoice_issued"),
            EventKind::DocumentShared => write!(f, "document_shared"),
            EventKind::MemberJoined => write!(f, "member_joined"),
            EventKind::Announcement => write!(f, "announcement"),
        }
    }
}

/// A membership record linking a user to a workspace.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Member {
    pub id: MemberId,
    pub workspace_id: Uuid,
    pub user_id: UserId,
    pub role: String,
    pub created_at: DateTime<Utc>,
}

/// The activity that caused a fan-out.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerEvent {
    pub id: Uuid,
    pub kind: EventKind,
    pub workspace_id: Uuid,
    /// User whose request produced the event, if any.
    pub actor: Option<UserId>,
    pub occurred_at: DateTime<Utc>,
}

impl TriggerEvent {
    pub fn new(kind: EventKind, workspace_id: Uuid, actor: Option<UserId>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            workspace_id,
            actor,
            occurred_at: Utc::now(),
        }
    }
}

/// Human-readable notification content. Opaque to the dispatch engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationPayload {
    pub title: String,
    pub body: String,
    /// Deep link into the dashboard (e.g., "/workspaces/{id}/tasks/{id}")
    pub link: Option<String>,
    /// Additional metadata for channel-specific formatting
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// A stored notification, written by a delivery task.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct NotificationRecord {
    pub id: Uuid,
    pub recipient_id: UserId,
    pub channel: DeliveryChannel,
    pub payload: serde_json::Value,
    pub event_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_serialize_as_bare_uuid() {
        let id = Uuid::new_v4();
        let json = serde_json::to_value(MemberId(id)).unwrap();
        assert_eq!(json, serde_json::json!(id.to_string()));

        let parsed: UserId = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, UserId(id));
    }

    #[test]
    fn test_event_kind_display_matches_serde() {
        for kind in [
            EventKind::TaskAssigned,
            EventKind::ProjectCreated,
            EventKind::InvoiceIssued,
            EventKind::DocumentShared,
            EventKind::MemberJoined,
            EventKind::Announcement,
        ] {
            let json = serde_json::to_value(kind).unwrap();
            assert_eq!(json, serde_json::json!(kind.to_string()));
        }
    }

    #[test]
    fn test_delivery_channel_display() {
        assert_eq!(DeliveryChannel::InApp.to_string(), "in_app");
        assert_eq!(DeliveryChannel::Email.to_string(), "email");
    }

    #[test]
    fn test_trigger_event_new_assigns_fresh_id() {
        let ws = Uuid::new_v4();
        let a = TriggerEvent::new(EventKind::Announcement, ws, None);
        let b = TriggerEvent::new(EventKind::Announcement, ws, None);
        assert_ne!(a.id, b.id);
        assert_eq!(a.workspace_id, ws);
    }
}
