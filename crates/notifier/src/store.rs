//! Persistence used by deliveries: notification records and recipient addresses.

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use atrium_common::types::{NotificationRecord, UserId};

use crate::error::NotifyError;

/// Sink for notification records.
#[async_trait]
pub trait NotificationStore: Send + Sync {
    async fn insert(&self, record: &NotificationRecord) -> Result<(), NotifyError>;
}

/// Lookup of a user's email address.
#[async_trait]
pub trait AddressBook: Send + Sync {
    async fn email_for(&self, user: UserId) -> Result<Option<String>, NotifyError>;
}

/// PostgreSQL implementation of both [`NotificationStore`] and [`AddressBook`].
#[derive(Clone)]
pub struct PgNotificationStore {
    pool: PgPool,
}

impl PgNotificationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Most recent notifications for a user, newest first.
    pub async fn list_for_user(
        &self,
        user: UserId,
        limit: i64,
    ) -> Result<Vec<(Uuid, String, serde_json::Value)>, NotifyError> {
        let rows: Vec<(Uuid, String, serde_json::Value)> = sqlx::query_as(
            r#"
            SELECT id, channel, payload
            FROM notifications
            WHERE recipient_id = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(user.0)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }
}

#[async_trait]
impl NotificationStore for PgNotificationStore {
    async fn insert(&self, record: &NotificationRecord) -> Result<(), NotifyError> {
        sqlx::query(
            r#"
            INSERT INTO notifications (id, recipient_id, channel, payload, event_id, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(record.id)
        .bind(record.recipient_id.0)
        .bind(record.channel.to_string())
        .bind(&record.payload)
        .bind(record.event_id)
        .bind(record.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl AddressBook for PgNotificationStore {
    async fn email_for(&self, user: UserId) -> Result<Option<String>, NotifyError> {
        let row: Option<(Option<String>,)> = sqlx::query_as("SELECT email FROM users WHERE id = $1")
            .bind(user.0)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.and_then(|(email,)| email))
    }
}
