//! In-app notifications: one record per recipient in the dashboard inbox.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use atrium_common::types::{
    DeliveryChannel, NotificationPayload, NotificationRecord, TriggerEvent, UserId,
};

use crate::delivery::Notifier;
use crate::error::NotifyError;
use crate::store::NotificationStore;

pub struct InAppNotifier {
    store: Arc<dyn NotificationStore>,
}

impl InAppNotifier {
    pub fn new(store: Arc<dyn NotificationStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Notifier for InAppNotifier {
    fn channel(&self) -> DeliveryChannel {
        DeliveryChannel::InApp
    }

    async fn deliver(
        &self,
        recipient: UserId,
        event: &TriggerEvent,
        payload: &NotificationPayload,
    ) -> Result<(), NotifyError> {
        let record = NotificationRecord {
            id: Uuid::new_v4(),
            recipient_id: recipient,
            channel: DeliveryChannel::InApp,
            payload: serde_json::to_value(payload)?,
            event_id: Some(event.id),
            created_at: Utc::now(),
        };
        self.store.insert(&record).await?;

        tracing::debug!(
            notification_id = %record.id,
            recipient = %recipient,
            event_id = %event.id,
            "In-app notification created"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use atrium_common::types::EventKind;

    #[derive(Default)]
    struct MemoryStore {
        records: Mutex<Vec<NotificationRecord>>,
    }

    #[async_trait]
    impl NotificationStore for MemoryStore {
        async fn insert(&self, record: &NotificationRecord) -> Result<(), NotifyError> {
            self.records.lock().unwrap().push(record.clone());
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_deliver_writes_one_record() {
        let store = Arc::new(MemoryStore::default());
        let notifier = InAppNotifier::new(store.clone());
        let event = TriggerEvent::new(EventKind::DocumentShared, Uuid::new_v4(), None);
        let user = UserId::new();
        let payload = NotificationPayload {
            title: "Document shared".to_string(),
            body: "Offer letter.pdf was shared with you".to_string(),
            link: Some("/documents/42".to_string()),
            metadata: serde_json::json!({"document_id": 42}),
        };

        notifier.deliver(user, &event, &payload).await.unwrap();

        let records = store.records.lock().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].recipient_id, user);
        assert_eq!(records[0].channel, DeliveryChannel::InApp);
        assert_eq!(records[0].event_id, Some(event.id));
        assert_eq!(records[0].payload["title"], "Document shared");
        assert_eq!(records[0].payload["metadata"]["document_id"], 42);
    }
}
