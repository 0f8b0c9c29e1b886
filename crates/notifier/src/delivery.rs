use std::sync::Arc;

use async_trait::async_trait;

use atrium_common::types::{DeliveryChannel, NotificationPayload, TriggerEvent, UserId};
use atrium_engine::DeferredTask;

use crate::error::NotifyError;

/// A channel that can deliver one notification to one user.
///
/// Implementations must be `Send + Sync` so they can be shared by every
/// deferred task of a fan-out.
#[async_trait]
pub trait Notifier: Send + Sync {
    fn channel(&self) -> DeliveryChannel;

    async fn deliver(
        &self,
        recipient: UserId,
        event: &TriggerEvent,
        payload: &NotificationPayload,
    ) -> Result<(), NotifyError>;
}

/// Wrap a single delivery as a deferred task named `"{channel}:{event_kind}"`.
///
/// The payload is shared, not cloned, across recipients.
pub fn delivery_task(
    notifier: Arc<dyn Notifier>,
    event: &TriggerEvent,
    recipient: UserId,
    payload: Arc<NotificationPayload>,
) -> DeferredTask {
    let name = format!("{}:{}", notifier.channel(), event.kind);
    let event = event.clone();

    DeferredTask::new(name, move || async move {
        notifier.deliver(recipient, &event, &payload).await?;
        Ok::<(), anyhow::Error>(())
    })
}
