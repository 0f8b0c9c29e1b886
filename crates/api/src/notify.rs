//! Best-effort notification fan-out from request handlers.
//!
//! Notifications are never load-bearing for the action the user asked for:
//! a resolution failure is logged and the handler carries on.

use std::collections::HashSet;
use std::sync::Arc;

use uuid::Uuid;

use atrium_common::types::{MemberId, NotificationPayload, TriggerEvent};
use atrium_engine::{FanOutDispatcher, RecipientSet, ResolveError};
use atrium_notifier::{Notifier, delivery_task};

/// Who an event is addressed to.
#[derive(Debug, Clone)]
pub enum Audience {
    /// Specific memberships (e.g., task assignees)
    Members(HashSet<MemberId>),
    /// Every member of the event's workspace
    Workspace(Uuid),
}

/// Resolve the audience once, drop the actor, and schedule one delivery per
/// recipient per channel. Returns how many deliveries were scheduled.
///
/// Awaits only the recipient lookup; never fails.
pub async fn notify_best_effort(
    dispatcher: &FanOutDispatcher,
    channels: &[Arc<dyn Notifier>],
    event: &TriggerEvent,
    audience: Audience,
    payload: NotificationPayload,
) -> usize {
    let recipients = match resolve(dispatcher, &audience).await {
        Ok(recipients) => recipients,
        Err(e) => {
            tracing::warn!(
                event_id = %event.id,
                event_kind = %event.kind,
                error = %e,
                "Notification fan-out skipped: recipient resolution failed"
            );
            return 0;
        }
    };

    let recipients = match &event.actor {
        Some(actor) => recipients.without(actor),
        None => recipients,
    };

    let payload = Arc::new(payload);
    channels
        .iter()
        .map(|notifier| {
            dispatcher
                .dispatch_to(event, &recipients, |user| {
                    delivery_task(notifier.clone(), event, user, payload.clone())
                })
                .scheduled
        })
        .sum()
}

async fn resolve(
    dispatcher: &FanOutDispatcher,
    audience: &Audience,
) -> Result<RecipientSet, ResolveError> {
    match audience {
        Audience::Members(ids) => dispatcher.resolver().resolve(ids).await,
        Audience::Workspace(workspace_id) => {
            dispatcher.resolver().resolve_workspace(*workspace_id).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::Utc;

    use atrium_common::error::AppError;
    use atrium_common::types::{DeliveryChannel, EventKind, Member, UserId};
    use atrium_engine::{MemberDirectory, RecipientResolver, Scheduler, SchedulerConfig};
    use atrium_notifier::NotifyError;

    struct Directory {
        members: Vec<(MemberId, UserId)>,
        down: bool,
    }

    #[async_trait]
    impl MemberDirectory for Directory {
        fn batch_limit(&self) -> usize {
            2
        }

        async fn find_members(&self, ids: &[MemberId]) -> Result<Vec<Member>, AppError> {
            if self.down {
                return Err(AppError::Internal("statement timeout".to_string()));
            }
            Ok(self
                .members
                .iter()
                .filter(|(m, _)| ids.contains(m))
                .map(|(m, u)| Member {
                    id: *m,
                    workspace_id: Uuid::nil(),
                    user_id: *u,
                    role: "member".to_string(),
                    created_at: Utc::now(),
                })
                .collect())
        }

        async fn workspace_member_ids(
            &self,
            _workspace_id: Uuid,
        ) -> Result<Vec<MemberId>, AppError> {
            if self.down {
                return Err(AppError::Internal("statement timeout".to_string()));
            }
            Ok(self.members.iter().map(|(m, _)| *m).collect())
        }
    }

    struct Recorder {
        channel: DeliveryChannel,
        seen: Mutex<Vec<UserId>>,
    }

    #[async_trait]
    impl Notifier for Recorder {
        fn channel(&self) -> DeliveryChannel {
            self.channel
        }

        async fn deliver(
            &self,
            recipient: UserId,
            _event: &TriggerEvent,
            _payload: &NotificationPayload,
        ) -> Result<(), NotifyError> {
            self.seen.lock().unwrap().push(recipient);
            Ok(())
        }
    }

    fn setup(members: Vec<(MemberId, UserId)>, down: bool) -> FanOutDispatcher {
        FanOutDispatcher::new(
            RecipientResolver::new(Arc::new(Directory { members, down })),
            Scheduler::start(SchedulerConfig::default()),
        )
    }

    fn recorder(channel: DeliveryChannel) -> Arc<Recorder> {
        Arc::new(Recorder {
            channel,
            seen: Mutex::new(Vec::new()),
        })
    }

    fn payload() -> NotificationPayload {
        NotificationPayload {
            title: "Heads up".to_string(),
            body: "Quarterly planning on Friday".to_string(),
            link: None,
            metadata: serde_json::json!({}),
        }
    }

    #[tokio::test]
    async fn test_actor_is_not_notified() {
        let actor = UserId::new();
        let other = UserId::new();
        let members = vec![(MemberId::new(), actor), (MemberId::new(), other)];
        let dispatcher = setup(members, false);
        let in_app = recorder(DeliveryChannel::InApp);
        let channels: Vec<Arc<dyn Notifier>> = vec![in_app.clone()];

        let event = TriggerEvent::new(EventKind::Announcement, Uuid::new_v4(), Some(actor));
        let scheduled = notify_best_effort(
            &dispatcher,
            &channels,
            &event,
            Audience::Workspace(event.workspace_id),
            payload(),
        )
        .await;

        assert_eq!(scheduled, 1);
        dispatcher.scheduler().shutdown().await;
        assert_eq!(*in_app.seen.lock().unwrap(), vec![other]);
    }

    #[tokio::test]
    async fn test_each_channel_gets_each_recipient() {
        let members: Vec<(MemberId, UserId)> =
            (0..3).map(|_| (MemberId::new(), UserId::new())).collect();
        let ids: HashSet<MemberId> = members.iter().map(|(m, _)| *m).collect();
        let dispatcher = setup(members, false);
        let in_app = recorder(DeliveryChannel::InApp);
        let email = recorder(DeliveryChannel::Email);
        let channels: Vec<Arc<dyn Notifier>> = vec![in_app.clone(), email.clone()];

        let event = TriggerEvent::new(EventKind::TaskAssigned, Uuid::new_v4(), None);
        let scheduled =
            notify_best_effort(&dispatcher, &channels, &event, Audience::Members(ids), payload())
                .await;

        assert_eq!(scheduled, 6);
        dispatcher.scheduler().shutdown().await;
        assert_eq!(in_app.seen.lock().unwrap().len(), 3);
        assert_eq!(email.seen.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_resolution_failure_does_not_fail_caller() {
        let members = vec![(MemberId::new(), UserId::new())];
        let ids: HashSet<MemberId> = members.iter().map(|(m, _)| *m).collect();
        let dispatcher = setup(members, true);
        let in_app = recorder(DeliveryChannel::InApp);
        let channels: Vec<Arc<dyn Notifier>> = vec![in_app.clone()];
        let event = TriggerEvent::new(EventKind::TaskAssigned, Uuid::new_v4(), None);

        // Simulated handler: primary result is produced regardless of fan-out.
        let primary = async {
            let scheduled = notify_best_effort(
                &dispatcher,
                &channels,
                &event,
                Audience::Members(ids),
                payload(),
            )
            .await;
            ("assigned", scheduled)
        };
        let (response, scheduled) = tokio::time::timeout(Duration::from_secs(1), primary)
            .await
            .unwrap();

        assert_eq!(response, "assigned");
        assert_eq!(scheduled, 0);
        assert_eq!(dispatcher.scheduler().stats().submitted, 0);
    }
}
