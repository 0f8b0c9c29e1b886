//! Fan-out dispatcher: one deferred delivery per resolved recipient.
//!
//! For a triggering event:
//! 1. Resolve member ids to a [`RecipientSet`] (the only awaited step)
//! 2. Build one [`DeferredTask`] per recipient with the caller's closure
//! 3. Tag it with the event and recipient, then hand it to the [`Scheduler`]
//!
//! The call returns as soon as every task is queued. Delivery outcomes are
//! only visible in logs and [`Scheduler::stats`].

use std::collections::HashSet;

use serde::Serialize;
use uuid::Uuid;

use atrium_common::types::{MemberId, TriggerEvent, UserId};

use crate::error::DispatchError;
use crate::resolver::{RecipientResolver, RecipientSet};
use crate::scheduler::Scheduler;
use crate::task::DeferredTask;

/// What a dispatch call queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DispatchSummary {
    pub event_id: Uuid,
    pub recipients: usize,
    pub scheduled: usize,
}

/// Resolves recipients and schedules their deliveries.
#[derive(Clone)]
pub struct FanOutDispatcher {
    resolver: RecipientResolver,
    scheduler: Scheduler,
}

impl FanOutDispatcher {
    pub fn new(resolver: RecipientResolver, scheduler: Scheduler) -> Self {
        Self {
            resolver,
            scheduler,
        }
    }

    pub fn resolver(&self) -> &RecipientResolver {
        &self.resolver
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Resolve `member_ids` and schedule `build_delivery(user)` for each recipient.
    ///
    /// A resolution failure schedules nothing and is returned to the caller.
    /// Overlapping recipients across separate calls are not deduplicated.
    pub async fn dispatch<F>(
        &self,
        event: &TriggerEvent,
        member_ids: &HashSet<MemberId>,
        build_delivery: F,
    ) -> Result<DispatchSummary, DispatchError>
    where
        F: FnMut(UserId) -> DeferredTask,
    {
        let recipients = self
            .resolver
            .resolve(member_ids)
            .await
            .map_err(|source| DispatchError::Resolution {
                event_id: event.id,
                source,
            })?;

        Ok(self.dispatch_to(event, &recipients, build_delivery))
    }

    /// Schedule deliveries for an already resolved set, in set order.
    pub fn dispatch_to<F>(
        &self,
        event: &TriggerEvent,
        recipients: &RecipientSet,
        mut build_delivery: F,
    ) -> DispatchSummary
    where
        F: FnMut(UserId) -> DeferredTask,
    {
        let mut scheduled = 0;
        for user in recipients.iter() {
            let task = build_delivery(user).for_event(event).for_recipient(user);
            self.scheduler.schedule(task);
            scheduled += 1;
        }

        tracing::info!(
            event_id = %event.id,
            event_kind = %event.kind,
            workspace_id = %event.workspace_id,
            recipients = recipients.len(),
            scheduled,
            "Fan-out scheduled"
        );

        DispatchSummary {
            event_id: event.id,
            recipients: recipients.len(),
            scheduled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::Utc;

    use atrium_common::error::AppError;
    use atrium_common::types::{EventKind, Member};

    use crate::resolver::MemberDirectory;
    use crate::scheduler::SchedulerConfig;

    struct StaticDirectory {
        members: Vec<(MemberId, UserId)>,
        fail: bool,
    }

    #[async_trait]
    impl MemberDirectory for StaticDirectory {
        fn batch_limit(&self) -> usize {
            50
        }

        async fn find_members(&self, ids: &[MemberId]) -> Result<Vec<Member>, AppError> {
            if self.fail {
                return Err(AppError::Internal("lookup timed out".to_string()));
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
            Ok(self.members.iter().map(|(m, _)| *m).collect())
        }
    }

    fn dispatcher(members: Vec<(MemberId, UserId)>, fail: bool) -> FanOutDispatcher {
        let resolver = RecipientResolver::new(Arc::new(StaticDirectory { members, fail }));
        FanOutDispatcher::new(resolver, Scheduler::start(SchedulerConfig::default()))
    }

    fn event() -> TriggerEvent {
        TriggerEvent::new(EventKind::TaskAssigned, Uuid::new_v4(), None)
    }

    async fn wait_finished(scheduler: &Scheduler, n: u64) {
        for _ in 0..200 {
            if scheduler.stats().finished() >= n {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("tasks did not finish: {:?}", scheduler.stats());
    }

    #[tokio::test]
    async fn test_one_task_per_distinct_recipient() {
        let shared = UserId::new();
        let other = UserId::new();
        let members = vec![
            (MemberId::new(), shared),
            (MemberId::new(), shared),
            (MemberId::new(), other),
        ];
        let ids: HashSet<MemberId> = members.iter().map(|(m, _)| *m).collect();
        let dispatcher = dispatcher(members, false);

        let delivered = Arc::new(Mutex::new(Vec::new()));
        let sink = delivered.clone();
        let summary = dispatcher
            .dispatch(&event(), &ids, |user| {
                let sink = sink.clone();
                DeferredTask::new("record", move || async move {
                    sink.lock().unwrap().push(user);
                    Ok(())
                })
            })
            .await
            .unwrap();

        assert_eq!(summary.recipients, 2);
        assert_eq!(summary.scheduled, 2);

        wait_finished(dispatcher.scheduler(), 2).await;
        let mut got = delivered.lock().unwrap().clone();
        got.sort();
        let mut expected = vec![shared, other];
        expected.sort();
        assert_eq!(got, expected);
    }

    #[tokio::test]
    async fn test_resolution_failure_schedules_nothing() {
        let members = vec![(MemberId::new(), UserId::new())];
        let ids: HashSet<MemberId> = members.iter().map(|(m, _)| *m).collect();
        let dispatcher = dispatcher(members, true);
        let ev = event();

        let mut built = 0;
        let err = dispatcher
            .dispatch(&ev, &ids, |_| {
                built += 1;
                DeferredTask::new("never", || async { Ok(()) })
            })
            .await
            .unwrap_err();

        let DispatchError::Resolution { event_id, .. } = err;
        assert_eq!(event_id, ev.id);
        assert_eq!(built, 0);
        assert_eq!(dispatcher.scheduler().stats().submitted, 0);
    }

    #[tokio::test]
    async fn test_tasks_are_tagged_with_event_and_recipient() {
        let dispatcher = dispatcher(Vec::new(), false);
        let ev = event();
        let user = UserId::new();
        let recipients: RecipientSet = [user].into_iter().collect();

        let labels = Arc::new(Mutex::new(Vec::new()));
        let seen = labels.clone();
        dispatcher.dispatch_to(&ev, &recipients, |u| {
            let task = DeferredTask::new("tagged", || async { Ok(()) });
            seen.lock().unwrap().push((u, task.label().event_id));
            task
        });

        // Tags are applied after the closure returns; the closure sees a bare task.
        assert_eq!(*labels.lock().unwrap(), vec![(user, None)]);
        assert_eq!(dispatcher.scheduler().stats().submitted, 1);
    }

    #[tokio::test]
    async fn test_empty_member_set_schedules_nothing() {
        let dispatcher = dispatcher(vec![(MemberId::new(), UserId::new())], true);
        let summary = dispatcher
            .dispatch(&event(), &HashSet::new(), |_| {
                DeferredTask::new("never", || async { Ok(()) })
            })
            .await
            .unwrap();

        // The failing store is never consulted for an empty set.
        assert_eq!(summary.recipients, 0);
        assert_eq!(summary.scheduled, 0);
    }

    #[tokio::test]
    async fn test_overlapping_events_are_not_deduplicated() {
        let user = UserId::new();
        let member = MemberId::new();
        let ids: HashSet<MemberId> = [member].into_iter().collect();
        let dispatcher = dispatcher(vec![(member, user)], false);

        for _ in 0..2 {
            dispatcher
                .dispatch(&event(), &ids, |_| {
                    DeferredTask::new("repeat", || async { Ok(()) })
                })
                .await
                .unwrap();
        }

        wait_finished(dispatcher.scheduler(), 2).await;
        assert_eq!(dispatcher.scheduler().stats().completed, 2);
    }
}
