//! The unit of deferred work.

use std::future::Future;

use futures::FutureExt;
use futures::future::BoxFuture;
use uuid::Uuid;

use atrium_common::types::{EventKind, TriggerEvent, UserId};

type Work = Box<dyn FnOnce() -> BoxFuture<'static, anyhow::Result<()>> + Send>;

/// A named, zero-argument side effect.
///
/// The closure is not called until the scheduler runs the task, so building a
/// task never performs I/O. Once handed to [`Scheduler::schedule`] the task is
/// owned by the scheduler and its outcome is only visible in logs and stats.
///
/// [`Scheduler::schedule`]: crate::scheduler::Scheduler::schedule
pub struct DeferredTask {
    label: TaskLabel,
    work: Work,
}

/// Identity of a task, carried into every log line about it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskLabel {
    pub id: Uuid,
    pub name: String,
    pub event_id: Option<Uuid>,
    pub event_kind: Option<EventKind>,
    pub recipient: Option<UserId>,
}

impl DeferredTask {
    pub fn new<F, Fut>(name: impl Into<String>, work: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self {
            label: TaskLabel {
                id: Uuid::new_v4(),
                name: name.into(),
                event_id: None,
                event_kind: None,
                recipient: None,
            },
            work: Box::new(move || work().boxed()),
        }
    }

    /// Tag the task with the event that caused it.
    pub fn for_event(mut self, event: &TriggerEvent) -> Self {
        self.label.event_id = Some(event.id);
        self.label.event_kind = Some(event.kind);
        self
    }

    /// Tag the task with the user it delivers to.
    pub fn for_recipient(mut self, recipient: UserId) -> Self {
        self.label.recipient = Some(recipient);
        self
    }

    pub fn id(&self) -> Uuid {
        self.label.id
    }

    pub fn name(&self) -> &str {
        &self.label.name
    }

    pub fn label(&self) -> &TaskLabel {
        &self.label
    }

    /// Split into the label and a future that calls the work closure on first poll.
    pub(crate) fn into_parts(self) -> (TaskLabel, BoxFuture<'static, anyhow::Result<()>>) {
        let work = self.work;
        (self.label, async move { work().await }.boxed())
    }
}

impl std::fmt::Debug for DeferredTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeferredTask")
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[tokio::test]
    async fn test_work_is_lazy_until_polled() {
        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();
        let task = DeferredTask::new("lazy", move || async move {
            flag.store(true, Ordering::SeqCst);
            Ok(())
        });

        let (label, fut) = task.into_parts();
        assert_eq!(label.name, "lazy");
        assert!(!ran.load(Ordering::SeqCst));

        fut.await.unwrap();
        assert!(ran.load(Ordering::SeqCst));
    }

    #[test]
    fn test_tags_carry_event_and_recipient() {
        let event = TriggerEvent::new(EventKind::TaskAssigned, Uuid::new_v4(), None);
        let user = UserId::new();
        let task = DeferredTask::new("notify", || async { Ok(()) })
            .for_event(&event)
            .for_recipient(user);

        assert_eq!(task.label().event_id, Some(event.id));
        assert_eq!(task.label().event_kind, Some(EventKind::TaskAssigned));
        assert_eq!(task.label().recipient, Some(user));
    }
}
