//! Deferred side-effect dispatch and notification fan-out.
//!
//! ```text
//! handler ──> FanOutDispatcher ──> RecipientResolver ──> MemberDirectory (store)
//!                    │
//!                    └──> Scheduler ──> supervisor ──> one tokio task per delivery
//! ```
//!
//! - [`resolver`]: member ids → user ids, one batched lookup per chunk
//! - [`scheduler`]: fire-and-forget execution with failure containment
//! - [`dispatcher`]: resolve, then schedule one delivery per recipient

pub mod dispatcher;
pub mod error;
pub mod resolver;
pub mod scheduler;
pub mod task;

pub use dispatcher::{DispatchSummary, FanOutDispatcher};
pub use error::{DispatchError, ResolveError};
pub use resolver::{MemberDirectory, PgMemberDirectory, RecipientResolver, RecipientSet};
pub use scheduler::{DrainReport, Scheduler, SchedulerConfig, SchedulerStats};
pub use task::DeferredTask;

pub use atrium_common::config::OverflowPolicy;
