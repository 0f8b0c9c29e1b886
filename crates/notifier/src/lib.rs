//! Delivery actions run inside deferred tasks.
//!
//! - [`InAppNotifier`]: writes a notification record for the dashboard inbox
//! - [`EmailNotifier`]: sends through the Resend HTTP API, then records it
//!
//! [`delivery_task`] turns any [`Notifier`] into the per-recipient closure the
//! fan-out dispatcher expects.

pub mod delivery;
pub mod email;
pub mod error;
pub mod in_app;
pub mod store;

pub use delivery::{Notifier, delivery_task};
pub use email::{EmailNotifier, ResendConfig};
pub use error::NotifyError;
pub use in_app::InAppNotifier;
pub use store::{AddressBook, NotificationStore, PgNotificationStore};
