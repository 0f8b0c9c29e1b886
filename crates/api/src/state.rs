//! Shared application state for the Axum API server.

use std::sync::Arc;
use std::time::Duration;

use sqlx::PgPool;

use atrium_common::config::AppConfig;
use atrium_engine::{FanOutDispatcher, PgMemberDirectory, RecipientResolver, Scheduler};
use atrium_notifier::{
    EmailNotifier, InAppNotifier, Notifier, PgNotificationStore, ResendConfig,
};

/// Application state shared across all route handlers via Axum `State`.
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: AppConfig,
    pub dispatcher: FanOutDispatcher,
    pub notifications: PgNotificationStore,
    pub in_app: Arc<dyn Notifier>,
    /// Present only when Resend is configured.
    pub email: Option<Arc<dyn Notifier>>,
}

impl AppState {
    /// Wire the dispatch engine and delivery channels over `pool`.
    pub fn new(pool: PgPool, config: AppConfig, scheduler: Scheduler) -> Self {
        let directory = Arc::new(PgMemberDirectory::new(
            pool.clone(),
            config.resolver_batch_limit,
        ));
        let mut resolver = RecipientResolver::new(directory);
        if let Some(ms) = config.resolver_lookup_timeout_ms {
            resolver = resolver.with_lookup_timeout(Duration::from_millis(ms));
        }

        let notifications = PgNotificationStore::new(pool.clone());
        let store = Arc::new(notifications.clone());
        let in_app: Arc<dyn Notifier> = Arc::new(InAppNotifier::new(store.clone()));
        let email = ResendConfig::from_app_config(&config).map(|resend| {
            Arc::new(EmailNotifier::new(resend, store.clone(), store.clone())) as Arc<dyn Notifier>
        });
        if email.is_none() {
            tracing::info!("Email delivery disabled (RESEND_API_KEY or EMAIL_FROM not set)");
        }

        Self {
            pool,
            config,
            dispatcher: FanOutDispatcher::new(resolver, scheduler),
            notifications,
            in_app,
            email,
        }
    }

    /// Channels to fan out over: in-app always, email when wanted and configured.
    pub fn channels(&self, with_email: bool) -> Vec<Arc<dyn Notifier>> {
        let mut channels = vec![self.in_app.clone()];
        if with_email && let Some(email) = &self.email {
            channels.push(email.clone());
        }
        channels
    }
}
