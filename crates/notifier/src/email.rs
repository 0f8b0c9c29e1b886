//! Email delivery through the Resend HTTP API.
//!
//! Flow per recipient:
//! 1. Look up the user's address (missing address → `MissingEmail`)
//! 2. `POST {api_url}/emails` with a bearer API key
//! 3. On 2xx, store a notification record with channel `email`

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

use atrium_common::config::AppConfig;
use atrium_common::types::{
    DeliveryChannel, NotificationPayload, NotificationRecord, TriggerEvent, UserId,
};

use crate::delivery::Notifier;
use crate::error::NotifyError;
use crate::store::{AddressBook, NotificationStore};

/// Resend credentials and sender identity.
#[derive(Debug, Clone)]
pub struct ResendConfig {
    pub api_key: String,
    pub api_url: String,
    pub from: String,
}

impl ResendConfig {
    /// Build from application config; `None` when email is not configured.
    pub fn from_app_config(config: &AppConfig) -> Option<Self> {
        Some(Self {
            api_key: config.resend_api_key.clone()?,
            api_url: config.resend_api_url.trim_end_matches('/').to_string(),
            from: config.email_from.clone()?,
        })
    }
}

#[derive(Debug, Serialize)]
struct SendEmailRequest<'a> {
    from: &'a str,
    to: [&'a str; 1],
    subject: &'a str,
    html: String,
    text: String,
}

pub struct EmailNotifier {
    client: reqwest::Client,
    config: ResendConfig,
    addresses: Arc<dyn AddressBook>,
    store: Arc<dyn NotificationStore>,
}

impl EmailNotifier {
    pub fn new(
        config: ResendConfig,
        addresses: Arc<dyn AddressBook>,
        store: Arc<dyn NotificationStore>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
            addresses,
            store,
        }
    }

    async fn send(&self, to: &str, payload: &NotificationPayload) -> Result<(), NotifyError> {
        let request = SendEmailRequest {
            from: &self.config.from,
            to: [to],
            subject: &payload.title,
            html: render_html(payload),
            text: render_text(payload),
        };

        let response = self
            .client
            .post(format!("{}/emails", self.config.api_url))
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NotifyError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        Ok(())
    }
}

#[async_trait]
impl Notifier for EmailNotifier {
    fn channel(&self) -> DeliveryChannel {
        DeliveryChannel::Email
    }

    async fn deliver(
        &self,
        recipient: UserId,
        event: &TriggerEvent,
        payload: &NotificationPayload,
    ) -> Result<(), NotifyError> {
        let to = self
            .addresses
            .email_for(recipient)
            .await?
            .ok_or(NotifyError::MissingEmail(recipient))?;

        self.send(&to, payload).await?;

        let record = NotificationRecord {
            id: Uuid::new_v4(),
            recipient_id: recipient,
            channel: DeliveryChannel::Email,
            payload: serde_json::to_value(payload)?,
            event_id: Some(event.id),
            created_at: Utc::now(),
        };
        self.store.insert(&record).await?;

        tracing::info!(
            recipient = %recipient,
            event_id = %event.id,
            event_kind = %event.kind,
            "Email notification sent"
        );
        Ok(())
    }
}

fn render_text(payload: &NotificationPayload) -> String {
    match &payload.link {
        Some(link) => format!("{}\n\n{}", payload.body, link),
        None => payload.body.clone(),
    }
}

fn render_html(payload: &NotificationPayload) -> String {
    let mut html = format!("<p>{}</p>", escape_html(&payload.body));
    if let Some(link) = &payload.link {
        html.push_str(&format!(
            "<p><a href=\"{}\">Open in Atrium</a></p>",
            escape_html(link)
        ));
    }
    html
}

fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
