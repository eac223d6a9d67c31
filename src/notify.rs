//! # Notify: Outbound Messages to Trial Owners and Invitees
//!
//! Two things leave the service as messages:
//!
//! | Notice | Emitted When |
//! |--------|-------------|
//! | `InvitationCreated` | An owner invites an email that had no invitation yet |
//! | `QuestionAsked` | Someone uses the contact form on a trial page |
//!
//! Delivery goes through a [`Notifier`]. [`LogNotifier`] only logs;
//! [`WebhookNotifier`] POSTs the notice as JSON to a configured URL, where a
//! mailer picks it up. Delivery failures are logged and never fail the
//! request that caused them.

use async_trait::async_trait;
use serde::Serialize;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{info, warn};

use crate::store::lock_or_recover;

/// A message to deliver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notice {
    InvitationCreated {
        trial_id: i64,
        trial_title: String,
        trial_url: String,
        email: String,
    },
    QuestionAsked {
        trial_id: i64,
        trial_title: String,
        owner_email: String,
        name: String,
        email: String,
        message: String,
    },
}

impl Notice {
    pub fn kind(&self) -> &'static str {
        match self {
            Notice::InvitationCreated { .. } => "invitation_created",
            Notice::QuestionAsked { .. } => "question_asked",
        }
    }

    pub fn trial_id(&self) -> i64 {
        match self {
            Notice::InvitationCreated { trial_id, .. } | Notice::QuestionAsked { trial_id, .. } => {
                *trial_id
            }
        }
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, notice: Notice);
}

/// Logs every notice at `info`.
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, notice: Notice) {
        info!(kind = notice.kind(), trial_id = notice.trial_id(), "notice");
    }
}

/// POSTs notices to a webhook.
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(WebhookNotifier {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn send(&self, notice: Notice) {
        let result = self
            .client
            .post(&self.url)
            .json(&notice)
            .send()
            .await
            .and_then(|r| r.error_for_status());
        match result {
            Ok(_) => info!(kind = notice.kind(), trial_id = notice.trial_id(), "notice delivered"),
            Err(e) => warn!(
                kind = notice.kind(),
                trial_id = notice.trial_id(),
                error = %e,
                "notice delivery failed"
            ),
        }
    }
}

/// Keeps every notice in memory. Used by tests to assert on side effects.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Notice>>,
}

impl RecordingNotifier {
    pub fn sent(&self) -> Vec<Notice> {
        lock_or_recover(&self.sent).clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, notice: Notice) {
        lock_or_recover(&self.sent).push(notice);
    }
}
