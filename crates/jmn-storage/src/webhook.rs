//! Real-time push over HTTP, for deployments where a separate gateway owns user sessions.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use jmn_core::NotificationRecord;
use reqwest::StatusCode;
use serde::Serialize;
use tracing::{info_span, Instrument};
use uuid::Uuid;

use crate::{PushOutcome, RealtimeChannel, StoreError};

#[derive(Debug, Clone)]
pub struct WebhookPush {
    client: reqwest::Client,
    target_url: String,
}

#[derive(Debug, Serialize)]
struct PushBody<'a> {
    user_id: Uuid,
    notification: &'a NotificationRecord,
}

impl WebhookPush {
    pub fn new(target_url: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("building reqwest client")?;
        Ok(Self {
            client,
            target_url: target_url.into(),
        })
    }
}

/// The gateway answers 404/410 when the user has no open session.
pub fn classify_push_status(status: StatusCode) -> Result<PushOutcome, StoreError> {
    if status.is_success() {
        Ok(PushOutcome::Delivered)
    } else if status == StatusCode::NOT_FOUND || status == StatusCode::GONE {
        Ok(PushOutcome::NoSession)
    } else {
        Err(StoreError::PushStatus {
            status: status.as_u16(),
        })
    }
}

#[async_trait]
impl RealtimeChannel for WebhookPush {
    async fn push(&self, record: &NotificationRecord) -> Result<PushOutcome, StoreError> {
        let span = info_span!("webhook_push", user_id = %record.user_id, match_id = %record.match_id);
        let resp = self
            .client
            .post(&self.target_url)
            .json(&PushBody {
                user_id: record.user_id,
                notification: record,
            })
            .send()
            .instrument(span)
            .await?;
        classify_push_status(resp.status())
    }
}
