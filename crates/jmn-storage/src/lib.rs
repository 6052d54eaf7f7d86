//! Collaborator contracts and stores for the JMN pipeline.
//!
//! The pipeline only talks to the traits defined here. `memory` backs tests and local
//! runs, `postgres` backs deployments, and `webhook` is an HTTP real-time channel.

use std::time::Duration;

use async_trait::async_trait;
use jmn_core::{MatchedJobPost, NotificationRecord, SearchProfile, Subscription};
use thiserror::Error;
use uuid::Uuid;

pub mod memory;
pub mod postgres;
pub mod webhook;

pub use memory::{
    InMemoryMatchStore, InMemoryNotificationStore, InMemorySearchProfileStore,
    InMemorySubscriptionStore,
};
pub use postgres::{
    PgMatchStore, PgNotificationStore, PgSearchProfileStore, PgSubscriptionStore, MIGRATOR,
};
pub use webhook::WebhookPush;

pub const CRATE_NAME: &str = "jmn-storage";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("push request failed: {0}")]
    Push(#[from] reqwest::Error),
    #[error("push endpoint returned http status {status}")]
    PushStatus { status: u16 },
    #[error("{operation} timed out after {timeout_ms}ms")]
    Timeout {
        operation: &'static str,
        timeout_ms: u64,
    },
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Result of an idempotent insert: the authoritative row plus whether this call created it.
#[derive(Debug, Clone, PartialEq)]
pub struct Recorded<T> {
    pub record: T,
    pub created: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Delivered,
    NoSession,
}

#[async_trait]
pub trait SearchProfileStore: Send + Sync {
    /// Every saved profile, unfiltered; matching runs against the full set per event.
    async fn all_profiles(&self) -> Result<Vec<SearchProfile>, StoreError>;
}

#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    async fn subscription_for(&self, user_id: Uuid) -> Result<Option<Subscription>, StoreError>;
}

#[async_trait]
pub trait MatchStore: Send + Sync {
    /// Insert unless a row for `(user_id, job_post_id)` exists; returns the stored row.
    /// Must be a single atomic operation so concurrent writers cannot both insert.
    async fn record_if_absent(
        &self,
        candidate: MatchedJobPost,
    ) -> Result<Recorded<MatchedJobPost>, StoreError>;

    /// Flip `is_notified` false -> true. Returns `false` if it was already set.
    async fn mark_notified(&self, match_id: Uuid) -> Result<bool, StoreError>;

    async fn get(
        &self,
        user_id: Uuid,
        job_post_id: &str,
    ) -> Result<Option<MatchedJobPost>, StoreError>;

    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<MatchedJobPost>, StoreError>;
}

#[async_trait]
pub trait NotificationStore: Send + Sync {
    /// Durable write, unique per `match_id`.
    async fn record_if_absent(
        &self,
        record: NotificationRecord,
    ) -> Result<Recorded<NotificationRecord>, StoreError>;

    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<NotificationRecord>, StoreError>;
}

/// Best-effort delivery to whatever session the user currently has open.
#[async_trait]
pub trait RealtimeChannel: Send + Sync {
    async fn push(&self, record: &NotificationRecord) -> Result<PushOutcome, StoreError>;
}

/// Run a store call under a deadline, folding an elapsed deadline into `StoreError::Timeout`.
pub async fn with_timeout<T, F>(
    operation: &'static str,
    timeout: Duration,
    fut: F,
) -> Result<T, StoreError>
where
    F: std::future::Future<Output = Result<T, StoreError>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::Timeout {
            operation,
            timeout_ms: timeout.as_millis() as u64,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn with_timeout_passes_results_through() {
        let ok = with_timeout("noop", Duration::from_millis(50), async { Ok(7) }).await;
        assert_eq!(ok.unwrap(), 7);
    }

    #[tokio::test(start_paused = true)]
    async fn with_timeout_reports_elapsed_deadline() {
        let err = with_timeout("slow", Duration::from_millis(20), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<_, StoreError>(())
        })
        .await
        .unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(err.to_string(), "slow timed out after 20ms");
    }
}
