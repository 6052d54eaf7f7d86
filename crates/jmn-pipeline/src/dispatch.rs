//! Notification delivery for qualifying matches.
//!
//! The durable record is written first and is unique per match, so only the call
//! that creates it pushes to the user's session. `is_notified` is flipped last.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use jmn_core::{
    EmploymentType, MatchedJobPost, NotificationRecord, SalaryKind, SubScores, JOB_MATCH_CATEGORY,
};
use jmn_storage::{
    with_timeout, MatchStore, NotificationStore, PushOutcome, RealtimeChannel, StoreError,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("match {match_id} is already marked notified")]
    AlreadyNotified { match_id: Uuid },
    #[error("could not build notification payload for match {match_id}: {source}")]
    Payload {
        match_id: Uuid,
        #[source]
        source: serde_json::Error,
    },
    #[error("notification delivery failed for match {match_id}: {source}")]
    DeliveryFailure {
        match_id: Uuid,
        #[source]
        source: StoreError,
    },
    #[error("notification recorded but match {match_id} could not be marked notified: {source}")]
    MarkNotified {
        match_id: Uuid,
        #[source]
        source: StoreError,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PushResult {
    Delivered,
    NoSession,
    Failed,
    /// The durable record already existed, so an earlier attempt owned the push.
    Skipped,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DispatchOutcome {
    pub notification: NotificationRecord,
    pub record_created: bool,
    pub push: PushResult,
    pub marked_notified: bool,
}

/// Metadata carried by a `JOB_MATCH` notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchNotificationPayload {
    pub match_id: Uuid,
    pub job_post_id: String,
    pub profile_id: Uuid,
    pub company_id: Option<String>,
    pub job_title: String,
    pub score: f64,
    pub score_breakdown: SubScores,
    pub matched_skills: Vec<String>,
    pub salary_kinds: Vec<SalaryKind>,
    pub salary_min: Option<f64>,
    pub salary_max: Option<f64>,
    pub salary_currency: Option<String>,
    pub salary_text: Option<String>,
    pub location: Option<String>,
    pub employment_types: Vec<EmploymentType>,
    pub posted_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub is_fresher_friendly: bool,
}

impl MatchNotificationPayload {
    pub fn from_match(matched: &MatchedJobPost) -> Self {
        let snap = &matched.snapshot;
        Self {
            match_id: matched.id,
            job_post_id: matched.job_post_id.clone(),
            profile_id: matched.profile_id,
            company_id: snap.company_id.clone(),
            job_title: snap.title.clone(),
            score: matched.score,
            score_breakdown: matched.sub_scores,
            matched_skills: matched.matched_skills.clone(),
            salary_kinds: snap.salary_kinds.clone(),
            salary_min: snap.salary_min,
            salary_max: snap.salary_max,
            salary_currency: snap.salary_currency.clone(),
            salary_text: snap.salary_text.clone(),
            location: snap.location.clone(),
            employment_types: snap.employment_types.clone(),
            posted_at: snap.posted_at,
            expires_at: snap.expires_at,
            is_fresher_friendly: snap.is_fresher_friendly,
        }
    }
}

pub fn notification_id_for(match_id: Uuid) -> Uuid {
    let name = format!("jmn:notification:{match_id}");
    Uuid::new_v5(&Uuid::NAMESPACE_URL, name.as_bytes())
}

pub fn compose_notification(
    matched: &MatchedJobPost,
    now: DateTime<Utc>,
) -> Result<NotificationRecord, serde_json::Error> {
    let payload = MatchNotificationPayload::from_match(matched);
    let mut body = format!(
        "{} matches your saved search ({:.0}%)",
        matched.snapshot.title, matched.score
    );
    if let Some(location) = matched.snapshot.location.as_deref() {
        body.push_str(&format!(" in {location}"));
    }
    if !matched.matched_skills.is_empty() {
        body.push_str(&format!(". Skills: {}", matched.matched_skills.join(", ")));
    }
    Ok(NotificationRecord {
        id: notification_id_for(matched.id),
        user_id: matched.user_id,
        match_id: matched.id,
        title: format!("New job match: {}", matched.snapshot.title),
        body,
        category: JOB_MATCH_CATEGORY.to_string(),
        metadata: serde_json::to_value(&payload)?,
        is_read: false,
        created_at: now,
    })
}

#[derive(Debug, Clone, Copy)]
pub struct DispatchTimeouts {
    pub store: Duration,
    pub push: Duration,
}

impl Default for DispatchTimeouts {
    fn default() -> Self {
        Self {
            store: Duration::from_millis(2000),
            push: Duration::from_millis(1000),
        }
    }
}

#[derive(Clone)]
pub struct NotificationDispatcher {
    notifications: Arc<dyn NotificationStore>,
    matches: Arc<dyn MatchStore>,
    realtime: Arc<dyn RealtimeChannel>,
    timeouts: DispatchTimeouts,
}

impl NotificationDispatcher {
    pub fn new(
        notifications: Arc<dyn NotificationStore>,
        matches: Arc<dyn MatchStore>,
        realtime: Arc<dyn RealtimeChannel>,
        timeouts: DispatchTimeouts,
    ) -> Self {
        Self {
            notifications,
            matches,
            realtime,
            timeouts,
        }
    }

    /// Deliver one match. Callers check entitlement first.
    #[instrument(skip(self, matched), fields(match_id = %matched.id, user_id = %matched.user_id))]
    pub async fn dispatch(
        &self,
        matched: &MatchedJobPost,
    ) -> Result<DispatchOutcome, DispatchError> {
        let match_id = matched.id;
        if matched.is_notified {
            return Err(DispatchError::AlreadyNotified { match_id });
        }

        let record = compose_notification(matched, Utc::now())
            .map_err(|source| DispatchError::Payload { match_id, source })?;
        let recorded = with_timeout(
            "notification record",
            self.timeouts.store,
            self.notifications.record_if_absent(record),
        )
        .await
        .map_err(|source| DispatchError::DeliveryFailure { match_id, source })?;

        let push = if recorded.created {
            self.push(&recorded.record).await
        } else {
            debug!("notification already recorded by an earlier delivery; skipping push");
            PushResult::Skipped
        };

        let marked_notified = with_timeout(
            "mark notified",
            self.timeouts.store,
            self.matches.mark_notified(match_id),
        )
        .await
        .map_err(|source| DispatchError::MarkNotified { match_id, source })?;

        info!(?push, record_created = recorded.created, marked_notified, "match notification dispatched");
        Ok(DispatchOutcome {
            notification: recorded.record,
            record_created: recorded.created,
            push,
            marked_notified,
        })
    }

    async fn push(&self, record: &NotificationRecord) -> PushResult {
        match with_timeout("realtime push", self.timeouts.push, self.realtime.push(record)).await {
            Ok(PushOutcome::Delivered) => PushResult::Delivered,
            Ok(PushOutcome::NoSession) => PushResult::NoSession,
            Err(err) => {
                warn!(error = %err, "realtime push failed; durable record kept");
                PushResult::Failed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use jmn_core::{JobPosting, JobStatus, MatchResult, SalaryBand};
    use jmn_storage::{InMemoryMatchStore, InMemoryNotificationStore, Recorded};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingPush {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl RealtimeChannel for CountingPush {
        async fn push(&self, _record: &NotificationRecord) -> Result<PushOutcome, StoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(PushOutcome::Delivered)
        }
    }

    struct FailingPush;

    #[async_trait]
    impl RealtimeChannel for FailingPush {
        async fn push(&self, _record: &NotificationRecord) -> Result<PushOutcome, StoreError> {
            Err(StoreError::PushStatus { status: 503 })
        }
    }

    struct BrokenNotifications;

    #[async_trait]
    impl NotificationStore for BrokenNotifications {
        async fn record_if_absent(
            &self,
            _record: NotificationRecord,
        ) -> Result<Recorded<NotificationRecord>, StoreError> {
            Err(StoreError::Unavailable("disk full".into()))
        }

        async fn list_for_user(&self, _user_id: Uuid) -> Result<Vec<NotificationRecord>, StoreError> {
            Ok(Vec::new())
        }
    }

    fn posting() -> JobPosting {
        JobPosting {
            id: "job-sg-1".into(),
            company_id: Some("acme".into()),
            title: "Backend Engineer".into(),
            description: None,
            required_skills: vec!["Java".into(), "AWS".into()],
            employment_types: vec![EmploymentType::FullTime],
            location: Some("Singapore".into()),
            salary: SalaryBand {
                kinds: vec![SalaryKind::Range],
                min: Some(60_000.0),
                max: Some(80_000.0),
                currency: Some("SGD".into()),
                text: None,
            },
            posted_at: None,
            expires_at: None,
            is_fresher_friendly: true,
            status: JobStatus::Open,
        }
    }

    async fn stored_match(store: &InMemoryMatchStore) -> MatchedJobPost {
        let result = MatchResult {
            score: 100.0,
            sub_scores: SubScores {
                skills: 1.0,
                salary: 1.0,
                location: 1.0,
                employment_type: 1.0,
                title: 1.0,
            },
            matched_skills: vec!["Java".into(), "AWS".into()],
        };
        let candidate =
            MatchedJobPost::new(Uuid::new_v4(), Uuid::new_v4(), &posting(), &result, Utc::now());
        store.record_if_absent(candidate).await.unwrap().record
    }

    #[test]
    fn payload_carries_score_breakdown_and_job_fields() {
        let result = MatchResult {
            score: 82.5,
            sub_scores: SubScores::default(),
            matched_skills: vec!["Java".into()],
        };
        let matched =
            MatchedJobPost::new(Uuid::new_v4(), Uuid::new_v4(), &posting(), &result, Utc::now());
        let record = compose_notification(&matched, Utc::now()).unwrap();

        assert_eq!(record.category, "JOB_MATCH");
        assert_eq!(record.id, notification_id_for(matched.id));
        assert_eq!(record.metadata["jobPostId"], "job-sg-1");
        assert_eq!(record.metadata["score"], 82.5);
        assert_eq!(record.metadata["salaryMin"], 60_000.0);
        assert_eq!(record.metadata["isFresherFriendly"], true);
        assert!(record.metadata["scoreBreakdown"].get("skills").is_some());
        assert!(record.body.contains("Singapore"));
    }

    #[tokio::test]
    async fn second_dispatch_of_same_match_does_not_push_again() {
        let matches = Arc::new(InMemoryMatchStore::new());
        let notifications = Arc::new(InMemoryNotificationStore::new());
        let push = Arc::new(CountingPush::default());
        let dispatcher = NotificationDispatcher::new(
            notifications.clone(),
            matches.clone(),
            push.clone(),
            DispatchTimeouts::default(),
        );
        let matched = stored_match(&matches).await;

        let first = dispatcher.dispatch(&matched).await.unwrap();
        assert!(first.record_created);
        assert_eq!(first.push, PushResult::Delivered);
        assert!(first.marked_notified);

        // A stale copy (is_notified still false) arriving through redelivery.
        let again = dispatcher.dispatch(&matched).await.unwrap();
        assert!(!again.record_created);
        assert_eq!(again.push, PushResult::Skipped);
        assert!(!again.marked_notified);

        assert_eq!(push.calls.load(Ordering::SeqCst), 1);
        assert_eq!(notifications.len().await, 1);
    }

    #[tokio::test]
    async fn already_notified_matches_are_refused() {
        let matches = Arc::new(InMemoryMatchStore::new());
        let dispatcher = NotificationDispatcher::new(
            Arc::new(InMemoryNotificationStore::new()),
            matches.clone(),
            Arc::new(CountingPush::default()),
            DispatchTimeouts::default(),
        );
        let mut matched = stored_match(&matches).await;
        matched.is_notified = true;
        assert!(matches!(
            dispatcher.dispatch(&matched).await,
            Err(DispatchError::AlreadyNotified { .. })
        ));
    }

    #[tokio::test]
    async fn push_failure_still_records_and_marks() {
        let matches = Arc::new(InMemoryMatchStore::new());
        let dispatcher = NotificationDispatcher::new(
            Arc::new(InMemoryNotificationStore::new()),
            matches.clone(),
            Arc::new(FailingPush),
            DispatchTimeouts::default(),
        );
        let matched = stored_match(&matches).await;

        let outcome = dispatcher.dispatch(&matched).await.unwrap();
        assert_eq!(outcome.push, PushResult::Failed);
        assert!(outcome.marked_notified);
    }

    #[tokio::test]
    async fn record_failure_leaves_match_unnotified() {
        let matches = Arc::new(InMemoryMatchStore::new());
        let push = Arc::new(CountingPush::default());
        let dispatcher = NotificationDispatcher::new(
            Arc::new(BrokenNotifications),
            matches.clone(),
            push.clone(),
            DispatchTimeouts::default(),
        );
        let matched = stored_match(&matches).await;

        let err = dispatcher.dispatch(&matched).await.unwrap_err();
        assert!(matches!(err, DispatchError::DeliveryFailure { .. }));
        assert_eq!(push.calls.load(Ordering::SeqCst), 0);
        let row = matches
            .get(matched.user_id, &matched.job_post_id)
            .await
            .unwrap()
            .unwrap();
        assert!(!row.is_notified);
    }
}
