//! Per-event pipeline: decode, normalize, score every profile, then persist and notify
//! each qualifying match. Failures stay inside the event that caused them.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use jmn_core::{JobPosting, MatchResult, MatchedJobPost, SearchProfile};
use jmn_events::{normalize, NormalizeError, RawEvent};
use jmn_storage::{
    with_timeout, MatchStore, NotificationStore, RealtimeChannel, SearchProfileStore, StoreError,
    SubscriptionStore,
};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::PipelineConfig;
use crate::dispatch::{DispatchError, DispatchTimeouts, NotificationDispatcher};
use crate::entitlement::EntitlementGate;
use crate::matching::MatchingEngine;
use crate::source::EventSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStage {
    Received,
    Normalized,
    Matched,
    Persisted,
    Notified,
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    Processed,
    Unsupported,
    Inactive,
    Malformed,
    Failed,
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Normalize(#[from] NormalizeError),
    #[error("loading search profiles failed: {0}")]
    Profiles(#[source] StoreError),
    #[error("scoring worker failed: {0}")]
    Scoring(#[from] tokio::task::JoinError),
    #[error("{failed} of {attempted} matches could not be persisted or notified")]
    Matches { failed: usize, attempted: usize },
}

/// What happened to one event. `stage` is the last stage the event completed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventOutcome {
    pub event_id: Option<String>,
    pub event_type: Option<String>,
    pub job_post_id: Option<String>,
    pub disposition: Disposition,
    pub stage: EventStage,
    pub profiles_scored: usize,
    pub qualifying: usize,
    pub matches_created: usize,
    pub notified: usize,
    pub not_entitled: usize,
    pub already_notified: usize,
    pub failed_matches: usize,
    pub error: Option<String>,
    #[serde(skip)]
    unpersisted: usize,
}

impl EventOutcome {
    fn received(event_id: Option<String>, event_type: Option<String>) -> Self {
        Self {
            event_id,
            event_type,
            job_post_id: None,
            disposition: Disposition::Processed,
            stage: EventStage::Received,
            profiles_scored: 0,
            qualifying: 0,
            matches_created: 0,
            notified: 0,
            not_entitled: 0,
            already_notified: 0,
            failed_matches: 0,
            error: None,
            unpersisted: 0,
        }
    }

    fn fail(mut self, err: PipelineError) -> Self {
        warn!(stage = ?self.stage, error = %err, "event processing failed");
        self.disposition = match err {
            PipelineError::Normalize(_) => Disposition::Malformed,
            _ => Disposition::Failed,
        };
        self.error = Some(err.to_string());
        self
    }

    fn absorb(&mut self, report: MatchReport) {
        if !report.persisted {
            self.unpersisted += 1;
        }
        if report.created {
            self.matches_created += 1;
        }
        match report.step {
            MatchStep::Notified => self.notified += 1,
            MatchStep::AlreadyNotified => self.already_notified += 1,
            MatchStep::NotEntitled => self.not_entitled += 1,
            MatchStep::Failed => self.failed_matches += 1,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunSummary {
    pub deliveries: usize,
    pub processed: usize,
    pub unsupported: usize,
    pub inactive: usize,
    pub malformed: usize,
    pub failed: usize,
    pub matches_created: usize,
    pub notified: usize,
    pub failed_matches: usize,
}

impl RunSummary {
    pub fn record(&mut self, outcome: &EventOutcome) {
        self.deliveries += 1;
        match outcome.disposition {
            Disposition::Processed => self.processed += 1,
            Disposition::Unsupported => self.unsupported += 1,
            Disposition::Inactive => self.inactive += 1,
            Disposition::Malformed => self.malformed += 1,
            Disposition::Failed => self.failed += 1,
        }
        self.matches_created += outcome.matches_created;
        self.notified += outcome.notified;
        self.failed_matches += outcome.failed_matches;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MatchStep {
    Notified,
    AlreadyNotified,
    NotEntitled,
    Failed,
}

#[derive(Debug, Clone, Copy)]
struct MatchReport {
    persisted: bool,
    created: bool,
    step: MatchStep,
}

#[derive(Clone)]
pub struct Collaborators {
    pub profiles: Arc<dyn SearchProfileStore>,
    pub subscriptions: Arc<dyn SubscriptionStore>,
    pub matches: Arc<dyn MatchStore>,
    pub notifications: Arc<dyn NotificationStore>,
    pub realtime: Arc<dyn RealtimeChannel>,
}

#[derive(Debug, Clone, Copy)]
pub struct ConsumerSettings {
    pub match_concurrency: usize,
    pub store_timeout: Duration,
    pub push_timeout: Duration,
}

impl Default for ConsumerSettings {
    fn default() -> Self {
        Self {
            match_concurrency: 8,
            store_timeout: Duration::from_millis(2000),
            push_timeout: Duration::from_millis(1000),
        }
    }
}

impl From<&PipelineConfig> for ConsumerSettings {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            match_concurrency: config.match_concurrency,
            store_timeout: config.store_timeout,
            push_timeout: config.push_timeout,
        }
    }
}

struct Scored {
    profiles_scored: usize,
    qualifying: usize,
    best_per_user: Vec<(SearchProfile, MatchResult)>,
}

struct ConsumerInner {
    engine: Arc<MatchingEngine>,
    profiles: Arc<dyn SearchProfileStore>,
    matches: Arc<dyn MatchStore>,
    gate: EntitlementGate,
    dispatcher: NotificationDispatcher,
    settings: ConsumerSettings,
}

/// Cheap to clone; several partitions can drive one consumer concurrently.
#[derive(Clone)]
pub struct EventConsumer {
    inner: Arc<ConsumerInner>,
}

impl EventConsumer {
    pub fn new(
        engine: MatchingEngine,
        collaborators: Collaborators,
        settings: ConsumerSettings,
    ) -> Self {
        let gate = EntitlementGate::new(collaborators.subscriptions, settings.store_timeout);
        let dispatcher = NotificationDispatcher::new(
            collaborators.notifications,
            collaborators.matches.clone(),
            collaborators.realtime,
            DispatchTimeouts {
                store: settings.store_timeout,
                push: settings.push_timeout,
            },
        );
        Self {
            inner: Arc::new(ConsumerInner {
                engine: Arc::new(engine),
                profiles: collaborators.profiles,
                matches: collaborators.matches,
                gate,
                dispatcher,
                settings,
            }),
        }
    }

    /// Build from environment config, loading matching and location rules from disk.
    pub fn from_config(config: &PipelineConfig, collaborators: Collaborators) -> Result<Self> {
        let matching = config.matching_config()?;
        let locations = config.location_directory()?;
        info!(
            threshold = matching.threshold,
            countries = locations.country_count(),
            "matching rules loaded"
        );
        let engine = MatchingEngine::new(matching, Arc::new(locations));
        Ok(Self::new(engine, collaborators, ConsumerSettings::from(config)))
    }

    pub fn engine(&self) -> &MatchingEngine {
        &self.inner.engine
    }

    /// Drain `source`, acking every delivery once it has been handled.
    pub async fn run<S: EventSource + ?Sized>(&self, source: &mut S) -> Result<RunSummary> {
        let mut summary = RunSummary::default();
        while let Some(delivery) = source.next_delivery().await? {
            let outcome = self
                .handle_bytes(&delivery.payload)
                .instrument(info_span!(
                    "delivery",
                    partition = delivery.partition,
                    offset = delivery.offset
                ))
                .await;
            summary.record(&outcome);
            source.ack(&delivery).await?;
        }
        info!(
            deliveries = summary.deliveries,
            processed = summary.processed,
            malformed = summary.malformed,
            failed = summary.failed,
            matches_created = summary.matches_created,
            notified = summary.notified,
            "event source drained"
        );
        Ok(summary)
    }

    pub async fn handle_bytes(&self, payload: &[u8]) -> EventOutcome {
        match RawEvent::decode(payload) {
            Ok(raw) => self.handle_event(raw).await,
            Err(err) => EventOutcome::received(None, None).fail(err.into()),
        }
    }

    pub async fn handle_event(&self, raw: RawEvent) -> EventOutcome {
        let event_id = raw.event_id();
        let span = info_span!(
            "event",
            event_id = event_id.as_deref().unwrap_or("-"),
            event_type = raw.event_type.as_deref().unwrap_or("-")
        );
        self.process(raw, event_id).instrument(span).await
    }

    async fn process(&self, raw: RawEvent, event_id: Option<String>) -> EventOutcome {
        let mut outcome = EventOutcome::received(event_id, raw.event_type.clone());
        if !raw.kind().is_supported() {
            debug!("skipping unsupported event type");
            outcome.disposition = Disposition::Unsupported;
            return outcome;
        }

        let posting = match normalize(&raw) {
            Ok(posting) => posting,
            Err(err) => return outcome.fail(err.into()),
        };
        outcome.job_post_id = Some(posting.id.clone());
        outcome.stage = EventStage::Normalized;

        if !posting.is_open() || posting.is_expired_at(Utc::now()) {
            debug!(job_post_id = %posting.id, status = posting.status.as_str(), "posting closed or expired; not matching");
            outcome.disposition = Disposition::Inactive;
            return outcome;
        }

        let posting = Arc::new(posting);
        let scored = match self.score_profiles(posting.clone()).await {
            Ok(scored) => scored,
            Err(err) => return outcome.fail(err),
        };
        outcome.profiles_scored = scored.profiles_scored;
        outcome.qualifying = scored.qualifying;
        outcome.stage = EventStage::Matched;
        debug!(
            job_post_id = %posting.id,
            profiles = scored.profiles_scored,
            qualifying = scored.qualifying,
            users = scored.best_per_user.len(),
            "profiles scored"
        );

        let attempted = scored.best_per_user.len();
        let permits = self
            .inner
            .settings
            .match_concurrency
            .clamp(1, Semaphore::MAX_PERMITS);
        let semaphore = Arc::new(Semaphore::new(permits));
        let mut tasks = JoinSet::new();
        for (profile, result) in scored.best_per_user {
            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .expect("semaphore not closed");
            let inner = self.inner.clone();
            let posting = posting.clone();
            tasks.spawn(
                async move {
                    let _permit = permit;
                    inner.persist_and_notify(&posting, profile, result).await
                }
                .in_current_span(),
            );
        }
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(report) => outcome.absorb(report),
                Err(err) => {
                    warn!(error = %err, "match task aborted");
                    outcome.failed_matches += 1;
                    outcome.unpersisted += 1;
                }
            }
        }

        if outcome.unpersisted == 0 {
            outcome.stage = EventStage::Persisted;
        }
        if outcome.failed_matches > 0 {
            let failed = outcome.failed_matches;
            return outcome.fail(PipelineError::Matches {
                failed,
                attempted,
            });
        }
        outcome.stage = EventStage::Notified;
        info!(
            job_post_id = %posting.id,
            matches_created = outcome.matches_created,
            notified = outcome.notified,
            not_entitled = outcome.not_entitled,
            "event processed"
        );
        outcome.stage = EventStage::Done;
        outcome
    }

    async fn score_profiles(&self, posting: Arc<JobPosting>) -> Result<Scored, PipelineError> {
        let profiles = with_timeout(
            "profile load",
            self.inner.settings.store_timeout,
            self.inner.profiles.all_profiles(),
        )
        .await
        .map_err(PipelineError::Profiles)?;

        let engine = self.inner.engine.clone();
        let scored =
            tokio::task::spawn_blocking(move || best_match_per_user(&engine, &posting, profiles))
                .await?;
        Ok(scored)
    }
}

/// Score every profile and keep each user's highest-scoring qualifying profile, since
/// only one match row may exist per user and job.
fn best_match_per_user(
    engine: &MatchingEngine,
    posting: &JobPosting,
    profiles: Vec<SearchProfile>,
) -> Scored {
    let profiles_scored = profiles.len();
    let mut qualifying = 0;
    let mut best: BTreeMap<Uuid, (SearchProfile, MatchResult)> = BTreeMap::new();
    for profile in profiles {
        let result = engine.score(posting, &profile);
        if !engine.is_qualifying(&result) {
            continue;
        }
        qualifying += 1;
        let replace = best
            .get(&profile.user_id)
            .map_or(true, |(_, current)| result.score > current.score);
        if replace {
            best.insert(profile.user_id, (profile, result));
        }
    }
    Scored {
        profiles_scored,
        qualifying,
        best_per_user: best.into_values().collect(),
    }
}

impl ConsumerInner {
    async fn persist_and_notify(
        &self,
        posting: &JobPosting,
        profile: SearchProfile,
        result: MatchResult,
    ) -> MatchReport {
        let user_id = profile.user_id;
        let candidate = MatchedJobPost::new(user_id, profile.id, posting, &result, Utc::now());
        let recorded = match with_timeout(
            "match persist",
            self.settings.store_timeout,
            self.matches.record_if_absent(candidate),
        )
        .await
        {
            Ok(recorded) => recorded,
            Err(err) => {
                warn!(%user_id, stage = ?EventStage::Matched, error = %err, "persisting match failed");
                return MatchReport {
                    persisted: false,
                    created: false,
                    step: MatchStep::Failed,
                };
            }
        };
        let created = recorded.created;
        let matched = recorded.record;
        let report = |step| MatchReport {
            persisted: true,
            created,
            step,
        };

        if matched.is_notified {
            debug!(%user_id, match_id = %matched.id, "match already notified");
            return report(MatchStep::AlreadyNotified);
        }

        match self.gate.check(user_id).await {
            Ok(true) => {}
            Ok(false) => return report(MatchStep::NotEntitled),
            Err(err) => {
                warn!(%user_id, stage = ?EventStage::Persisted, error = %err, "entitlement lookup failed; notification withheld");
                return report(MatchStep::Failed);
            }
        }

        match self.dispatcher.dispatch(&matched).await {
            Ok(dispatched) if dispatched.record_created => report(MatchStep::Notified),
            Ok(_) | Err(DispatchError::AlreadyNotified { .. }) => {
                report(MatchStep::AlreadyNotified)
            }
            Err(err) => {
                warn!(%user_id, stage = ?EventStage::Persisted, error = %err, "notification dispatch failed");
                report(MatchStep::Failed)
            }
        }
    }
}
