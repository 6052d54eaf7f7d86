use std::path::{Path, PathBuf};
use std::sync::Arc;

use jmn_pipeline::{
    ChannelSource, Collaborators, ConsumerSettings, Disposition, EventConsumer, JsonLinesSource,
    MatchingConfig, MatchingEngine, SessionHub,
};
use jmn_pipeline::locations::LocationDirectory;
use jmn_storage::{
    InMemoryMatchStore, InMemoryNotificationStore, InMemorySearchProfileStore,
    InMemorySubscriptionStore, MatchStore, NotificationStore,
};
use serde_json::json;
use tempfile::tempdir;
use uuid::Uuid;

const PREMIUM_USER: &str = "0e1d2c3b-4a59-4687-8a1b-2c3d4e5f6a01";
const FREE_USER: &str = "0e1d2c3b-4a59-4687-8a1b-2c3d4e5f6a03";
const JOB_ID: &str = "job-sg-backend-001";

fn repo_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("../..")
}

struct Fixture {
    consumer: EventConsumer,
    matches: Arc<InMemoryMatchStore>,
    notifications: Arc<InMemoryNotificationStore>,
    hub: Arc<SessionHub>,
}

async fn fixture() -> Fixture {
    let fixtures = repo_root().join("fixtures");
    let profiles = InMemorySearchProfileStore::from_json_file(fixtures.join("profiles.json"))
        .await
        .unwrap();
    let subscriptions =
        InMemorySubscriptionStore::from_json_file(fixtures.join("subscriptions.json"))
            .await
            .unwrap();
    let locations = LocationDirectory::from_path(&repo_root().join("rules/locations.yaml")).unwrap();

    let matches = Arc::new(InMemoryMatchStore::new());
    let notifications = Arc::new(InMemoryNotificationStore::new());
    let hub = Arc::new(SessionHub::default());
    let collaborators = Collaborators {
        profiles: Arc::new(profiles),
        subscriptions: Arc::new(subscriptions),
        matches: matches.clone(),
        notifications: notifications.clone(),
        realtime: hub.clone(),
    };
    let engine = MatchingEngine::new(MatchingConfig::default(), Arc::new(locations));
    Fixture {
        consumer: EventConsumer::new(engine, collaborators, ConsumerSettings::default()),
        matches,
        notifications,
        hub,
    }
}

fn user(id: &str) -> Uuid {
    Uuid::parse_str(id).unwrap()
}

#[tokio::test]
async fn redelivered_event_creates_one_match_and_one_notification() {
    let f = fixture().await;
    let mut session = f.hub.subscribe(user(PREMIUM_USER)).await;

    let mut source = JsonLinesSource::open(repo_root().join("fixtures/events/redelivery.jsonl"))
        .await
        .unwrap();
    let summary = f.consumer.run(&mut source).await.unwrap();

    assert_eq!(summary.deliveries, 4);
    assert_eq!(summary.processed, 2);
    assert_eq!(summary.unsupported, 1);
    assert_eq!(summary.malformed, 1);
    assert_eq!(summary.matches_created, 2);
    assert_eq!(summary.notified, 1);
    assert_eq!(source.committed_offset(), Some(4));

    let premium = f.matches.get(user(PREMIUM_USER), JOB_ID).await.unwrap().unwrap();
    assert!(premium.is_notified);
    assert_eq!(premium.matched_skills, vec!["Java", "AWS"]);

    let free = f.matches.get(user(FREE_USER), JOB_ID).await.unwrap().unwrap();
    assert!(!free.is_notified);

    assert_eq!(f.notifications.len().await, 1);
    let stored = f
        .notifications
        .list_for_user(user(PREMIUM_USER))
        .await
        .unwrap();
    assert_eq!(stored[0].match_id, premium.id);

    let pushed = session.try_recv().unwrap();
    assert_eq!(pushed.match_id, premium.id);
    assert!(session.try_recv().is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_duplicates_across_partitions_notify_once() {
    let f = fixture().await;
    let payload = std::fs::read(repo_root().join("fixtures/events/job_created_singapore.json"))
        .unwrap();
    let compact = serde_json::to_vec(&serde_json::from_slice::<serde_json::Value>(&payload).unwrap())
        .unwrap();

    let mut runs = Vec::new();
    for partition in 0..4 {
        let (tx, mut source) = ChannelSource::new(partition, 8);
        let consumer = f.consumer.clone();
        runs.push(tokio::spawn(async move { consumer.run(&mut source).await }));
        for _ in 0..3 {
            tx.send(compact.clone()).await.unwrap();
        }
    }

    let mut created = 0;
    let mut notified = 0;
    for run in runs {
        let summary = run.await.unwrap().unwrap();
        assert_eq!(summary.processed, 3);
        created += summary.matches_created;
        notified += summary.notified;
    }

    assert_eq!(created, 2);
    assert_eq!(notified, 1);
    assert_eq!(f.matches.len().await, 2);
    assert_eq!(f.notifications.len().await, 1);
}

#[tokio::test]
async fn foreign_posting_is_scored_but_not_recorded() {
    let f = fixture().await;
    let payload =
        std::fs::read(repo_root().join("fixtures/events/job_created_hanoi.json")).unwrap();

    let outcome = f.consumer.handle_bytes(&payload).await;

    assert_eq!(outcome.disposition, Disposition::Processed);
    assert_eq!(outcome.profiles_scored, 3);
    assert_eq!(outcome.qualifying, 0);
    assert!(f.matches.is_empty().await);
    assert!(f.notifications.is_empty().await);
}

#[tokio::test]
async fn one_bad_event_does_not_stop_the_ones_after_it() {
    let f = fixture().await;
    let (tx, mut source) = ChannelSource::new(0, 8);
    let malformed =
        std::fs::read(repo_root().join("fixtures/events/malformed_missing_title.json")).unwrap();
    let good =
        std::fs::read(repo_root().join("fixtures/events/job_created_singapore.json")).unwrap();
    tx.send(malformed).await.unwrap();
    tx.send(b"\xff\xfe".to_vec()).await.unwrap();
    tx.send(good).await.unwrap();
    drop(tx);

    let summary = f.consumer.run(&mut source).await.unwrap();

    assert_eq!(summary.malformed, 2);
    assert_eq!(summary.processed, 1);
    assert_eq!(summary.notified, 1);
    assert_eq!(source.committed_offset(), Some(2));
}

#[tokio::test]
async fn flat_legacy_event_matches_through_city_lookup() {
    let f = fixture().await;
    let payload =
        std::fs::read(repo_root().join("fixtures/events/job_updated_flat_legacy.json")).unwrap();

    let outcome = f.consumer.handle_bytes(&payload).await;
    assert_eq!(outcome.disposition, Disposition::Processed);

    // Jurong East resolves to Singapore; the data profile's owner is not premium-active.
    let data_user = user("0e1d2c3b-4a59-4687-8a1b-2c3d4e5f6a02");
    let row = f
        .matches
        .get(data_user, "job-sg-data-003")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.sub_scores.location, 1.0);
    assert_eq!(row.sub_scores.salary, 0.5);
    assert_eq!(row.snapshot.location.as_deref(), Some("Jurong East"));
    assert!(!row.is_notified);
    assert!(f
        .notifications
        .list_for_user(data_user)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn corrupt_line_in_replay_file_is_malformed_and_the_rest_still_runs() {
    let f = fixture().await;
    let good =
        std::fs::read(repo_root().join("fixtures/events/job_created_singapore.json")).unwrap();
    let good = serde_json::to_vec(&serde_json::from_slice::<serde_json::Value>(&good).unwrap())
        .unwrap();
    let dir = tempdir().unwrap();
    let path = dir.path().join("replay.jsonl");
    let mut contents = b"\xff\xfe\n".to_vec();
    contents.extend_from_slice(&good);
    contents.push(b'\n');
    std::fs::write(&path, contents).unwrap();

    let mut source = JsonLinesSource::open(&path).await.unwrap();
    let summary = f.consumer.run(&mut source).await.unwrap();

    assert_eq!(summary.deliveries, 2);
    assert_eq!(summary.malformed, 1);
    assert_eq!(summary.processed, 1);
    assert_eq!(summary.notified, 1);
    assert_eq!(source.committed_offset(), Some(2));
}

#[tokio::test]
async fn posting_update_leaves_the_stored_match_untouched() {
    let f = fixture().await;
    let created =
        std::fs::read(repo_root().join("fixtures/events/job_created_singapore.json")).unwrap();
    f.consumer.handle_bytes(&created).await;
    let before = f.matches.get(user(PREMIUM_USER), JOB_ID).await.unwrap().unwrap();

    let updated = json!({
        "eventType": "JOB_POST_UPDATED",
        "eventId": "evt-2026-0002",
        "data": {
            "uniqueId": JOB_ID,
            "title": "Principal Java Engineer",
            "location": "Jurong East",
            "employmentType": ["FULL_TIME"],
            "requiredSkills": ["Java", "Kafka", "AWS"],
            "salaryInfo": {"type": ["range"], "min": 90000, "max": 110000, "currency": "SGD"},
            "expiresAt": "2099-04-02T00:00:00Z",
            "status": "ACTIVE"
        }
    });
    let outcome = f.consumer.handle_bytes(updated.to_string().as_bytes()).await;

    assert_eq!(outcome.disposition, Disposition::Processed);
    assert_eq!(outcome.matches_created, 0);
    assert_eq!(outcome.notified, 0);
    assert_eq!(outcome.already_notified, 1);

    let after = f.matches.get(user(PREMIUM_USER), JOB_ID).await.unwrap().unwrap();
    assert_eq!(after.id, before.id);
    assert_eq!(after.snapshot.title, "Senior Java Backend Engineer");
    assert_eq!(after.snapshot.location.as_deref(), Some("Singapore"));
    assert_eq!(after.snapshot.salary_min, Some(60000.0));
    assert_eq!(after.snapshot.salary_max, Some(80000.0));
    assert_eq!(after.score, before.score);
    assert_eq!(after.sub_scores, before.sub_scores);
    assert_eq!(f.notifications.len().await, 1);
}
