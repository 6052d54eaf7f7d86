//! In-process stores. Each map sits behind one async mutex, so check-and-insert happens
//! under a single lock acquisition.

use std::collections::HashMap;
use std::path::Path;

use anyhow::Context;
use async_trait::async_trait;
use jmn_core::{MatchedJobPost, NotificationRecord, SearchProfile, Subscription};
use serde::de::DeserializeOwned;
use tokio::fs;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::{
    MatchStore, NotificationStore, Recorded, SearchProfileStore, StoreError, SubscriptionStore,
};

async fn read_json_file<T: DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let data = fs::read_to_string(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&data).with_context(|| format!("parsing {}", path.display()))
}

#[derive(Debug, Default)]
pub struct InMemorySearchProfileStore {
    profiles: Mutex<Vec<SearchProfile>>,
}

impl InMemorySearchProfileStore {
    pub fn new(profiles: Vec<SearchProfile>) -> Self {
        Self {
            profiles: Mutex::new(profiles),
        }
    }

    /// Seed from a JSON array of profiles.
    pub async fn from_json_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        Ok(Self::new(read_json_file(path.as_ref()).await?))
    }

    pub async fn upsert(&self, profile: SearchProfile) {
        let mut profiles = self.profiles.lock().await;
        match profiles.iter_mut().find(|p| p.id == profile.id) {
            Some(existing) => *existing = profile,
            None => profiles.push(profile),
        }
    }
}

#[async_trait]
impl SearchProfileStore for InMemorySearchProfileStore {
    async fn all_profiles(&self) -> Result<Vec<SearchProfile>, StoreError> {
        Ok(self.profiles.lock().await.clone())
    }
}

#[derive(Debug, Default)]
pub struct InMemorySubscriptionStore {
    subscriptions: Mutex<HashMap<Uuid, Subscription>>,
}

impl InMemorySubscriptionStore {
    pub fn new(subscriptions: Vec<Subscription>) -> Self {
        Self {
            subscriptions: Mutex::new(
                subscriptions
                    .into_iter()
                    .map(|s| (s.user_id, s))
                    .collect(),
            ),
        }
    }

    pub async fn from_json_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        Ok(Self::new(read_json_file(path.as_ref()).await?))
    }

    pub async fn upsert(&self, subscription: Subscription) {
        self.subscriptions
            .lock()
            .await
            .insert(subscription.user_id, subscription);
    }
}

#[async_trait]
impl SubscriptionStore for InMemorySubscriptionStore {
    async fn subscription_for(&self, user_id: Uuid) -> Result<Option<Subscription>, StoreError> {
        Ok(self.subscriptions.lock().await.get(&user_id).cloned())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryMatchStore {
    rows: Mutex<HashMap<(Uuid, String), MatchedJobPost>>,
}

impl InMemoryMatchStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.rows.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rows.lock().await.is_empty()
    }
}

#[async_trait]
impl MatchStore for InMemoryMatchStore {
    async fn record_if_absent(
        &self,
        candidate: MatchedJobPost,
    ) -> Result<Recorded<MatchedJobPost>, StoreError> {
        let mut rows = self.rows.lock().await;
        let key = (candidate.user_id, candidate.job_post_id.clone());
        if let Some(existing) = rows.get(&key) {
            return Ok(Recorded {
                record: existing.clone(),
                created: false,
            });
        }
        rows.insert(key, candidate.clone());
        Ok(Recorded {
            record: candidate,
            created: true,
        })
    }

    async fn mark_notified(&self, match_id: Uuid) -> Result<bool, StoreError> {
        let mut rows = self.rows.lock().await;
        match rows.values_mut().find(|row| row.id == match_id) {
            Some(row) if !row.is_notified => {
                row.is_notified = true;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn get(
        &self,
        user_id: Uuid,
        job_post_id: &str,
    ) -> Result<Option<MatchedJobPost>, StoreError> {
        Ok(self
            .rows
            .lock()
            .await
            .get(&(user_id, job_post_id.to_string()))
            .cloned())
    }

    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<MatchedJobPost>, StoreError> {
        let mut out: Vec<_> = self
            .rows
            .lock()
            .await
            .values()
            .filter(|row| row.user_id == user_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(out)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryNotificationStore {
    by_match: Mutex<HashMap<Uuid, NotificationRecord>>,
}

impl InMemoryNotificationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.by_match.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.by_match.lock().await.is_empty()
    }
}

#[async_trait]
impl NotificationStore for InMemoryNotificationStore {
    async fn record_if_absent(
        &self,
        record: NotificationRecord,
    ) -> Result<Recorded<NotificationRecord>, StoreError> {
        let mut by_match = self.by_match.lock().await;
        if let Some(existing) = by_match.get(&record.match_id) {
            return Ok(Recorded {
                record: existing.clone(),
                created: false,
            });
        }
        by_match.insert(record.match_id, record.clone());
        Ok(Recorded {
            record,
            created: true,
        })
    }

    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<NotificationRecord>, StoreError> {
        let mut out: Vec<_> = self
            .by_match
            .lock()
            .await
            .values()
            .filter(|n| n.user_id == user_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(out)
    }
}
