//! Postgres-backed stores. Idempotency rides on the unique constraints declared in
//! `migrations/0001_jmn_init.sql`.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use jmn_core::{
    EmploymentType, JobSnapshot, MatchedJobPost, NotificationRecord, PlanTier, SearchProfile,
    SubScores, Subscription, SubscriptionStatus,
};
use sqlx::migrate::Migrator;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::Row;
use tracing::instrument;
use uuid::Uuid;

use crate::{
    MatchStore, NotificationStore, Recorded, SearchProfileStore, StoreError, SubscriptionStore,
};

pub static MIGRATOR: Migrator = sqlx::migrate!("../../migrations");

const MATCH_COLUMNS: &str = "id, user_id, profile_id, job_post_id, snapshot, score, \
     skills_score, salary_score, location_score, employment_type_score, title_score, \
     matched_skills, is_viewed, is_notified, created_at";

const NOTIFICATION_COLUMNS: &str =
    "id, user_id, match_id, title, body, category, metadata, is_read, created_at";

pub async fn connect(database_url: &str, acquire_timeout: Duration) -> Result<PgPool, StoreError> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(acquire_timeout)
        .connect(database_url)
        .await?;
    Ok(pool)
}

#[derive(Debug, Clone)]
pub struct PgSearchProfileStore {
    pool: PgPool,
}

impl PgSearchProfileStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SearchProfileStore for PgSearchProfileStore {
    #[instrument(skip(self))]
    async fn all_profiles(&self) -> Result<Vec<SearchProfile>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, user_id, name, desired_skills, desired_employment_types,
                   desired_titles, desired_country, min_salary, max_salary
              FROM search_profiles
             ORDER BY user_id, id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let employment: Vec<String> = row.try_get("desired_employment_types")?;
            out.push(SearchProfile {
                id: row.try_get("id")?,
                user_id: row.try_get("user_id")?,
                name: row.try_get("name")?,
                desired_skills: row.try_get("desired_skills")?,
                desired_employment_types: employment
                    .iter()
                    .map(|s| EmploymentType::parse(s))
                    .collect(),
                desired_titles: row.try_get("desired_titles")?,
                desired_country: row.try_get("desired_country")?,
                min_salary: row.try_get("min_salary")?,
                max_salary: row.try_get("max_salary")?,
            });
        }
        Ok(out)
    }
}

#[derive(Debug, Clone)]
pub struct PgSubscriptionStore {
    pool: PgPool,
}

impl PgSubscriptionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SubscriptionStore for PgSubscriptionStore {
    #[instrument(skip(self))]
    async fn subscription_for(&self, user_id: Uuid) -> Result<Option<Subscription>, StoreError> {
        let row = sqlx::query("SELECT user_id, tier, status FROM subscriptions WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let tier: String = row.try_get("tier")?;
        let status: String = row.try_get("status")?;
        Ok(Some(Subscription {
            user_id: row.try_get("user_id")?,
            tier: PlanTier::from(tier),
            status: SubscriptionStatus::from(status),
        }))
    }
}

#[derive(Debug, Clone)]
pub struct PgMatchStore {
    pool: PgPool,
}

impl PgMatchStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn match_from_row(row: &PgRow) -> Result<MatchedJobPost, StoreError> {
    let snapshot: Json<JobSnapshot> = row.try_get("snapshot")?;
    Ok(MatchedJobPost {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        profile_id: row.try_get("profile_id")?,
        job_post_id: row.try_get("job_post_id")?,
        snapshot: snapshot.0,
        score: row.try_get("score")?,
        sub_scores: SubScores {
            skills: row.try_get("skills_score")?,
            salary: row.try_get("salary_score")?,
            location: row.try_get("location_score")?,
            employment_type: row.try_get("employment_type_score")?,
            title: row.try_get("title_score")?,
        },
        matched_skills: row.try_get("matched_skills")?,
        is_viewed: row.try_get("is_viewed")?,
        is_notified: row.try_get("is_notified")?,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
    })
}

#[async_trait]
impl MatchStore for PgMatchStore {
    #[instrument(skip(self, candidate), fields(user_id = %candidate.user_id, job_post_id = %candidate.job_post_id))]
    async fn record_if_absent(
        &self,
        candidate: MatchedJobPost,
    ) -> Result<Recorded<MatchedJobPost>, StoreError> {
        let insert = format!(
            r#"
            INSERT INTO matched_job_posts ({MATCH_COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            ON CONFLICT (user_id, job_post_id) DO NOTHING
            RETURNING {MATCH_COLUMNS}
            "#
        );
        let inserted = sqlx::query(&insert)
            .bind(candidate.id)
            .bind(candidate.user_id)
            .bind(candidate.profile_id)
            .bind(&candidate.job_post_id)
            .bind(Json(&candidate.snapshot))
            .bind(candidate.score)
            .bind(candidate.sub_scores.skills)
            .bind(candidate.sub_scores.salary)
            .bind(candidate.sub_scores.location)
            .bind(candidate.sub_scores.employment_type)
            .bind(candidate.sub_scores.title)
            .bind(&candidate.matched_skills)
            .bind(candidate.is_viewed)
            .bind(candidate.is_notified)
            .bind(candidate.created_at)
            .fetch_optional(&self.pool)
            .await?;

        if let Some(row) = inserted {
            return Ok(Recorded {
                record: match_from_row(&row)?,
                created: true,
            });
        }

        // Lost the race or a redelivery: the unique key already holds the row.
        let select = format!(
            "SELECT {MATCH_COLUMNS} FROM matched_job_posts WHERE user_id = $1 AND job_post_id = $2"
        );
        let row = sqlx::query(&select)
            .bind(candidate.user_id)
            .bind(&candidate.job_post_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(Recorded {
            record: match_from_row(&row)?,
            created: false,
        })
    }

    #[instrument(skip(self))]
    async fn mark_notified(&self, match_id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE matched_job_posts
               SET is_notified = TRUE, notified_at = NOW()
             WHERE id = $1 AND is_notified = FALSE
            "#,
        )
        .bind(match_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn get(
        &self,
        user_id: Uuid,
        job_post_id: &str,
    ) -> Result<Option<MatchedJobPost>, StoreError> {
        let select = format!(
            "SELECT {MATCH_COLUMNS} FROM matched_job_posts WHERE user_id = $1 AND job_post_id = $2"
        );
        let row = sqlx::query(&select)
            .bind(user_id)
            .bind(job_post_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(match_from_row).transpose()
    }

    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<MatchedJobPost>, StoreError> {
        let select = format!(
            "SELECT {MATCH_COLUMNS} FROM matched_job_posts WHERE user_id = $1 \
             ORDER BY created_at DESC LIMIT 500"
        );
        let rows = sqlx::query(&select)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(match_from_row).collect()
    }
}

#[derive(Debug, Clone)]
pub struct PgNotificationStore {
    pool: PgPool,
}

impl PgNotificationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn notification_from_row(row: &PgRow) -> Result<NotificationRecord, StoreError> {
    let metadata: Json<serde_json::Value> = row.try_get("metadata")?;
    Ok(NotificationRecord {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        match_id: row.try_get("match_id")?,
        title: row.try_get("title")?,
        body: row.try_get("body")?,
        category: row.try_get("category")?,
        metadata: metadata.0,
        is_read: row.try_get("is_read")?,
        created_at: row.try_get("created_at")?,
    })
}

#[async_trait]
impl NotificationStore for PgNotificationStore {
    #[instrument(skip(self, record), fields(user_id = %record.user_id, match_id = %record.match_id))]
    async fn record_if_absent(
        &self,
        record: NotificationRecord,
    ) -> Result<Recorded<NotificationRecord>, StoreError> {
        let insert = format!(
            r#"
            INSERT INTO notifications ({NOTIFICATION_COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (match_id) DO NOTHING
            RETURNING {NOTIFICATION_COLUMNS}
            "#
        );
        let inserted = sqlx::query(&insert)
            .bind(record.id)
            .bind(record.user_id)
            .bind(record.match_id)
            .bind(&record.title)
            .bind(&record.body)
            .bind(&record.category)
            .bind(Json(&record.metadata))
            .bind(record.is_read)
            .bind(record.created_at)
            .fetch_optional(&self.pool)
            .await?;

        if let Some(row) = inserted {
            return Ok(Recorded {
                record: notification_from_row(&row)?,
                created: true,
            });
        }

        let select = format!("SELECT {NOTIFICATION_COLUMNS} FROM notifications WHERE match_id = $1");
        let row = sqlx::query(&select)
            .bind(record.match_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(Recorded {
            record: notification_from_row(&row)?,
            created: false,
        })
    }

    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<NotificationRecord>, StoreError> {
        let select = format!(
            "SELECT {NOTIFICATION_COLUMNS} FROM notifications WHERE user_id = $1 \
             ORDER BY created_at DESC LIMIT 200"
        );
        let rows = sqlx::query(&select)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(notification_from_row).collect()
    }
}
