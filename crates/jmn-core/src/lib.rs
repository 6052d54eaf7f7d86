//! Core domain model for JMN: postings, search profiles, matches and entitlements.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const CRATE_NAME: &str = "jmn-core";

/// Category tag carried by every job match notification.
pub const JOB_MATCH_CATEGORY: &str = "JOB_MATCH";

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EmploymentType {
    FullTime,
    PartTime,
    Contract,
    Internship,
    Temporary,
    Freelance,
    Other(String),
}

impl EmploymentType {
    /// Lenient parse: "FULL_TIME", "full-time" and "Full Time" are the same type.
    pub fn parse(raw: &str) -> Self {
        let key = raw
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_ascii_lowercase();
        match key.as_str() {
            "fulltime" | "permanent" => Self::FullTime,
            "parttime" => Self::PartTime,
            "contract" | "contractor" => Self::Contract,
            "internship" | "intern" => Self::Internship,
            "temporary" | "temp" => Self::Temporary,
            "freelance" | "freelancer" => Self::Freelance,
            _ => Self::Other(raw.trim().to_ascii_uppercase().replace([' ', '-'], "_")),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::FullTime => "FULL_TIME",
            Self::PartTime => "PART_TIME",
            Self::Contract => "CONTRACT",
            Self::Internship => "INTERNSHIP",
            Self::Temporary => "TEMPORARY",
            Self::Freelance => "FREELANCE",
            Self::Other(raw) => raw,
        }
    }
}

impl From<String> for EmploymentType {
    fn from(value: String) -> Self {
        Self::parse(&value)
    }
}

impl From<EmploymentType> for String {
    fn from(value: EmploymentType) -> Self {
        value.as_str().to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum SalaryKind {
    Range,
    Estimate,
    Negotiable,
    Other(String),
}

impl SalaryKind {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "range" => Self::Range,
            "estimate" | "estimated" => Self::Estimate,
            "negotiable" => Self::Negotiable,
            _ => Self::Other(raw.trim().to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Range => "range",
            Self::Estimate => "estimate",
            Self::Negotiable => "negotiable",
            Self::Other(raw) => raw,
        }
    }
}

impl From<String> for SalaryKind {
    fn from(value: String) -> Self {
        Self::parse(&value)
    }
}

impl From<SalaryKind> for String {
    fn from(value: SalaryKind) -> Self {
        value.as_str().to_string()
    }
}

/// Salary information as advertised by a posting.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SalaryBand {
    pub kinds: Vec<SalaryKind>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub currency: Option<String>,
    pub text: Option<String>,
}

impl SalaryBand {
    /// Comparable numeric bounds, or `None` when the band is an estimate, negotiable
    /// or carries no usable numbers. A one-sided band is open on the missing side.
    pub fn numeric_bounds(&self) -> Option<(f64, f64)> {
        let numeric_kind = self.kinds.is_empty() || self.kinds.contains(&SalaryKind::Range);
        if !numeric_kind {
            return None;
        }
        let min = self.min.filter(|v| v.is_finite() && *v >= 0.0);
        let max = self.max.filter(|v| v.is_finite() && *v >= 0.0);
        match (min, max) {
            (Some(lo), Some(hi)) => Some((lo.min(hi), lo.max(hi))),
            (Some(lo), None) => Some((lo, f64::INFINITY)),
            (None, Some(hi)) => Some((0.0, hi)),
            (None, None) => None,
        }
    }
}

/// Posting lifecycle. Upstream "active" means open for matching; anything other than
/// open/closed is kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum JobStatus {
    #[default]
    Open,
    Closed,
    Other(String),
}

impl JobStatus {
    pub fn normalize(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.eq_ignore_ascii_case("active") || trimmed.eq_ignore_ascii_case("open") {
            Self::Open
        } else if trimmed.eq_ignore_ascii_case("closed") {
            Self::Closed
        } else {
            Self::Other(raw.to_string())
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Open => "open",
            Self::Closed => "closed",
            Self::Other(raw) => raw,
        }
    }
}

impl From<String> for JobStatus {
    fn from(value: String) -> Self {
        Self::normalize(&value)
    }
}

impl From<JobStatus> for String {
    fn from(value: JobStatus) -> Self {
        value.as_str().to_string()
    }
}

/// Canonical job posting produced by the event normalizer, one per event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobPosting {
    pub id: String,
    pub company_id: Option<String>,
    pub title: String,
    pub description: Option<String>,
    pub required_skills: Vec<String>,
    pub employment_types: Vec<EmploymentType>,
    pub location: Option<String>,
    pub salary: SalaryBand,
    pub posted_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub is_fresher_friendly: bool,
    pub status: JobStatus,
}

impl JobPosting {
    pub fn is_open(&self) -> bool {
        self.status == JobStatus::Open
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires| expires < now)
    }
}

/// A user's saved search criteria. Owned by the profile service; read-only here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchProfile {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    #[serde(default)]
    pub desired_skills: Vec<String>,
    #[serde(default)]
    pub desired_employment_types: Vec<EmploymentType>,
    #[serde(default)]
    pub desired_titles: Vec<String>,
    #[serde(default)]
    pub desired_country: Option<String>,
    pub min_salary: f64,
    #[serde(default)]
    pub max_salary: Option<f64>,
}

/// Per-dimension scores, each in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SubScores {
    pub skills: f64,
    pub salary: f64,
    pub location: f64,
    pub employment_type: f64,
    pub title: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    /// Composite score in `[0, 100]`.
    pub score: f64,
    pub sub_scores: SubScores,
    pub matched_skills: Vec<String>,
}

/// Job fields frozen at match time so later edits upstream do not rewrite history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub company_id: Option<String>,
    pub title: String,
    pub description: Option<String>,
    pub location: Option<String>,
    pub employment_types: Vec<EmploymentType>,
    pub required_skills: Vec<String>,
    pub salary_kinds: Vec<SalaryKind>,
    pub salary_min: Option<f64>,
    pub salary_max: Option<f64>,
    pub salary_currency: Option<String>,
    pub salary_text: Option<String>,
    pub posted_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub is_fresher_friendly: bool,
}

impl JobSnapshot {
    pub fn capture(posting: &JobPosting) -> Self {
        Self {
            company_id: posting.company_id.clone(),
            title: posting.title.clone(),
            description: posting.description.clone(),
            location: posting.location.clone(),
            employment_types: posting.employment_types.clone(),
            required_skills: posting.required_skills.clone(),
            salary_kinds: posting.salary.kinds.clone(),
            salary_min: posting.salary.min,
            salary_max: posting.salary.max,
            salary_currency: posting.salary.currency.clone(),
            salary_text: posting.salary.text.clone(),
            posted_at: posting.posted_at,
            expires_at: posting.expires_at,
            is_fresher_friendly: posting.is_fresher_friendly,
        }
    }
}

/// Persisted qualifying match. At most one exists per `(user_id, job_post_id)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchedJobPost {
    pub id: Uuid,
    pub user_id: Uuid,
    pub profile_id: Uuid,
    pub job_post_id: String,
    pub snapshot: JobSnapshot,
    pub score: f64,
    pub sub_scores: SubScores,
    pub matched_skills: Vec<String>,
    pub is_viewed: bool,
    pub is_notified: bool,
    pub created_at: DateTime<Utc>,
}

impl MatchedJobPost {
    pub fn new(
        user_id: Uuid,
        profile_id: Uuid,
        posting: &JobPosting,
        result: &MatchResult,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: match_id_for(user_id, &posting.id),
            user_id,
            profile_id,
            job_post_id: posting.id.clone(),
            snapshot: JobSnapshot::capture(posting),
            score: result.score,
            sub_scores: result.sub_scores,
            matched_skills: result.matched_skills.clone(),
            is_viewed: false,
            is_notified: false,
            created_at,
        }
    }
}

/// Deterministic match id, so every replica derives the same key for a (user, job) pair.
pub fn match_id_for(user_id: Uuid, job_post_id: &str) -> Uuid {
    let name = format!("jmn:match:{user_id}:{job_post_id}");
    Uuid::new_v5(&Uuid::NAMESPACE_URL, name.as_bytes())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum PlanTier {
    Free,
    Premium,
    Other(String),
}

impl From<String> for PlanTier {
    fn from(value: String) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "free" => Self::Free,
            "premium" => Self::Premium,
            _ => Self::Other(value),
        }
    }
}

impl From<PlanTier> for String {
    fn from(value: PlanTier) -> Self {
        match value {
            PlanTier::Free => "free".to_string(),
            PlanTier::Premium => "premium".to_string(),
            PlanTier::Other(raw) => raw,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum SubscriptionStatus {
    Active,
    Inactive,
    Other(String),
}

impl From<String> for SubscriptionStatus {
    fn from(value: String) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "active" => Self::Active,
            "inactive" => Self::Inactive,
            _ => Self::Other(value),
        }
    }
}

impl From<SubscriptionStatus> for String {
    fn from(value: SubscriptionStatus) -> Self {
        match value {
            SubscriptionStatus::Active => "active".to_string(),
            SubscriptionStatus::Inactive => "inactive".to_string(),
            SubscriptionStatus::Other(raw) => raw,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub user_id: Uuid,
    pub tier: PlanTier,
    pub status: SubscriptionStatus,
}

impl Subscription {
    pub fn is_premium_active(&self) -> bool {
        self.tier == PlanTier::Premium && self.status == SubscriptionStatus::Active
    }
}

/// Durable notification, kept for later retrieval by offline users.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub match_id: Uuid,
    pub title: String,
    pub body: String,
    pub category: String,
    pub metadata: serde_json::Value,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}
