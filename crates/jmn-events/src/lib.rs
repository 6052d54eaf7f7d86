//! Job-posting event decoding: wire shapes in, canonical `JobPosting` out.
//!
//! Decoding happens in two stages. The payload is first parsed into a loosely typed
//! [`RawEvent`] (envelope fields plus whatever else the object carried), then
//! [`normalize`] walks an alias table for every field, nested `data` first and the flat
//! legacy layout second, and fails closed when no alias yields an id or a title.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use jmn_core::{EmploymentType, JobPosting, JobStatus, SalaryBand, SalaryKind};
use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value as JsonValue};
use thiserror::Error;

pub const CRATE_NAME: &str = "jmn-events";

pub const JOB_POST_CREATED: &str = "JOB_POST_CREATED";
pub const JOB_POST_UPDATED: &str = "JOB_POST_UPDATED";

const ID_ALIASES: &[&str] = &["uniqueId", "id", "jobPostId", "jobId"];
const COMPANY_ALIASES: &[&str] = &["companyId", "company_id"];
const TITLE_ALIASES: &[&str] = &["title", "jobTitle"];
const DESCRIPTION_ALIASES: &[&str] = &["description", "jobDescription"];
const LOCATION_ALIASES: &[&str] = &["location", "jobLocation"];
const EMPLOYMENT_ALIASES: &[&str] = &["employmentType", "employmentTypes"];
const SKILL_ALIASES: &[&str] = &["requiredSkills", "skills"];
const SALARY_ALIASES: &[&str] = &["salaryInfo", "salary"];
const POSTED_AT_ALIASES: &[&str] = &["postedAt", "postedDate", "createdAt"];
const EXPIRES_AT_ALIASES: &[&str] = &["expiresAt", "expiryDate", "deadline"];
const STATUS_ALIASES: &[&str] = &["status"];
const FRESHER_ALIASES: &[&str] = &["isFresherFriendly", "fresherFriendly"];

#[derive(Debug, Error)]
pub enum NormalizeError {
    #[error("event payload is not a decodable JSON object: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("malformed event: no {field} resolvable through any alias")]
    MalformedEvent { field: &'static str },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    PostingCreated,
    PostingUpdated,
    Unsupported,
}

impl EventKind {
    pub fn is_supported(self) -> bool {
        !matches!(self, Self::Unsupported)
    }
}

/// Stage-one decode of an inbound event. Only the envelope fields are typed; the rest
/// of the object is kept so the flat legacy layout can still be resolved.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawEvent {
    #[serde(default)]
    pub event_type: Option<String>,
    #[serde(default)]
    pub event_id: Option<JsonValue>,
    #[serde(default)]
    pub timestamp: Option<JsonValue>,
    #[serde(default)]
    pub data: Option<JsonValue>,
    #[serde(flatten)]
    pub rest: JsonMap<String, JsonValue>,
}

impl RawEvent {
    pub fn decode(bytes: &[u8]) -> Result<Self, NormalizeError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    pub fn from_value(value: JsonValue) -> Result<Self, NormalizeError> {
        Ok(serde_json::from_value(value)?)
    }

    /// A flat event without `eventType` predates the envelope and is treated as an upsert.
    pub fn kind(&self) -> EventKind {
        match self.event_type.as_deref().map(str::trim) {
            Some(t) if t.eq_ignore_ascii_case(JOB_POST_CREATED) => EventKind::PostingCreated,
            Some(t) if t.eq_ignore_ascii_case(JOB_POST_UPDATED) => EventKind::PostingUpdated,
            Some(_) => EventKind::Unsupported,
            None if self.data.is_none() && self.shapes().lookup(ID_ALIASES).is_some() => {
                EventKind::PostingUpdated
            }
            None => EventKind::Unsupported,
        }
    }

    pub fn event_id(&self) -> Option<String> {
        self.event_id.as_ref().and_then(json_text)
    }

    pub fn occurred_at(&self) -> Option<DateTime<Utc>> {
        self.timestamp.as_ref().and_then(json_timestamp)
    }

    fn shapes(&self) -> Shapes<'_> {
        Shapes {
            nested: self.data.as_ref().and_then(JsonValue::as_object),
            flat: &self.rest,
        }
    }
}

struct Shapes<'a> {
    nested: Option<&'a JsonMap<String, JsonValue>>,
    flat: &'a JsonMap<String, JsonValue>,
}

impl<'a> Shapes<'a> {
    fn lookup(&self, aliases: &[&str]) -> Option<&'a JsonValue> {
        self.nested
            .into_iter()
            .chain(std::iter::once(self.flat))
            .find_map(|layer| {
                aliases
                    .iter()
                    .find_map(|alias| layer.get(*alias).filter(|v| !v.is_null()))
            })
    }

    fn text(&self, aliases: &[&str]) -> Option<String> {
        self.nested
            .into_iter()
            .chain(std::iter::once(self.flat))
            .find_map(|layer| {
                aliases
                    .iter()
                    .find_map(|alias| layer.get(*alias).and_then(json_text))
            })
    }
}

/// Stage two: map a decoded event onto the canonical posting.
pub fn normalize(raw: &RawEvent) -> Result<JobPosting, NormalizeError> {
    let shapes = raw.shapes();

    let id = shapes
        .text(ID_ALIASES)
        .ok_or(NormalizeError::MalformedEvent { field: "identifier" })?;
    let title = shapes
        .text(TITLE_ALIASES)
        .ok_or(NormalizeError::MalformedEvent { field: "title" })?;

    let employment_types = shapes
        .lookup(EMPLOYMENT_ALIASES)
        .map(json_string_list)
        .unwrap_or_default()
        .iter()
        .map(|s| EmploymentType::parse(s))
        .collect();

    Ok(JobPosting {
        id,
        company_id: shapes.text(COMPANY_ALIASES),
        title,
        description: shapes.text(DESCRIPTION_ALIASES),
        required_skills: shapes
            .lookup(SKILL_ALIASES)
            .map(json_string_list)
            .unwrap_or_default(),
        employment_types,
        location: shapes.text(LOCATION_ALIASES),
        salary: shapes
            .lookup(SALARY_ALIASES)
            .map(json_salary)
            .unwrap_or_default(),
        posted_at: shapes.lookup(POSTED_AT_ALIASES).and_then(json_timestamp),
        expires_at: shapes.lookup(EXPIRES_AT_ALIASES).and_then(json_timestamp),
        is_fresher_friendly: shapes
            .lookup(FRESHER_ALIASES)
            .and_then(json_bool)
            .unwrap_or(false),
        status: shapes
            .text(STATUS_ALIASES)
            .map(|s| JobStatus::normalize(&s))
            .unwrap_or_default(),
    })
}

pub fn load_event_fixture(path: impl AsRef<Path>) -> Result<RawEvent> {
    let path = path.as_ref();
    let data = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    RawEvent::decode(&data).with_context(|| format!("parsing {}", path.display()))
}

fn text_or_none(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn json_text(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::String(s) => text_or_none(s),
        JsonValue::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn json_string_list(value: &JsonValue) -> Vec<String> {
    let items: Vec<String> = match value {
        JsonValue::Array(items) => items.iter().filter_map(json_text).collect(),
        JsonValue::String(s) => vec![s.clone()],
        _ => Vec::new(),
    };
    items
        .iter()
        .flat_map(|item| item.split(','))
        .filter_map(text_or_none)
        .collect()
}

fn json_number(value: &JsonValue) -> Option<f64> {
    let parsed = match value {
        JsonValue::Number(n) => n.as_f64(),
        JsonValue::String(s) => {
            let cleaned: String = s
                .chars()
                .filter(|c| !c.is_whitespace() && *c != ',' && *c != '_')
                .collect();
            cleaned.parse::<f64>().ok()
        }
        _ => None,
    };
    parsed.filter(|v| v.is_finite())
}

fn json_bool(value: &JsonValue) -> Option<bool> {
    match value {
        JsonValue::Bool(b) => Some(*b),
        JsonValue::Number(n) => n.as_i64().map(|v| v != 0),
        JsonValue::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "1" => Some(true),
            "false" | "no" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn json_timestamp(value: &JsonValue) -> Option<DateTime<Utc>> {
    match value {
        JsonValue::String(s) => parse_timestamp(s.trim()),
        JsonValue::Number(n) => {
            let raw = n.as_i64()?;
            // Anything below 1e11 is too small to be epoch millis of a real posting.
            if raw.abs() < 100_000_000_000 {
                Utc.timestamp_opt(raw, 0).single()
            } else {
                Utc.timestamp_millis_opt(raw).single()
            }
        }
        _ => None,
    }
}

fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(text) {
        return Some(ts.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(Utc.from_utc_datetime(&naive));
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| Utc.from_utc_datetime(&naive))
}

fn json_salary(value: &JsonValue) -> SalaryBand {
    let Some(obj) = value.as_object() else {
        return SalaryBand {
            text: json_text(value),
            ..SalaryBand::default()
        };
    };
    let kinds = obj
        .get("type")
        .map(json_string_list)
        .unwrap_or_default()
        .iter()
        .map(|s| SalaryKind::parse(s))
        .collect();
    SalaryBand {
        kinds,
        min: obj.get("min").and_then(json_number),
        max: obj.get("max").and_then(json_number),
        currency: obj.get("currency").and_then(json_text),
        text: obj
            .get("text")
            .or_else(|| obj.get("description"))
            .and_then(json_text),
    }
}
