use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::{info, warn};

use crate::locations::LocationDirectory;
use crate::logging::LogFormat;
use crate::matching::{MatchingConfig, Weights};

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub database_url: Option<String>,
    pub rules_dir: PathBuf,
    pub threshold_override: Option<f64>,
    pub match_concurrency: usize,
    pub store_timeout: Duration,
    pub push_timeout: Duration,
    pub push_webhook_url: Option<String>,
    pub bind_addr: String,
    pub log_format: LogFormat,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            rules_dir: PathBuf::from("./rules"),
            threshold_override: None,
            match_concurrency: 8,
            store_timeout: Duration::from_millis(2000),
            push_timeout: Duration::from_millis(1000),
            push_webhook_url: None,
            bind_addr: "0.0.0.0:8080".to_string(),
            log_format: LogFormat::Text,
        }
    }
}

impl PipelineConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            database_url: non_empty_var("DATABASE_URL"),
            rules_dir: non_empty_var("JMN_RULES_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.rules_dir),
            threshold_override: parsed_var("JMN_MATCH_THRESHOLD"),
            match_concurrency: parsed_var::<usize>("JMN_MATCH_CONCURRENCY")
                .filter(|n| *n > 0)
                .unwrap_or(defaults.match_concurrency),
            store_timeout: parsed_var("JMN_STORE_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.store_timeout),
            push_timeout: parsed_var("JMN_PUSH_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.push_timeout),
            push_webhook_url: non_empty_var("JMN_PUSH_WEBHOOK_URL"),
            bind_addr: non_empty_var("JMN_BIND_ADDR").unwrap_or(defaults.bind_addr),
            log_format: std::env::var("JMN_LOG_FORMAT")
                .map(|v| LogFormat::parse(&v))
                .unwrap_or_default(),
        }
    }

    /// Matching rules from `matching.yaml`, with the env threshold applied on top.
    pub fn matching_config(&self) -> Result<MatchingConfig> {
        let mut config = load_matching_rules(&self.rules_dir.join("matching.yaml"))?;
        if let Some(threshold) = self.threshold_override {
            config.threshold = threshold;
        }
        config
            .validate()
            .context("validating matching configuration")?;
        Ok(config)
    }

    pub fn location_directory(&self) -> Result<LocationDirectory> {
        let path = self.rules_dir.join("locations.yaml");
        if !path.exists() {
            warn!(path = %path.display(), "locations rules missing; only literal country matches will count");
            return Ok(LocationDirectory::default());
        }
        LocationDirectory::from_path(&path)
    }
}

#[derive(Debug, Clone, Deserialize)]
struct MatchingRulesFile {
    #[allow(dead_code)]
    version: u32,
    #[serde(default)]
    threshold: Option<f64>,
    #[serde(default)]
    salary_neutral: Option<f64>,
    #[serde(default)]
    title_similarity: Option<f64>,
    #[serde(default)]
    weights: Option<Weights>,
}

pub fn load_matching_rules(path: &Path) -> Result<MatchingConfig> {
    let defaults = MatchingConfig::default();
    if !path.exists() {
        info!(path = %path.display(), "matching rules missing; using built-in defaults");
        return Ok(defaults);
    }
    let text =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let file: MatchingRulesFile =
        serde_yaml::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
    Ok(MatchingConfig {
        weights: file.weights.unwrap_or(defaults.weights),
        threshold: file.threshold.unwrap_or(defaults.threshold),
        salary_neutral: file.salary_neutral.unwrap_or(defaults.salary_neutral),
        title_similarity: file.title_similarity.unwrap_or(defaults.title_similarity),
    })
}

fn non_empty_var(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parsed_var<T: std::str::FromStr>(key: &str) -> Option<T> {
    non_empty_var(key).and_then(|v| v.parse().ok())
}
