//! Scoring of one posting against one search profile.
//!
//! Every dimension yields a sub-score in `[0, 1]`; the composite is their weighted mean
//! scaled to `[0, 100]`. Scoring never fails: anything it cannot compare objectively
//! (a negotiable salary, a band without numbers) gets a neutral value instead.

use std::collections::HashSet;
use std::sync::Arc;

use jmn_core::{JobPosting, MatchResult, SearchProfile, SubScores};
use serde::{Deserialize, Serialize};
use strsim::jaro_winkler;

/// Resolves a free-text posting location (usually a city) to a country.
pub trait LocationResolver: Send + Sync {
    fn is_within_country(&self, location: &str, country: &str) -> bool;
}

/// Resolver that knows no places; only literal country matches succeed.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoLocationLookup;

impl LocationResolver for NoLocationLookup {
    fn is_within_country(&self, _location: &str, _country: &str) -> bool {
        false
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Weights {
    pub skills: f64,
    pub salary: f64,
    pub location: f64,
    pub employment_type: f64,
    pub title: f64,
}

/// Location carries enough weight that a wrong-country posting cannot qualify on
/// skills and salary alone at the default threshold.
pub const DEFAULT_WEIGHTS: Weights = Weights {
    skills: 0.35,
    salary: 0.15,
    location: 0.30,
    employment_type: 0.10,
    title: 0.10,
};

impl Weights {
    pub fn sum(&self) -> f64 {
        self.skills + self.salary + self.location + self.employment_type + self.title
    }

    fn all(&self) -> [f64; 5] {
        [
            self.skills,
            self.salary,
            self.location,
            self.employment_type,
            self.title,
        ]
    }
}

impl Default for Weights {
    fn default() -> Self {
        DEFAULT_WEIGHTS
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchingConfig {
    pub weights: Weights,
    /// Composite score (0-100) a result must reach to qualify.
    pub threshold: f64,
    /// Salary sub-score for bands that cannot be compared numerically.
    pub salary_neutral: f64,
    /// Jaro-Winkler similarity at which two title tokens count as the same word.
    pub title_similarity: f64,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            weights: DEFAULT_WEIGHTS,
            threshold: 75.0,
            salary_neutral: 0.5,
            title_similarity: 0.92,
        }
    }
}

impl MatchingConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.weights.all().iter().any(|w| !w.is_finite() || *w < 0.0) {
            anyhow::bail!("matching weights must be finite and non-negative");
        }
        if self.weights.sum() <= 0.0 {
            anyhow::bail!("matching weights must not all be zero");
        }
        if !(0.0..=100.0).contains(&self.threshold) {
            anyhow::bail!("match threshold {} is outside 0..=100", self.threshold);
        }
        if !(0.0..=1.0).contains(&self.salary_neutral) {
            anyhow::bail!("salary neutral score {} is outside 0..=1", self.salary_neutral);
        }
        if !(0.0..=1.0).contains(&self.title_similarity) {
            anyhow::bail!("title similarity {} is outside 0..=1", self.title_similarity);
        }
        Ok(())
    }
}

pub struct MatchingEngine {
    config: MatchingConfig,
    locations: Arc<dyn LocationResolver>,
}

impl MatchingEngine {
    pub fn new(config: MatchingConfig, locations: Arc<dyn LocationResolver>) -> Self {
        Self { config, locations }
    }

    pub fn config(&self) -> &MatchingConfig {
        &self.config
    }

    pub fn is_qualifying(&self, result: &MatchResult) -> bool {
        result.score >= self.config.threshold
    }

    pub fn score(&self, posting: &JobPosting, profile: &SearchProfile) -> MatchResult {
        let (skills, matched_skills) = score_skills(posting, profile);
        let sub_scores = SubScores {
            skills,
            salary: self.score_salary(posting, profile),
            location: self.score_location(posting, profile),
            employment_type: score_employment_type(posting, profile),
            title: self.score_title(posting, profile),
        };
        MatchResult {
            score: self.composite(&sub_scores),
            sub_scores,
            matched_skills,
        }
    }

    fn composite(&self, s: &SubScores) -> f64 {
        let w = self.config.weights;
        let total_weight = w.sum();
        if total_weight.is_nan() || total_weight <= 0.0 {
            return 0.0;
        }
        let weighted = s.skills.clamp(0.0, 1.0) * w.skills
            + s.salary.clamp(0.0, 1.0) * w.salary
            + s.location.clamp(0.0, 1.0) * w.location
            + s.employment_type.clamp(0.0, 1.0) * w.employment_type
            + s.title.clamp(0.0, 1.0) * w.title;
        (weighted / total_weight * 100.0).clamp(0.0, 100.0)
    }

    fn score_salary(&self, posting: &JobPosting, profile: &SearchProfile) -> f64 {
        let Some((posting_min, posting_max)) = posting.salary.numeric_bounds() else {
            return self.config.salary_neutral;
        };
        if !profile.min_salary.is_finite() {
            return self.config.salary_neutral;
        }
        let wanted_min = profile.min_salary.max(0.0);
        let wanted_max = profile
            .max_salary
            .filter(|v| v.is_finite())
            .map(|v| v.max(wanted_min))
            .unwrap_or(f64::INFINITY);

        if posting_min <= wanted_max && posting_max >= wanted_min {
            1.0
        } else {
            0.0
        }
    }

    fn score_location(&self, posting: &JobPosting, profile: &SearchProfile) -> f64 {
        let Some(country) = profile
            .desired_country
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
        else {
            return 1.0;
        };
        let Some(location) = posting
            .location
            .as_deref()
            .map(str::trim)
            .filter(|l| !l.is_empty())
        else {
            return 0.0;
        };

        if location.eq_ignore_ascii_case(country)
            || location_segments(location).any(|seg| seg.eq_ignore_ascii_case(country))
            || self.locations.is_within_country(location, country)
        {
            1.0
        } else {
            0.0
        }
    }

    fn score_title(&self, posting: &JobPosting, profile: &SearchProfile) -> f64 {
        let posting_tokens = title_tokens(&posting.title);
        let best = profile
            .desired_titles
            .iter()
            .map(|t| title_tokens(t))
            .filter(|tokens| !tokens.is_empty())
            .map(|desired| {
                let hits = desired
                    .iter()
                    .filter(|d| {
                        posting_tokens.iter().any(|p| {
                            p == *d || jaro_winkler(p, d) >= self.config.title_similarity
                        })
                    })
                    .count();
                hits as f64 / desired.len() as f64
            })
            .fold(None, |acc: Option<f64>, v| Some(acc.map_or(v, |a| a.max(v))));
        best.unwrap_or(1.0)
    }
}

fn score_skills(posting: &JobPosting, profile: &SearchProfile) -> (f64, Vec<String>) {
    let mut seen = HashSet::new();
    let desired: Vec<(&str, String)> = profile
        .desired_skills
        .iter()
        .map(|s| (s.trim(), normalize_phrase(s)))
        .filter(|(_, norm)| !norm.is_empty() && seen.insert(norm.clone()))
        .collect();
    if desired.is_empty() {
        return (1.0, Vec::new());
    }

    let required: Vec<String> = posting
        .required_skills
        .iter()
        .map(|s| normalize_phrase(s))
        .filter(|s| !s.is_empty())
        .collect();

    let matched: Vec<String> = desired
        .iter()
        .filter(|(_, norm)| required.iter().any(|req| phrases_overlap(req, norm)))
        .map(|(original, _)| original.to_string())
        .collect();

    (matched.len() as f64 / desired.len() as f64, matched)
}

fn score_employment_type(posting: &JobPosting, profile: &SearchProfile) -> f64 {
    if profile.desired_employment_types.is_empty() {
        return 1.0;
    }
    let offered: HashSet<_> = posting.employment_types.iter().collect();
    if profile
        .desired_employment_types
        .iter()
        .any(|t| offered.contains(t))
    {
        1.0
    } else {
        0.0
    }
}

/// Lowercase, keep `+`/`#` (C++, C#), turn every other separator into one space.
fn normalize_phrase(raw: &str) -> String {
    raw.to_lowercase()
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '+' || c == '#' {
                c
            } else {
                ' '
            }
        })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Whole-word containment either way: "aws" matches "aws lambda", "rust" does not match "r".
fn phrases_overlap(a: &str, b: &str) -> bool {
    if a == b {
        return true;
    }
    let padded_a = format!(" {a} ");
    let padded_b = format!(" {b} ");
    padded_a.contains(&padded_b) || padded_b.contains(&padded_a)
}

fn title_tokens(raw: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    normalize_phrase(raw)
        .split(' ')
        .filter(|t| t.chars().count() > 1)
        .filter(|t| seen.insert(t.to_string()))
        .map(str::to_string)
        .collect()
}

fn location_segments(location: &str) -> impl Iterator<Item = &str> {
    location
        .split([',', '/', '|', '(', ')'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use jmn_core::{EmploymentType, JobStatus, SalaryBand, SalaryKind};
    use uuid::Uuid;

    struct VietnamCities;

    impl LocationResolver for VietnamCities {
        fn is_within_country(&self, location: &str, country: &str) -> bool {
            country.eq_ignore_ascii_case("vietnam") && location.to_lowercase().contains("hanoi")
        }
    }

    fn engine() -> MatchingEngine {
        MatchingEngine::new(MatchingConfig::default(), Arc::new(NoLocationLookup))
    }

    fn profile() -> SearchProfile {
        SearchProfile {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            name: "SG cloud".into(),
            desired_skills: vec!["Java".into(), "AWS".into()],
            desired_employment_types: vec![],
            desired_titles: vec![],
            desired_country: Some("Singapore".into()),
            min_salary: 50_000.0,
            max_salary: None,
        }
    }

    fn posting(location: &str) -> JobPosting {
        JobPosting {
            id: "job-1".into(),
            company_id: None,
            title: "Backend Engineer".into(),
            description: None,
            required_skills: vec!["Java".into(), "Kafka".into(), "AWS".into()],
            employment_types: vec![EmploymentType::FullTime],
            location: Some(location.into()),
            salary: SalaryBand {
                kinds: vec![SalaryKind::Range],
                min: Some(60_000.0),
                max: Some(80_000.0),
                currency: Some("SGD".into()),
                text: None,
            },
            posted_at: None,
            expires_at: None,
            is_fresher_friendly: false,
            status: JobStatus::Open,
        }
    }

    #[test]
    fn singapore_posting_qualifies_with_both_skills() {
        let engine = engine();
        let result = engine.score(&posting("Singapore"), &profile());
        assert_eq!(result.sub_scores.skills, 1.0);
        assert_eq!(result.matched_skills, vec!["Java", "AWS"]);
        assert_eq!(result.sub_scores.salary, 1.0);
        assert_eq!(result.sub_scores.location, 1.0);
        assert!((result.score - 100.0).abs() < 1e-9);
        assert!(engine.is_qualifying(&result));
    }

    #[test]
    fn foreign_posting_misses_location_and_threshold() {
        let engine = engine();
        let result = engine.score(&posting("Hanoi, Vietnam"), &profile());
        assert_eq!(result.sub_scores.location, 0.0);
        assert!(result.score < engine.config().threshold);
        assert!(!engine.is_qualifying(&result));
    }

    #[test]
    fn country_token_and_resolver_both_count_as_country_match() {
        let engine = MatchingEngine::new(MatchingConfig::default(), Arc::new(VietnamCities));
        let mut vn = profile();
        vn.desired_country = Some("Vietnam".into());

        let tokenized = engine.score(&posting("Hanoi, Vietnam"), &vn);
        assert_eq!(tokenized.sub_scores.location, 1.0);

        let city_only = engine.score(&posting("Hanoi"), &vn);
        assert_eq!(city_only.sub_scores.location, 1.0);
    }

    #[test]
    fn hyphenated_country_names_stay_whole() {
        let engine = engine();
        let mut guinea = profile();
        guinea.desired_country = Some("Guinea".into());
        let bissau = engine.score(&posting("Bissau, Guinea-Bissau"), &guinea);
        assert_eq!(bissau.sub_scores.location, 0.0);

        let mut timor = profile();
        timor.desired_country = Some("Timor-Leste".into());
        let dili = engine.score(&posting("Dili, Timor-Leste"), &timor);
        assert_eq!(dili.sub_scores.location, 1.0);
    }

    #[test]
    fn non_numeric_salary_gets_the_neutral_score() {
        let engine = engine();
        for kind in [SalaryKind::Negotiable, SalaryKind::Estimate] {
            let mut p = posting("Singapore");
            p.salary = SalaryBand {
                kinds: vec![kind],
                text: Some("Depends on experience".into()),
                ..Default::default()
            };
            let result = engine.score(&p, &profile());
            assert_eq!(result.sub_scores.salary, 0.5);
        }

        let mut unparsed = posting("Singapore");
        unparsed.salary = SalaryBand {
            kinds: vec![SalaryKind::Range],
            ..Default::default()
        };
        assert_eq!(engine.score(&unparsed, &profile()).sub_scores.salary, 0.5);
    }

    #[test]
    fn salary_bands_that_do_not_overlap_score_zero() {
        let engine = engine();
        let mut low = posting("Singapore");
        low.salary.min = Some(20_000.0);
        low.salary.max = Some(40_000.0);
        assert_eq!(engine.score(&low, &profile()).sub_scores.salary, 0.0);

        let mut capped = profile();
        capped.max_salary = Some(55_000.0);
        assert_eq!(
            engine.score(&posting("Singapore"), &capped).sub_scores.salary,
            0.0
        );
    }

    #[test]
    fn skills_match_case_insensitively_on_word_boundaries() {
        let engine = engine();
        let mut p = posting("Singapore");
        p.required_skills = vec!["java 17".into(), "AWS Lambda".into(), "R".into()];
        let mut prof = profile();
        prof.desired_skills = vec!["JAVA".into(), "aws".into(), "Rust".into(), "java".into()];

        let result = engine.score(&p, &prof);
        assert_eq!(result.matched_skills, vec!["JAVA", "aws"]);
        assert!((result.sub_scores.skills - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn employment_type_needs_an_intersection() {
        let engine = engine();
        let mut prof = profile();
        prof.desired_employment_types = vec![EmploymentType::Contract];
        assert_eq!(
            engine.score(&posting("Singapore"), &prof).sub_scores.employment_type,
            0.0
        );
        prof.desired_employment_types.push(EmploymentType::FullTime);
        assert_eq!(
            engine.score(&posting("Singapore"), &prof).sub_scores.employment_type,
            1.0
        );
    }

    #[test]
    fn title_overlap_takes_the_best_desired_title() {
        let engine = engine();
        let mut prof = profile();
        prof.desired_titles = vec!["Data Scientist".into(), "Backend Developer".into()];
        let result = engine.score(&posting("Singapore"), &prof);
        assert!((result.sub_scores.title - 0.5).abs() < 1e-9);

        prof.desired_titles = vec!["backend engineers".into()];
        let near = engine.score(&posting("Singapore"), &prof);
        assert_eq!(near.sub_scores.title, 1.0);
    }

    #[test]
    fn scores_stay_in_bounds_for_degenerate_inputs() {
        let config = MatchingConfig {
            weights: Weights {
                skills: 3.0,
                salary: 0.0,
                location: 1.0,
                employment_type: 0.0,
                title: 0.5,
            },
            ..MatchingConfig::default()
        };
        let engine = MatchingEngine::new(config, Arc::new(NoLocationLookup));
        let mut p = posting("");
        p.required_skills.clear();
        p.title = "!!!".into();
        let mut prof = profile();
        prof.min_salary = f64::NAN;
        prof.desired_titles = vec!["-".into(), "Engineer".into()];

        let result = engine.score(&p, &prof);
        assert!((0.0..=100.0).contains(&result.score));
        for s in [
            result.sub_scores.skills,
            result.sub_scores.salary,
            result.sub_scores.location,
            result.sub_scores.employment_type,
            result.sub_scores.title,
        ] {
            assert!((0.0..=1.0).contains(&s));
        }
    }

    #[test]
    fn config_validation_rejects_bad_values() {
        assert!(MatchingConfig::default().validate().is_ok());
        let zero = MatchingConfig {
            weights: Weights {
                skills: 0.0,
                salary: 0.0,
                location: 0.0,
                employment_type: 0.0,
                title: 0.0,
            },
            ..MatchingConfig::default()
        };
        assert!(zero.validate().is_err());
        let threshold = MatchingConfig {
            threshold: 120.0,
            ..MatchingConfig::default()
        };
        assert!(threshold.validate().is_err());
    }
}
