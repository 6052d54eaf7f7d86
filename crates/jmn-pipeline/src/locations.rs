//! City-to-country lookup backed by `rules/locations.yaml`.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::matching::LocationResolver;

#[derive(Debug, Clone, Deserialize)]
struct LocationsFile {
    #[allow(dead_code)]
    version: u32,
    #[serde(default)]
    countries: Vec<CountryEntry>,
}

#[derive(Debug, Clone, Deserialize)]
struct CountryEntry {
    country: String,
    #[serde(default)]
    aliases: Vec<String>,
    #[serde(default)]
    places: Vec<String>,
}

impl CountryEntry {
    fn names(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.country.as_str()).chain(self.aliases.iter().map(String::as_str))
    }

    fn is_named(&self, country: &str) -> bool {
        self.names().any(|n| n.eq_ignore_ascii_case(country))
    }
}

#[derive(Debug, Clone, Default)]
pub struct LocationDirectory {
    countries: Vec<CountryEntry>,
}

impl LocationDirectory {
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let file: LocationsFile = serde_yaml::from_str(yaml).context("parsing locations rules")?;
        Ok(Self {
            countries: file.countries,
        })
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        Self::from_yaml_str(&text).with_context(|| format!("loading {}", path.display()))
    }

    pub fn country_count(&self) -> usize {
        self.countries.len()
    }
}

impl LocationResolver for LocationDirectory {
    fn is_within_country(&self, location: &str, country: &str) -> bool {
        let Some(entry) = self.countries.iter().find(|c| c.is_named(country.trim())) else {
            return false;
        };
        let padded = format!(" {} ", words(location));
        entry
            .names()
            .chain(entry.places.iter().map(String::as_str))
            .map(words)
            .filter(|name| !name.is_empty())
            .any(|name| padded.contains(&format!(" {name} ")))
    }
}

fn words(raw: &str) -> String {
    raw.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}
