//! Search progress checkpoint.
//!
//! A JSON object keyed by search URL, holding the next page to fetch, the
//! listings of that page already handled, and when it was recorded. Written
//! after every search page and cleared once a search runs out of results, so
//! an interrupted run can pick up where it stopped.

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::Local;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProgressEntry {
    /// Next page to fetch, 1-based.
    pub page: u32,
    /// Listings on `page` already extracted before the run stopped.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub processed: Vec<String>,
    pub timestamp: String,
}

pub struct ProgressStore {
    path: PathBuf,
}

impl ProgressStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// All checkpoints; an absent file means none.
    pub fn load(&self) -> Result<BTreeMap<String, ProgressEntry>> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let text = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read {}", self.path.display()))?;
        if text.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse {}", self.path.display()))
    }

    /// Checkpoint to resume `search_url` from, if one exists.
    pub fn resume_point(&self, search_url: &str) -> Result<Option<ProgressEntry>> {
        let entry = self.load()?.remove(search_url);
        if let Some(entry) = &entry {
            info!(
                "Resuming {} from page {} ({} listings already done)",
                search_url,
                entry.page,
                entry.processed.len()
            );
        }
        Ok(entry)
    }

    /// Saves `next_page` as the resume point. `processed` lists the links of
    /// that page already handled; empty when the page has not been started.
    pub fn record(&self, search_url: &str, next_page: u32, processed: &[String]) -> Result<()> {
        let mut all = self.load()?;
        all.insert(
            search_url.to_string(),
            ProgressEntry {
                page: next_page,
                processed: processed.to_vec(),
                timestamp: Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            },
        );
        self.save(&all)?;
        debug!("Saved progress for {}: next page {}", search_url, next_page);
        Ok(())
    }

    /// Drops the checkpoint for a finished search.
    pub fn clear(&self, search_url: &str) -> Result<()> {
        let mut all = self.load()?;
        if all.remove(search_url).is_some() {
            self.save(&all)?;
        }
        Ok(())
    }

    fn save(&self, all: &BTreeMap<String, ProgressEntry>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
        }
        let json = serde_json::to_string_pretty(all)?;
        std::fs::write(&self.path, json)
            .with_context(|| format!("Failed to write {}", self.path.display()))
    }
}
