use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use crate::pipeline::SummaryStats;

/// A market index snapshot (KOSPI, KOSDAQ, ...)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketIndex {
    pub name: String,
    pub current_value: f64,
    pub change_value: f64,
    pub change_rate: f64,
    pub timestamp: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Rise,
    Fall,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Rise => "rise",
            Direction::Fall => "fall",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of a rising/falling ranking
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockRecord {
    pub rank: u32,
    pub name: String,
    pub current_price: i64,
    pub change_rate: f64,
    pub direction: Direction,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewsItem {
    pub title: String,
    pub summary: String,
}

/// Outcome of a single newsletter query
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewsletterResult {
    pub success: bool,
    pub newsletter: String,
    /// Guidance for rejected queries, or the error description for failed runs
    pub message: Option<String>,
    pub images: Vec<PathBuf>,
    pub summary: Option<SummaryStats>,
    pub timestamp: String,
    /// True when at least one feed was served from a fresh cache entry
    pub cached_data: bool,
    /// Cache keys of feeds that fell back to built-in data
    pub degraded_feeds: Vec<String>,
}

impl NewsletterResult {
    pub fn rejected(message: impl Into<String>) -> Self {
        Self::failure(message)
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            newsletter: String::new(),
            message: Some(message.into()),
            images: Vec::new(),
            summary: None,
            timestamp: now_timestamp(),
            cached_data: false,
            degraded_feeds: Vec::new(),
        }
    }

    pub fn is_degraded(&self) -> bool {
        !self.degraded_feeds.is_empty()
    }
}

pub(crate) fn now_timestamp() -> String {
    chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}
