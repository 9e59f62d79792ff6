//! Data models shared by the pipeline stages.
//!
//! - [`Topic`]: one news category, keyed by its URL slug
//! - [`RunContext`]: run-scoped dates passed explicitly to every stage
//! - [`ListingEntry`] / [`ArticleRecord`]: raw and accepted listing entries
//! - [`TopicDigest`]: summarizer output for one topic
//! - [`Notification`]: one email ready to be composed

use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};

/// A news category as configured in `config.yaml`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Topic {
    /// URL slug of the section, also the key into the prompt book.
    pub id: String,
    /// Human readable title with accents, e.g. "Külföld".
    pub display_name: String,
}

impl Topic {
    pub fn new(id: &str, display_name: &str) -> Self {
        Self {
            id: id.to_string(),
            display_name: display_name.to_string(),
        }
    }

    /// Title used in the email subject line.
    pub fn subject_title(&self) -> String {
        self.display_name.to_uppercase()
    }
}

/// Dates shared by every topic in a single run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunContext {
    pub today: NaiveDate,
    pub cutoff: NaiveDate,
    pub lookback_weeks: u32,
}

impl RunContext {
    /// Builds the context for a run on `today` looking `lookback_weeks` back.
    pub fn new(today: NaiveDate, lookback_weeks: u32) -> Self {
        let cutoff = today
            .checked_sub_days(Days::new(7 * u64::from(lookback_weeks)))
            .unwrap_or(NaiveDate::MIN);
        Self {
            today,
            cutoff,
            lookback_weeks,
        }
    }

    /// The run date as `YYYY-MM-DD`.
    pub fn today_str(&self) -> String {
        self.today.format("%Y-%m-%d").to_string()
    }
}

/// One entry parsed from a listing page, before date filtering.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ListingEntry {
    pub title: String,
    pub lead: String,
    pub href: Option<String>,
    /// `None` when the link carries no `/YYYY/MM/DD/` token.
    pub date: Option<NaiveDate>,
}

/// An article accepted for summarization.
///
/// Only built when the date is known and both text fields are non-empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArticleRecord {
    pub date: NaiveDate,
    pub title: String,
    pub lead: String,
}

impl ArticleRecord {
    /// Accepts `entry` if it is dated on or after `cutoff` and has text.
    pub fn from_entry(entry: &ListingEntry, cutoff: NaiveDate) -> Option<Self> {
        let date = entry.date?;
        if date < cutoff || entry.title.is_empty() || entry.lead.is_empty() {
            return None;
        }
        Some(Self {
            date,
            title: entry.title.clone(),
            lead: entry.lead.clone(),
        })
    }
}

/// Summaries produced for one topic.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TopicDigest {
    pub topic_id: String,
    pub articles_collected: usize,
    /// One trimmed summary per batch, in batch order.
    pub batch_summaries: Vec<String>,
    pub final_summary: String,
}

/// Everything needed to build one outgoing email.
#[derive(Debug, Clone)]
pub struct Notification {
    pub recipient: String,
    pub subject: String,
    pub body: String,
    pub image_path: std::path::PathBuf,
}
