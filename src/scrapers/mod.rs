//! Topic listing scrapers.
//!
//! Fetching is split in two:
//!
//! 1. **Transport**: a [`FetchClient`] returns the raw HTML of one listing
//!    page ([`telex::HttpListingClient`] over reqwest, fakes in tests)
//! 2. **Pagination**: [`fetch_topic`] walks pages 1, 2, … parsing each with
//!    [`telex::parse_listing`] and decides when to stop
//!
//! # Stopping rule
//!
//! | Page contents | Action |
//! |---------------|--------|
//! | no entries | stop |
//! | some entry dated on/after the cutoff | keep going |
//! | dated entries, all older than the cutoff | stop |
//! | entries, none dated | inconclusive: keep going, at most `max_inconclusive_pages` in a row |
//!
//! `max_pages` bounds the walk in every case.

pub mod telex;

use crate::error::FetchError;
use crate::models::{ArticleRecord, ListingEntry, Topic};
use crate::retry::Retrying;
use chrono::NaiveDate;
use tracing::{debug, info, instrument, warn};

/// Returns the HTML body of one listing page of a topic.
pub trait FetchClient {
    async fn get_page(&self, topic_id: &str, page: u32) -> Result<String, FetchError>;
}

impl<T: FetchClient> FetchClient for Retrying<T> {
    async fn get_page(&self, topic_id: &str, page: u32) -> Result<String, FetchError> {
        self.policy
            .run("listing page", || self.inner.get_page(topic_id, page))
            .await
    }
}

/// Bounds on how far pagination may go.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageLimits {
    pub max_pages: u32,
    pub max_inconclusive_pages: u32,
}

impl Default for PageLimits {
    fn default() -> Self {
        Self {
            max_pages: 50,
            max_inconclusive_pages: 2,
        }
    }
}

/// What one page tells us about whether to continue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageVerdict {
    /// No entries at all.
    Empty,
    /// At least one entry on or after the cutoff.
    HasRecent,
    /// Dated entries exist but every one of them is older than the cutoff.
    AllOlder,
    /// Entries exist but none carries a date.
    Inconclusive,
}

impl PageVerdict {
    /// Classifies one parsed listing page.
    ///
    /// # Arguments
    ///
    /// * `entries` - everything parsed from the page, dated or not
    /// * `cutoff` - earliest publication date still collected
    ///
    /// # Returns
    ///
    /// [`PageVerdict::HasRecent`] as soon as one entry is on or after the
    /// cutoff, otherwise a verdict based on whether any entry was dated.
    pub fn of(entries: &[ListingEntry], cutoff: NaiveDate) -> Self {
        if entries.is_empty() {
            return PageVerdict::Empty;
        }
        let mut any_dated = false;
        for date in entries.iter().filter_map(|e| e.date) {
            if date >= cutoff {
                return PageVerdict::HasRecent;
            }
            any_dated = true;
        }
        if any_dated {
            PageVerdict::AllOlder
        } else {
            PageVerdict::Inconclusive
        }
    }
}

/// Collects every article of `topic` dated on or after `cutoff`.
///
/// Records keep listing order. A transport error on any page fails the topic.
#[instrument(level = "info", skip_all, fields(topic = %topic.id, %cutoff))]
pub async fn fetch_topic<C: FetchClient>(
    client: &C,
    topic: &Topic,
    cutoff: NaiveDate,
    limits: PageLimits,
) -> Result<Vec<ArticleRecord>, FetchError> {
    let mut articles = Vec::new();
    let mut inconclusive_run = 0u32;
    let mut page = 1u32;

    loop {
        if page > limits.max_pages {
            warn!(max_pages = limits.max_pages, "Reached page limit; stopping");
            break;
        }

        let html = client.get_page(&topic.id, page).await?;
        let entries = telex::parse_listing(&html);
        let verdict = PageVerdict::of(&entries, cutoff);

        let before = articles.len();
        for entry in &entries {
            match ArticleRecord::from_entry(entry, cutoff) {
                Some(record) => articles.push(record),
                None => debug!(
                    title = %entry.title,
                    date = ?entry.date,
                    "Skipping entry (undated, older than cutoff or missing text)"
                ),
            }
        }
        debug!(
            page,
            entries = entries.len(),
            kept = articles.len() - before,
            ?verdict,
            "Parsed listing page"
        );

        match verdict {
            PageVerdict::Empty => {
                debug!(page, "No more entries");
                break;
            }
            PageVerdict::AllOlder => {
                debug!(page, "Page is older than the cutoff");
                break;
            }
            PageVerdict::Inconclusive => {
                inconclusive_run += 1;
                if inconclusive_run > limits.max_inconclusive_pages {
                    warn!(
                        page,
                        consecutive = inconclusive_run,
                        "Too many pages without dated entries; stopping"
                    );
                    break;
                }
                debug!(page, consecutive = inconclusive_run, "Page has no dated entries; continuing");
            }
            PageVerdict::HasRecent => inconclusive_run = 0,
        }

        page += 1;
    }

    info!(
        count = articles.len(),
        pages = page.min(limits.max_pages),
        "Collected topic articles"
    );
    Ok(articles)
}
