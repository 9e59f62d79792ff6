//! telex.hu topic listing scraper.
//!
//! Topic sections are paginated at `https://telex.hu/rovat/{topic}?oldal={page}`.
//! Each article on a page is a `div.list__item.article` block:
//!
//! ```html
//! <div class="list__item article">
//!   <a class="list__item__title" href="/kulfold/2025/06/10/slug"><div>Title</div></a>
//!   <div class="list__item__lead"><div>Lead paragraph</div></div>
//! </div>
//! ```
//!
//! The publication date is only available from the `/YYYY/MM/DD/` token in
//! the article link.

use super::FetchClient;
use crate::config::FetchSettings;
use crate::error::FetchError;
use crate::models::ListingEntry;
use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Client;
use scraper::{ElementRef, Html, Selector};
use std::time::Duration;
use tracing::{debug, instrument};

static ITEM: Lazy<Selector> = Lazy::new(|| selector("div.list__item.article"));
static TITLE_TEXT: Lazy<Selector> = Lazy::new(|| selector("a.list__item__title div"));
static LEAD_TEXT: Lazy<Selector> = Lazy::new(|| selector("div.list__item__lead div"));
static TITLE_LINK: Lazy<Selector> = Lazy::new(|| selector("a.list__item__title"));
static DATE_IN_PATH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"/(\d{4})/(\d{2})/(\d{2})/").expect("static regex"));

fn selector(css: &str) -> Selector {
    Selector::parse(css).expect("static selector")
}

/// Fetches listing pages over HTTP.
#[derive(Debug, Clone)]
pub struct HttpListingClient {
    client: Client,
    url_template: String,
}

impl HttpListingClient {
    pub fn new(settings: &FetchSettings) -> Result<Self, FetchError> {
        let client = Client::builder()
            .user_agent(settings.user_agent.clone())
            .timeout(Duration::from_secs(settings.request_timeout_secs))
            .build()
            .map_err(|source| FetchError::Http {
                url: settings.listing_url_template.clone(),
                source,
            })?;
        Ok(Self {
            client,
            url_template: settings.listing_url_template.clone(),
        })
    }

    pub fn page_url(&self, topic_id: &str, page: u32) -> String {
        listing_url(&self.url_template, topic_id, page)
    }
}

/// Substitutes `{topic}` and `{page}` in a listing URL template.
pub fn listing_url(template: &str, topic_id: &str, page: u32) -> String {
    template
        .replace("{topic}", &urlencoding::encode(topic_id))
        .replace("{page}", &page.to_string())
}

impl FetchClient for HttpListingClient {
    #[instrument(level = "debug", skip(self))]
    async fn get_page(&self, topic_id: &str, page: u32) -> Result<String, FetchError> {
        let url = self.page_url(topic_id, page);
        debug!(%url, "Requesting listing page");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|source| FetchError::Http {
                url: url.clone(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url,
                status: status.as_u16(),
            });
        }

        response
            .text()
            .await
            .map_err(|source| FetchError::Http { url, source })
    }
}

/// Parses every article block on a listing page, in page order.
pub fn parse_listing(html: &str) -> Vec<ListingEntry> {
    let document = Html::parse_document(html);
    document.select(&ITEM).map(parse_item).collect()
}

fn parse_item(item: ElementRef<'_>) -> ListingEntry {
    let title = item
        .select(&TITLE_TEXT)
        .next()
        .map(stripped_text)
        .unwrap_or_default();
    let lead = item
        .select(&LEAD_TEXT)
        .next()
        .map(stripped_text)
        .unwrap_or_default();
    let href = item
        .select(&TITLE_LINK)
        .next()
        .and_then(|a| a.value().attr("href"))
        .map(str::to_string);
    let date = href.as_deref().and_then(date_from_href);

    ListingEntry {
        title,
        lead,
        href,
        date,
    }
}

/// Text of an element with every text node trimmed and joined.
fn stripped_text(el: ElementRef<'_>) -> String {
    el.text().map(str::trim).filter(|s| !s.is_empty()).collect()
}

/// Extracts the `/YYYY/MM/DD/` date from an article link.
///
/// A token that is not a real calendar date yields `None`.
pub fn date_from_href(href: &str) -> Option<NaiveDate> {
    let caps = DATE_IN_PATH.captures(href)?;
    let year = caps[1].parse().ok()?;
    let month = caps[2].parse().ok()?;
    let day = caps[3].parse().ok()?;
    NaiveDate::from_ymd_opt(year, month, day)
}
