//! # Weekly Digest
//!
//! Collects a week of articles per topic from a paginated news listing,
//! condenses them with an OpenAI-compatible chat model, draws a keyword
//! cloud from the intermediate summaries and mails the result through Gmail.
//!
//! ## Usage
//!
//! ```sh
//! weekly_digest --config config.yaml
//! weekly_digest -c config.yaml -t gazdasag --no-email --save-summaries
//! ```
//!
//! ## Architecture
//!
//! Each topic goes through the same stages, one topic at a time:
//! 1. **Fetching**: walk listing pages until entries are older than the cutoff
//! 2. **Summarizing**: one call per batch of articles, then one final call
//! 3. **Visualizing**: clean the batch summaries and render a word cloud
//! 4. **Delivering**: compose an HTML mail with the image inline and send it

use chrono::Local;
use clap::Parser;
use reqwest::Client;
use std::error::Error;
use std::time::Duration;
use tracing::{debug, error, info, instrument};
use tracing_subscriber::{EnvFilter, fmt as tfmt};

mod api;
mod cli;
mod config;
mod error;
mod models;
mod outputs;
mod pipeline;
mod retry;
mod scrapers;
mod summarize;
mod utils;

use api::OpenAiClient;
use cli::Cli;
use config::{PromptBook, Settings, load_api_key, load_stopwords};
use error::{ConfigError, MailError};
use models::RunContext;
use outputs::gmail::{self, GmailClient};
use outputs::wordcloud::{WordCloud, stopword_set};
use pipeline::Pipeline;
use retry::{RetryPolicy, Retrying};
use scrapers::telex::HttpListingClient;
use utils::ensure_writable_dir;

#[tokio::main]
#[instrument]
async fn main() -> Result<(), Box<dyn Error>> {
    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    let start_time = std::time::Instant::now();
    info!("weekly_digest starting up");

    let args = Cli::parse();
    debug!(config = %args.config.display(), topics = ?args.topics, no_email = args.no_email, "Parsed CLI arguments");

    // ---- Settings, prompts, stopwords ----
    let mut settings = Settings::load(&args.config)?;
    if !args.topics.is_empty() {
        settings.topics.retain(|t| args.topics.contains(&t.id));
        if settings.topics.is_empty() {
            return Err(ConfigError::Invalid(format!(
                "none of the requested topics {:?} are configured",
                args.topics
            ))
            .into());
        }
    }

    if !args.no_email {
        settings.mail.validate_addresses()?;
    }

    let prompts = PromptBook::load(&settings.prompts_path)?;
    prompts.ensure_covers(&settings.topics)?;
    let stopwords = stopword_set(load_stopwords(&settings.visual.stopwords_path)?);
    info!(stopwords = stopwords.len(), "Loaded stopwords");
    let renderer = WordCloud::new(settings.visual.clone())?;

    // Early check: output dir must be writable before any paid call
    if let Err(e) = ensure_writable_dir(&settings.output_dir).await {
        error!(
            path = %settings.output_dir.display(),
            error = %e,
            "Output directory is not writable (fix perms or choose a different path)"
        );
        return Err(e.into());
    }

    let ctx = RunContext::new(Local::now().date_naive(), settings.lookback_weeks);
    info!(today = %ctx.today, cutoff = %ctx.cutoff, "Run context initialized");

    // ---- Collaborators ----
    let api_key = match args.openai_api_key.clone() {
        Some(key) => key,
        None => match &settings.generation.credentials_path {
            Some(path) => load_api_key(path)?,
            None => {
                return Err(ConfigError::Invalid(
                    "no API key: pass --openai-api-key, set OPENAI_API_KEY or generation.credentials_path"
                        .into(),
                )
                .into());
            }
        },
    };

    let policy = RetryPolicy::from_settings(&settings.retry);
    let generator = Retrying::new(
        OpenAiClient::new(
            &settings.generation.api_base,
            api_key,
            settings.model_name.clone(),
            settings.temperature,
            Duration::from_secs(settings.fetch.request_timeout_secs),
        )?,
        policy,
    );
    let fetcher = Retrying::new(HttpListingClient::new(&settings.fetch)?, policy);

    let mailer = if args.no_email {
        info!("Mail delivery disabled");
        None
    } else {
        let http = Client::builder()
            .timeout(Duration::from_secs(settings.fetch.request_timeout_secs))
            .build()
            .map_err(MailError::from)?;
        let credential = gmail::authenticate(&http, &settings.mail).await?;
        Some(Retrying::new(GmailClient::new(http, credential), policy))
    };

    // ---- Run ----
    let pipeline = Pipeline {
        settings: &settings,
        ctx,
        prompts: &prompts,
        stopwords: &stopwords,
        fetcher,
        generator,
        renderer,
        mailer,
        save_summaries: args.save_summaries,
    };
    let result = pipeline.run(&settings.topics).await;

    let elapsed = start_time.elapsed();
    info!(
        ?elapsed,
        secs = elapsed.as_secs(),
        millis = elapsed.subsec_millis(),
        "Execution complete"
    );

    result?;
    Ok(())
}
