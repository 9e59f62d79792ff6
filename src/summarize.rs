//! Two-level topic summarization.
//!
//! The generation service cannot take a whole week of articles in one
//! request, so a topic is summarized in two passes:
//!
//! 1. articles are split into batches of `batch_size` and each batch is
//!    summarized on its own, keeping only the generated text
//! 2. all batch summaries are sent together with the topic's final template
//!    to produce one cohesive summary
//!
//! Calls are awaited one at a time, in batch order. Any failed call aborts
//! the topic.

use crate::api::GenerationClient;
use crate::config::PromptTemplates;
use crate::error::GenerationError;
use crate::models::{ArticleRecord, RunContext, TopicDigest};
use itertools::Itertools;
use tracing::{debug, info, instrument};

/// Contiguous batches of at most `batch_size` articles, in input order.
pub fn batches(articles: &[ArticleRecord], batch_size: usize) -> Vec<&[ArticleRecord]> {
    articles.chunks(batch_size.max(1)).collect()
}

/// Replaces the run date and lookback placeholders in a template.
///
/// Both the parenthesised form `({{TODAY}})` and the bare `{{TODAY}}` are
/// accepted; the same goes for `WEEKSBACK`.
pub fn fill_template(template: &str, ctx: &RunContext) -> String {
    let today = ctx.today_str();
    let weeks = ctx.lookback_weeks.to_string();
    template
        .replace("({{TODAY}})", &today)
        .replace("({{WEEKSBACK}})", &weeks)
        .replace("{{TODAY}}", &today)
        .replace("{{WEEKSBACK}}", &weeks)
}

/// Numbered title/lead listing of one batch.
pub fn render_batch(batch: &[ArticleRecord]) -> String {
    batch
        .iter()
        .enumerate()
        .map(|(i, a)| format!("{}. {}\n   {}\n\n", i + 1, a.title, a.lead))
        .collect()
}

/// Builds the request for one batch.
///
/// # Arguments
///
/// * `template` - the topic's batch template, placeholders already filled
/// * `batch` - the articles of this batch, in listing order
///
/// # Returns
///
/// The template, a blank line, then the numbered article listing.
pub fn batch_prompt(template: &str, batch: &[ArticleRecord]) -> String {
    format!("{}\n\n{}", template, render_batch(batch))
}

/// Builds the request that merges all batch summaries.
///
/// # Arguments
///
/// * `template` - the topic's final template, placeholders already filled
/// * `summaries` - the trimmed batch summaries, in batch order
///
/// # Returns
///
/// The template followed by the summaries, each separated by a blank line.
pub fn final_prompt(template: &str, summaries: &[String]) -> String {
    // Blank line after the template, same as batch prompts, so the last
    // template line never runs into the first summary.
    format!("{}\n\n{}", template, summaries.iter().join("\n\n"))
}

/// Summarizes one topic's articles.
///
/// Issues `ceil(N / batch_size)` batch requests followed by one final
/// request. With no articles nothing is requested and the digest is empty.
#[instrument(level = "info", skip_all, fields(topic = %topic_id, articles = articles.len()))]
pub async fn summarize<G: GenerationClient>(
    client: &G,
    topic_id: &str,
    articles: &[ArticleRecord],
    templates: &PromptTemplates,
    ctx: &RunContext,
    batch_size: usize,
) -> Result<TopicDigest, GenerationError> {
    let mut digest = TopicDigest {
        topic_id: topic_id.to_string(),
        articles_collected: articles.len(),
        ..Default::default()
    };
    if articles.is_empty() {
        info!("No articles; skipping generation");
        return Ok(digest);
    }

    let batch_template = fill_template(&templates.batch_prompt, ctx);
    let final_template = fill_template(&templates.final_prompt, ctx);
    let batches = batches(articles, batch_size);
    info!(batches = batches.len(), "Summarizing batches");

    for (i, batch) in batches.iter().enumerate() {
        let prompt = batch_prompt(&batch_template, batch);
        debug!(batch = i + 1, size = batch.len(), "Sending batch");
        let summary = client.generate(&prompt).await?;
        digest.batch_summaries.push(summary.trim().to_string());
    }

    let prompt = final_prompt(&final_template, &digest.batch_summaries);
    debug!(prompt_chars = prompt.chars().count(), "Requesting final summary");
    digest.final_summary = client.generate(&prompt).await?.trim().to_string();

    info!(
        batch_summaries = digest.batch_summaries.len(),
        final_chars = digest.final_summary.chars().count(),
        "Topic summarized"
    );
    Ok(digest)
}
