//! Per-topic orchestration: fetch → summarize → visualize → deliver.
//!
//! Topics run one after another and every external call is awaited before
//! the next one starts. A failing topic is logged and does not stop the
//! others; the run as a whole reports failure if any topic failed.

use crate::api::GenerationClient;
use crate::config::{PromptBook, Settings};
use crate::error::{PipelineError, VisualError};
use crate::models::{Notification, RunContext, Topic};
use crate::outputs::email::{self, compose};
use crate::outputs::gmail::{DeliveryReceipt, MailClient};
use crate::outputs::wordcloud::{ImageRenderer, clean, image_path, word_frequencies};
use crate::scrapers::{FetchClient, PageLimits, fetch_topic};
use crate::summarize::summarize;
use crate::utils::{summary_path, truncate_for_log};
use std::collections::HashSet;
use std::path::PathBuf;
use tracing::{debug, error, info, instrument, warn};

/// How a topic ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopicOutcome {
    /// Nothing on or after the cutoff.
    NoArticles,
    /// Image written, mail disabled.
    Rendered { image: PathBuf },
    Delivered {
        image: PathBuf,
        receipt: DeliveryReceipt,
    },
}

/// Stage collaborators and run-scoped inputs.
pub struct Pipeline<'a, F, G, R, M> {
    pub settings: &'a Settings,
    pub ctx: RunContext,
    pub prompts: &'a PromptBook,
    pub stopwords: &'a HashSet<String>,
    pub fetcher: F,
    pub generator: G,
    pub renderer: R,
    /// `None` disables delivery.
    pub mailer: Option<M>,
    pub save_summaries: bool,
}

impl<F, G, R, M> Pipeline<'_, F, G, R, M>
where
    F: FetchClient,
    G: GenerationClient,
    R: ImageRenderer,
    M: MailClient,
{
    fn page_limits(&self) -> PageLimits {
        PageLimits {
            max_pages: self.settings.fetch.max_pages,
            max_inconclusive_pages: self.settings.fetch.max_inconclusive_pages,
        }
    }

    /// Runs every stage for one topic.
    #[instrument(level = "info", skip_all, fields(topic = %topic.id))]
    pub async fn run_topic(&self, topic: &Topic) -> Result<TopicOutcome, PipelineError> {
        let templates = self.prompts.get(&topic.id)?;

        let articles = fetch_topic(&self.fetcher, topic, self.ctx.cutoff, self.page_limits()).await?;
        if articles.is_empty() {
            warn!(cutoff = %self.ctx.cutoff, "No articles since cutoff; skipping topic");
            return Ok(TopicOutcome::NoArticles);
        }

        let digest = summarize(
            &self.generator,
            &topic.id,
            &articles,
            templates,
            &self.ctx,
            self.settings.batch_size,
        )
        .await?;
        debug!(
            topic = %digest.topic_id,
            articles = digest.articles_collected,
            final_summary = %truncate_for_log(&digest.final_summary, 300),
            "Final summary"
        );

        let text = clean(&digest.batch_summaries, &self.settings.visual.label_phrases);
        let frequencies = word_frequencies(&text, self.stopwords);
        debug!(
            distinct_words = frequencies.len(),
            top = ?frequencies.iter().take(10).collect::<Vec<_>>(),
            "Keyword frequencies"
        );
        let image = self.renderer.render(
            &frequencies,
            &image_path(&self.settings.output_dir, &topic.id, self.ctx.today),
        )?;

        if self.save_summaries {
            let path = summary_path(&self.settings.output_dir, &topic.id, self.ctx.today);
            tokio::fs::write(&path, &digest.final_summary)
                .await
                .map_err(VisualError::from)?;
            info!(path = %path.display(), "Saved final summary");
        }

        let Some(mailer) = &self.mailer else {
            info!(image = %image.display(), "Mail disabled; topic done");
            return Ok(TopicOutcome::Rendered { image });
        };

        let mail = &self.settings.mail;
        let notification = Notification {
            recipient: mail.recipient.clone(),
            subject: email::subject(&mail.subject_template, topic, self.ctx.today),
            body: digest.final_summary,
            image_path: image.clone(),
        };
        let raw = compose(&mail.sender, &notification).await?;
        let receipt = mailer.send(&raw).await?;
        info!(
            recipient = %notification.recipient,
            id = %receipt.id,
            "E-mail sent"
        );
        Ok(TopicOutcome::Delivered { image, receipt })
    }

    /// Runs `topics` in order and reports how each one ended.
    #[instrument(level = "info", skip_all, fields(topics = topics.len(), today = %self.ctx.today))]
    pub async fn run(&self, topics: &[Topic]) -> Result<Vec<(String, TopicOutcome)>, PipelineError> {
        let mut outcomes = Vec::new();
        let mut failed = 0usize;

        for topic in topics {
            match self.run_topic(topic).await {
                Ok(outcome) => {
                    info!(topic = %topic.id, ?outcome, "Topic finished");
                    outcomes.push((topic.id.clone(), outcome));
                }
                Err(e) => {
                    error!(topic = %topic.id, error = %e, "Topic failed");
                    failed += 1;
                }
            }
        }

        if failed > 0 {
            return Err(PipelineError::TopicsFailed {
                failed,
                total: topics.len(),
            });
        }
        Ok(outcomes)
    }
}
