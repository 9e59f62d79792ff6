//! Run configuration loaded from YAML.
//!
//! [`Settings`] holds everything fixed at the top of a run: lookback window,
//! batch size, model, topics and the per-stage sections. Every field has a
//! serde default so a minimal `config.yaml` only names what differs.
//! Prompt templates live in a separate YAML file loaded into a [`PromptBook`].

use crate::error::ConfigError;
use crate::models::Topic;
use lettre::message::Mailbox;
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::{info, instrument};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub lookback_weeks: u32,
    pub batch_size: usize,
    pub model_name: String,
    pub temperature: f32,
    pub topics: Vec<Topic>,
    pub prompts_path: PathBuf,
    pub output_dir: PathBuf,
    pub fetch: FetchSettings,
    pub generation: GenerationSettings,
    pub visual: VisualSettings,
    pub mail: MailSettings,
    pub retry: RetrySettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            lookback_weeks: 1,
            batch_size: 5,
            model_name: "gpt-4o-mini".to_string(),
            temperature: 0.7,
            topics: vec![
                Topic::new("kulfold", "Külföld"),
                Topic::new("belfold", "Belföld"),
                Topic::new("gazdasag", "Gazdaság"),
            ],
            prompts_path: PathBuf::from("prompts.yaml"),
            output_dir: PathBuf::from("."),
            fetch: FetchSettings::default(),
            generation: GenerationSettings::default(),
            visual: VisualSettings::default(),
            mail: MailSettings::default(),
            retry: RetrySettings::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FetchSettings {
    /// Listing URL with `{topic}` and `{page}` placeholders.
    pub listing_url_template: String,
    pub user_agent: String,
    /// Hard cap on pages requested per topic.
    pub max_pages: u32,
    /// Consecutive pages without any dated entry tolerated before stopping.
    pub max_inconclusive_pages: u32,
    pub request_timeout_secs: u64,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            listing_url_template: "https://telex.hu/rovat/{topic}?oldal={page}".to_string(),
            user_agent: concat!("weekly_digest/", env!("CARGO_PKG_VERSION")).to_string(),
            max_pages: 50,
            max_inconclusive_pages: 2,
            request_timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GenerationSettings {
    pub api_base: String,
    /// YAML file holding `openai_api_key`, used when no key is given on the CLI.
    pub credentials_path: Option<PathBuf>,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            api_base: "https://api.openai.com/v1".to_string(),
            credentials_path: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VisualSettings {
    /// Language specific stopwords, one per line.
    pub stopwords_path: PathBuf,
    pub font_path: PathBuf,
    pub width: u32,
    pub height: u32,
    pub max_words: usize,
    pub min_font_size: f32,
    pub max_font_size: f32,
    /// Template labels stripped from summaries before counting words.
    pub label_phrases: Vec<String>,
}

impl Default for VisualSettings {
    fn default() -> Self {
        Self {
            stopwords_path: PathBuf::from("hungarian_stopwords.txt"),
            font_path: PathBuf::from("/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf"),
            width: 800,
            height: 800,
            max_words: 200,
            min_font_size: 10.0,
            max_font_size: 120.0,
            label_phrases: vec![
                "Fő gazdasági esemény:".to_string(),
                "Érintett szektor(ok):".to_string(),
                "Rövid leírás:".to_string(),
                "Összefoglalás:".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MailSettings {
    pub sender: String,
    pub recipient: String,
    pub client_secret_path: PathBuf,
    pub token_path: PathBuf,
    /// Subject with `{title}` and `{date}` placeholders.
    pub subject_template: String,
}

impl Default for MailSettings {
    fn default() -> Self {
        Self {
            sender: String::new(),
            recipient: String::new(),
            client_secret_path: PathBuf::from("client_secret.json"),
            token_path: PathBuf::from("gmail_api_token.json"),
            subject_template: "Heti hírösszefoglaló {title} témakörben, {date}".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_retries: usize,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: 1,
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
        }
    }
}

impl MailSettings {
    /// Checks that `sender` and `recipient` are deliverable addresses.
    ///
    /// Only needed when mail is enabled, so it is not part of
    /// [`Settings::validate`].
    ///
    /// # Returns
    ///
    /// `ConfigError::Invalid` naming the first field that does not parse.
    pub fn validate_addresses(&self) -> Result<(), ConfigError> {
        for (field, address) in [("mail.sender", &self.sender), ("mail.recipient", &self.recipient)] {
            address.parse::<Mailbox>().map_err(|e| {
                ConfigError::Invalid(format!("{field} '{address}' is not a valid address: {e}"))
            })?;
        }
        Ok(())
    }
}

impl Settings {
    /// Reads and validates a settings file.
    #[instrument(level = "info", skip_all, fields(path = %path.display()))]
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = read_to_string(path)?;
        let settings: Settings = serde_yaml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        settings.validate()?;
        info!(
            topics = settings.topics.len(),
            lookback_weeks = settings.lookback_weeks,
            batch_size = settings.batch_size,
            model = %settings.model_name,
            "Loaded configuration"
        );
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::Invalid("batch_size must be at least 1".into()));
        }
        if self.topics.is_empty() {
            return Err(ConfigError::Invalid("no topics configured".into()));
        }
        if !self.fetch.listing_url_template.contains("{page}") {
            return Err(ConfigError::Invalid(
                "fetch.listing_url_template must contain {page}".into(),
            ));
        }
        if self.visual.min_font_size <= 0.0 || self.visual.max_font_size < self.visual.min_font_size {
            return Err(ConfigError::Invalid(
                "visual font sizes must satisfy 0 < min_font_size <= max_font_size".into(),
            ));
        }
        Ok(())
    }
}

/// The two templates used for one topic.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct PromptTemplates {
    pub batch_prompt: String,
    pub final_prompt: String,
}

/// Prompt templates keyed by topic id.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct PromptBook(BTreeMap<String, PromptTemplates>);

impl PromptBook {
    #[instrument(level = "info", skip_all, fields(path = %path.display()))]
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = read_to_string(path)?;
        let book = Self::from_yaml(&raw).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        info!(topics = book.0.len(), "Loaded prompt templates");
        Ok(book)
    }

    pub fn from_yaml(raw: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(raw)
    }

    pub fn get(&self, topic_id: &str) -> Result<&PromptTemplates, ConfigError> {
        self.0
            .get(topic_id)
            .ok_or_else(|| ConfigError::MissingPrompts(topic_id.to_string()))
    }

    /// Fails on the first topic without templates.
    pub fn ensure_covers(&self, topics: &[Topic]) -> Result<(), ConfigError> {
        topics.iter().try_for_each(|t| self.get(&t.id).map(|_| ()))
    }
}

/// Loads a newline-delimited stopword file. Blank lines are ignored.
#[instrument(level = "info", skip_all, fields(path = %path.display()))]
pub fn load_stopwords(path: &Path) -> Result<HashSet<String>, ConfigError> {
    let raw = read_to_string(path)?;
    let words = parse_stopwords(&raw);
    info!(count = words.len(), "Loaded stopwords");
    Ok(words)
}

pub fn parse_stopwords(raw: &str) -> HashSet<String> {
    raw.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Reads `openai_api_key` from a YAML credentials file.
pub fn load_api_key(path: &Path) -> Result<String, ConfigError> {
    #[derive(Deserialize)]
    struct Credentials {
        openai_api_key: String,
    }

    let raw = read_to_string(path)?;
    let creds: Credentials = serde_yaml::from_str(&raw).map_err(|source| ConfigError::Parse {
        path: path.display().to_string(),
        source,
    })?;
    Ok(creds.openai_api_key)
}

fn read_to_string(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.display().to_string(),
        source,
    })
}
