//! Error types for each pipeline stage.
//!
//! Every stage owns a `thiserror` enum. Errors classify themselves as
//! transient (worth one more attempt, see [`crate::retry`]) or not, and the
//! top-level [`PipelineError`] tells configuration problems apart from
//! per-topic failures so `main` can fail fast on the former.

use thiserror::Error;

/// Implemented by errors that know whether retrying could help.
pub trait Transient {
    fn is_transient(&self) -> bool;
}

/// `true` for statuses a server may answer differently on the next attempt.
pub fn is_retryable_status(status: u16) -> bool {
    status == 429 || (500..600).contains(&status)
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("no prompt templates for topic '{0}'")]
    MissingPrompts(String),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("HTTP request for {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} returned status {status}")]
    Status { url: String, status: u16 },
}

impl Transient for FetchError {
    fn is_transient(&self) -> bool {
        match self {
            FetchError::Http { source, .. } => !source.is_builder(),
            FetchError::Status { status, .. } => is_retryable_status(*status),
        }
    }
}

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("generation request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("generation service returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("generation response had no content")]
    EmptyResponse,
}

impl Transient for GenerationError {
    fn is_transient(&self) -> bool {
        match self {
            GenerationError::Http(e) => !e.is_builder() && !e.is_decode(),
            GenerationError::Status { status, .. } => is_retryable_status(*status),
            GenerationError::EmptyResponse => false,
        }
    }
}

#[derive(Debug, Error)]
pub enum VisualError {
    #[error("no words left to draw after removing stopwords")]
    NoWords,

    #[error("failed to load font {path}: {reason}")]
    Font { path: String, reason: String },

    #[error("failed to write image {path}: {source}")]
    Image {
        path: String,
        #[source]
        source: image::ImageError,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum MailError {
    #[error("mail HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("mail service returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("invalid address '{address}': {reason}")]
    Address { address: String, reason: String },

    #[error("failed to build message: {0}")]
    Message(String),

    #[error("credential error: {0}")]
    Credential(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Transient for MailError {
    fn is_transient(&self) -> bool {
        match self {
            MailError::Http(e) => !e.is_builder() && !e.is_decode(),
            MailError::Status { status, .. } => is_retryable_status(*status),
            _ => false,
        }
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("summarization failed: {0}")]
    Generation(#[from] GenerationError),

    #[error("visualization failed: {0}")]
    Visual(#[from] VisualError),

    #[error("delivery failed: {0}")]
    Mail(#[from] MailError),

    #[error("{failed} of {total} topics failed")]
    TopicsFailed { failed: usize, total: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_statuses() {
        assert!(is_retryable_status(429));
        assert!(is_retryable_status(500));
        assert!(is_retryable_status(503));
        assert!(!is_retryable_status(400));
        assert!(!is_retryable_status(401));
        assert!(!is_retryable_status(404));
    }

    #[test]
    fn test_status_errors_classify() {
        let e = FetchError::Status {
            url: "https://example.com".into(),
            status: 502,
        };
        assert!(e.is_transient());

        let e = GenerationError::Status {
            status: 401,
            body: "bad key".into(),
        };
        assert!(!e.is_transient());
        assert!(!GenerationError::EmptyResponse.is_transient());

        let e = MailError::Credential("expired".into());
        assert!(!e.is_transient());
    }

    #[test]
    fn test_config_error_message() {
        let e = ConfigError::MissingPrompts("kulfold".into());
        assert_eq!(e.to_string(), "no prompt templates for topic 'kulfold'");
        let e: PipelineError = e.into();
        assert_eq!(e.to_string(), "no prompt templates for topic 'kulfold'");
    }
}
