//! Text generation over an OpenAI-compatible chat completion API.
//!
//! # Architecture
//!
//! - [`GenerationClient`]: one prompt in, generated text out
//! - [`OpenAiClient`]: reqwest implementation posting to `{api_base}/chat/completions`
//! - [`Retrying`]: decorator adding backoff for transient failures
//!
//! Every request is single-turn: one `user` message carrying the whole prompt.

use crate::error::GenerationError;
use crate::retry::Retrying;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{debug, instrument, warn};

/// Produces text for a single-turn prompt.
pub trait GenerationClient {
    async fn generate(&self, prompt: &str) -> Result<String, GenerationError>;
}

impl<T: GenerationClient> GenerationClient for Retrying<T> {
    async fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
        self.policy
            .run("generate", || self.inner.generate(prompt))
            .await
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    messages: [ChatMessage<'a>; 1],
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

/// Chat completion client for OpenAI and compatible servers.
pub struct OpenAiClient {
    client: Client,
    endpoint: String,
    api_key: String,
    model: String,
    temperature: f32,
}

impl fmt::Debug for OpenAiClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenAiClient")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .finish()
    }
}

impl OpenAiClient {
    pub fn new(
        api_base: &str,
        api_key: String,
        model: String,
        temperature: f32,
        timeout: Duration,
    ) -> Result<Self, GenerationError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", api_base.trim_end_matches('/')),
            api_key,
            model,
            temperature,
        })
    }
}

impl GenerationClient for OpenAiClient {
    #[instrument(level = "info", skip_all, fields(model = %self.model, prompt_chars = prompt.chars().count()))]
    async fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
        let t0 = Instant::now();
        let body = ChatRequest {
            model: &self.model,
            temperature: self.temperature,
            messages: [ChatMessage {
                role: "user",
                content: prompt,
            }],
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(
                status = status.as_u16(),
                elapsed_ms = t0.elapsed().as_millis(),
                "Generation request rejected"
            );
            return Err(GenerationError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: ChatResponse = response.json().await?;
        let text = extract_text(parsed)?;
        debug!(
            elapsed_ms = t0.elapsed().as_millis(),
            chars = text.chars().count(),
            "Generation succeeded"
        );
        Ok(text)
    }
}

/// First choice's content, trimmed.
fn extract_text(response: ChatResponse) -> Result<String, GenerationError> {
    response
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or(GenerationError::EmptyResponse)
}

#[cfg(test)]
pub(crate) mod fake {
    use super::*;
    use std::cell::RefCell;

    /// Records prompts and answers `"summary N"` for the N-th call (1-based).
    #[derive(Debug, Default)]
    pub struct ScriptedGenerator {
        pub prompts: RefCell<Vec<String>>,
        pub fail_on_call: Option<usize>,
    }

    impl ScriptedGenerator {
        pub fn calls(&self) -> usize {
            self.prompts.borrow().len()
        }
    }

    impl GenerationClient for ScriptedGenerator {
        async fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
            self.prompts.borrow_mut().push(prompt.to_string());
            let n = self.calls();
            if self.fail_on_call == Some(n) {
                return Err(GenerationError::Status {
                    status: 400,
                    body: "rejected".into(),
                });
            }
            Ok(format!("summary {n}"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_shape() {
        let body = ChatRequest {
            model: "gpt-4o-mini",
            temperature: 0.7,
            messages: [ChatMessage {
                role: "user",
                content: "hello",
            }],
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["model"], "gpt-4o-mini");
        assert_eq!(json["messages"][0]["role"], "user");
        assert_eq!(json["messages"][0]["content"], "hello");
        assert!((json["temperature"].as_f64().unwrap() - 0.7).abs() < 1e-6);
    }

    #[test]
    fn test_extract_text_trims() {
        let resp: ChatResponse = serde_json::from_str(
            r#"{"choices":[{"message":{"role":"assistant","content":"  Összefoglaló \n"}}]}"#,
        )
        .unwrap();
        assert_eq!(extract_text(resp).unwrap(), "Összefoglaló");
    }

    #[test]
    fn test_extract_text_empty() {
        let resp: ChatResponse = serde_json::from_str(r#"{"choices":[]}"#).unwrap();
        assert!(matches!(extract_text(resp), Err(GenerationError::EmptyResponse)));

        let resp: ChatResponse =
            serde_json::from_str(r#"{"choices":[{"message":{"content":null}}]}"#).unwrap();
        assert!(matches!(extract_text(resp), Err(GenerationError::EmptyResponse)));
    }

    #[test]
    fn test_endpoint_joins_base() {
        let c = OpenAiClient::new(
            "https://api.openai.com/v1/",
            "secret-key".into(),
            "gpt-4o-mini".into(),
            0.7,
            Duration::from_secs(5),
        )
        .unwrap();
        assert_eq!(c.endpoint, "https://api.openai.com/v1/chat/completions");
        assert!(!format!("{c:?}").contains("secret-key"));
    }
}
